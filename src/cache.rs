/// Favicon cache: dual-key reads and writes over a persistent store
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::error::FaviconError;
use crate::favicon_meta::FaviconMeta;
use crate::url_keys::{full_key, root_key};

/// Durable key-value storage for favicon metadata
#[async_trait(?Send)]
pub trait FaviconStore {
    async fn fetch_favicon_meta(&self, key: &str) -> Result<Option<FaviconMeta>, FaviconError>;
    async fn add_favicon_meta(&self, key: &str, meta: &FaviconMeta) -> Result<(), FaviconError>;
}

/// Snapshot of cached entries, serialisable as one storage blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaviconEntries {
    pub entries: BTreeMap<String, FaviconMeta>,
}

/// In-memory store, used when no browser storage is available and in tests
#[derive(Debug, Default)]
pub struct MemoryFaviconStore {
    data: RefCell<FaviconEntries>,
}

impl MemoryFaviconStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(entries: FaviconEntries) -> Self {
        MemoryFaviconStore {
            data: RefCell::new(entries),
        }
    }

    pub fn snapshot(&self) -> FaviconEntries {
        self.data.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait(?Send)]
impl FaviconStore for MemoryFaviconStore {
    async fn fetch_favicon_meta(&self, key: &str) -> Result<Option<FaviconMeta>, FaviconError> {
        Ok(self.data.borrow().entries.get(key).cloned())
    }

    async fn add_favicon_meta(&self, key: &str, meta: &FaviconMeta) -> Result<(), FaviconError> {
        self.data
            .borrow_mut()
            .entries
            .insert(key.to_string(), meta.clone());
        Ok(())
    }
}

pub struct FaviconCache<S> {
    store: S,
}

impl<S: FaviconStore> FaviconCache<S> {
    pub fn new(store: S) -> Self {
        FaviconCache { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Look up by full key, then by root key
    pub async fn get(&self, url: &str) -> Result<Option<FaviconMeta>, FaviconError> {
        if url.is_empty() {
            return Ok(None);
        }

        let full = full_key(url);
        if let Some(meta) = self.store.fetch_favicon_meta(&full).await? {
            debug!("Favicon cache hit for {}", full);
            return Ok(Some(meta));
        }

        let root = root_key(url);
        let meta = self.store.fetch_favicon_meta(&root).await?;
        if meta.is_some() {
            debug!("Favicon cache hit for root {}", root);
        }
        Ok(meta)
    }

    /// Write `meta` under both the full and the root key.
    ///
    /// Metadata without both image payloads is never stored; the call
    /// logs and returns `CacheWriteSkipped`.
    pub async fn put(&self, url: &str, meta: &FaviconMeta) -> Result<(), FaviconError> {
        if !meta.has_images() {
            warn!("Attempted to save empty or invalid favicon meta for {}. Skipping.", url);
            return Err(FaviconError::CacheWriteSkipped { url: url.to_string() });
        }

        let full = full_key(url);
        let root = root_key(url);
        debug!("Saving favicon cache entry for {}", full);

        let full_result = self.store.add_favicon_meta(&full, meta).await;
        let root_result = self.store.add_favicon_meta(&root, meta).await;
        full_result.and(root_result)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Memory store whose reads, or writes to chosen keys, fail
    #[derive(Default)]
    pub struct FailingStore {
        inner: MemoryFaviconStore,
        fail_reads: bool,
        fail_writes_for: Vec<String>,
    }

    impl FailingStore {
        pub fn failing_reads() -> Self {
            FailingStore {
                fail_reads: true,
                ..Default::default()
            }
        }

        pub fn failing_writes_for(key: &str) -> Self {
            FailingStore {
                fail_writes_for: vec![key.to_string()],
                ..Default::default()
            }
        }

        pub fn written_keys(&self) -> Vec<String> {
            self.inner.snapshot().entries.into_keys().collect()
        }
    }

    #[async_trait(?Send)]
    impl FaviconStore for FailingStore {
        async fn fetch_favicon_meta(&self, key: &str) -> Result<Option<FaviconMeta>, FaviconError> {
            if self.fail_reads {
                return Err(FaviconError::Store("Failed to get storage: unavailable".to_string()));
            }
            self.inner.fetch_favicon_meta(key).await
        }

        async fn add_favicon_meta(&self, key: &str, meta: &FaviconMeta) -> Result<(), FaviconError> {
            if self.fail_writes_for.iter().any(|k| k == key) {
                return Err(FaviconError::Store(format!("Failed to save storage: quota exceeded for {}", key)));
            }
            self.inner.add_favicon_meta(key, meta).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FailingStore;
    use super::*;
    use crate::favicon_meta::EMPTY_IMAGE_SENTINEL;
    use futures::executor::block_on;

    fn create_test_meta(source_url: &str) -> FaviconMeta {
        FaviconMeta {
            source_url: source_url.to_string(),
            is_dark: false,
            normalized_image: "data:image/png;base64,AAAA".to_string(),
            semi_transparent_image: "data:image/png;base64,BBBB".to_string(),
        }
    }

    #[test]
    fn test_put_writes_full_and_root_keys() {
        let cache = FaviconCache::new(MemoryFaviconStore::new());
        let meta = create_test_meta("https://github.com/favicon.ico");

        block_on(cache.put("https://github.com/rust-lang/rust?tab=readme", &meta)).unwrap();

        let snapshot = cache.store().snapshot();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries.get("https://github.com/rust-lang/rust"), Some(&meta));
        assert_eq!(snapshot.entries.get("https://github.com"), Some(&meta));
    }

    #[test]
    fn test_round_trip_full_and_root() {
        let cache = FaviconCache::new(MemoryFaviconStore::new());
        let meta = create_test_meta("https://github.com/favicon.ico");
        let url = "https://github.com/rust-lang/rust";

        block_on(cache.put(url, &meta)).unwrap();

        assert_eq!(block_on(cache.get(url)).unwrap(), Some(meta.clone()));
        assert_eq!(block_on(cache.get("https://github.com")).unwrap(), Some(meta.clone()));
        assert_eq!(block_on(cache.get("https://github.com/")).unwrap(), Some(meta));
    }

    #[test]
    fn test_get_falls_back_to_root() {
        let cache = FaviconCache::new(MemoryFaviconStore::new());
        let meta = create_test_meta("https://github.com/favicon.ico");

        block_on(cache.put("https://github.com/rust-lang/rust", &meta)).unwrap();

        let hit = block_on(cache.get("https://github.com/yewstack/yew")).unwrap();
        assert_eq!(hit, Some(meta));
    }

    #[test]
    fn test_get_prefers_full_key() {
        let cache = FaviconCache::new(MemoryFaviconStore::new());
        let site = create_test_meta("https://github.com/favicon.ico");
        let page = create_test_meta("https://github.com/rust-lang/rust/icon.png");

        block_on(cache.put("https://github.com", &site)).unwrap();
        block_on(cache.put("https://github.com/rust-lang/rust", &page)).unwrap();
        // second put overwrote the shared root entry
        block_on(cache.put("https://github.com", &site)).unwrap();

        let hit = block_on(cache.get("https://github.com/rust-lang/rust#readme")).unwrap();
        assert_eq!(hit, Some(page));
    }

    #[test]
    fn test_get_miss() {
        let cache = FaviconCache::new(MemoryFaviconStore::new());
        assert_eq!(block_on(cache.get("https://github.com")).unwrap(), None);
        assert_eq!(block_on(cache.get("")).unwrap(), None);
    }

    #[test]
    fn test_put_skips_empty_meta() {
        let cache = FaviconCache::new(MemoryFaviconStore::new());
        let mut meta = create_test_meta("https://github.com/favicon.ico");
        meta.normalized_image = EMPTY_IMAGE_SENTINEL.to_string();

        let result = block_on(cache.put("https://github.com", &meta));

        assert_eq!(
            result,
            Err(FaviconError::CacheWriteSkipped {
                url: "https://github.com".to_string()
            })
        );
        assert!(cache.store().is_empty());
    }

    #[test]
    fn test_put_writes_root_when_full_key_fails() {
        let cache = FaviconCache::new(FailingStore::failing_writes_for("https://github.com/rust-lang/rust"));
        let meta = create_test_meta("https://github.com/favicon.ico");

        let result = block_on(cache.put("https://github.com/rust-lang/rust", &meta));

        assert!(matches!(result, Err(FaviconError::Store(_))));
        assert_eq!(cache.store().written_keys(), vec!["https://github.com".to_string()]);
    }

    #[test]
    fn test_put_writes_full_when_root_key_fails() {
        let cache = FaviconCache::new(FailingStore::failing_writes_for("https://github.com"));
        let meta = create_test_meta("https://github.com/favicon.ico");

        let result = block_on(cache.put("https://github.com/rust-lang/rust", &meta));

        assert!(matches!(result, Err(FaviconError::Store(_))));
        assert_eq!(
            cache.store().written_keys(),
            vec!["https://github.com/rust-lang/rust".to_string()]
        );
    }

    #[test]
    fn test_get_propagates_store_errors() {
        let cache = FaviconCache::new(FailingStore::failing_reads());
        let result = block_on(cache.get("https://github.com"));
        assert!(matches!(result, Err(FaviconError::Store(_))));
    }

    #[test]
    fn test_snapshot_serialization() {
        let store = MemoryFaviconStore::new();
        block_on(store.add_favicon_meta("https://github.com", &create_test_meta("a"))).unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let restored = MemoryFaviconStore::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.len(), 1);
        assert_eq!(restored.snapshot(), store.snapshot());
    }
}
