/// Favicon resolution for tabs
///
/// Order of sources, stopping at the first valid result:
/// 1. Cache (full URL key, then root key)
/// 2. The icon URL reported by the tab
/// 3. The external icon lookup service
/// 4. The bundled default icon (never cached)
///
/// A candidate that fails on its own (bad image, timeout) moves on to the
/// next source. When the worker itself is unreachable, the remaining
/// sources are skipped.
use log::{debug, error, info, warn};

use crate::cache::{FaviconCache, FaviconStore};
use crate::config::FaviconConfig;
use crate::error::FaviconError;
use crate::favicon_meta::{FaviconMeta, TabDescriptor};
use crate::fingerprints::{DefaultFingerprints, DefaultFingerprintsBuilder, FingerprintVariant};
use crate::image_processor::{FaviconBackend, Timer};
use crate::url_keys::is_internal_url;

const LAST_RESORT_NORMALIZED: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAABAAAAAQCAYAAAAf8/9hAAAAYklEQVQ4T2NkoBAwIuuPior6j8O8xmXLljVgk8MwYNmyZdgMfcjAwLAAmyFEGfDv3z9FJiamA9gMIcoAkKsiIiIUsBlClAHofkf2JkED0DWDAnrUgOEfBsRkTpzpgBjN6GoA24V1Efr1zoAAAAAASUVORK5CYII=";
const LAST_RESORT_SEMI_TRANSPARENT: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAABAAAAAQCAYAAAAf8/9hAAAAaUlEQVQ4T2NkoBAwIuuPioqqx2YeExPTwSVLlhzAJodhwLJlyxrRDWVkZPzIyMh4AZshRBnAxsY28ffv3wnYDCHKAJCrEhISBLAZQpQB6H5H9iZBA9A1gwJ61IDhHwbEZE6c6YAYzehqAAmQeBHM42eMAAAAAElFTkSuQmCC";

/// Default icon pair used when even the bundled default cannot be processed
pub fn last_resort_fallback(config: &FaviconConfig) -> FaviconMeta {
    FaviconMeta {
        source_url: config.default_icon_url(),
        is_dark: true,
        normalized_image: LAST_RESORT_NORMALIZED.to_string(),
        semi_transparent_image: LAST_RESORT_SEMI_TRANSPARENT.to_string(),
    }
}

pub struct FaviconResolver<B, S> {
    backend: B,
    cache: FaviconCache<S>,
    config: FaviconConfig,
    fallback: FaviconMeta,
    defaults: DefaultFingerprints,
}

impl<B: FaviconBackend, S: FaviconStore> FaviconResolver<B, S> {
    pub fn new(
        backend: B,
        cache: FaviconCache<S>,
        config: FaviconConfig,
        fallback: FaviconMeta,
        defaults: DefaultFingerprints,
    ) -> Self {
        FaviconResolver {
            backend,
            cache,
            config,
            fallback,
            defaults,
        }
    }

    /// Process the bundled default icon and fingerprint every known
    /// placeholder icon. Never fails: each step that goes wrong is logged
    /// and skipped.
    pub async fn init<T: Timer>(backend: B, cache: FaviconCache<S>, config: FaviconConfig, timer: &T) -> Self {
        let fallback = build_fallback(&backend, &config).await;

        let mut builder = DefaultFingerprints::builder();
        register_fingerprints(&mut builder, &backend, &fallback.source_url, &fallback).await;

        for icon_url in config.placeholder_icon_urls() {
            match process_with_retries(&backend, &config, &icon_url, timer).await {
                Ok(meta) => {
                    debug!("Built default-like favicon meta for {}", icon_url);
                    register_fingerprints(&mut builder, &backend, &icon_url, &meta).await;
                }
                Err(e) => warn!("Failed to build default-like favicon meta for {}: {}", icon_url, e),
            }
        }

        let defaults = builder.build();
        info!("Favicon resolver initialised with {} default fingerprints", defaults.len());
        Self::new(backend, cache, config, fallback, defaults)
    }

    pub fn fallback(&self) -> &FaviconMeta {
        &self.fallback
    }

    pub fn defaults(&self) -> &DefaultFingerprints {
        &self.defaults
    }

    pub fn cache(&self) -> &FaviconCache<S> {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &FaviconConfig {
        &self.config
    }

    /// Resolve the favicon for a tab. Always returns something: the
    /// fallback default when no source produces a valid icon.
    pub async fn resolve<D: TabDescriptor + ?Sized>(&self, tab: &D) -> FaviconMeta {
        let Some(url) = tab.url() else {
            return self.fallback.clone();
        };
        if tab.is_file_tab() {
            return self.fallback.clone();
        }

        let effective_url = if tab.is_placeholder() {
            match tab.original_url() {
                Some(original) => original,
                None => return self.fallback.clone(),
            }
        } else {
            url.to_string()
        };

        match self.cache.get(&effective_url).await {
            Ok(Some(meta)) => return meta,
            Ok(None) => {}
            Err(e) => warn!("Favicon cache lookup failed for {}: {}", effective_url, e),
        }

        let mut candidates = Vec::with_capacity(2);
        if let Some(icon_url) = tab.icon_url().filter(|icon| self.is_fetchable_icon(icon)) {
            candidates.push(icon_url.to_string());
        }
        candidates.push(self.config.icon_service_lookup_url(&effective_url));

        for candidate in &candidates {
            debug!("Attempting favicon for {} from {}", effective_url, candidate);
            match self.try_candidate(candidate).await {
                Ok(Some(meta)) => {
                    self.write_through(&effective_url, &meta).await;
                    return meta;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Favicon worker unavailable while resolving {}: {}", effective_url, e);
                    return self.fallback.clone();
                }
            }
        }

        debug!("No usable favicon for {}. Using default icon.", effective_url);
        self.fallback.clone()
    }

    /// A meta is valid when it has both payloads and neither fingerprint
    /// matches a registered default icon.
    pub async fn is_valid(&self, meta: &FaviconMeta) -> bool {
        if !meta.has_images() {
            return false;
        }

        for image in [&meta.normalized_image, &meta.semi_transparent_image] {
            let fingerprint = match self.backend.create_fingerprint(image).await {
                Ok(fingerprint) => fingerprint,
                Err(e) => {
                    warn!("Fingerprint creation failed during validation: {}", e);
                    return false;
                }
            };
            if let Some(label) = self.defaults.find_match(&fingerprint) {
                debug!(
                    "Favicon from {} matches default icon fingerprint {}",
                    meta.source_url, label
                );
                return false;
            }
        }
        true
    }

    /// Write a meta through to the cache for `url`
    pub async fn save(&self, url: &str, meta: &FaviconMeta) -> Result<(), FaviconError> {
        self.cache.put(url, meta).await
    }

    fn is_fetchable_icon(&self, icon_url: &str) -> bool {
        !is_internal_url(icon_url)
            && !self
                .config
                .placeholder_icon_urls()
                .iter()
                .any(|placeholder| placeholder == icon_url)
    }

    /// `Ok(None)` when this candidate is unusable, `Err` when no other
    /// candidate can succeed either.
    async fn try_candidate(&self, url: &str) -> Result<Option<FaviconMeta>, FaviconError> {
        match self.backend.build_favicon_meta(url, self.config.load_timeout_ms).await {
            Ok(meta) => {
                if self.is_valid(&meta).await {
                    Ok(Some(meta))
                } else {
                    debug!("Favicon from {} is invalid or default-like", url);
                    Ok(None)
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!("Favicon candidate {} failed: {}", url, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn write_through(&self, url: &str, meta: &FaviconMeta) {
        if let Err(e) = self.cache.put(url, meta).await {
            warn!("Favicon cache write failed for {}: {}", url, e);
        }
    }
}

async fn build_fallback<B: FaviconBackend>(backend: &B, config: &FaviconConfig) -> FaviconMeta {
    let default_url = config.default_icon_url();
    match backend.build_favicon_meta(&default_url, config.load_timeout_ms).await {
        Ok(meta) if meta.has_images() => meta,
        Ok(_) => {
            warn!("Default favicon produced empty images. Using hardcoded fallback values.");
            last_resort_fallback(config)
        }
        Err(e) => {
            warn!("Failed to process default favicon: {}. Using hardcoded fallback values.", e);
            last_resort_fallback(config)
        }
    }
}

async fn process_with_retries<B: FaviconBackend, T: Timer>(
    backend: &B,
    config: &FaviconConfig,
    url: &str,
    timer: &T,
) -> Result<FaviconMeta, FaviconError> {
    let mut attempt = 0;
    loop {
        match backend.build_favicon_meta(url, config.load_timeout_ms).await {
            Ok(meta) => return Ok(meta),
            Err(FaviconError::InvalidInput(reason)) => return Err(FaviconError::InvalidInput(reason)),
            Err(e) if attempt < config.default_icon_retries => {
                attempt += 1;
                debug!("Retrying {} ({}/{}): {}", url, attempt, config.default_icon_retries, e);
                timer.sleep(config.retry_delay_ms).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn register_fingerprints<B: FaviconBackend>(
    builder: &mut DefaultFingerprintsBuilder,
    backend: &B,
    id: &str,
    meta: &FaviconMeta,
) {
    if !meta.has_images() {
        warn!("Skipping fingerprint for {} due to missing image data", id);
        return;
    }

    let variants = [
        (FingerprintVariant::Normalized, &meta.normalized_image),
        (FingerprintVariant::SemiTransparent, &meta.semi_transparent_image),
    ];
    for (variant, image) in variants {
        match backend.create_fingerprint(image).await {
            Ok(fingerprint) => {
                builder.insert(id, variant, fingerprint);
            }
            Err(e) => warn!("Failed to create fingerprint for {}: {}", id, e),
        }
    }
}
