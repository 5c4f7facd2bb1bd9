/// Favicon acquisition, normalisation and default-icon detection for a
/// tab-suspension extension. Built with Rust + WASM.

pub mod cache;
pub mod config;
pub mod data_url;
pub mod error;
pub mod favicon_meta;
pub mod fingerprints;
pub mod image_processor;
pub mod offscreen;
pub mod resolver;
pub mod url_keys;
pub mod worker;

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
mod chrome;

pub use cache::{FaviconCache, FaviconStore, MemoryFaviconStore};
pub use config::FaviconConfig;
pub use error::{FaviconError, TransportError};
pub use favicon_meta::{ChromeTab, FaviconMeta, Fingerprint, TabDescriptor, TabView};
pub use fingerprints::DefaultFingerprints;
pub use image_processor::{FaviconBackend, ImageLoader, ImageProcessor, Timer};
pub use resolver::FaviconResolver;
pub use worker::{RetryPolicy, WorkerChannel, WorkerClient};

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
use wasm_bindgen::prelude::*;

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
type BackgroundResolver = FaviconResolver<WorkerClient<chrome::ChromeWorkerChannel>, chrome::ChromeStorageStore>;

// Set up panic hook and logging for both the background worker and the offscreen document
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

// Entry point for the offscreen document
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
#[wasm_bindgen]
pub fn start_offscreen() {
    chrome::install_offscreen_listener();
}

/// Favicon resolution handle for the background service worker
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
#[wasm_bindgen]
pub struct FaviconService {
    resolver: std::rc::Rc<BackgroundResolver>,
}

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
#[wasm_bindgen]
impl FaviconService {
    /// Build the fallback icon and default fingerprints. `config` may be
    /// undefined or a partial `FaviconConfig`.
    pub async fn init(config: JsValue) -> Result<FaviconService, JsValue> {
        let config: FaviconConfig = if config.is_undefined() || config.is_null() {
            FaviconConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)
                .map_err(|e| JsValue::from_str(&format!("Invalid favicon config: {:?}", e)))?
        };
        let config = if config.extension_base_url.is_empty() {
            config.with_extension_base_url(chrome::extension_base_url())
        } else {
            config
        };

        let backend = WorkerClient::new(chrome::ChromeWorkerChannel::new(&config));
        let cache = FaviconCache::new(chrome::ChromeStorageStore::new(&config));
        let resolver = FaviconResolver::init(backend, cache, config, &chrome::JsTimer).await;

        Ok(FaviconService {
            resolver: std::rc::Rc::new(resolver),
        })
    }

    /// Resolve favicon meta for a chrome.tabs.Tab
    pub fn resolve(&self, tab: JsValue) -> js_sys::Promise {
        let resolver = std::rc::Rc::clone(&self.resolver);
        wasm_bindgen_futures::future_to_promise(async move {
            let tab: ChromeTab = serde_wasm_bindgen::from_value(tab)
                .map_err(|e| JsValue::from_str(&format!("Invalid tab: {:?}", e)))?;
            let suspended_page_url = resolver.config().suspended_page_url();

            let meta = resolver.resolve(&TabView::new(&tab, &suspended_page_url)).await;
            chrome::to_js(&meta).map_err(|e| JsValue::from_str(&e))
        })
    }

    /// Write favicon meta through to the cache for `url`
    pub fn save(&self, url: String, meta: JsValue) -> js_sys::Promise {
        let resolver = std::rc::Rc::clone(&self.resolver);
        wasm_bindgen_futures::future_to_promise(async move {
            let meta: FaviconMeta = serde_wasm_bindgen::from_value(meta)
                .map_err(|e| JsValue::from_str(&format!("Invalid favicon meta: {:?}", e)))?;
            resolver
                .save(&url, &meta)
                .await
                .map_err(|e| JsValue::from_str(&e.to_string()))?;
            Ok(JsValue::UNDEFINED)
        })
    }
}
