/// Chrome extension API bridge (wasm only)
///
/// Implements the worker channel, favicon store, image loader and timer
/// on top of chrome.runtime, chrome.offscreen, chrome.storage.local and fetch.
use async_trait::async_trait;
use js_sys::{Object, Promise, Reflect, Uint8Array};
use log::{debug, warn};
use serde::Serialize;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{JsFuture, spawn_local};
use web_sys::Response;

use crate::cache::FaviconStore;
use crate::config::FaviconConfig;
use crate::error::{FaviconError, TransportError};
use crate::favicon_meta::FaviconMeta;
use crate::image_processor::{ImageLoader, ImageProcessor, Timer};
use crate::offscreen::{handle_request, parse_message};
use crate::worker::{InstanceTracker, WorkerChannel, WorkerMessage, WorkerResponse};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = ["chrome", "runtime"], js_name = sendMessage, catch)]
    async fn runtime_send_message(message: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime"], js_name = getURL)]
    fn runtime_get_url(path: &str) -> String;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime"], js_name = getContexts, catch)]
    async fn runtime_get_contexts(filter: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime", "onMessage"], js_name = addListener)]
    fn on_message_add_listener(listener: &Closure<dyn FnMut(JsValue, JsValue, js_sys::Function) -> bool>);

    #[wasm_bindgen(js_namespace = ["chrome", "offscreen"], js_name = createDocument, catch)]
    async fn offscreen_create_document(params: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "offscreen"], js_name = closeDocument, catch)]
    async fn offscreen_close_document() -> Result<JsValue, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "storage", "local"], js_name = get, catch)]
    async fn storage_local_get(key: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "storage", "local"], js_name = set, catch)]
    async fn storage_local_set(items: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(js_name = setTimeout)]
    fn set_timeout(handler: &js_sys::Function, timeout: i32) -> JsValue;
}

/// Serialize to plain JS objects (not Maps), as the chrome APIs expect
pub fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, String> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| format!("Failed to serialize: {:?}", e))
}

pub fn js_error_message(error: &JsValue) -> String {
    if let Some(error) = error.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    error.as_string().unwrap_or_else(|| format!("{:?}", error))
}

pub fn extension_base_url() -> String {
    runtime_get_url("")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextFilter {
    context_types: Vec<&'static str>,
    document_urls: Vec<String>,
}

#[derive(Serialize)]
struct CreateDocumentParams {
    url: String,
    reasons: Vec<&'static str>,
    justification: &'static str,
}

/// The offscreen document, reached over chrome.runtime messaging
pub struct ChromeWorkerChannel {
    document_path: String,
    tracker: InstanceTracker,
}

impl ChromeWorkerChannel {
    pub fn new(config: &FaviconConfig) -> Self {
        ChromeWorkerChannel {
            document_path: config.offscreen_document_path.clone(),
            tracker: InstanceTracker::default(),
        }
    }
}

#[async_trait(?Send)]
impl WorkerChannel for ChromeWorkerChannel {
    async fn has_instance(&self) -> Result<bool, String> {
        let filter = to_js(&ContextFilter {
            context_types: vec!["OFFSCREEN_DOCUMENT"],
            document_urls: vec![runtime_get_url(&self.document_path)],
        })?;

        // getContexts is missing on older browsers
        let reported = runtime_get_contexts(filter)
            .await
            .map(|contexts| js_sys::Array::from(&contexts).length() > 0)
            .map_err(|e| format!("getContexts unavailable: {}", js_error_message(&e)));
        Ok(self.tracker.has_instance(reported))
    }

    async fn create_instance(&self) -> Result<(), String> {
        let params = to_js(&CreateDocumentParams {
            url: self.document_path.clone(),
            reasons: vec!["CANVAS_CONTEXT_CREATION", "DOM_PARSER"],
            justification: "Processing favicons",
        })?;

        match offscreen_create_document(params).await {
            Ok(_) => {
                self.tracker.mark_created();
                Ok(())
            }
            Err(e) => {
                let message = js_error_message(&e);
                if message.contains("single offscreen document") {
                    debug!("Offscreen document already exists");
                    self.tracker.mark_created();
                    return Ok(());
                }
                Err(message)
            }
        }
    }

    async fn destroy_instance(&self) -> Result<(), String> {
        let result = offscreen_close_document()
            .await
            .map(|_| ())
            .map_err(|e| js_error_message(&e));
        self.tracker.mark_destroyed();
        result
    }

    async fn send(&self, message: &WorkerMessage) -> Result<WorkerResponse, TransportError> {
        let message_js = to_js(message).map_err(TransportError::Other)?;
        let response = runtime_send_message(message_js)
            .await
            .map_err(|e| TransportError::classify(js_error_message(&e)))?;

        if response.is_undefined() || response.is_null() {
            return Err(TransportError::Other("no response from worker".to_string()));
        }
        serde_wasm_bindgen::from_value(response)
            .map_err(|e| TransportError::Other(format!("Failed to parse worker response: {:?}", e)))
    }
}

/// chrome.storage.local, one entry per cache key
pub struct ChromeStorageStore {
    prefix: String,
}

impl ChromeStorageStore {
    pub fn new(config: &FaviconConfig) -> Self {
        ChromeStorageStore {
            prefix: config.storage_key_prefix.clone(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait(?Send)]
impl FaviconStore for ChromeStorageStore {
    async fn fetch_favicon_meta(&self, key: &str) -> Result<Option<FaviconMeta>, FaviconError> {
        let storage_key = self.storage_key(key);
        let items = storage_local_get(&storage_key)
            .await
            .map_err(|e| FaviconError::Store(format!("Failed to get storage: {}", js_error_message(&e))))?;
        let value = Reflect::get(&items, &JsValue::from_str(&storage_key))
            .map_err(|e| FaviconError::Store(js_error_message(&e)))?;

        if value.is_null() || value.is_undefined() {
            return Ok(None);
        }
        serde_wasm_bindgen::from_value(value)
            .map(Some)
            .map_err(|e| FaviconError::Store(format!("Failed to parse favicon meta: {:?}", e)))
    }

    async fn add_favicon_meta(&self, key: &str, meta: &FaviconMeta) -> Result<(), FaviconError> {
        let value = to_js(meta).map_err(FaviconError::Store)?;
        let items = Object::new();
        Reflect::set(&items, &JsValue::from_str(&self.storage_key(key)), &value)
            .map_err(|e| FaviconError::Store(js_error_message(&e)))?;

        storage_local_set(items.into())
            .await
            .map(|_| ())
            .map_err(|e| FaviconError::Store(format!("Failed to save storage: {}", js_error_message(&e))))
    }
}

/// Loads image bytes with fetch from the worker document's window
pub struct FetchImageLoader;

#[async_trait(?Send)]
impl ImageLoader for FetchImageLoader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FaviconError> {
        let load_error = |reason: String| FaviconError::ImageLoad {
            url: url.to_string(),
            reason,
        };

        let window = web_sys::window().ok_or_else(|| load_error("no window".to_string()))?;
        let response: Response = JsFuture::from(window.fetch_with_str(url))
            .await
            .map_err(|e| load_error(js_error_message(&e)))?
            .dyn_into()
            .map_err(|_| load_error("fetch did not return a Response".to_string()))?;

        if !response.ok() {
            return Err(load_error(format!("HTTP {}", response.status())));
        }

        let body = response
            .array_buffer()
            .map_err(|e| load_error(js_error_message(&e)))?;
        let buffer = JsFuture::from(body)
            .await
            .map_err(|e| load_error(js_error_message(&e)))?;
        Ok(Uint8Array::new(&buffer).to_vec())
    }
}

pub struct JsTimer;

#[async_trait(?Send)]
impl Timer for JsTimer {
    async fn sleep(&self, ms: u32) {
        let timeout = i32::try_from(ms).unwrap_or(i32::MAX);
        let promise = Promise::new(&mut |resolve, _reject| {
            set_timeout(&resolve, timeout);
        });
        let _ = JsFuture::from(promise).await;
    }
}

/// Answer favicon requests from inside the offscreen document
pub fn install_offscreen_listener() {
    let processor = Rc::new(ImageProcessor::new(FetchImageLoader, JsTimer));

    let listener = Closure::wrap(Box::new(
        move |message: JsValue, _sender: JsValue, send_response: js_sys::Function| -> bool {
            let Ok(value) = serde_wasm_bindgen::from_value::<serde_json::Value>(message) else {
                return false;
            };
            let Some(request) = parse_message(value) else {
                return false;
            };

            let processor = Rc::clone(&processor);
            spawn_local(async move {
                let response = handle_request(processor.as_ref(), request).await;
                match to_js(&response) {
                    Ok(response_js) => {
                        if let Err(e) = send_response.call1(&JsValue::NULL, &response_js) {
                            warn!("Failed to send worker response: {}", js_error_message(&e));
                        }
                    }
                    Err(e) => warn!("{}", e),
                }
            });

            // keep the message channel open for the async response
            true
        },
    ) as Box<dyn FnMut(JsValue, JsValue, js_sys::Function) -> bool>);

    on_message_add_listener(&listener);
    listener.forget();
}
