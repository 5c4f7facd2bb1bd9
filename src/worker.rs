/// Lifecycle and messaging for the isolated image-processing context
///
/// Creation is single-flight: the first caller that finds no creation in
/// progress stores a shared future, and every caller arriving before it
/// settles awaits that same future. Requests themselves are not
/// serialised.
use async_trait::async_trait;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::data_url::is_image_data_url;
use crate::error::{FaviconError, TransportError};
use crate::favicon_meta::{FaviconMeta, Fingerprint};
use crate::image_processor::FaviconBackend;

pub const WORKER_TARGET: &str = "offscreen";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum WorkerRequest {
    #[serde(rename_all = "camelCase")]
    BuildFaviconMetaData { url: String, timeout: u32 },
    #[serde(rename_all = "camelCase")]
    CreateImageFingerprint { data_url: String },
}

impl WorkerRequest {
    pub fn action(&self) -> &'static str {
        match self {
            WorkerRequest::BuildFaviconMetaData { .. } => "buildFaviconMetaData",
            WorkerRequest::CreateImageFingerprint { .. } => "createImageFingerprint",
        }
    }
}

/// Request envelope as it travels over the runtime message bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub target: String,
    #[serde(flatten)]
    pub request: WorkerRequest,
}

impl WorkerMessage {
    pub fn new(request: WorkerRequest) -> Self {
        WorkerMessage {
            target: WORKER_TARGET.to_string(),
            request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        WorkerResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        WorkerResponse {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Host side of the isolated context: lifecycle plus raw transport
#[async_trait(?Send)]
pub trait WorkerChannel {
    async fn has_instance(&self) -> Result<bool, String>;
    async fn create_instance(&self) -> Result<(), String>;
    async fn destroy_instance(&self) -> Result<(), String>;
    async fn send(&self, message: &WorkerMessage) -> Result<WorkerResponse, TransportError>;
}

/// How many times a request is re-sent after a recreate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_reconnects: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_reconnects: 1 }
    }
}

type PendingCreation = Shared<LocalBoxFuture<'static, Result<(), String>>>;

/// A creation in flight, tagged with the generation it produces
type CreationSlot = Option<(u64, PendingCreation)>;

/// Local record of whether this side created the instance, for hosts
/// that cannot report it.
#[derive(Debug, Default)]
pub struct InstanceTracker {
    created: Cell<bool>,
}

impl InstanceTracker {
    pub fn mark_created(&self) {
        self.created.set(true);
    }

    pub fn mark_destroyed(&self) {
        self.created.set(false);
    }

    /// Answer `has_instance` from the host's report, or from the local
    /// record when the host query failed.
    pub fn has_instance(&self, reported: Result<bool, String>) -> bool {
        match reported {
            Ok(exists) => {
                self.created.set(exists);
                exists
            }
            Err(e) => {
                debug!("Instance query failed ({}), assuming created = {}", e, self.created.get());
                self.created.get()
            }
        }
    }
}

pub struct WorkerClient<C> {
    channel: Rc<C>,
    creating: Rc<RefCell<CreationSlot>>,
    /// Bumped each time a caller replaces a lost instance
    generation: Rc<Cell<u64>>,
    policy: RetryPolicy,
}

impl<C> Clone for WorkerClient<C> {
    fn clone(&self) -> Self {
        WorkerClient {
            channel: Rc::clone(&self.channel),
            creating: Rc::clone(&self.creating),
            generation: Rc::clone(&self.generation),
            policy: self.policy,
        }
    }
}

impl<C: WorkerChannel + 'static> WorkerClient<C> {
    pub fn new(channel: C) -> Self {
        Self::with_policy(channel, RetryPolicy::default())
    }

    pub fn with_policy(channel: C, policy: RetryPolicy) -> Self {
        WorkerClient {
            channel: Rc::new(channel),
            creating: Rc::new(RefCell::new(None)),
            generation: Rc::new(Cell::new(0)),
            policy,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Make sure an instance exists, joining any creation already in flight
    pub async fn ensure_instance(&self) -> Result<(), FaviconError> {
        let pending = {
            let mut slot = self.creating.borrow_mut();
            match slot.as_ref() {
                Some((_, pending)) => pending.clone(),
                None => {
                    let pending = self.start_creation(self.generation.get(), false);
                    *slot = Some((self.generation.get(), pending.clone()));
                    pending
                }
            }
        };

        pending.await.map_err(FaviconError::WorkerUnreachable)
    }

    /// Replace the instance a request under `seen_generation` found
    /// unreachable. Callers holding an older generation skip this, since
    /// another caller already replaced the instance they used.
    fn replace_instance(&self, seen_generation: u64) {
        if self.generation.get() != seen_generation {
            debug!("Worker instance already replaced");
            return;
        }

        let generation = seen_generation + 1;
        self.generation.set(generation);
        let pending = self.start_creation(generation, true);
        *self.creating.borrow_mut() = Some((generation, pending));
    }

    fn start_creation(&self, generation: u64, replace: bool) -> PendingCreation {
        let channel = Rc::clone(&self.channel);
        let creating = Rc::clone(&self.creating);

        async move {
            let result = if replace {
                if let Err(e) = channel.destroy_instance().await {
                    debug!("Ignoring error while closing worker: {}", e);
                }
                debug!("Recreating worker instance");
                channel.create_instance().await
            } else {
                match channel.has_instance().await {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        debug!("Creating worker instance");
                        channel.create_instance().await
                    }
                    Err(e) => Err(e),
                }
            };

            let mut slot = creating.borrow_mut();
            if slot.as_ref().is_some_and(|(tag, _)| *tag == generation) {
                slot.take();
            }
            result
        }
        .boxed_local()
        .shared()
    }

    /// Send a request and decode the `data` of a successful response.
    ///
    /// A disconnect triggers destroy, recreate and resend, up to
    /// `max_reconnects` times. Explicit failure responses are returned
    /// as `FaviconError::Worker` without retrying.
    pub async fn invoke<T: DeserializeOwned>(&self, request: WorkerRequest) -> Result<T, FaviconError> {
        let action = request.action();
        let message = WorkerMessage::new(request);
        let mut reconnects = 0;

        loop {
            let generation = self.generation.get();
            self.ensure_instance().await?;

            match self.channel.send(&message).await {
                Ok(response) => return decode_response(action, response),
                Err(e) if e.is_disconnect() && reconnects < self.policy.max_reconnects => {
                    reconnects += 1;
                    warn!("Worker unreachable for {}: {}. Recreating.", action, e);
                    self.replace_instance(generation);
                }
                Err(e) if e.is_disconnect() => {
                    return Err(FaviconError::WorkerUnreachable(format!(
                        "{} failed after {} reconnect(s): {}",
                        action, reconnects, e
                    )));
                }
                Err(e) => {
                    warn!("Error sending {} to worker: {}", action, e);
                    return Err(FaviconError::Transport(e.to_string()));
                }
            }
        }
    }
}

fn decode_response<T: DeserializeOwned>(action: &str, response: WorkerResponse) -> Result<T, FaviconError> {
    if !response.success {
        let message = response
            .error
            .unwrap_or_else(|| "unknown error in worker".to_string());
        warn!("Worker error for {}: {}", action, message);
        return Err(FaviconError::Worker {
            action: action.to_string(),
            message,
        });
    }

    let data = response.data.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(data).map_err(|e| FaviconError::Worker {
        action: action.to_string(),
        message: format!("malformed response data: {}", e),
    })
}

#[async_trait(?Send)]
impl<C: WorkerChannel + 'static> FaviconBackend for WorkerClient<C> {
    async fn build_favicon_meta(&self, url: &str, timeout_ms: u32) -> Result<FaviconMeta, FaviconError> {
        if url.is_empty() {
            return Err(FaviconError::InvalidInput("empty favicon URL".to_string()));
        }
        self.invoke(WorkerRequest::BuildFaviconMetaData {
            url: url.to_string(),
            timeout: timeout_ms,
        })
        .await
    }

    async fn create_fingerprint(&self, data_url: &str) -> Result<Fingerprint, FaviconError> {
        if !is_image_data_url(data_url) {
            return Err(FaviconError::InvalidInput(
                "fingerprints are only built from image data URLs".to_string(),
            ));
        }
        self.invoke(WorkerRequest::CreateImageFingerprint {
            data_url: data_url.to_string(),
        })
        .await
    }
}
