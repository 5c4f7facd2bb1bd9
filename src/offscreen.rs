/// Request dispatch inside the isolated worker document
use log::warn;
use serde::Serialize;

use crate::error::FaviconError;
use crate::image_processor::FaviconBackend;
use crate::worker::{WORKER_TARGET, WorkerMessage, WorkerRequest, WorkerResponse};

/// Messages on the runtime bus that are addressed to the worker.
/// Anything else (wrong target, unknown action) is left for other listeners.
pub fn parse_message(value: serde_json::Value) -> Option<WorkerRequest> {
    let message: WorkerMessage = serde_json::from_value(value).ok()?;
    (message.target == WORKER_TARGET).then_some(message.request)
}

/// Run one request and wrap the outcome in a response envelope
pub async fn handle_request<B: FaviconBackend>(backend: &B, request: WorkerRequest) -> WorkerResponse {
    let action = request.action();
    let result = match request {
        WorkerRequest::BuildFaviconMetaData { url, timeout } => {
            to_response(backend.build_favicon_meta(&url, timeout).await)
        }
        WorkerRequest::CreateImageFingerprint { data_url } => {
            to_response(backend.create_fingerprint(&data_url).await)
        }
    };

    if let Some(error) = &result.error {
        warn!("{} failed in worker: {}", action, error);
    }
    result
}

fn to_response<T: Serialize>(result: Result<T, FaviconError>) -> WorkerResponse {
    match result.and_then(|data| {
        serde_json::to_value(data).map_err(|e| FaviconError::Encode(e.to_string()))
    }) {
        Ok(data) => WorkerResponse::ok(data),
        Err(e) => WorkerResponse::err(e.to_string()),
    }
}
