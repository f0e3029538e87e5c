#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use placequery::cache::{CompositionAdapter, MemoryDatasetStore};
use placequery::compiler::Compiler;
use placequery::error::{PlacequeryError, Result};
use placequery::executor::{Executor, RetryPolicy};
use placequery::optimizer::Popularity;
use placequery::provider::{ProviderRequest, ProviderResponse, Transport};
use placequery::search::SearchPipeline;

type Responder = Box<dyn Fn(&ProviderRequest) -> Result<ProviderResponse> + Send + Sync>;

/// Answers provider requests from a closure and remembers every request it saw.
pub struct ScriptedTransport {
    responder: Responder,
    requests: Mutex<Vec<ProviderRequest>>,
}
impl ScriptedTransport {
    pub fn new(responder: impl Fn(&ProviderRequest) -> Result<ProviderResponse> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }
    /// Every call is refused with the given status.
    pub fn failing(status: u16) -> Self {
        Self::new(move |_| {
            Ok(ProviderResponse {
                status,
                body: Value::Null,
            })
        })
    }
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        self.requests.lock().unwrap().push(request.clone());
        (self.responder)(request)
    }
}

pub fn transport_error() -> Result<ProviderResponse> {
    Err(PlacequeryError::Provider("connection reset".into()))
}

/// A record in the current provider schema.
pub fn place(id: &str, types: &[&str]) -> Value {
    json!({
        "id": id,
        "displayName": { "text": format!("Place {}", id) },
        "formattedAddress": "1 Main St",
        "location": { "latitude": 59.33, "longitude": 18.06 },
        "types": types,
        "primaryType": types.first().copied().unwrap_or_default(),
        "rating": 4.5,
    })
}

pub fn places(ids: &[&str]) -> ProviderResponse {
    ProviderResponse::ok(json!({ "places": ids.iter().map(|id| place(id, &[])).collect::<Vec<_>>() }))
}

/// Retries without noticeable sleeping.
pub fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
    }
}

pub fn pipeline_with(transport: Arc<ScriptedTransport>, popularity: Popularity) -> Arc<SearchPipeline> {
    let executor = Arc::new(Executor::new(transport, quick_policy()));
    let adapter = CompositionAdapter::new(Arc::new(MemoryDatasetStore::new()), executor);
    Arc::new(SearchPipeline::new(
        Compiler::default(),
        Arc::new(popularity),
        adapter,
    ))
}

pub fn pipeline(transport: Arc<ScriptedTransport>) -> Arc<SearchPipeline> {
    pipeline_with(transport, Popularity::default())
}

/// Included terms of a category request, or the query of a text request.
pub fn describe(request: &ProviderRequest) -> String {
    match request {
        ProviderRequest::CategorySearch { included, excluded, .. } => {
            format!("+{} -{}", included.join(","), excluded.join(","))
        }
        ProviderRequest::TextSearch { query, .. } => format!("text {}", query),
        other => other.to_string(),
    }
}
