//! Issues provider calls through a small resilience state machine:
//! `Attempt → Backoff → Attempt … → LegacyRetry → Success | Failed`.
//!
//! A call never errors. When the primary shape and the legacy shape are both
//! exhausted the outcome carries sentinel "failed" records instead.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::construct::{CachedDataset, Feature, GeoContext};
use crate::provider::{ProviderRequest, Transport, next_page_token, normalize_records};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Delayed retries of the primary shape after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}
impl RetryPolicy {
    /// `base · 2^retry`
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CallState {
    Attempt { retry: u32 },
    Backoff { retry: u32, delay: Duration },
    LegacyRetry,
    Success,
    Failed,
}

/// What a provider call produced and how it got there.
#[derive(Clone, Debug)]
pub struct CallOutcome {
    dataset: CachedDataset,
    next_cursor: Option<String>,
    attempts: u32,
    backoffs: Vec<Duration>,
    used_legacy: bool,
    complete: bool,
    state: CallState,
}
impl CallOutcome {
    pub fn dataset(&self) -> &CachedDataset {
        &self.dataset
    }
    pub fn into_dataset(self) -> CachedDataset {
        self.dataset
    }
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref()
    }
    /// Provider requests actually sent, the legacy one included.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
    pub fn backoffs(&self) -> &[Duration] {
        &self.backoffs
    }
    pub fn used_legacy(&self) -> bool {
        self.used_legacy
    }
    pub fn state(&self) -> CallState {
        self.state
    }
    pub fn is_degraded(&self) -> bool {
        self.state == CallState::Failed
    }
    /// False when the legacy shape answered a request it cannot fully express,
    /// so places matching a dropped included type are missing.
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

pub struct Executor {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}
impl Executor {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
    pub async fn category_search(&self, geo: &GeoContext, included: &[String], excluded: &[String]) -> CallOutcome {
        self.execute(ProviderRequest::category_search(geo, included, excluded)).await
    }
    pub async fn text_search(&self, geo: &GeoContext, query: &str) -> CallOutcome {
        self.execute(ProviderRequest::text_search(geo, query)).await
    }
    pub async fn place_details(&self, id: &str) -> CallOutcome {
        self.execute(ProviderRequest::place_details(id)).await
    }

    // Ok(body) for a 200 answer, Err(reason) for anything else
    async fn attempt(&self, request: &ProviderRequest) -> std::result::Result<serde_json::Value, String> {
        match self.transport.send(request).await {
            Ok(response) if response.is_success() => Ok(response.body),
            Ok(response) => Err(format!("status {}", response.status)),
            Err(e) => Err(e.to_string()),
        }
    }

    pub async fn execute(&self, request: ProviderRequest) -> CallOutcome {
        let mut attempts = 0;
        let mut backoffs = Vec::new();
        let mut used_legacy = false;
        let mut body = None;
        let mut state = CallState::Attempt { retry: 0 };
        loop {
            debug!(request = %request, state = ?state, "provider call");
            state = match state {
                CallState::Attempt { retry } => {
                    attempts += 1;
                    match self.attempt(&request).await {
                        Ok(answer) => {
                            body = Some(answer);
                            CallState::Success
                        }
                        Err(reason) if retry < self.policy.max_retries => {
                            debug!(request = %request, retry, %reason, "provider call rejected");
                            CallState::Backoff {
                                retry,
                                delay: self.policy.delay(retry),
                            }
                        }
                        Err(reason) => {
                            warn!(request = %request, attempts, %reason, "retries exhausted, falling back to legacy shape");
                            CallState::LegacyRetry
                        }
                    }
                }
                CallState::Backoff { retry, delay } => {
                    tokio::time::sleep(delay).await;
                    backoffs.push(delay);
                    CallState::Attempt { retry: retry + 1 }
                }
                CallState::LegacyRetry => {
                    attempts += 1;
                    used_legacy = true;
                    let legacy = request.to_legacy();
                    match self.attempt(&legacy).await {
                        Ok(answer) => {
                            body = Some(answer);
                            CallState::Success
                        }
                        Err(reason) => {
                            warn!(request = %legacy, %reason, "legacy shape failed, degrading to placeholders");
                            CallState::Failed
                        }
                    }
                }
                CallState::Success | CallState::Failed => break,
            };
        }

        let (dataset, next_cursor) = match body {
            Some(body) => {
                let mut features = normalize_records(&body);
                if used_legacy {
                    // the legacy shape cannot exclude, so the exclusions are applied here
                    features.retain(|f| !f.properties.types.iter().any(|t| request.excludes(t)));
                }
                let next_cursor = next_page_token(&body);
                (
                    CachedDataset::new(features).with_next_cursor(next_cursor.clone()),
                    next_cursor,
                )
            }
            // ids are unique within a dataset, so one placeholder is the whole run
            None => (CachedDataset::new(vec![Feature::failed()]), None),
        };
        let complete = !(used_legacy && request.legacy_drops_included());
        if !complete {
            warn!(request = %request, "legacy shape answered with fewer included types");
        }
        info!(request = %request, records = dataset.len(), attempts, "provider call finished");
        CallOutcome {
            dataset,
            next_cursor,
            attempts,
            backoffs,
            used_legacy,
            complete,
            state,
        }
    }
}
