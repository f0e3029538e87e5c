//! Entry points for the two kinds of fetch, and the registry of background
//! plan walks started by full-data requests.
//!
//! A sample fetch is a single search over the requested circle. A full-data
//! fetch answers the caller with one plan step in the foreground and, unless
//! the plan is already being walked or was completed recently, keeps walking
//! the rest of the plan on a spawned task.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::construct::{Circle, FeatureCollection, PlanState};
use crate::error::Result;
use crate::plan::plan_name;
use crate::search::{PlanQuery, SearchPipeline, SearchRequest};
use crate::token::ResumeToken;
use crate::walker::{PlanWalker, RunOutcome};

/// Opaque identifier of a background walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadId(u64);
impl LoadId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// What a fetch hands back to the caller.
#[derive(Clone, Debug)]
pub struct FetchResult {
    pub collection: FeatureCollection,
    /// Encoded [`ResumeToken`] for the next call, `None` when there is nothing more to fetch.
    pub next_page_token: Option<String>,
    pub progress: u8,
    pub plan_name: Option<String>,
    pub api_calls: u64,
    /// Background walk started by this call, if any.
    pub background: Option<LoadId>,
}

/// Registry managing background walk lifecycles.
pub struct LoadInterface {
    pipeline: Arc<SearchPipeline>,
    walker: Arc<PlanWalker>,
    next_id: Mutex<u64>,
    active: Mutex<HashMap<LoadId, JoinHandle<()>>>,
}

impl LoadInterface {
    pub fn new(pipeline: Arc<SearchPipeline>, walker: Arc<PlanWalker>) -> Self {
        Self {
            pipeline,
            walker,
            next_id: Mutex::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }
    pub fn pipeline(&self) -> &Arc<SearchPipeline> {
        &self.pipeline
    }
    pub fn walker(&self) -> &Arc<PlanWalker> {
        &self.walker
    }

    fn allocate_id(&self) -> Result<LoadId> {
        let mut g = self.next_id.lock()?;
        *g += 1;
        Ok(LoadId(*g))
    }

    /// One search over the requested circle.
    pub async fn fetch_sample(&self, request: &SearchRequest) -> Result<FetchResult> {
        let result = self.pipeline.search(request).await?;
        Ok(FetchResult {
            collection: result.collection,
            next_page_token: result.next_cursor,
            progress: 100,
            plan_name: None,
            api_calls: result.api_calls,
            background: None,
        })
    }

    /// One plan step for the caller, with the rest of the plan walked in the background.
    pub async fn fetch_full_data(&self, request: &SearchRequest, country: &str, city: &str) -> Result<FetchResult> {
        let name = plan_name(&request.query, country, city);
        let token = ResumeToken::decode(request.page_token.as_deref())?;
        self.walker
            .ensure_plan(
                &name,
                Circle {
                    center: request.center,
                    radius: request.radius,
                },
            )
            .await?;
        // checked before the foreground step, which itself marks the plan as active
        let busy = self.walker.is_active_or_done(&name, Utc::now()).await;

        let search = PlanQuery::new(Arc::clone(&self.pipeline), request.query.clone(), request.search_type);
        let step = self.walker.step(&name, &token, &search).await?;
        info!(plan = %name, features = step.dataset.len(), progress = step.progress, "foreground step done");

        let background = if busy || step.exhausted {
            None
        } else {
            let from = step
                .next
                .clone()
                .unwrap_or_else(|| ResumeToken::new(None, step.resume_at()));
            Some(self.start_full_load(&name, search, from)?)
        };
        Ok(FetchResult {
            collection: FeatureCollection::from_dataset(step.dataset, request.ids_only),
            next_page_token: step.next.as_ref().map(ResumeToken::encode),
            progress: step.progress,
            plan_name: Some(name),
            api_calls: step.api_calls,
            background,
        })
    }

    /// Spawns a walk of `plan_name` from `from` to the end of the plan.
    pub fn start_full_load(&self, plan_name: &str, search: PlanQuery, from: ResumeToken) -> Result<LoadId> {
        let id = self.allocate_id()?;
        let walker = Arc::clone(&self.walker);
        let name = plan_name.to_string();
        let handle = tokio::spawn(async move {
            match walker.walk_remaining(&name, from, &search).await {
                Ok(RunOutcome::Completed {
                    steps,
                    api_calls,
                    features,
                }) => info!(plan = %name, steps, api_calls, features, "background walk finished"),
                Ok(RunOutcome::Skipped) => info!(plan = %name, "background walk skipped"),
                Err(e) => warn!(plan = %name, error = %e, "background walk failed"),
            }
        });
        let mut active = self.active.lock()?;
        active.retain(|_, h| !h.is_finished());
        active.insert(id, handle);
        info!(plan = plan_name, id = id.value(), "background walk started");
        Ok(id)
    }

    /// Cancel a background walk by id.
    pub fn cancel(&self, id: LoadId) -> bool {
        match self.active.lock() {
            Ok(mut active) => match active.remove(&id) {
                Some(handle) => {
                    handle.abort();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Number of background walks still running.
    pub fn active_loads(&self) -> usize {
        match self.active.lock() {
            Ok(mut active) => {
                active.retain(|_, h| !h.is_finished());
                active.len()
            }
            Err(_) => 0,
        }
    }

    pub async fn progress(&self, plan_name: &str) -> Result<Option<PlanState>> {
        self.walker.state(plan_name).await
    }
}
