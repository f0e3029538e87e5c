//! Drives a search across the circles of a plan, one row at a time.
//!
//! Rows are walked strictly in order since what happens next depends on whether
//! the previous circle came back empty. An empty circle is rectified: its
//! descendants are marked `skip` in the plan and the walk moves on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::construct::{CachedDataset, Circle, GeoContext, PlanState};
use crate::error::{PlacequeryError, Result};
use crate::plan::{Plan, PlanSource, generate_plan};
use crate::token::ResumeToken;

// ------------- ProgressStore -------------
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, plan_name: &str) -> Result<Option<PlanState>>;
    /// Upsert, last write wins.
    async fn set(&self, state: &PlanState) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryProgressStore {
    states: Mutex<HashMap<String, PlanState>>,
}
impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(&self, plan_name: &str) -> Result<Option<PlanState>> {
        Ok(self.states.lock()?.get(plan_name).cloned())
    }
    async fn set(&self, state: &PlanState) -> Result<()> {
        self.states.lock()?.insert(state.plan_name.clone(), state.clone());
        Ok(())
    }
}

// ------------- CircleSearch -------------
/// What one search over one circle found.
#[derive(Clone, Debug, Default)]
pub struct CircleResult {
    pub dataset: CachedDataset,
    pub next_cursor: Option<String>,
    pub api_calls: u64,
}

/// The query a plan walk runs at every circle.
#[async_trait]
pub trait CircleSearch: Send + Sync {
    async fn search_circle(&self, geo: &GeoContext) -> Result<CircleResult>;
}

// ------------- Settings -------------
/// When a circle's result is small enough that its descendants are skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RectifyRule {
    /// Only an empty circle is rectified.
    AcceptNonEmpty,
    /// Circles with fewer features than this are rectified. Non-empty ones are still returned.
    RequireMinimum(usize),
}
impl RectifyRule {
    fn rectifies(&self, found: usize) -> bool {
        match self {
            RectifyRule::AcceptNonEmpty => found == 0,
            RectifyRule::RequireMinimum(minimum) => found < *minimum,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WalkerSettings {
    pub rectify: RectifyRule,
    /// Consecutive empty circles one step may go through before giving up.
    pub max_empty_steps: usize,
    /// A plan updated this recently is being walked by someone else.
    pub in_progress_window: chrono::Duration,
    /// A plan completed this recently needs no new walk.
    pub completed_window: chrono::Duration,
    /// Smallest circle radius, in meters, of a generated plan.
    pub min_radius: f64,
}
impl Default for WalkerSettings {
    fn default() -> Self {
        Self {
            rectify: RectifyRule::AcceptNonEmpty,
            max_empty_steps: 30,
            in_progress_window: chrono::Duration::seconds(30),
            completed_window: chrono::Duration::days(90),
            min_radius: 2_000.0,
        }
    }
}

// ------------- Walk results -------------
#[derive(Clone, Debug)]
pub struct WalkStep {
    pub dataset: CachedDataset,
    /// `None` when the walk cannot continue from here.
    pub next: Option<ResumeToken>,
    pub progress: u8,
    pub api_calls: u64,
    /// The end sentinel was reached.
    pub exhausted: bool,
    // where the next step starts even when `next` is terminal
    resume_at: usize,
}

impl WalkStep {
    /// Plan row the following step starts from.
    pub fn resume_at(&self) -> usize {
        self.resume_at
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// The freshness guard found the plan active or recently completed.
    Skipped,
    Completed { steps: usize, api_calls: u64, features: usize },
}

// ------------- PlanWalker -------------
pub struct PlanWalker {
    plans: Arc<dyn PlanSource>,
    progress: Arc<dyn ProgressStore>,
    settings: WalkerSettings,
}
impl PlanWalker {
    pub fn new(plans: Arc<dyn PlanSource>, progress: Arc<dyn ProgressStore>, settings: WalkerSettings) -> Self {
        Self {
            plans,
            progress,
            settings,
        }
    }
    pub fn settings(&self) -> &WalkerSettings {
        &self.settings
    }
    pub async fn state(&self, plan_name: &str) -> Result<Option<PlanState>> {
        self.progress.get(plan_name).await
    }

    /// Reads the plan, generating and storing one rooted at `root` if there is none.
    /// Any other read failure is returned and the stored plan is left alone.
    pub async fn ensure_plan(&self, plan_name: &str, root: Circle) -> Result<Plan> {
        match self.plans.read_plan(plan_name).await {
            Ok(rows) => Plan::parse(plan_name, rows),
            Err(e) => {
                if !matches!(e, PlacequeryError::PlanNotFound(_)) {
                    return Err(e);
                }
                debug!(plan = plan_name, "generating plan");
                let rows = generate_plan(root, self.settings.min_radius);
                self.plans.write_plan(plan_name, &rows).await?;
                info!(plan = plan_name, rows = rows.len(), "plan generated");
                Plan::parse(plan_name, rows)
            }
        }
    }

    /// Best effort only: two walkers checking at the same moment both proceed.
    pub async fn is_active_or_done(&self, plan_name: &str, now: DateTime<Utc>) -> bool {
        let state = match self.progress.get(plan_name).await {
            Ok(Some(state)) => state,
            Ok(None) => return false,
            Err(e) => {
                warn!(plan = plan_name, error = %e, "progress store unavailable, walking anyway");
                return false;
            }
        };
        let recently_completed = state.is_complete()
            && state
                .completed_at
                .is_some_and(|at| now - at < self.settings.completed_window);
        let recently_updated = !state.is_complete()
            && state
                .last_updated
                .is_some_and(|at| now - at < self.settings.in_progress_window);
        recently_completed || recently_updated
    }

    /// Searches circles from the token's position until one is accepted, the
    /// plan ends, or too many circles in a row came back empty.
    pub async fn step(&self, plan_name: &str, token: &ResumeToken, search: &dyn CircleSearch) -> Result<WalkStep> {
        let mut plan = Plan::parse(plan_name, self.plans.read_plan(plan_name).await?)?;
        let mut from = token.plan_index();
        let mut cursor = token.cursor().map(str::to_owned);
        let mut empties = 0;
        let mut api_calls = 0;

        while empties < self.settings.max_empty_steps {
            let Some(index) = plan.next_runnable(from) else {
                self.record_completion(&plan).await;
                return Ok(WalkStep {
                    dataset: CachedDataset::default(),
                    next: None,
                    progress: 100,
                    api_calls,
                    exhausted: true,
                    resume_at: plan.entries().len(),
                });
            };
            let Some((entry, circle)) = plan.get(index).cloned().and_then(|e| e.circle().map(|c| (e, c))) else {
                from = index + 1;
                continue;
            };
            let geo = GeoContext::from(circle).with_page_token(cursor.take());
            let found = search.search_circle(&geo).await?;
            api_calls += found.api_calls;

            let next = match &found.next_cursor {
                Some(cursor) => ResumeToken::new(Some(cursor.clone()), index),
                None => ResumeToken::new(None, index + 1),
            };
            let progress = plan.progress_at(next.plan_index());
            self.record_progress(&plan, &next, progress, found.api_calls).await;

            if self.settings.rectify.rectifies(found.dataset.len()) {
                self.rectify(&mut plan, entry.level()).await;
            }
            if !found.dataset.is_empty() {
                debug!(plan = plan_name, level = entry.level(), features = found.dataset.len(), "circle accepted");
                return Ok(WalkStep {
                    dataset: found.dataset,
                    resume_at: next.plan_index(),
                    next: Some(next),
                    progress,
                    api_calls,
                    exhausted: false,
                });
            }
            empties += 1;
            from = index + 1;
        }

        info!(plan = plan_name, empties, "giving up after consecutive empty circles");
        let progress = plan.progress_at(from);
        Ok(WalkStep {
            dataset: CachedDataset::default(),
            next: None,
            progress,
            api_calls,
            exhausted: false,
            resume_at: from,
        })
    }

    /// Walks the whole plan unless the freshness guard says it is already
    /// being walked or was completed recently.
    pub async fn run_to_completion(
        &self,
        plan_name: &str,
        token: ResumeToken,
        search: &dyn CircleSearch,
    ) -> Result<RunOutcome> {
        if self.is_active_or_done(plan_name, Utc::now()).await {
            info!(plan = plan_name, "plan is active or recently completed, not walking it");
            return Ok(RunOutcome::Skipped);
        }
        self.walk_remaining(plan_name, token, search).await
    }

    /// Steps from `token` to the end of the plan without consulting the guard.
    pub async fn walk_remaining(
        &self,
        plan_name: &str,
        token: ResumeToken,
        search: &dyn CircleSearch,
    ) -> Result<RunOutcome> {
        let mut token = token;
        let mut steps = 0;
        let mut api_calls = 0;
        let mut features = 0;
        loop {
            let step = self.step(plan_name, &token, search).await?;
            steps += 1;
            api_calls += step.api_calls;
            features += step.dataset.len();
            info!(plan = plan_name, progress = step.progress, features, "plan step done");
            if step.exhausted {
                break;
            }
            token = match step.next {
                Some(next) => next,
                None => ResumeToken::new(None, step.resume_at),
            };
        }
        Ok(RunOutcome::Completed {
            steps,
            api_calls,
            features,
        })
    }

    async fn rectify(&self, plan: &mut Plan, level: &str) {
        let skipped = plan.skip_descendants(level);
        if skipped == 0 {
            return;
        }
        debug!(plan = plan.name(), level, skipped, "rectified plan");
        if let Err(e) = self.plans.write_plan(plan.name(), plan.rows()).await {
            warn!(plan = plan.name(), error = %e, "could not write rectified plan");
        }
    }

    async fn load_state(&self, plan: &Plan) -> PlanState {
        match self.progress.get(plan.name()).await {
            Ok(Some(state)) => state,
            Ok(None) => PlanState::new(plan.name()),
            Err(e) => {
                warn!(plan = plan.name(), error = %e, "progress store unavailable");
                PlanState::new(plan.name())
            }
        }
    }

    async fn record_progress(&self, plan: &Plan, next: &ResumeToken, progress: u8, api_calls: u64) {
        let mut state = self.load_state(plan).await;
        state.current_index = next.plan_index();
        state.next_page_token = next.cursor().map(str::to_owned);
        if !state.is_complete() {
            state.progress = state.progress.max(progress).min(99);
        }
        state.last_updated = Some(Utc::now());
        state.api_call_count += api_calls;
        if let Err(e) = self.progress.set(&state).await {
            warn!(plan = plan.name(), error = %e, "could not record plan progress");
        }
    }

    async fn record_completion(&self, plan: &Plan) {
        let mut state = self.load_state(plan).await;
        let now = Utc::now();
        state.current_index = plan.entries().len();
        state.next_page_token = None;
        state.progress = 100;
        state.last_updated = Some(now);
        state.completed_at = Some(now);
        info!(plan = plan.name(), api_calls = state.api_call_count, "plan completed");
        if let Err(e) = self.progress.set(&state).await {
            warn!(plan = plan.name(), error = %e, "could not record plan completion");
        }
    }
}
