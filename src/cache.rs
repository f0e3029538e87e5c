//! Content-addressed dataset cache and the set algebra that composes cached partials.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::construct::{CachedDataset, CallDescriptor, GeoContext, SearchKind};
use crate::error::Result;
use crate::executor::{CallOutcome, Executor};

// ------------- DatasetCacheKey -------------
/// Deterministic identity of a dataset. Term lists are sorted and deduplicated,
/// coordinates are fixed to six decimals, so logically identical requests share a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatasetCacheKey {
    canonical: String,
}
impl DatasetCacheKey {
    fn build(scope: &str, geo: &GeoContext, included: &[String], excluded: &[String]) -> Self {
        let sorted = |terms: &[String]| -> String {
            let mut terms: Vec<&str> = terms.iter().map(String::as_str).collect();
            terms.sort_unstable();
            terms.dedup();
            terms.join(",")
        };
        let center = geo.center();
        Self {
            canonical: format!(
                "{}|{:.6},{:.6}|{:.1}|+{}|-{}|{}",
                scope,
                center.lat,
                center.lng,
                geo.radius(),
                sorted(included),
                sorted(excluded),
                geo.page_token().unwrap_or("")
            ),
        }
    }
    pub fn for_descriptor(descriptor: &CallDescriptor, geo: &GeoContext) -> Self {
        Self::build(
            &descriptor.kind().to_string(),
            geo,
            descriptor.included(),
            descriptor.excluded(),
        )
    }
    /// Dataset of a plain search for `terms`, with nothing excluded. With no
    /// exclusions this is the same key as the descriptor's own.
    pub fn partial(kind: SearchKind, terms: &[String], geo: &GeoContext) -> Self {
        Self::build(&kind.to_string(), geo, terms, &[])
    }
    /// Whole boolean query, checked before anything is planned.
    pub fn for_query(query: &str, search_type: &str, geo: &GeoContext) -> Self {
        let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        Self::build(&format!("query:{}", search_type), geo, &[normalized], &[])
    }
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
    /// Fixed-width store key.
    pub fn digest(&self) -> String {
        blake3::hash(self.canonical.as_bytes()).to_hex().to_string()
    }
}
impl fmt::Display for DatasetCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

// ------------- DatasetStore -------------
#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn get(&self, key: &DatasetCacheKey) -> Result<Option<CachedDataset>>;
    /// Upsert, last write wins.
    async fn put(&self, key: &DatasetCacheKey, dataset: &CachedDataset) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryDatasetStore {
    datasets: Mutex<HashMap<String, CachedDataset>>,
}
impl MemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.datasets.lock().map(|d| d.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn get(&self, key: &DatasetCacheKey) -> Result<Option<CachedDataset>> {
        Ok(self.datasets.lock()?.get(&key.digest()).cloned())
    }
    async fn put(&self, key: &DatasetCacheKey, dataset: &CachedDataset) -> Result<()> {
        self.datasets.lock()?.insert(key.digest(), dataset.clone());
        Ok(())
    }
}

// ------------- Composition -------------
/// A dataset together with what it cost to obtain.
#[derive(Clone, Debug, Default)]
pub struct Resolved {
    pub dataset: CachedDataset,
    pub next_cursor: Option<String>,
    pub api_calls: u64,
    /// Some provider call behind this dataset ended in placeholders.
    pub degraded: bool,
    /// Some provider call behind this dataset was answered by a reduced request.
    pub incomplete: bool,
}
impl Resolved {
    pub fn cached(dataset: CachedDataset) -> Self {
        Self {
            next_cursor: dataset.next_cursor().map(str::to_owned),
            dataset,
            ..Default::default()
        }
    }
    fn fetched(outcome: CallOutcome) -> Self {
        let api_calls = outcome.attempts() as u64;
        let degraded = outcome.is_degraded();
        let incomplete = !outcome.is_complete();
        let next_cursor = outcome.next_cursor().map(str::to_owned);
        Self {
            dataset: outcome.into_dataset(),
            next_cursor,
            api_calls,
            degraded,
            incomplete,
        }
    }
    /// Only whole, non-degraded answers are worth keeping.
    pub fn cacheable(&self) -> bool {
        !self.degraded && !self.incomplete
    }
}

pub struct CompositionAdapter {
    store: Arc<dyn DatasetStore>,
    executor: Arc<Executor>,
}
impl CompositionAdapter {
    pub fn new(store: Arc<dyn DatasetStore>, executor: Arc<Executor>) -> Self {
        Self { store, executor }
    }
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// A store failure is a miss.
    pub async fn lookup(&self, key: &DatasetCacheKey) -> Option<CachedDataset> {
        match self.store.get(key).await {
            Ok(found) => {
                debug!(key = %key, hit = found.is_some(), "dataset cache lookup");
                found
            }
            Err(e) => {
                warn!(key = %key, error = %e, "dataset cache unavailable, treating as miss");
                None
            }
        }
    }
    /// Degraded datasets are never written.
    pub async fn store(&self, key: &DatasetCacheKey, dataset: &CachedDataset) {
        if dataset.is_degraded() {
            debug!(key = %key, "not caching degraded dataset");
            return;
        }
        if let Err(e) = self.store.put(key, dataset).await {
            warn!(key = %key, error = %e, "dataset cache write failed");
        }
    }

    pub async fn resolve(&self, descriptor: &CallDescriptor, geo: &GeoContext) -> Resolved {
        let key = DatasetCacheKey::for_descriptor(descriptor, geo);
        if let Some(dataset) = self.lookup(&key).await {
            return Resolved::cached(dataset);
        }
        let resolved = match descriptor.kind() {
            SearchKind::Category => self.resolve_category(descriptor, geo).await,
            SearchKind::Text => self.resolve_text(descriptor, geo).await,
        };
        if resolved.cacheable() {
            self.store(&key, &resolved.dataset).await;
        }
        resolved
    }

    // include-only minus exclude-only when both partials are cached, otherwise one call with the full shape
    async fn resolve_category(&self, descriptor: &CallDescriptor, geo: &GeoContext) -> Resolved {
        if !descriptor.excluded().is_empty() {
            let include_key = DatasetCacheKey::partial(SearchKind::Category, descriptor.included(), geo);
            let exclude_key = DatasetCacheKey::partial(SearchKind::Category, descriptor.excluded(), geo);
            if let Some(include_only) = self.lookup(&include_key).await {
                if let Some(exclude_only) = self.lookup(&exclude_key).await {
                    debug!(descriptor = %descriptor, "composed from cached partials");
                    return Resolved::cached(include_only.difference(&exclude_only));
                }
            }
        }
        let outcome = self
            .executor
            .category_search(geo, descriptor.included(), descriptor.excluded())
            .await;
        Resolved::fetched(outcome)
    }

    // intersection of the included phrases minus the union of the excluded ones
    async fn resolve_text(&self, descriptor: &CallDescriptor, geo: &GeoContext) -> Resolved {
        let mut resolved = Resolved::default();
        if descriptor.included().is_empty() {
            debug!(descriptor = %descriptor, "text search without a positive phrase matches nothing");
            return resolved;
        }
        let paginated = descriptor.included().len() == 1;
        let unpaginated = GeoContext::new(geo.center(), geo.radius());

        let mut include_only: Option<CachedDataset> = None;
        for phrase in descriptor.included() {
            let part = self
                .fetch_phrase(phrase, if paginated { geo } else { &unpaginated })
                .await;
            resolved.api_calls += part.api_calls;
            resolved.degraded |= part.degraded;
            resolved.incomplete |= part.incomplete;
            if paginated {
                resolved.next_cursor = part.next_cursor;
            }
            include_only = Some(match include_only {
                None => part.dataset,
                Some(acc) => acc.intersection(&part.dataset),
            });
        }
        let mut exclude_parts = Vec::new();
        for phrase in descriptor.excluded() {
            let part = self.fetch_phrase(phrase, &unpaginated).await;
            resolved.api_calls += part.api_calls;
            resolved.degraded |= part.degraded;
            resolved.incomplete |= part.incomplete;
            exclude_parts.push(part.dataset);
        }
        let exclude_only = CachedDataset::union(exclude_parts.iter());
        resolved.dataset = include_only
            .unwrap_or_default()
            .difference(&exclude_only)
            .with_next_cursor(resolved.next_cursor.clone());
        resolved
    }

    async fn fetch_phrase(&self, phrase: &str, geo: &GeoContext) -> Resolved {
        let key = DatasetCacheKey::partial(SearchKind::Text, &[phrase.to_string()], geo);
        if let Some(dataset) = self.lookup(&key).await {
            return Resolved::cached(dataset);
        }
        let resolved = Resolved::fetched(self.executor.text_search(geo, phrase).await);
        if resolved.cacheable() {
            self.store(&key, &resolved.dataset).await;
        }
        resolved
    }
}
