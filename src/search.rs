//! One logical search: split → compile → optimize → resolve every descriptor
//! concurrently → union deduplicated by provider id.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CompositionAdapter, DatasetCacheKey, Resolved};
use crate::compiler::Compiler;
use crate::construct::{CachedDataset, CallDescriptor, Coordinate, FeatureCollection, GeoContext};
use crate::error::Result;
use crate::optimizer::{Popularity, optimize, optimize_keywords};
use crate::splitter::split_category_keyword;
use crate::walker::{CircleResult, CircleSearch};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Same as `CategorySearch`.
    #[default]
    Default,
    CategorySearch,
    KeywordSearch,
    /// Category and keyword results together.
    Both,
}
impl SearchType {
    fn categories(&self) -> bool {
        !matches!(self, SearchType::KeywordSearch)
    }
    fn keywords(&self) -> bool {
        matches!(self, SearchType::KeywordSearch | SearchType::Both)
    }
}
impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SearchType::Default | SearchType::CategorySearch => "category_search",
            SearchType::KeywordSearch => "keyword_search",
            SearchType::Both => "both",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub center: Coordinate,
    pub radius: f64,
    pub search_type: SearchType,
    pub page_token: Option<String>,
    /// Keep the provider id on every feature.
    pub ids_only: bool,
}
impl SearchRequest {
    pub fn geo(&self) -> GeoContext {
        GeoContext::new(self.center, self.radius).with_page_token(self.page_token.clone())
    }
}

#[derive(Clone, Debug)]
pub struct SearchResult {
    pub collection: FeatureCollection,
    pub next_cursor: Option<String>,
    pub api_calls: u64,
}

pub struct SearchPipeline {
    compiler: Compiler,
    popularity: Arc<Popularity>,
    adapter: CompositionAdapter,
}
impl SearchPipeline {
    pub fn new(compiler: Compiler, popularity: Arc<Popularity>, adapter: CompositionAdapter) -> Self {
        Self {
            compiler,
            popularity,
            adapter,
        }
    }
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// The provider requests that together answer `query`.
    pub fn plan_calls(&self, query: &str, search_type: SearchType) -> Result<Vec<CallDescriptor>> {
        // the whole query is held to the term cap, not just each side of it
        self.compiler.compile(query)?;
        let (categories, keywords) = split_category_keyword(query)?;
        let mut descriptors = Vec::new();
        if search_type.categories() && !categories.is_empty() {
            let clauses = self.compiler.compile(&categories)?;
            descriptors.extend(optimize(&clauses, Some(&self.popularity)));
        }
        if search_type.keywords() && !keywords.is_empty() {
            let clauses = self.compiler.compile(&keywords)?;
            descriptors.extend(optimize_keywords(&clauses));
        }
        Ok(descriptors)
    }

    /// Deduplicated dataset of `query` around `geo`, provider ids kept.
    pub async fn search_dataset(&self, query: &str, search_type: SearchType, geo: &GeoContext) -> Result<Resolved> {
        let key = DatasetCacheKey::for_query(query, &search_type.to_string(), geo);
        if let Some(dataset) = self.adapter.lookup(&key).await {
            info!(query, "whole query served from cache");
            return Ok(Resolved::cached(dataset));
        }
        let descriptors = self.plan_calls(query, search_type)?;
        debug!(query, calls = descriptors.len(), "resolving call sequence");
        let parts = join_all(descriptors.iter().map(|d| self.adapter.resolve(d, geo))).await;

        let next_cursor = parts.iter().find_map(|p| p.next_cursor.clone());
        let combined = Resolved {
            dataset: CachedDataset::union(parts.iter().map(|p| &p.dataset)).with_next_cursor(next_cursor.clone()),
            next_cursor,
            api_calls: parts.iter().map(|p| p.api_calls).sum(),
            degraded: parts.iter().any(|p| p.degraded),
            incomplete: parts.iter().any(|p| p.incomplete),
        };
        if combined.cacheable() {
            self.adapter.store(&key, &combined.dataset).await;
        }
        info!(query, features = combined.dataset.len(), api_calls = combined.api_calls, "search resolved");
        Ok(combined)
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        let resolved = self
            .search_dataset(&request.query, request.search_type, &request.geo())
            .await?;
        Ok(SearchResult {
            collection: FeatureCollection::from_dataset(resolved.dataset, request.ids_only),
            next_cursor: resolved.next_cursor,
            api_calls: resolved.api_calls,
        })
    }

    pub async fn place_details(&self, id: &str) -> FeatureCollection {
        let outcome = self.adapter.executor().place_details(id).await;
        FeatureCollection::from_dataset(outcome.into_dataset(), true)
    }
}

/// A query bound to a pipeline, run at every circle of a plan.
pub struct PlanQuery {
    pipeline: Arc<SearchPipeline>,
    query: String,
    search_type: SearchType,
}
impl PlanQuery {
    pub fn new(pipeline: Arc<SearchPipeline>, query: impl Into<String>, search_type: SearchType) -> Self {
        Self {
            pipeline,
            query: query.into(),
            search_type,
        }
    }
}

#[async_trait]
impl CircleSearch for PlanQuery {
    async fn search_circle(&self, geo: &GeoContext) -> Result<CircleResult> {
        let resolved = self.pipeline.search_dataset(&self.query, self.search_type, geo).await?;
        Ok(CircleResult {
            dataset: resolved.dataset,
            next_cursor: resolved.next_cursor,
            api_calls: resolved.api_calls,
        })
    }
}
