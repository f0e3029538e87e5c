mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use common::{ScriptedTransport, describe, place, places, quick_policy};
use placequery::cache::{CompositionAdapter, DatasetCacheKey, DatasetStore, MemoryDatasetStore};
use placequery::construct::{CachedDataset, CallDescriptor, Coordinate, GeoContext, SearchKind};
use placequery::error::{PlacequeryError, Result};
use placequery::executor::Executor;
use placequery::provider::{ProviderRequest, ProviderResponse, normalize_records};

fn geo() -> GeoContext {
    GeoContext::new(Coordinate::new(59.33, 18.06), 1500.0)
}

fn dataset(ids: &[&str]) -> CachedDataset {
    CachedDataset::new(normalize_records(&json!({
        "places": ids.iter().map(|id| place(id, &[])).collect::<Vec<_>>()
    })))
}

fn sorted_ids(dataset: &CachedDataset) -> Vec<String> {
    let mut ids: Vec<String> = dataset.ids().into_iter().map(str::to_owned).collect();
    ids.sort();
    ids
}

fn strings(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|t| t.to_string()).collect()
}

fn adapter(store: Arc<MemoryDatasetStore>, transport: Arc<ScriptedTransport>) -> CompositionAdapter {
    CompositionAdapter::new(store, Arc::new(Executor::new(transport, quick_policy())))
}

#[test]
fn keys_ignore_term_order_and_duplicates() {
    let a = DatasetCacheKey::for_descriptor(
        &CallDescriptor::new(strings(&["cafe", "bar", "cafe"]), strings(&["pub"]), SearchKind::Category),
        &geo(),
    );
    let b = DatasetCacheKey::for_descriptor(
        &CallDescriptor::new(strings(&["bar", "cafe"]), strings(&["pub"]), SearchKind::Category),
        &geo(),
    );
    assert_eq!(a, b);
    assert_eq!(a.digest(), b.digest());
    let text = DatasetCacheKey::for_descriptor(
        &CallDescriptor::new(strings(&["bar", "cafe"]), strings(&["pub"]), SearchKind::Text),
        &geo(),
    );
    assert_ne!(a, text);
    let paged = DatasetCacheKey::partial(
        SearchKind::Category,
        &strings(&["bar"]),
        &geo().with_page_token(Some("next".into())),
    );
    assert_ne!(paged, DatasetCacheKey::partial(SearchKind::Category, &strings(&["bar"]), &geo()));
}

#[test]
fn set_algebra_is_by_provider_id() {
    let a = dataset(&["1", "2", "3"]);
    let b = dataset(&["2", "3", "4"]);
    assert_eq!(sorted_ids(&a.difference(&b)), vec!["1"]);
    assert_eq!(sorted_ids(&a.intersection(&b)), vec!["2", "3"]);
    let union = CachedDataset::union([&a, &b]);
    assert_eq!(sorted_ids(&union), vec!["1", "2", "3", "4"]);
    assert_eq!(union.len(), 4);
}

#[tokio::test]
async fn category_exclusion_is_composed_from_cached_partials() {
    let store = Arc::new(MemoryDatasetStore::new());
    store
        .put(&DatasetCacheKey::partial(SearchKind::Category, &strings(&["restaurant"]), &geo()), &dataset(&["1", "2", "3"]))
        .await
        .expect("put");
    store
        .put(&DatasetCacheKey::partial(SearchKind::Category, &strings(&["bar"]), &geo()), &dataset(&["2"]))
        .await
        .expect("put");
    let transport = Arc::new(ScriptedTransport::new(|_| Ok(places(&["x"]))));
    let adapter = adapter(store, transport.clone());

    let descriptor = CallDescriptor::new(strings(&["restaurant"]), strings(&["bar"]), SearchKind::Category);
    let resolved = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(sorted_ids(&resolved.dataset), vec!["1", "3"]);
    assert_eq!(resolved.api_calls, 0);
    assert_eq!(transport.count(), 0);
}

#[tokio::test]
async fn category_miss_makes_one_full_shape_call_then_hits() {
    let store = Arc::new(MemoryDatasetStore::new());
    let transport = Arc::new(ScriptedTransport::new(|_| Ok(places(&["1", "3"]))));
    let adapter = adapter(store.clone(), transport.clone());

    let descriptor = CallDescriptor::new(strings(&["restaurant"]), strings(&["bar"]), SearchKind::Category);
    let first = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(first.api_calls, 1);
    assert_eq!(transport.requests().iter().map(describe).collect::<Vec<_>>(), vec!["+restaurant -bar"]);

    let second = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(second.api_calls, 0);
    assert_eq!(sorted_ids(&second.dataset), vec!["1", "3"]);
    assert_eq!(transport.count(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn text_descriptor_intersects_includes_and_subtracts_excludes() {
    let store = Arc::new(MemoryDatasetStore::new());
    let transport = Arc::new(ScriptedTransport::new(|request| match request {
        ProviderRequest::TextSearch { query, .. } => Ok(match query.as_str() {
            "coffee" => places(&["1", "2", "3"]),
            "bakery" => places(&["2", "3", "4"]),
            "chain" => places(&["3"]),
            _ => places(&[]),
        }),
        _ => Ok(places(&[])),
    }));
    let adapter = adapter(store.clone(), transport.clone());
    let descriptor = CallDescriptor::new(strings(&["coffee", "bakery"]), strings(&["chain"]), SearchKind::Text);

    let resolved = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(sorted_ids(&resolved.dataset), vec!["2"]);
    assert_eq!(resolved.api_calls, 3);
    // three phrase partials and the composed result
    assert_eq!(store.len(), 4);

    // a different combination of the same phrases is served from the partials
    let other = CallDescriptor::new(strings(&["bakery"]), strings(&["coffee"]), SearchKind::Text);
    let resolved = adapter.resolve(&other, &geo()).await;
    assert_eq!(sorted_ids(&resolved.dataset), vec!["4"]);
    assert_eq!(transport.count(), 3);
}

#[tokio::test]
async fn text_descriptor_without_a_positive_phrase_is_empty() {
    let transport = Arc::new(ScriptedTransport::new(|_| Ok(places(&["1"]))));
    let adapter = adapter(Arc::new(MemoryDatasetStore::new()), transport.clone());
    let descriptor = CallDescriptor::new(Vec::new(), strings(&["chain"]), SearchKind::Text);
    let resolved = adapter.resolve(&descriptor, &geo()).await;
    assert!(resolved.dataset.is_empty());
    assert_eq!(transport.count(), 0);
}

#[tokio::test]
async fn degraded_results_are_never_cached() {
    let store = Arc::new(MemoryDatasetStore::new());
    let transport = Arc::new(ScriptedTransport::failing(500));
    let adapter = adapter(store.clone(), transport.clone());
    let descriptor = CallDescriptor::new(strings(&["cafe"]), Vec::new(), SearchKind::Category);

    let resolved = adapter.resolve(&descriptor, &geo()).await;
    assert!(resolved.degraded);
    assert!(resolved.dataset.is_degraded());
    assert!(store.is_empty());

    // the next call tries the provider again
    adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(transport.count(), 10);
}

struct BrokenStore;

#[async_trait]
impl DatasetStore for BrokenStore {
    async fn get(&self, _key: &DatasetCacheKey) -> Result<Option<CachedDataset>> {
        Err(PlacequeryError::CacheUnavailable("down".into()))
    }
    async fn put(&self, _key: &DatasetCacheKey, _dataset: &CachedDataset) -> Result<()> {
        Err(PlacequeryError::CacheUnavailable("down".into()))
    }
}

#[tokio::test]
async fn unavailable_cache_falls_through_to_the_provider() {
    let transport = Arc::new(ScriptedTransport::new(|_| {
        Ok(ProviderResponse::ok(json!({ "places": [place("1", &["cafe"])] })))
    }));
    let adapter = CompositionAdapter::new(
        Arc::new(BrokenStore),
        Arc::new(Executor::new(transport.clone(), quick_policy())),
    );
    let descriptor = CallDescriptor::new(strings(&["cafe"]), Vec::new(), SearchKind::Category);
    let resolved = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(sorted_ids(&resolved.dataset), vec!["1"]);
    assert_eq!(transport.count(), 1);
}

fn legacy_world(request: &ProviderRequest) -> Result<ProviderResponse> {
    Ok(match request {
        ProviderRequest::LegacyCategorySearch { .. } => ProviderResponse::ok(json!({
            "results": [place("rb", &["restaurant", "bar"]), place("r", &["restaurant"])]
        })),
        _ => ProviderResponse {
            status: 500,
            body: serde_json::Value::Null,
        },
    })
}

#[tokio::test]
async fn legacy_answers_still_honour_exclusions() {
    let store = Arc::new(MemoryDatasetStore::new());
    let transport = Arc::new(ScriptedTransport::new(legacy_world));
    let adapter = adapter(store.clone(), transport.clone());
    let descriptor = CallDescriptor::new(strings(&["restaurant"]), strings(&["bar"]), SearchKind::Category);

    let resolved = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(sorted_ids(&resolved.dataset), vec!["r"]);
    assert!(!resolved.degraded);
    assert!(!resolved.incomplete);
    assert_eq!(transport.count(), 5);

    let cached = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(sorted_ids(&cached.dataset), vec!["r"]);
    assert_eq!(transport.count(), 5);
}

#[tokio::test]
async fn legacy_answers_missing_included_types_are_not_cached() {
    let store = Arc::new(MemoryDatasetStore::new());
    let transport = Arc::new(ScriptedTransport::new(legacy_world));
    let adapter = adapter(store.clone(), transport.clone());
    let descriptor = CallDescriptor::new(strings(&["restaurant", "cafe"]), Vec::new(), SearchKind::Category);

    let resolved = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(sorted_ids(&resolved.dataset), vec!["r", "rb"]);
    assert!(resolved.incomplete);
    assert!(store.is_empty());
}

#[tokio::test]
async fn cached_pages_keep_their_cursor() {
    let store = Arc::new(MemoryDatasetStore::new());
    let transport = Arc::new(ScriptedTransport::new(|_| {
        Ok(ProviderResponse::ok(json!({
            "places": [place("1", &["bakery"])],
            "nextPageToken": "NEXT"
        })))
    }));
    let adapter = adapter(store.clone(), transport.clone());
    let descriptor = CallDescriptor::new(strings(&["bakery"]), Vec::new(), SearchKind::Text);

    let first = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(first.next_cursor.as_deref(), Some("NEXT"));
    let again = adapter.resolve(&descriptor, &geo()).await;
    assert_eq!(again.api_calls, 0);
    assert_eq!(again.next_cursor.as_deref(), Some("NEXT"));
    assert_eq!(transport.count(), 1);
}
