mod common;

use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{ScriptedTransport, places, quick_policy, transport_error};
use placequery::construct::{Coordinate, GeoContext};
use placequery::executor::{CallState, Executor, RetryPolicy};
use placequery::provider::{ProviderRequest, ProviderResponse};

fn geo() -> GeoContext {
    GeoContext::new(Coordinate::new(59.33, 18.06), 1500.0)
}

fn terms(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|t| t.to_string()).collect()
}

#[test]
fn delays_double_from_the_base() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay(0), Duration::from_millis(500));
    assert_eq!(policy.delay(1), Duration::from_millis(1000));
    assert_eq!(policy.delay(2), Duration::from_millis(2000));
}

#[tokio::test]
async fn first_success_needs_no_retry() {
    let transport = Arc::new(ScriptedTransport::new(|_| Ok(places(&["p1", "p2"]))));
    let executor = Executor::new(transport.clone(), quick_policy());
    let outcome = executor.category_search(&geo(), &terms(&["cafe"]), &[]).await;
    assert_eq!(outcome.state(), CallState::Success);
    assert_eq!(outcome.attempts(), 1);
    assert!(outcome.backoffs().is_empty());
    assert_eq!(outcome.dataset().len(), 2);
    assert!(!outcome.is_degraded());
}

#[tokio::test]
async fn rejected_calls_back_off_exponentially() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let transport = Arc::new(ScriptedTransport::new(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Ok(ProviderResponse {
                status: 429,
                body: json!({}),
            })
        } else {
            Ok(places(&["p1"]))
        }
    }));
    let executor = Executor::new(transport.clone(), quick_policy());
    let outcome = executor.category_search(&geo(), &terms(&["cafe"]), &[]).await;
    assert_eq!(outcome.state(), CallState::Success);
    assert_eq!(outcome.attempts(), 3);
    assert_eq!(outcome.backoffs(), &[Duration::from_millis(1), Duration::from_millis(2)]);
    assert!(!outcome.used_legacy());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transport_errors_count_as_rejections() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let transport = Arc::new(ScriptedTransport::new(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            transport_error()
        } else {
            Ok(places(&["p1"]))
        }
    }));
    let executor = Executor::new(transport, quick_policy());
    let outcome = executor.text_search(&geo(), "vegan bakery").await;
    assert_eq!(outcome.attempts(), 2);
    assert_eq!(outcome.dataset().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_fall_back_to_the_legacy_shape() {
    let transport = Arc::new(ScriptedTransport::new(|request| {
        if request.is_legacy() {
            Ok(ProviderResponse::ok(json!({
                "results": [{
                    "place_id": "legacy1",
                    "name": "Old Cafe",
                    "geometry": { "location": { "lat": 59.3, "lng": 18.0 } },
                    "types": ["cafe"]
                }]
            })))
        } else {
            Ok(ProviderResponse {
                status: 500,
                body: json!({}),
            })
        }
    }));
    let executor = Executor::new(transport.clone(), quick_policy());
    let outcome = executor
        .category_search(&geo(), &terms(&["cafe", "bakery"]), &terms(&["bar"]))
        .await;
    assert_eq!(outcome.state(), CallState::Success);
    assert!(outcome.used_legacy());
    // the initial attempt, three delayed retries and the legacy attempt
    assert_eq!(outcome.attempts(), 5);
    assert_eq!(outcome.backoffs().len(), 3);
    assert_eq!(outcome.backoffs()[2], Duration::from_millis(4));
    assert_eq!(outcome.dataset().ids().into_iter().collect::<Vec<_>>(), vec!["legacy1"]);
    // only the first included type reached the legacy endpoint
    assert!(!outcome.is_complete());

    let requests = transport.requests();
    assert_eq!(requests.len(), 5);
    match requests.last() {
        Some(ProviderRequest::LegacyCategorySearch { kind, .. }) => assert_eq!(kind.as_deref(), Some("cafe")),
        other => panic!("expected a legacy category search, got {:?}", other),
    }
}

#[tokio::test]
async fn total_failure_degrades_to_a_placeholder() {
    let transport = Arc::new(ScriptedTransport::failing(503));
    let executor = Executor::new(transport.clone(), quick_policy());
    let outcome = executor.place_details("abc").await;
    assert_eq!(outcome.state(), CallState::Failed);
    assert!(outcome.is_degraded());
    assert_eq!(outcome.dataset().len(), 1);
    assert!(outcome.dataset().features()[0].is_failed());
    assert_eq!(transport.count(), 5);
    assert!(matches!(
        transport.requests().last(),
        Some(ProviderRequest::LegacyPlaceDetails { .. })
    ));
}

#[tokio::test]
async fn text_search_reports_the_provider_cursor() {
    let transport = Arc::new(ScriptedTransport::new(|_| {
        Ok(ProviderResponse::ok(json!({
            "places": [common::place("p1", &["bakery"])],
            "nextPageToken": "CURSOR-2"
        })))
    }));
    let executor = Executor::new(transport.clone(), quick_policy());
    let geo = geo().with_page_token(Some("CURSOR-1".to_string()));
    let outcome = executor.text_search(&geo, "bakery").await;
    assert_eq!(outcome.next_cursor(), Some("CURSOR-2"));
    match &transport.requests()[0] {
        ProviderRequest::TextSearch { page_token, .. } => assert_eq!(page_token.as_deref(), Some("CURSOR-1")),
        other => panic!("expected a text search, got {:?}", other),
    }
}
