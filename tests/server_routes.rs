mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use common::{ScriptedTransport, pipeline, places};
use placequery::interface::LoadInterface;
use placequery::plan::MemoryPlanSource;
use placequery::server::router;
use placequery::walker::{MemoryProgressStore, PlanWalker, WalkerSettings};

fn interface(transport: Arc<ScriptedTransport>) -> Arc<LoadInterface> {
    let walker = PlanWalker::new(
        Arc::new(MemoryPlanSource::new()),
        Arc::new(MemoryProgressStore::new()),
        WalkerSettings::default(),
    );
    Arc::new(LoadInterface::new(pipeline(transport), Arc::new(walker)))
}

async fn call(interface: &Arc<LoadInterface>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = router(interface.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn compile_returns_clauses_halves_and_calls() {
    let iface = interface(Arc::new(ScriptedTransport::new(|_| Ok(places(&[])))));
    let (status, body) = call(
        &iface,
        "POST",
        "/v1/compile",
        Some(json!({ "query": "(restaurant OR cafe) AND NOT @fast food@", "search_type": "both" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clauses"], json!(["restaurant & ~@fast food@", "cafe & ~@fast food@"]));
    assert_eq!(body["categories"], "(restaurant OR cafe)");
    assert_eq!(body["keywords"], "NOT @fast food@");
    assert_eq!(body["calls"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn query_mistakes_are_bad_requests() {
    let iface = interface(Arc::new(ScriptedTransport::new(|_| Ok(places(&[])))));
    let (status, body) = call(&iface, "POST", "/v1/compile", Some(json!({ "query": "cafe AND" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, _) = call(
        &iface,
        "POST",
        "/v1/fetch_dataset",
        Some(json!({
            "query": "cafe", "lat": 59.33, "lng": 18.06, "radius": 1000.0,
            "action": "full data", "city": "stockholm", "country": "se",
            "page_token": "abc@#$notanumber"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sample_fetch_returns_a_feature_collection() {
    let transport = Arc::new(ScriptedTransport::new(|_| Ok(places(&["a", "b"]))));
    let iface = interface(transport.clone());
    let (status, body) = call(
        &iface,
        "POST",
        "/v1/fetch_dataset",
        Some(json!({ "query": "cafe", "lat": 59.33, "lng": 18.06, "radius": 1000.0, "ids_only": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["type"], "FeatureCollection");
    assert_eq!(body["data"]["features"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["data"]["features"][0]["properties"]["id"], "a");
    assert_eq!(body["progress"], 100);
    assert!(body.get("plan_name").is_none());
    assert_eq!(transport.count(), 1);
}

#[tokio::test]
async fn full_data_fetch_steps_and_finishes_in_the_background() {
    let transport = Arc::new(ScriptedTransport::new(|_| Ok(places(&["a"]))));
    let iface = interface(transport.clone());
    let (status, body) = call(
        &iface,
        "POST",
        "/v1/fetch_dataset",
        Some(json!({
            "query": "cafe", "lat": 59.33, "lng": 18.06, "radius": 1000.0,
            "action": "full data", "city": "stockholm", "country": "se"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan_name"], "plan_cafe_se_stockholm");
    // a 1km circle is below the subdivision radius, so the plan is one circle
    assert_eq!(body["next_page_token"], "@#$1");
    assert_eq!(body["progress"], 99);
    assert_eq!(body["data"]["features"].as_array().map(Vec::len), Some(1));
    assert!(body["load_id"].is_u64());

    let mut finished = false;
    for _ in 0..100 {
        let (status, state) = call(&iface, "GET", "/v1/progress/plan_cafe_se_stockholm", None).await;
        assert_eq!(status, StatusCode::OK);
        if state["progress"] == 100 {
            assert!(state["completed_at"].is_string());
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(finished, "background walk did not complete");
    assert_eq!(iface.active_loads(), 0);

    // a recently completed plan is not walked again
    let (_, again) = call(
        &iface,
        "POST",
        "/v1/fetch_dataset",
        Some(json!({
            "query": "cafe", "lat": 59.33, "lng": 18.06, "radius": 1000.0,
            "action": "full data", "city": "stockholm", "country": "se",
            "page_token": "@#$1"
        })),
    )
    .await;
    assert_eq!(again["progress"], 100);
    assert!(again["next_page_token"].is_null());
    assert!(again.get("load_id").is_none());
}

#[tokio::test]
async fn unknown_plans_have_no_progress() {
    let iface = interface(Arc::new(ScriptedTransport::new(|_| Ok(places(&[])))));
    let (status, _) = call(&iface, "GET", "/v1/progress/plan_nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn background_walks_can_be_cancelled() {
    let transport = Arc::new(ScriptedTransport::new(|_| Ok(places(&["a"]))));
    let iface = interface(transport);
    let pipeline = iface.pipeline().clone();
    let id = iface
        .start_full_load(
            "plan_unknown",
            placequery::search::PlanQuery::new(pipeline, "cafe", Default::default()),
            Default::default(),
        )
        .expect("spawned");
    assert!(iface.cancel(id));
    assert!(!iface.cancel(id));
}
