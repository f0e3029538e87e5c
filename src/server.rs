use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::construct::{CallDescriptor, Coordinate, FeatureCollection, PlanState};
use crate::error::PlacequeryError;
use crate::interface::LoadInterface;
use crate::search::{SearchRequest, SearchType};
use crate::splitter::split_category_keyword;

#[derive(Deserialize)]
pub struct CompileRequest {
    pub query: String,
    #[serde(default)]
    pub search_type: SearchType,
}

#[derive(Serialize)]
pub struct CompileResponse {
    pub status: String,
    pub clauses: Vec<String>,
    pub categories: String,
    pub keywords: String,
    pub calls: Vec<CallDescriptor>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum FetchAction {
    #[default]
    #[serde(rename = "sample")]
    Sample,
    #[serde(rename = "full data")]
    FullData,
}

#[derive(Deserialize)]
pub struct FetchRequest {
    pub query: String,
    pub lat: f64,
    pub lng: f64,
    pub radius: f64,
    #[serde(default)]
    pub search_type: SearchType,
    #[serde(default)]
    pub action: FetchAction,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub ids_only: bool,
}
impl FetchRequest {
    fn search_request(&self) -> SearchRequest {
        SearchRequest {
            query: self.query.clone(),
            center: Coordinate::new(self.lat, self.lng),
            radius: self.radius,
            search_type: self.search_type,
            page_token: self.page_token.clone(),
            ids_only: self.ids_only,
        }
    }
}

#[derive(Serialize)]
pub struct FetchResponse {
    pub status: String,
    pub elapsed_ms: f64,
    pub data: FeatureCollection,
    pub next_page_token: Option<String>,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_name: Option<String>,
    pub api_calls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_id: Option<u64>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}

/// Caller mistakes are 400, everything else 500.
pub fn status_of(error: &PlacequeryError) -> StatusCode {
    match error {
        PlacequeryError::Parse { .. }
        | PlacequeryError::TooManyTerms { .. }
        | PlacequeryError::TooComplex { .. }
        | PlacequeryError::Token(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

struct ApiError(PlacequeryError);
impl From<PlacequeryError> for ApiError {
    fn from(e: PlacequeryError) -> Self {
        Self(e)
    }
}
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        let msg = format!("{}", self.0);
        warn!(%msg, code = %status.as_u16(), "request error");
        let body = ErrorResponse {
            status: "error".into(),
            error: msg,
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(interface: Arc<LoadInterface>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    Router::new()
        .route("/v1/compile", post(compile))
        .route("/v1/fetch_dataset", post(fetch_dataset))
        .route("/v1/progress/:plan_name", get(progress))
        .route("/v1/place/:id", get(place))
        .layer(cors)
        .with_state(interface)
}

async fn compile(
    State(interface): State<Arc<LoadInterface>>,
    Json(req): Json<CompileRequest>,
) -> Result<Json<CompileResponse>, ApiError> {
    let pipeline = interface.pipeline();
    let clauses = pipeline.compiler().compile(&req.query)?;
    let (categories, keywords) = split_category_keyword(&req.query)?;
    let calls = pipeline.plan_calls(&req.query, req.search_type)?;
    info!(clauses = clauses.len(), calls = calls.len(), "query compiled");
    Ok(Json(CompileResponse {
        status: "ok".into(),
        clauses: clauses.iter().map(|c| c.to_string()).collect(),
        categories,
        keywords,
        calls,
    }))
}

async fn fetch_dataset(
    State(interface): State<Arc<LoadInterface>>,
    Json(req): Json<FetchRequest>,
) -> Result<Json<FetchResponse>, ApiError> {
    let started = Instant::now();
    let request = req.search_request();
    let result = match req.action {
        FetchAction::Sample => interface.fetch_sample(&request).await?,
        FetchAction::FullData => {
            interface
                .fetch_full_data(&request, &req.country, &req.city)
                .await?
        }
    };
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(ms = elapsed_ms, features = result.collection.len(), progress = result.progress, "fetch complete");
    Ok(Json(FetchResponse {
        status: "ok".into(),
        elapsed_ms,
        data: result.collection,
        next_page_token: result.next_page_token,
        progress: result.progress,
        plan_name: result.plan_name,
        api_calls: result.api_calls,
        load_id: result.background.map(|id| id.value()),
    }))
}

async fn progress(
    State(interface): State<Arc<LoadInterface>>,
    Path(plan_name): Path<String>,
) -> Result<Response, ApiError> {
    Ok(match interface.progress(&plan_name).await? {
        Some(state) => Json::<PlanState>(state).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

async fn place(State(interface): State<Arc<LoadInterface>>, Path(id): Path<String>) -> Json<FeatureCollection> {
    Json(interface.pipeline().place_details(&id).await)
}
