//! Places provider request shapes, the transport seam, and record normalization.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderSettings;
use crate::construct::{Coordinate, Feature, FeatureProperties, GeoContext, Geometry};
use crate::error::Result;

// ------------- ProviderRequest -------------
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderRequest {
    CategorySearch {
        center: Coordinate,
        radius: f64,
        included: Vec<String>,
        excluded: Vec<String>,
    },
    TextSearch {
        center: Coordinate,
        radius: f64,
        query: String,
        page_token: Option<String>,
    },
    PlaceDetails {
        id: String,
    },
    /// Reduced parameter set: one type, no exclusions.
    LegacyCategorySearch {
        center: Coordinate,
        radius: f64,
        kind: Option<String>,
    },
    LegacyTextSearch {
        center: Coordinate,
        radius: f64,
        query: String,
        page_token: Option<String>,
    },
    LegacyPlaceDetails {
        id: String,
    },
}
impl ProviderRequest {
    pub fn category_search(geo: &GeoContext, included: &[String], excluded: &[String]) -> Self {
        Self::CategorySearch {
            center: geo.center(),
            radius: geo.radius(),
            included: included.to_vec(),
            excluded: excluded.to_vec(),
        }
    }
    pub fn text_search(geo: &GeoContext, query: impl Into<String>) -> Self {
        Self::TextSearch {
            center: geo.center(),
            radius: geo.radius(),
            query: query.into(),
            page_token: geo.page_token().map(str::to_owned),
        }
    }
    pub fn place_details(id: impl Into<String>) -> Self {
        Self::PlaceDetails { id: id.into() }
    }
    /// The same request rewritten for the older GET endpoints.
    pub fn to_legacy(&self) -> Self {
        match self {
            Self::CategorySearch {
                center,
                radius,
                included,
                ..
            } => Self::LegacyCategorySearch {
                center: *center,
                radius: *radius,
                kind: included.first().cloned(),
            },
            Self::TextSearch {
                center,
                radius,
                query,
                page_token,
            } => Self::LegacyTextSearch {
                center: *center,
                radius: *radius,
                query: query.clone(),
                page_token: page_token.clone(),
            },
            Self::PlaceDetails { id } => Self::LegacyPlaceDetails { id: id.clone() },
            legacy => legacy.clone(),
        }
    }
    /// A category search that excludes `kind`.
    pub fn excludes(&self, kind: &str) -> bool {
        match self {
            Self::CategorySearch { excluded, .. } => excluded.iter().any(|e| e == kind),
            _ => false,
        }
    }
    /// The legacy shape keeps only the first included type.
    pub fn legacy_drops_included(&self) -> bool {
        matches!(self, Self::CategorySearch { included, .. } if included.len() > 1)
    }
    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            Self::LegacyCategorySearch { .. } | Self::LegacyTextSearch { .. } | Self::LegacyPlaceDetails { .. }
        )
    }
    /// JSON body of the current POST shapes, `None` for GET shapes.
    pub fn body(&self) -> Option<Value> {
        match self {
            Self::CategorySearch {
                center,
                radius,
                included,
                excluded,
            } => Some(json!({
                "includedTypes": included,
                "excludedTypes": excluded,
                "locationRestriction": { "circle": circle_json(center, *radius) },
            })),
            Self::TextSearch {
                center,
                radius,
                query,
                page_token,
            } => Some(json!({
                "textQuery": query,
                "includePureServiceAreaBusinesses": false,
                "pageToken": page_token.as_deref().unwrap_or(""),
                "locationBias": { "circle": circle_json(center, *radius) },
            })),
            _ => None,
        }
    }
    /// Query parameters of the legacy GET shapes, without the key.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let location = |c: &Coordinate| format!("{},{}", c.lat, c.lng);
        match self {
            Self::LegacyCategorySearch { center, radius, kind } => {
                let mut params = vec![("location", location(center)), ("radius", radius.to_string())];
                if let Some(kind) = kind {
                    params.push(("type", kind.clone()));
                }
                params
            }
            Self::LegacyTextSearch {
                center,
                radius,
                query,
                page_token,
            } => {
                let mut params = vec![
                    ("query", query.clone()),
                    ("location", location(center)),
                    ("radius", radius.to_string()),
                ];
                if let Some(token) = page_token {
                    params.push(("pagetoken", token.clone()));
                }
                params
            }
            Self::LegacyPlaceDetails { id } => vec![("place_id", id.clone())],
            _ => Vec::new(),
        }
    }
}
impl fmt::Display for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::CategorySearch { included, excluded, .. } => {
                write!(f, "searchNearby +[{}] -[{}]", included.join(","), excluded.join(","))
            }
            Self::TextSearch { query, .. } => write!(f, "searchText '{}'", query),
            Self::PlaceDetails { id } => write!(f, "details {}", id),
            Self::LegacyCategorySearch { kind, .. } => {
                write!(f, "nearbysearch type={}", kind.as_deref().unwrap_or(""))
            }
            Self::LegacyTextSearch { query, .. } => write!(f, "textsearch '{}'", query),
            Self::LegacyPlaceDetails { id } => write!(f, "legacy details {}", id),
        }
    }
}

fn circle_json(center: &Coordinate, radius: f64) -> Value {
    json!({
        "center": { "latitude": center.lat, "longitude": center.lng },
        "radius": radius,
    })
}

// ------------- Transport -------------
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Value,
}
impl ProviderResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Sends one request to the places provider. Errors are transport failures;
/// non-200 answers come back as responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    settings: ProviderSettings,
}
impl HttpTransport {
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ProviderRequest) -> Result<ProviderResponse> {
        let s = &self.settings;
        let builder = match request {
            ProviderRequest::CategorySearch { .. } => self
                .client
                .post(&s.nearby_url)
                .header("X-Goog-FieldMask", &s.field_mask),
            ProviderRequest::TextSearch { .. } => self
                .client
                .post(&s.text_url)
                .header("X-Goog-FieldMask", format!("{},nextPageToken", s.field_mask)),
            ProviderRequest::PlaceDetails { id } => self
                .client
                .get(format!("{}/{}", s.details_url.trim_end_matches('/'), id))
                .header("X-Goog-FieldMask", details_mask(&s.field_mask)),
            ProviderRequest::LegacyCategorySearch { .. } => self.client.get(&s.legacy_nearby_url),
            ProviderRequest::LegacyTextSearch { .. } => self.client.get(&s.legacy_text_url),
            ProviderRequest::LegacyPlaceDetails { .. } => self.client.get(&s.legacy_details_url),
        };
        let builder = if request.is_legacy() {
            let mut params = request.query_params();
            params.push(("key", s.api_key.clone()));
            builder.query(&params)
        } else {
            let builder = builder.header("X-Goog-Api-Key", &s.api_key);
            match request.body() {
                Some(body) => builder.json(&body),
                None => builder,
            }
        };
        debug!(request = %request, "sending provider request");
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(ProviderResponse { status, body })
    }
}

// details responses are a single place, so the `places.` prefix goes
fn details_mask(field_mask: &str) -> String {
    field_mask
        .split(',')
        .map(|f| f.trim().trim_start_matches("places."))
        .collect::<Vec<_>>()
        .join(",")
}

// ------------- Normalization -------------
/// Records of a search (`places` or legacy `results`) or a single details record.
pub fn normalize_records(body: &Value) -> Vec<Feature> {
    let records: Vec<&Value> = if let Some(places) = body.get("places").and_then(Value::as_array) {
        places.iter().collect()
    } else if let Some(results) = body.get("results").and_then(Value::as_array) {
        results.iter().collect()
    } else if let Some(result) = body.get("result").filter(|r| r.is_object()) {
        vec![result]
    } else if body.get("id").is_some() || body.get("place_id").is_some() {
        vec![body]
    } else {
        Vec::new()
    };
    records.into_iter().map(normalize_record).collect()
}

pub fn next_page_token(body: &Value) -> Option<String> {
    body.get("nextPageToken")
        .or_else(|| body.get("next_page_token"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

fn text(record: &Value, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Accepts both the current schema (`displayName.text`, `location.latitude`)
/// and the legacy one (`name`, `geometry.location.lat`).
pub fn normalize_record(record: &Value) -> Feature {
    let legacy = record.get("geometry").is_some() || record.get("place_id").is_some();
    let types: Vec<String> = record
        .get("types")
        .and_then(Value::as_array)
        .map(|ts| ts.iter().filter_map(|t| t.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    let rating = record.get("rating").and_then(Value::as_f64);
    let price_level = match record.get("priceLevel").or_else(|| record.get("price_level")) {
        Some(Value::String(level)) => Some(level.clone()),
        Some(Value::Number(level)) => Some(level.to_string()),
        _ => None,
    };
    if legacy {
        let location = &record["geometry"]["location"];
        let lat = location.get("lat").and_then(Value::as_f64).unwrap_or(0.0);
        let lng = location.get("lng").and_then(Value::as_f64).unwrap_or(0.0);
        Feature::new(
            Geometry::point(lng, lat),
            FeatureProperties {
                name: text(record, "name").unwrap_or_default(),
                rating,
                address: text(record, "formatted_address")
                    .or_else(|| text(record, "vicinity"))
                    .unwrap_or_default(),
                phone: text(record, "international_phone_number")
                    .or_else(|| text(record, "formatted_phone_number"))
                    .unwrap_or_default(),
                primary_type: types.first().cloned().unwrap_or_default(),
                types,
                price_level,
                user_ratings_total: record.get("user_ratings_total").and_then(Value::as_u64),
                heatmap_weight: 1,
                id: text(record, "place_id"),
            },
        )
    } else {
        let location = &record["location"];
        let lat = location.get("latitude").and_then(Value::as_f64).unwrap_or(0.0);
        let lng = location.get("longitude").and_then(Value::as_f64).unwrap_or(0.0);
        Feature::new(
            Geometry::point(lng, lat),
            FeatureProperties {
                name: record["displayName"]
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                rating,
                address: text(record, "formattedAddress").unwrap_or_default(),
                phone: text(record, "internationalPhoneNumber").unwrap_or_default(),
                types,
                price_level,
                primary_type: text(record, "primaryType").unwrap_or_default(),
                user_ratings_total: record.get("userRatingCount").and_then(Value::as_u64),
                heatmap_weight: 1,
                id: text(record, "id"),
            },
        )
    }
}

