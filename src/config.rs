//! Settings read once at startup from an optional file and `PLACEQUERY__*` environment variables.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::compiler::CompileLimits;
use crate::error::{PlacequeryError, Result};
use crate::executor::RetryPolicy;
use crate::walker::{RectifyRule, WalkerSettings};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}
impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file, in-memory when absent.
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: String,
    pub nearby_url: String,
    pub text_url: String,
    pub details_url: String,
    pub legacy_nearby_url: String,
    pub legacy_text_url: String,
    pub legacy_details_url: String,
    pub field_mask: String,
    pub timeout_ms: u64,
}
impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            nearby_url: "https://places.googleapis.com/v1/places:searchNearby".to_string(),
            text_url: "https://places.googleapis.com/v1/places:searchText".to_string(),
            details_url: "https://places.googleapis.com/v1/places".to_string(),
            legacy_nearby_url: "https://maps.googleapis.com/maps/api/place/nearbysearch/json".to_string(),
            legacy_text_url: "https://maps.googleapis.com/maps/api/place/textsearch/json".to_string(),
            legacy_details_url: "https://maps.googleapis.com/maps/api/place/details/json".to_string(),
            field_mask: [
                "places.id",
                "places.displayName",
                "places.formattedAddress",
                "places.internationalPhoneNumber",
                "places.location",
                "places.types",
                "places.primaryType",
                "places.priceLevel",
                "places.rating",
                "places.userRatingCount",
            ]
            .join(","),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}
impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
        }
    }
}
impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    pub max_terms: usize,
    pub max_clauses: usize,
}
impl Default for CompilerSettings {
    fn default() -> Self {
        let limits = CompileLimits::default();
        Self {
            max_terms: limits.max_terms,
            max_clauses: limits.max_clauses,
        }
    }
}
impl CompilerSettings {
    pub fn limits(&self) -> CompileLimits {
        CompileLimits {
            max_terms: self.max_terms,
            max_clauses: self.max_clauses,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RectifyMode {
    NonEmpty,
    Minimum,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    pub rectify: RectifyMode,
    pub min_features: usize,
    pub max_empty_steps: usize,
    pub in_progress_secs: i64,
    pub completed_days: i64,
    pub min_radius_m: f64,
}
impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            rectify: RectifyMode::NonEmpty,
            min_features: 20,
            max_empty_steps: 30,
            in_progress_secs: 30,
            completed_days: 90,
            min_radius_m: 2_000.0,
        }
    }
}
impl WalkerConfig {
    pub fn settings(&self) -> WalkerSettings {
        WalkerSettings {
            rectify: match self.rectify {
                RectifyMode::NonEmpty => RectifyRule::AcceptNonEmpty,
                RectifyMode::Minimum => RectifyRule::RequireMinimum(self.min_features),
            },
            max_empty_steps: self.max_empty_steps,
            in_progress_window: chrono::Duration::seconds(self.in_progress_secs),
            completed_window: chrono::Duration::days(self.completed_days),
            min_radius: self.min_radius_m,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub provider: ProviderSettings,
    pub retry: RetrySettings,
    pub compiler: CompilerSettings,
    pub walker: WalkerConfig,
    pub popularity_path: Option<PathBuf>,
    pub plan_dir: Option<PathBuf>,
}
impl Settings {
    /// Layers `path` (if given and present; format by extension) under the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix("PLACEQUERY").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
    fn validate(&self) -> Result<()> {
        if self.compiler.max_terms > crate::compiler::SYMBOL_SPACE {
            return Err(PlacequeryError::Config(format!(
                "compiler.max_terms cannot exceed {}",
                crate::compiler::SYMBOL_SPACE
            )));
        }
        if self.walker.max_empty_steps == 0 {
            return Err(PlacequeryError::Config("walker.max_empty_steps must be positive".into()));
        }
        Ok(())
    }
}
