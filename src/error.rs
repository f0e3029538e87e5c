use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlacequeryError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize>, col: Option<usize> },
    #[error("Query contains {found} distinct terms, more than the {cap} allowed")]
    TooManyTerms { found: usize, cap: usize },
    #[error("Query expands to more than {cap} clauses")]
    TooComplex { cap: usize },
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("Invalid resume token: {0}")]
    Token(String),
    #[error("Plan error: {0}")]
    Plan(String),
    #[error("No plan named {0}")]
    PlanNotFound(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, PlacequeryError>;

impl PlacequeryError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into(), line: None, col: None }
    }
}

// Helper conversions
impl From<rusqlite::Error> for PlacequeryError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<config::ConfigError> for PlacequeryError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<serde_json::Error> for PlacequeryError {
    fn from(e: serde_json::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<reqwest::Error> for PlacequeryError {
    fn from(e: reqwest::Error) -> Self { Self::Provider(e.to_string()) }
}
impl From<std::io::Error> for PlacequeryError {
    fn from(e: std::io::Error) -> Self { Self::Plan(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for PlacequeryError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
