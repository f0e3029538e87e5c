//! Placequery – boolean place search over a paid places provider.
//!
//! A query such as `(restaurant OR cafe) AND NOT @fast food@` mixes provider
//! categories with quoted free-text phrases. Placequery turns it into the
//! a short sequence of provider calls that answers it, runs those calls with
//! retries, and composes the results with set algebra over cached datasets.
//!
//! ## Pipeline
//! * [`splitter`] – Splits a query into its category half and its phrase half.
//! * [`compiler`] – Parses a query (grammar in `boolean.pest`) and reduces it to
//!   a minimal disjunctive normal form over at most [`compiler::SYMBOL_SPACE`] terms.
//! * [`optimizer`] – Orders clauses by category popularity into [`construct::CallDescriptor`]s.
//!   Later calls exclude the categories already fetched, which trims overlap;
//!   places returned by more than one call are removed when results are unioned.
//! * [`cache`] – Content-addressed datasets and the composition of cached partials.
//! * [`executor`] – One provider call: exponential backoff, then the legacy API,
//!   then a failed placeholder.
//! * [`provider`] – Provider wire shapes and normalization to GeoJSON features.
//! * [`search`] – One logical search from query text to a deduplicated dataset.
//!
//! ## Full data
//! A "full data" fetch walks a precomputed [`plan`] of circles covering a city.
//! The [`walker`] searches one circle at a time, skips the descendants of
//! circles that come back empty and records progress, so a caller holding a
//! [`token::ResumeToken`] can continue where the last page stopped. The
//! [`interface`] runs the remainder of a walk in the background.
//!
//! ## Persistence
//! The [`persist::Persistor`] keeps cached datasets and plan progress in SQLite,
//! either in memory or in a file.
//!
//! ## Quick Start
//! ```
//! use placequery::compiler::compile_to_clauses;
//! let clauses = compile_to_clauses("(restaurant OR cafe) AND NOT bar").unwrap();
//! assert_eq!(clauses.len(), 2);
//! ```

pub mod error;
pub mod construct;
pub mod compiler;
pub mod splitter;
pub mod optimizer;
pub mod token;
pub mod provider;
pub mod executor;
pub mod cache;
pub mod plan;
pub mod walker;
pub mod search;
pub mod persist;
pub mod config;
pub mod interface;
pub mod server;
