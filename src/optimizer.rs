//! Orders and merges DNF clauses into the provider requests that reconstruct them.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::construct::{CallDescriptor, Clause, ClauseKind, ClauseList, SearchKind, Term};
use crate::error::{PlacequeryError, Result};

pub const DEFAULT_DENSITY: f64 = 1.0;

// ------------- Popularity -------------
/// Read-only term → density table, loaded once and handed to whoever needs it.
#[derive(Clone, Debug, Default)]
pub struct Popularity {
    densities: HashMap<String, f64>,
}
impl Popularity {
    pub fn new(densities: HashMap<String, f64>) -> Self {
        Self {
            densities: densities.into_iter().map(|(t, d)| (t.to_lowercase(), d)).collect(),
        }
    }
    /// Accepts a flat `{term: density}` object or groups of them, nested to any depth.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let mut densities = HashMap::new();
        flatten(&value, &mut densities)?;
        Ok(Self::new(densities))
    }
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| PlacequeryError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }
    pub fn density(&self, term: &str) -> f64 {
        self.densities.get(term).copied().unwrap_or(DEFAULT_DENSITY)
    }
    pub fn len(&self) -> usize {
        self.densities.len()
    }
    pub fn is_empty(&self) -> bool {
        self.densities.is_empty()
    }
}

fn flatten(value: &Value, densities: &mut HashMap<String, f64>) -> Result<()> {
    let object = value
        .as_object()
        .ok_or_else(|| PlacequeryError::Config("popularity table must be a JSON object".into()))?;
    for (key, value) in object {
        match value {
            Value::Number(n) => {
                densities.insert(key.clone(), n.as_f64().unwrap_or(DEFAULT_DENSITY));
            }
            Value::Object(_) => flatten(value, densities)?,
            _ => {
                return Err(PlacequeryError::Config(format!(
                    "popularity of '{}' is neither a number nor a group",
                    key
                )));
            }
        }
    }
    Ok(())
}

// ------------- Optimizer -------------
// appends `emitted` terms to `excluded`, skipping duplicates and anything `included` asks for
fn merge(excluded: &mut Vec<String>, included: &[String], emitted: &[String]) {
    for term in emitted {
        if !excluded.contains(term) && !included.contains(term) {
            excluded.push(term.clone());
        }
    }
}

fn texts<'a>(terms: impl IntoIterator<Item = &'a Term>) -> Vec<String> {
    terms.into_iter().map(|t| t.text().to_string()).collect()
}

/// Category path.
///
/// Simple positive terms are emitted most popular first, each excluding the terms
/// already emitted. Every later descriptor excludes those positives as well, since
/// any place carrying one of them is already fetched. A simple negated term gets a
/// descriptor of its own and is never pushed into another descriptor: a place that
/// carries it can still satisfy a different clause. Clauses mixing category and
/// phrase terms go to the text-search shape with all their terms.
pub fn optimize(clauses: &ClauseList, popularity: Option<&Popularity>) -> Vec<CallDescriptor> {
    let mut positives: Vec<&Clause> = Vec::new();
    let mut negatives: Vec<String> = Vec::new();
    let mut compounds: Vec<&Clause> = Vec::new();
    let mut texts_only: Vec<&Clause> = Vec::new();

    for clause in clauses {
        if clause.kind() != ClauseKind::Category {
            texts_only.push(clause);
        } else if clause.is_simple() && clause.excluded().is_empty() {
            positives.push(clause);
        } else if clause.is_simple() {
            negatives.extend(texts(clause.excluded()));
        } else {
            compounds.push(clause);
        }
    }

    let density = |clause: &Clause| -> f64 {
        match (popularity, clause.included().iter().next()) {
            (Some(p), Some(term)) => p.density(term.text()),
            _ => DEFAULT_DENSITY,
        }
    };
    positives.sort_by(|a, b| density(b).total_cmp(&density(a)));

    let mut descriptors = Vec::new();
    let mut emitted: Vec<String> = Vec::new();
    for clause in positives {
        let included = texts(clause.included());
        let excluded = emitted.clone();
        emitted.extend(included.iter().cloned());
        descriptors.push(CallDescriptor::new(included, excluded, SearchKind::Category));
    }
    for negative in &negatives {
        let mut excluded = vec![negative.clone()];
        merge(&mut excluded, &[], &emitted);
        descriptors.push(CallDescriptor::new(Vec::new(), excluded, SearchKind::Category));
    }
    for clause in compounds {
        let included = texts(clause.included());
        let mut excluded = texts(clause.excluded());
        merge(&mut excluded, &included, &emitted);
        descriptors.push(CallDescriptor::new(included, excluded, SearchKind::Category));
    }
    for clause in texts_only {
        descriptors.push(text_descriptor(clause));
    }

    debug!(
        clauses = %clauses,
        descriptors = ?descriptors.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        "optimized call sequence"
    );
    descriptors
}

/// Keyword path: one text-search descriptor per clause.
pub fn optimize_keywords(clauses: &ClauseList) -> Vec<CallDescriptor> {
    clauses.iter().map(text_descriptor).collect()
}

fn text_descriptor(clause: &Clause) -> CallDescriptor {
    CallDescriptor::new(
        texts(clause.included()),
        texts(clause.excluded()),
        SearchKind::Text,
    )
}
