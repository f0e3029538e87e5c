use std::collections::{BTreeSet, HashSet};

// ids of provider records are hashed a lot during set difference and dedup
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;

// used to print out readable forms of a construct
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type IdHasher = BuildHasherDefault<SeaHasher>;
pub type IdSet<'a> = HashSet<&'a str, IdHasher>;

/// Reserved provider id carried by placeholder records of a failed call.
pub const FAILED_ID: &str = "failed";

/// Property names a normalized feature exposes.
pub const FEATURE_PROPERTIES: [&str; 9] = [
    "name",
    "rating",
    "address",
    "phone",
    "types",
    "priceLevel",
    "primaryType",
    "user_ratings_total",
    "heatmap_weight",
];

// ------------- Term -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Category,
    Phrase,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term {
    text: String,
    kind: TermKind,
}
impl Term {
    pub fn new(text: impl Into<String>, kind: TermKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
    pub fn category(text: impl Into<String>) -> Self {
        Self::new(text, TermKind::Category)
    }
    pub fn phrase(text: impl Into<String>) -> Self {
        Self::new(text, TermKind::Phrase)
    }
    pub fn text(&self) -> &str {
        &self.text
    }
    pub fn kind(&self) -> TermKind {
        self.kind
    }
}
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            TermKind::Category => write!(f, "{}", self.text),
            TermKind::Phrase => write!(f, "@{}@", self.text),
        }
    }
}

// ------------- Literal -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Pos,
    Neg,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Literal {
    term: Term,
    sign: Sign,
}
impl Literal {
    pub fn new(term: Term, sign: Sign) -> Self {
        Self { term, sign }
    }
    pub fn positive(term: Term) -> Self {
        Self::new(term, Sign::Pos)
    }
    pub fn negative(term: Term) -> Self {
        Self::new(term, Sign::Neg)
    }
    pub fn term(&self) -> &Term {
        &self.term
    }
    pub fn sign(&self) -> Sign {
        self.sign
    }
    pub fn is_negated(&self) -> bool {
        self.sign == Sign::Neg
    }
}
impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.sign {
            Sign::Pos => write!(f, "{}", self.term),
            Sign::Neg => write!(f, "~{}", self.term),
        }
    }
}

// ------------- Clause -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClauseKind {
    Category,
    Phrase,
    Mixed,
}

/// A conjunction of signed literals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Clause {
    included: BTreeSet<Term>,
    excluded: BTreeSet<Term>,
}
impl Clause {
    /// Returns `None` when some term appears with both signs.
    pub fn new(literals: impl IntoIterator<Item = Literal>) -> Option<Self> {
        let mut clause = Self::default();
        for literal in literals {
            match literal.sign {
                Sign::Pos => clause.included.insert(literal.term),
                Sign::Neg => clause.excluded.insert(literal.term),
            };
        }
        if clause.included.intersection(&clause.excluded).next().is_some() {
            return None;
        }
        Some(clause)
    }
    pub fn included(&self) -> &BTreeSet<Term> {
        &self.included
    }
    pub fn excluded(&self) -> &BTreeSet<Term> {
        &self.excluded
    }
    pub fn literals(&self) -> impl Iterator<Item = Literal> + '_ {
        self.included
            .iter()
            .map(|t| Literal::positive(t.clone()))
            .chain(self.excluded.iter().map(|t| Literal::negative(t.clone())))
    }
    pub fn len(&self) -> usize {
        self.included.len() + self.excluded.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// A single literal, negated or not.
    pub fn is_simple(&self) -> bool {
        self.len() == 1
    }
    pub fn kind(&self) -> ClauseKind {
        let mut terms = self.included.iter().chain(self.excluded.iter());
        let first = match terms.next() {
            Some(term) => term.kind(),
            None => return ClauseKind::Category,
        };
        if terms.all(|t| t.kind() == first) {
            match first {
                TermKind::Category => ClauseKind::Category,
                TermKind::Phrase => ClauseKind::Phrase,
            }
        } else {
            ClauseKind::Mixed
        }
    }
}
impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "true");
        }
        let parts: Vec<String> = self.literals().map(|l| l.to_string()).collect();
        write!(f, "{}", parts.join(" & "))
    }
}

// ------------- ClauseList -------------
/// A disjunction of clauses (DNF).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClauseList {
    clauses: Vec<Clause>,
}
impl ClauseList {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Clause> {
        self.clauses.iter()
    }
    pub fn len(&self) -> usize {
        self.clauses.len()
    }
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}
impl<'a> IntoIterator for &'a ClauseList {
    type Item = &'a Clause;
    type IntoIter = std::slice::Iter<'a, Clause>;
    fn into_iter(self) -> Self::IntoIter {
        self.clauses.iter()
    }
}
impl fmt::Display for ClauseList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "false");
        }
        let parts: Vec<String> = self.clauses.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(" | "))
    }
}

// ------------- CallDescriptor -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Category,
    Text,
}
impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SearchKind::Category => write!(f, "category"),
            SearchKind::Text => write!(f, "text"),
        }
    }
}

/// The shape of one planned provider request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CallDescriptor {
    included: Vec<String>,
    excluded: Vec<String>,
    kind: SearchKind,
}
impl CallDescriptor {
    pub fn new(included: Vec<String>, excluded: Vec<String>, kind: SearchKind) -> Self {
        Self {
            included,
            excluded,
            kind,
        }
    }
    pub fn included(&self) -> &[String] {
        &self.included
    }
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }
    pub fn kind(&self) -> SearchKind {
        self.kind
    }
    pub fn mentions(&self, term: &str) -> bool {
        self.included.iter().chain(self.excluded.iter()).any(|t| t == term)
    }
}
impl fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} +[{}] -[{}]",
            self.kind,
            self.included.join(", "),
            self.excluded.join(", ")
        )
    }
}

// ------------- Geo -------------
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}
impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Coordinate,
    /// meters
    pub radius: f64,
}

/// Where a provider call is aimed.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoContext {
    circle: Circle,
    page_token: Option<String>,
}
impl GeoContext {
    pub fn new(center: Coordinate, radius: f64) -> Self {
        Self {
            circle: Circle { center, radius },
            page_token: None,
        }
    }
    pub fn with_page_token(mut self, page_token: Option<String>) -> Self {
        self.page_token = page_token.filter(|t| !t.is_empty());
        self
    }
    pub fn center(&self) -> Coordinate {
        self.circle.center
    }
    pub fn radius(&self) -> f64 {
        self.circle.radius
    }
    pub fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }
}
impl From<Circle> for GeoContext {
    fn from(circle: Circle) -> Self {
        Self {
            circle,
            page_token: None,
        }
    }
}

// ------------- Feature -------------
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// [lng, lat]
    pub coordinates: [f64; 2],
}
impl Geometry {
    pub fn point(lng: f64, lat: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [lng, lat],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureProperties {
    pub name: String,
    pub rating: Option<f64>,
    pub address: String,
    pub phone: String,
    pub types: Vec<String>,
    #[serde(rename = "priceLevel")]
    pub price_level: Option<String>,
    #[serde(rename = "primaryType")]
    pub primary_type: String,
    pub user_ratings_total: Option<u64>,
    pub heatmap_weight: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}
impl Feature {
    pub fn new(geometry: Geometry, properties: FeatureProperties) -> Self {
        Self {
            kind: "Feature".to_string(),
            geometry,
            properties,
        }
    }
    /// Placeholder standing in for a record a failed provider call could not deliver.
    pub fn failed() -> Self {
        Self::new(
            Geometry::point(0.0, 0.0),
            FeatureProperties {
                name: FAILED_ID.to_string(),
                heatmap_weight: 1,
                id: Some(FAILED_ID.to_string()),
                ..Default::default()
            },
        )
    }
    pub fn id(&self) -> Option<&str> {
        self.properties.id.as_deref()
    }
    pub fn is_failed(&self) -> bool {
        self.id() == Some(FAILED_ID)
    }
    pub fn strip_id(&mut self) {
        self.properties.id = None;
    }
}

// ------------- Dataset -------------
/// Features as stored in the dataset cache. Provider ids are unique within one dataset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedDataset {
    features: Vec<Feature>,
    properties: Vec<String>,
    /// Provider cursor of the page these features came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_cursor: Option<String>,
}
impl CachedDataset {
    pub fn new(features: Vec<Feature>) -> Self {
        let mut dataset = Self::default();
        dataset.extend(features);
        dataset
    }
    pub fn with_next_cursor(mut self, next_cursor: Option<String>) -> Self {
        self.next_cursor = next_cursor;
        self
    }
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref()
    }
    pub fn features(&self) -> &[Feature] {
        &self.features
    }
    pub fn into_features(self) -> Vec<Feature> {
        self.features
    }
    pub fn properties(&self) -> &[String] {
        &self.properties
    }
    pub fn len(&self) -> usize {
        self.features.len()
    }
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
    pub fn is_degraded(&self) -> bool {
        self.features.iter().any(|f| f.is_failed())
    }
    pub fn ids(&self) -> IdSet<'_> {
        self.features.iter().filter_map(|f| f.id()).collect()
    }
    // Appends features whose id has not been seen, first occurrence wins.
    // Features without an id cannot be deduplicated and are kept.
    fn extend(&mut self, features: impl IntoIterator<Item = Feature>) {
        let mut seen: HashSet<String, IdHasher> = self
            .features
            .iter()
            .filter_map(|f| f.id().map(str::to_owned))
            .collect();
        for feature in features {
            let fresh = match feature.id() {
                Some(id) => seen.insert(id.to_owned()),
                None => true,
            };
            if fresh {
                self.features.push(feature);
            }
        }
        if !self.features.is_empty() && self.properties.is_empty() {
            self.properties = FEATURE_PROPERTIES.iter().map(|p| p.to_string()).collect();
        }
    }
    /// Features of `self` whose provider id does not appear in `other`.
    pub fn difference(&self, other: &CachedDataset) -> CachedDataset {
        let excluded = other.ids();
        CachedDataset::new(
            self.features
                .iter()
                .filter(|f| f.id().is_none_or(|id| !excluded.contains(id)))
                .cloned()
                .collect(),
        )
    }
    /// Features of `self` whose provider id also appears in `other`.
    pub fn intersection(&self, other: &CachedDataset) -> CachedDataset {
        let kept = other.ids();
        CachedDataset::new(
            self.features
                .iter()
                .filter(|f| f.id().is_some_and(|id| kept.contains(id)))
                .cloned()
                .collect(),
        )
    }
    /// Concatenation deduplicated by provider id.
    pub fn union<'a>(datasets: impl IntoIterator<Item = &'a CachedDataset>) -> CachedDataset {
        let mut combined = CachedDataset::default();
        let mut properties = BTreeSet::new();
        for dataset in datasets {
            properties.extend(dataset.properties.iter().cloned());
            combined.extend(dataset.features.iter().cloned());
        }
        if !properties.is_empty() {
            combined.properties = properties.into_iter().collect();
        }
        combined
    }
}

/// GeoJSON output of a search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
    pub properties: Vec<String>,
}
impl FeatureCollection {
    /// The internal `id` property is dropped unless `keep_ids` is set.
    pub fn from_dataset(dataset: CachedDataset, keep_ids: bool) -> Self {
        let properties = dataset.properties().to_vec();
        let mut features = dataset.into_features();
        if !keep_ids {
            features.iter_mut().for_each(Feature::strip_id);
        }
        Self {
            kind: "FeatureCollection".to_string(),
            features,
            properties,
        }
    }
    pub fn empty() -> Self {
        Self::from_dataset(CachedDataset::default(), false)
    }
    pub fn len(&self) -> usize {
        self.features.len()
    }
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

// ------------- Plan -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMarker {
    Normal,
    Skip,
    End,
}

/// One row of a geographic decomposition plan.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanEntry {
    level: String,
    circle: Option<Circle>,
    marker: PlanMarker,
}
impl PlanEntry {
    pub fn normal(level: impl Into<String>, circle: Circle) -> Self {
        Self {
            level: level.into(),
            circle: Some(circle),
            marker: PlanMarker::Normal,
        }
    }
    pub fn skip(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            circle: None,
            marker: PlanMarker::Skip,
        }
    }
    pub fn end() -> Self {
        Self {
            level: String::new(),
            circle: None,
            marker: PlanMarker::End,
        }
    }
    pub fn level(&self) -> &str {
        &self.level
    }
    pub fn circle(&self) -> Option<Circle> {
        self.circle
    }
    pub fn marker(&self) -> PlanMarker {
        self.marker
    }
    /// Number of dotted components, the root circle has depth 1.
    pub fn depth(&self) -> usize {
        if self.level.is_empty() { 0 } else { self.level.split('.').count() }
    }
    pub fn is_descendant_of(&self, level: &str) -> bool {
        !level.is_empty()
            && self.level.len() > level.len()
            && self.level.starts_with(level)
            && self.level[level.len()..].starts_with('.')
    }
}

/// Durable progress of a "full data" plan walk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanState {
    pub plan_name: String,
    pub current_index: usize,
    pub progress: u8,
    pub next_page_token: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub api_call_count: u64,
}
impl PlanState {
    pub fn new(plan_name: impl Into<String>) -> Self {
        Self {
            plan_name: plan_name.into(),
            ..Default::default()
        }
    }
    pub fn is_complete(&self) -> bool {
        self.progress >= 100
    }
}
