//! Hierarchical circle plans: row parsing, storage, and generation.
//!
//! A plan is a list of rows such as `24.713600_46.675300_30000.0_circle=1.3`
//! (latitude, longitude, radius in meters, dotted level), closed by the row
//! `end of search plan`. Rows containing `skip` are not searched.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

use crate::construct::{Circle, Coordinate, PlanEntry, PlanMarker};
use crate::error::{PlacequeryError, Result};

pub const END_MARKER: &str = "end of search plan";
pub const SKIP_MARKER: &str = "skip";

const METERS_PER_DEGREE: f64 = 111_320.0;

lazy_static! {
    static ref LEVEL: Regex = Regex::new(r"circle=([\d.]+)").unwrap();
    static ref CENTER: Regex = Regex::new(r"^(-?\d+(?:\.\d+)?)_(-?\d+(?:\.\d+)?)_(\d+(?:\.\d+)?)_").unwrap();
}

pub fn plan_name(query: &str, country: &str, city: &str) -> String {
    format!("plan_{}_{}_{}", query, country, city)
}

fn level_of(row: &str) -> Option<String> {
    LEVEL
        .captures(row)
        .map(|c| c[1].trim_end_matches('.').to_string())
        .filter(|l| !l.is_empty())
}

pub fn parse_row(row: &str) -> Result<PlanEntry> {
    if row.contains(END_MARKER) {
        return Ok(PlanEntry::end());
    }
    if row.contains(SKIP_MARKER) {
        return Ok(PlanEntry::skip(level_of(row).unwrap_or_default()));
    }
    let level = level_of(row).ok_or_else(|| PlacequeryError::Plan(format!("row without circle level: {}", row)))?;
    let captures = CENTER
        .captures(row)
        .ok_or_else(|| PlacequeryError::Plan(format!("row without center and radius: {}", row)))?;
    let number = |i: usize| -> Result<f64> {
        captures[i]
            .parse::<f64>()
            .map_err(|e| PlacequeryError::Plan(format!("{} in row {}", e, row)))
    };
    Ok(PlanEntry::normal(
        level,
        Circle {
            center: Coordinate::new(number(1)?, number(2)?),
            radius: number(3)?,
        },
    ))
}

pub fn render_row(circle: &Circle, level: &str) -> String {
    format!(
        "{:.6}_{:.6}_{:.1}_circle={}",
        circle.center.lat, circle.center.lng, circle.radius, level
    )
}

// ------------- Plan -------------
#[derive(Clone, Debug)]
pub struct Plan {
    name: String,
    rows: Vec<String>,
    entries: Vec<PlanEntry>,
}
impl Plan {
    pub fn parse(name: impl Into<String>, rows: Vec<String>) -> Result<Self> {
        let entries = rows.iter().map(|r| parse_row(r)).collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: name.into(),
            rows,
            entries,
        })
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn rows(&self) -> &[String] {
        &self.rows
    }
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }
    pub fn get(&self, index: usize) -> Option<&PlanEntry> {
        self.entries.get(index)
    }
    /// Searchable rows, the closing sentinel not counted.
    pub fn plan_length(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }
    /// Percentage of the plan behind `next_index`, 100 only once the plan has been walked.
    pub fn progress_at(&self, next_index: usize) -> u8 {
        let length = self.plan_length();
        if length == 0 {
            return 100;
        }
        ((next_index * 100 + length / 2) / length).min(99) as u8
    }
    /// First normal row at or after `from`. `None` once the end sentinel or the last row is passed.
    pub fn next_runnable(&self, from: usize) -> Option<usize> {
        for (index, entry) in self.entries.iter().enumerate().skip(from) {
            match entry.marker() {
                PlanMarker::Normal => return Some(index),
                PlanMarker::Skip => continue,
                PlanMarker::End => return None,
            }
        }
        None
    }
    /// Marks every normal row below `level` as skipped, returning how many changed.
    pub fn skip_descendants(&mut self, level: &str) -> usize {
        let mut changed = 0;
        for (row, entry) in self.rows.iter_mut().zip(self.entries.iter_mut()) {
            if entry.marker() == PlanMarker::Normal && entry.is_descendant_of(level) {
                row.push('_');
                row.push_str(SKIP_MARKER);
                *entry = PlanEntry::skip(entry.level());
                changed += 1;
            }
        }
        changed
    }
}

// ------------- PlanSource -------------
#[async_trait]
pub trait PlanSource: Send + Sync {
    /// `PlanNotFound` when there is no such plan.
    async fn read_plan(&self, plan_name: &str) -> Result<Vec<String>>;
    /// Sources that cannot be written keep their plans as they are.
    async fn write_plan(&self, _plan_name: &str, _rows: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Plans stored as JSON arrays of rows under `dir`, one file per plan.
pub struct FilePlanSource {
    dir: PathBuf,
}
impl FilePlanSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
    /// `{dir}/{safe name}_{digest}.json`: query text may hold separators, and
    /// names that only differ in replaced characters still get their own file.
    pub fn path(&self, plan_name: &str) -> PathBuf {
        let safe: String = plan_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .take(96)
            .collect();
        let digest = blake3::hash(plan_name.as_bytes()).to_hex();
        self.dir.join(format!("{}_{}.json", safe, &digest.as_str()[..16]))
    }
}

#[async_trait]
impl PlanSource for FilePlanSource {
    async fn read_plan(&self, plan_name: &str) -> Result<Vec<String>> {
        let json = match tokio::fs::read_to_string(self.path(plan_name)).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PlacequeryError::PlanNotFound(plan_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&json).map_err(|e| PlacequeryError::Plan(e.to_string()))
    }
    async fn write_plan(&self, plan_name: &str, rows: &[String]) -> Result<()> {
        let json = serde_json::to_string_pretty(rows).map_err(|e| PlacequeryError::Plan(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path(plan_name), json).await?;
        debug!(plan = plan_name, "plan written back");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPlanSource {
    plans: Mutex<HashMap<String, Vec<String>>>,
}
impl MemoryPlanSource {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&self, plan_name: impl Into<String>, rows: Vec<String>) -> Result<()> {
        self.plans.lock()?.insert(plan_name.into(), rows);
        Ok(())
    }
    pub fn rows(&self, plan_name: &str) -> Option<Vec<String>> {
        self.plans.lock().ok()?.get(plan_name).cloned()
    }
}

#[async_trait]
impl PlanSource for MemoryPlanSource {
    async fn read_plan(&self, plan_name: &str) -> Result<Vec<String>> {
        self.plans
            .lock()?
            .get(plan_name)
            .cloned()
            .ok_or_else(|| PlacequeryError::PlanNotFound(plan_name.to_string()))
    }
    async fn write_plan(&self, plan_name: &str, rows: &[String]) -> Result<()> {
        self.plans.lock()?.insert(plan_name.to_string(), rows.to_vec());
        Ok(())
    }
}

// ------------- Generation -------------
/// Seven circles of half the radius covering `circle`: one at the center and
/// six at 60° steps, `r·√3/2` away from it.
pub fn cover(circle: &Circle) -> [Circle; 7] {
    let radius = circle.radius / 2.0;
    let distance = circle.radius * 3f64.sqrt() / 2.0;
    let lat_scale = METERS_PER_DEGREE;
    let lng_scale = METERS_PER_DEGREE * circle.center.lat.to_radians().cos().abs().max(1e-6);
    let mut circles = [Circle {
        center: circle.center,
        radius,
    }; 7];
    for (step, child) in circles.iter_mut().skip(1).enumerate() {
        let angle = (60.0 * step as f64).to_radians();
        child.center = Coordinate::new(
            circle.center.lat + distance * angle.sin() / lat_scale,
            circle.center.lng + distance * angle.cos() / lng_scale,
        );
    }
    circles
}

/// Breadth-first plan rooted at `root` (level `1`), subdividing while the
/// children stay at or above `min_radius`. Closed by the end sentinel.
pub fn generate_plan(root: Circle, min_radius: f64) -> Vec<String> {
    let mut rows = Vec::new();
    let mut queue = VecDeque::from([(root, "1".to_string())]);
    while let Some((circle, level)) = queue.pop_front() {
        rows.push(render_row(&circle, &level));
        if circle.radius / 2.0 >= min_radius && min_radius > 0.0 {
            for (i, child) in cover(&circle).into_iter().enumerate() {
                queue.push_back((child, format!("{}.{}", level, i + 1)));
            }
        }
    }
    rows.push(END_MARKER.to_string());
    rows
}
