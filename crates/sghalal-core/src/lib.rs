//! Core domain model for the halal establishment harvester.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "sghalal-core";

/// Column order shared by the CSV header and the JSON object layout.
pub const ESTABLISHMENT_COLUMNS: [&str; 6] =
    ["name", "address", "type", "number", "scheme", "postal"];

/// One certified establishment as published.
///
/// Field order is the published column order; serde preserves it for both
/// the CSV and the JSON outputs. Missing upstream values are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Establishment {
    pub name: String,
    pub address: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub number: String,
    pub scheme: String,
    pub postal: String,
}

impl Establishment {
    /// Case- and whitespace-insensitive view of every field, used to decide
    /// whether two observations of the same `number` actually disagree.
    pub fn comparison_fields(&self) -> [String; 6] {
        [
            comparison_key(&self.name),
            comparison_key(&self.address),
            comparison_key(&self.kind),
            comparison_key(&self.number),
            comparison_key(&self.scheme),
            comparison_key(&self.postal),
        ]
    }

    pub fn differs_from(&self, other: &Establishment) -> bool {
        self.comparison_fields() != other.comparison_fields()
    }
}

/// Lowercased, trimmed, whitespace-collapsed form of `input`.
///
/// Only ever used for comparisons and ordering; stored values keep their
/// original casing.
pub fn comparison_key(input: &str) -> String {
    input
        .split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Summary statistics derived from a deduplicated establishment set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestStats {
    pub last_updated: DateTime<Utc>,
    pub total_establishments: usize,
    pub types: BTreeMap<String, usize>,
    pub schemes: BTreeMap<String, usize>,
}

/// Per-run diagnostics: what was attempted, what failed, what was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub terms_total: usize,
    pub terms_completed: usize,
    pub failed_terms: Vec<String>,
    /// Terms that never finished because the run budget ran out or the
    /// establishment cap was reached.
    pub unfinished_terms: Vec<String>,
    pub pages_fetched: usize,
    pub raw_records: usize,
    pub dropped_records: usize,
    pub conflicts: usize,
    pub timed_out: bool,
    pub capped: bool,
}

impl RunDiagnostics {
    /// A run is partial when any term failed or was left unfinished by the
    /// run budget. Hitting the configured establishment cap is deliberate and
    /// does not count.
    pub fn is_partial(&self) -> bool {
        !self.failed_terms.is_empty() || self.timed_out
    }
}

/// Checksum entry for one published file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFile {
    pub name: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Contents of `metadata.json`, consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestMetadata {
    pub last_updated: DateTime<Utc>,
    pub total_establishments: usize,
    pub types: BTreeMap<String, usize>,
    pub schemes: BTreeMap<String, usize>,
    pub partial: bool,
    pub failed_terms: Vec<String>,
    pub diagnostics: RunDiagnostics,
    #[serde(default)]
    pub files: Vec<PublishedFile>,
}

impl HarvestMetadata {
    pub fn new(
        stats: HarvestStats,
        diagnostics: RunDiagnostics,
        files: Vec<PublishedFile>,
    ) -> Self {
        Self {
            last_updated: stats.last_updated,
            total_establishments: stats.total_establishments,
            types: stats.types,
            schemes: stats.schemes,
            partial: diagnostics.is_partial(),
            failed_terms: diagnostics.failed_terms.clone(),
            diagnostics,
            files,
        }
    }
}
