//! Point-in-time resources read from the backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{timestamp, Amount, RunId, RunStatus};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid {resource} snapshot: {reason}")]
pub struct SnapshotValidationError {
    pub resource: &'static str,
    pub reason: String,
}

impl SnapshotValidationError {
    fn new(resource: &'static str, reason: impl Into<String>) -> Self {
        Self {
            resource,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotSummary {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub last_run_id: Option<RunId>,
    #[serde(default)]
    pub last_run_status: Option<String>,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest_property_count: u64,
    #[serde(default)]
    pub last_error_summary: Option<String>,
}

impl BotSummary {
    pub fn validate(&self) -> Result<(), SnapshotValidationError> {
        if self.slug.is_empty() {
            return Err(SnapshotValidationError::new("bot summary", "empty slug"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PropertyRow {
    pub property_address: String,
    #[serde(default)]
    pub total_due: Option<Amount>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub scraped_at: DateTime<Utc>,
}

/// Validates the latest-rows resource. Every row needs a non-empty
/// address and addresses must be unique.
pub fn validate_property_rows(rows: &[PropertyRow]) -> Result<(), SnapshotValidationError> {
    let mut seen = std::collections::HashSet::new();
    for row in rows {
        if row.property_address.is_empty() {
            return Err(SnapshotValidationError::new(
                "latest properties",
                "row with empty property_address",
            ));
        }
        if !seen.insert(row.property_address.as_str()) {
            return Err(SnapshotValidationError::new(
                "latest properties",
                format!("duplicate property_address `{}`", row.property_address),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct UrlResult {
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub property_address: Option<String>,
    #[serde(default)]
    pub total_due: Option<Amount>,
    #[serde(default)]
    pub error: Option<String>,
    /// Label to artifact path. Failed captures are reported as `""` or null.
    #[serde(default)]
    pub artifacts: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RunDetails {
    #[serde(default)]
    pub url_results: Vec<UrlResult>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub fatal_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunDetail {
    #[serde(alias = "id")]
    pub run_id: RunId,
    pub status: String,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_summary: Option<String>,
    #[serde(default, alias = "details_json")]
    pub details: RunDetails,
}

impl RunDetail {
    pub fn validate(&self, expected: &RunId) -> Result<(), SnapshotValidationError> {
        if &self.run_id != expected {
            return Err(SnapshotValidationError::new(
                "run detail",
                format!("asked for run {expected}, got run {}", self.run_id),
            ));
        }
        if self.run_status().is_none() {
            return Err(SnapshotValidationError::new(
                "run detail",
                format!("unknown status `{}`", self.status),
            ));
        }
        Ok(())
    }

    pub fn run_status(&self) -> Option<RunStatus> {
        RunStatus::from_backend(&self.status)
    }

    /// `(label, path)` pairs of every captured artifact, per URL result in
    /// order, then the run-level manifest. Empty paths are skipped.
    pub fn artifact_manifest(&self) -> Vec<(String, String)> {
        let mut manifest = Vec::new();
        for result in &self.details.url_results {
            for (label, path) in &result.artifacts {
                let Some(path) = path.as_deref().filter(|p| !p.is_empty()) else {
                    continue;
                };
                let label = match result.property_address.as_deref() {
                    Some(address) if !address.is_empty() => format!("{label} ({address})"),
                    _ => label.clone(),
                };
                manifest.push((label, path.to_string()));
            }
        }
        for (label, path) in &self.details.artifacts {
            if let Some(path) = path.as_deref().filter(|p| !p.is_empty()) {
                manifest.push((label.clone(), path.to_string()));
            }
        }
        manifest
    }
}
