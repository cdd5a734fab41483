//! Derived views of a run and the merge rules that build them.
//!
//! Everything here is pure; the reducer in `update.rs` is the only caller
//! that mutates a [`DerivedViewStore`].

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use url::form_urlencoded::byte_serialize;

use crate::event::EventKind;
use crate::snapshot::PropertyRow;
use crate::types::{Amount, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Streamed progress event.
    Live,
    /// Authoritative snapshot fetch.
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyTotal {
    pub property_address: String,
    pub total_due: Option<Amount>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub source: Source,
    /// Latest-rows generation. Snapshot values carry the refresh that
    /// produced them; live values carry the newest refresh issued when they
    /// arrived.
    pub generation: u64,
}

impl PropertyTotal {
    pub fn from_row(row: PropertyRow, generation: u64) -> Self {
        Self {
            property_address: row.property_address,
            total_due: row.total_due,
            scraped_at: Some(row.scraped_at),
            source: Source::Snapshot,
            generation,
        }
    }
}

/// Whether `snapshot` supersedes `live`.
///
/// A refresh covers every live value that arrived before it was issued.
/// For live values that arrived later only the scrape times decide, and a
/// live value without one is newer.
fn snapshot_covers(live: &PropertyTotal, snapshot: &PropertyTotal) -> bool {
    if live.generation < snapshot.generation {
        return true;
    }
    match (live.scraped_at, snapshot.scraped_at) {
        (Some(live_at), Some(snapshot_at)) => snapshot_at >= live_at,
        _ => false,
    }
}

/// Merges an incoming property value with the current one for the same
/// address.
///
/// Live values overwrite live values in arrival order and newer refreshes
/// overwrite older ones. Between a live and a snapshot value see
/// [`snapshot_covers`]; ties go to the snapshot.
pub fn merge_property(current: Option<&PropertyTotal>, incoming: PropertyTotal) -> PropertyTotal {
    let Some(current) = current else {
        return incoming;
    };
    let incoming_wins = match (current.source, incoming.source) {
        (Source::Live, Source::Live) => true,
        (Source::Snapshot, Source::Snapshot) => incoming.generation >= current.generation,
        (Source::Live, Source::Snapshot) => snapshot_covers(current, &incoming),
        (Source::Snapshot, Source::Live) => !snapshot_covers(&incoming, current),
    };
    if incoming_wins {
        incoming
    } else {
        current.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    Live,
    Backfill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactItem {
    pub path: String,
    pub label: String,
    pub url: String,
    pub source: ArtifactSource,
}

impl ArtifactItem {
    pub fn new(path: &str, label: Option<&str>, run_id: &RunId, source: ArtifactSource) -> Self {
        let label = label
            .map(str::to_string)
            .unwrap_or_else(|| default_label(path));
        Self {
            path: path.to_string(),
            label,
            url: artifact_url(path, run_id),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactMerge {
    Inserted(ArtifactItem),
    Unchanged,
}

/// First write wins: an artifact already held for the same path is kept.
pub fn merge_artifact(current: Option<&ArtifactItem>, incoming: ArtifactItem) -> ArtifactMerge {
    match current {
        Some(_) => ArtifactMerge::Unchanged,
        None => ArtifactMerge::Inserted(incoming),
    }
}

/// Public URL for an artifact path, cache-busted with the run id.
///
/// Paths under `/artifacts/` are served by the backend at `/api/artifacts/`.
pub fn artifact_url(path: &str, run_id: &RunId) -> String {
    let version: String = byte_serialize(run_id.as_str().as_bytes()).collect();
    let suffix = format!("?v={version}");
    match path.strip_prefix("/artifacts/") {
        Some(rest) => format!("/api/artifacts/{rest}{suffix}"),
        None => format!("{path}{suffix}"),
    }
}

fn default_label(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    if stem.is_empty() {
        path.to_string()
    } else {
        stem.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineDisposition {
    /// Merged into a derived view or drove a lifecycle transition.
    Applied,
    /// Recorded only (unknown type or nothing to merge).
    Recorded,
    /// Repeat of something already held.
    Duplicate,
    /// Failed payload validation; not merged.
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Arrival position, starting at 1.
    pub seq: u64,
    pub kind: EventKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub disposition: TimelineDisposition,
}

/// Appends in arrival order and returns the new length.
pub fn append_timeline(timeline: &mut Vec<TimelineEntry>, entry: TimelineEntry) -> usize {
    timeline.push(entry);
    timeline.len()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DerivedViewStore {
    properties: BTreeMap<String, PropertyTotal>,
    artifacts: Vec<ArtifactItem>,
    artifact_paths: HashSet<String>,
    timeline: Vec<TimelineEntry>,
}

impl DerivedViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyTotal> {
        self.properties.values()
    }

    pub fn property(&self, address: &str) -> Option<&PropertyTotal> {
        self.properties.get(address)
    }

    pub fn artifacts(&self) -> &[ArtifactItem] {
        &self.artifacts
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    /// Returns true when the stored value changed.
    pub fn upsert_property(&mut self, incoming: PropertyTotal) -> bool {
        let merged = merge_property(self.properties.get(&incoming.property_address), incoming);
        match self.properties.get(&merged.property_address) {
            Some(held) if *held == merged => false,
            _ => {
                self.properties
                    .insert(merged.property_address.clone(), merged);
                true
            }
        }
    }

    /// Replaces the snapshot baseline with `rows` from refresh `generation`.
    ///
    /// Snapshot-sourced entries missing from `rows` are dropped; live
    /// entries stay and are merged against the new rows.
    pub fn apply_property_snapshot(&mut self, generation: u64, rows: Vec<PropertyRow>) -> bool {
        let incoming: HashSet<&str> = rows.iter().map(|r| r.property_address.as_str()).collect();
        let before = self.properties.len();
        self.properties.retain(|address, held| {
            held.source == Source::Live || incoming.contains(address.as_str())
        });
        let mut changed = self.properties.len() != before;
        for row in rows {
            changed |= self.upsert_property(PropertyTotal::from_row(row, generation));
        }
        changed
    }

    /// Returns true when the artifact was new.
    pub fn insert_artifact(&mut self, incoming: ArtifactItem) -> bool {
        let current = if self.artifact_paths.contains(&incoming.path) {
            self.artifacts.iter().find(|a| a.path == incoming.path)
        } else {
            None
        };
        match merge_artifact(current, incoming) {
            ArtifactMerge::Inserted(item) => {
                self.artifact_paths.insert(item.path.clone());
                self.artifacts.push(item);
                true
            }
            ArtifactMerge::Unchanged => false,
        }
    }

    pub fn record(
        &mut self,
        kind: EventKind,
        timestamp: Option<DateTime<Utc>>,
        disposition: TimelineDisposition,
    ) -> u64 {
        let seq = self.timeline.len() as u64 + 1;
        append_timeline(
            &mut self.timeline,
            TimelineEntry {
                seq,
                kind,
                timestamp,
                disposition,
            },
        );
        seq
    }
}
