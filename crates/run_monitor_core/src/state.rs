use chrono::{DateTime, Utc};
use monitor_logging::{monitor_debug, monitor_info};

use crate::snapshot::{BotSummary, Notification, PropertyRow, RunDetail};
use crate::view_model::RunViewModel;
use crate::views::{ArtifactItem, ArtifactSource, DerivedViewStore};
use crate::{RunHandle, RunId, RunStatus, SessionId};

/// Upper bound on stream reopen attempts when a status check finds the run
/// still going after a dropped stream.
pub const DEFAULT_MAX_STREAM_REOPENS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// Run handed over, stream not open yet.
    Pending,
    Running,
    Finished,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finished | Phase::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Phase::Pending | Phase::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub max_stream_reopens: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_stream_reopens: DEFAULT_MAX_STREAM_REOPENS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcilerState {
    config: ReconcilerConfig,
    phase: Phase,
    session: SessionId,
    run: Option<RunHandle>,
    views: DerivedViewStore,
    /// Set once the run is terminal and nothing more will be fetched.
    settled: bool,
    /// A status check after a stream failure is outstanding.
    corroborating: bool,
    last_stream_error: Option<String>,
    stream_reopens: u32,
    next_generation: u64,
    applied_generation: u64,
    bot_summary: Option<BotSummary>,
    notifications: Vec<Notification>,
    run_detail: Option<RunDetail>,
    dirty: bool,
}

impl ReconcilerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ReconcilerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn run(&self) -> Option<&RunHandle> {
        self.run.as_ref()
    }

    pub fn views(&self) -> &DerivedViewStore {
        &self.views
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn view(&self) -> RunViewModel {
        RunViewModel {
            phase: self.phase,
            session: self.session,
            run: self.run.clone(),
            property_totals: self.views.properties().cloned().collect(),
            artifacts: self.views.artifacts().to_vec(),
            timeline: self.views.timeline().to_vec(),
            settled: self.settled,
            bot_summary: self.bot_summary.clone(),
            notifications: self.notifications.clone(),
            run_detail: self.run_detail.clone(),
        }
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn views_mut(&mut self) -> &mut DerivedViewStore {
        &mut self.views
    }

    pub(crate) fn config(&self) -> ReconcilerConfig {
        self.config
    }

    /// Whether a message tagged with `session` still belongs to this run.
    pub(crate) fn is_current(&self, session: SessionId) -> bool {
        if session != self.session {
            monitor_debug!(
                "dropping message for stale session {} (current {})",
                session,
                self.session
            );
            return false;
        }
        true
    }

    /// Resets to a fresh run and returns the new session id.
    pub(crate) fn begin_run(&mut self, run_id: RunId) -> SessionId {
        let session = self.session + 1;
        *self = Self {
            config: self.config,
            phase: Phase::Pending,
            session,
            run: Some(RunHandle::pending(run_id)),
            ..Self::default()
        };
        self.dirty = true;
        session
    }

    /// Detaches from the current run. Later results for it are stale.
    pub(crate) fn detach(&mut self) {
        self.session += 1;
        self.corroborating = false;
        if self.phase.is_active() {
            self.phase = Phase::Idle;
        }
        self.dirty = true;
    }

    pub(crate) fn mark_running(&mut self, started_at: Option<DateTime<Utc>>) {
        if self.phase == Phase::Pending {
            self.phase = Phase::Running;
        }
        if let Some(run) = self.run.as_mut() {
            if run.status == RunStatus::Pending {
                run.status = RunStatus::Running;
            }
            if run.started_at.is_none() {
                run.started_at = started_at;
            }
        }
        self.dirty = true;
    }

    pub(crate) fn mark_finished(
        &mut self,
        finished_at: Option<DateTime<Utc>>,
        error_summary: Option<String>,
    ) {
        self.phase = Phase::Finished;
        self.corroborating = false;
        if let Some(run) = self.run.as_mut() {
            run.status = RunStatus::Finished;
            run.finished_at = run.finished_at.or(finished_at);
            if error_summary.is_some() {
                run.error_summary = error_summary;
            }
        }
        self.dirty = true;
    }

    /// Failed is settled at once: no refresh follows a failure.
    pub(crate) fn mark_failed(&mut self, finished_at: Option<DateTime<Utc>>, summary: String) {
        self.phase = Phase::Failed;
        self.corroborating = false;
        self.settled = true;
        if let Some(run) = self.run.as_mut() {
            run.status = RunStatus::Failed;
            run.finished_at = run.finished_at.or(finished_at);
            run.error_summary = Some(summary);
        }
        self.dirty = true;
    }

    /// Aligns a terminal run with a terminal status reported by the backend.
    /// Active runs are left alone.
    pub(crate) fn correct_terminal_status(&mut self, status: RunStatus) {
        let phase = match status {
            RunStatus::Finished => Phase::Finished,
            RunStatus::Failed => Phase::Failed,
            RunStatus::Pending | RunStatus::Running => return,
        };
        if !matches!(self.phase, Phase::Finished | Phase::Failed) || self.phase == phase {
            return;
        }
        monitor_info!("run status corrected from {:?} to {:?}", self.phase, phase);
        self.phase = phase;
        if let Some(run) = self.run.as_mut() {
            run.status = status;
        }
        self.dirty = true;
    }

    pub(crate) fn mark_settled(&mut self) {
        self.settled = true;
        self.dirty = true;
    }

    pub(crate) fn run_id(&self) -> Option<RunId> {
        self.run.as_ref().map(|run| run.run_id.clone())
    }

    pub(crate) fn is_corroborating(&self) -> bool {
        self.corroborating
    }

    pub(crate) fn begin_corroboration(&mut self, reason: String) {
        self.corroborating = true;
        self.last_stream_error = Some(reason);
        self.dirty = true;
    }

    pub(crate) fn end_corroboration(&mut self) -> Option<String> {
        self.corroborating = false;
        self.last_stream_error.take()
    }

    /// Counts a reopen attempt; false once the budget is spent.
    pub(crate) fn try_reopen(&mut self) -> bool {
        if self.stream_reopens >= self.config.max_stream_reopens {
            return false;
        }
        self.stream_reopens += 1;
        true
    }

    pub(crate) fn stream_reopens(&self) -> u32 {
        self.stream_reopens
    }

    /// Newest latest-rows generation handed out so far.
    pub(crate) fn issued_generation(&self) -> u64 {
        self.next_generation
    }

    pub(crate) fn issue_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Applies a latest-rows result unless a newer one was applied already.
    pub(crate) fn apply_rows(&mut self, generation: u64, rows: Vec<PropertyRow>) -> bool {
        if generation <= self.applied_generation {
            monitor_debug!(
                "skipping latest rows generation {} (applied {})",
                generation,
                self.applied_generation
            );
            return false;
        }
        self.applied_generation = generation;
        if self.views.apply_property_snapshot(generation, rows) {
            self.dirty = true;
        }
        true
    }

    /// Applies run-detail corrections and backfills its artifact manifest.
    ///
    /// The status is never moved here once the run is terminal; only
    /// timestamps and the error summary are corrected.
    pub(crate) fn apply_run_detail(&mut self, detail: RunDetail) {
        if let Some(status) = detail.run_status() {
            self.correct_terminal_status(status);
        }
        if let Some(run) = self.run.as_mut() {
            run.started_at = detail.started_at.or(run.started_at);
            run.finished_at = detail.finished_at.or(run.finished_at);
            if let Some(summary) = detail.error_summary.as_ref().filter(|s| !s.is_empty()) {
                run.error_summary = Some(summary.clone());
            }
            let run_id = run.run_id.clone();
            for (label, path) in detail.artifact_manifest() {
                self.views.insert_artifact(ArtifactItem::new(
                    &path,
                    Some(&label),
                    &run_id,
                    ArtifactSource::Backfill,
                ));
            }
        }
        self.run_detail = Some(detail);
        self.dirty = true;
    }

    pub(crate) fn set_bot_summary(&mut self, summary: BotSummary) {
        self.bot_summary = Some(summary);
        self.dirty = true;
    }

    pub(crate) fn set_notifications(&mut self, notifications: Vec<Notification>) {
        self.notifications = notifications;
        self.dirty = true;
    }
}
