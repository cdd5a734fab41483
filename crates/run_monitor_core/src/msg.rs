use chrono::{DateTime, Utc};

use crate::event::{EventKind, ProgressEvent};
use crate::snapshot::{BotSummary, Notification, PropertyRow, RunDetail};
use crate::types::{RunId, SessionId};

/// Outcome of one snapshot fetch. Failures carry a human-readable reason.
pub type Fetched<T> = Result<T, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Caller handed a run to the reconciler.
    StartRun { run_id: RunId },
    /// Caller stopped following the current run.
    Stop,
    /// The event stream opened for `session`.
    StreamOpened { session: SessionId },
    /// A well-formed progress event arrived.
    EventReceived {
        session: SessionId,
        event: ProgressEvent,
    },
    /// An event arrived whose type-specific payload failed validation.
    EventRejected {
        session: SessionId,
        kind: EventKind,
        timestamp: Option<DateTime<Utc>>,
        reason: String,
    },
    /// The stream failed to open or dropped. It is closed either way.
    StreamFailed { session: SessionId, reason: String },
    /// Result of the single run-status check after a stream failure.
    /// Timeouts arrive as `Err`.
    CorroborationResolved {
        session: SessionId,
        result: Fetched<RunDetail>,
    },
    /// Result of a latest-rows refresh triggered by `db_committed`.
    RowsRefreshed {
        session: SessionId,
        generation: u64,
        result: Fetched<Vec<PropertyRow>>,
    },
    /// Joint result of the refresh issued when a run finishes.
    TerminalRefreshResolved {
        session: SessionId,
        generation: u64,
        refresh: TerminalRefresh,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalRefresh {
    pub run_detail: Fetched<RunDetail>,
    pub bot_summary: Fetched<BotSummary>,
    pub notifications: Fetched<Vec<Notification>>,
    pub latest_rows: Fetched<Vec<PropertyRow>>,
}
