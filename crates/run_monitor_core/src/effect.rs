use crate::types::{RunId, SessionId};

/// Side effects requested by [`crate::update`]. Every effect is tagged with
/// the session it belongs to; results must be posted back with that tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open the event stream, closing any prior one first.
    OpenStream { session: SessionId, run_id: RunId },
    /// Close the event stream. Idempotent.
    CloseStream { session: SessionId },
    /// Fetch the latest property rows without blocking event processing.
    RefreshLatestRows { session: SessionId, generation: u64 },
    /// Fetch run detail once, bounded by the corroboration timeout.
    CorroborateRunStatus { session: SessionId, run_id: RunId },
    /// Fetch run detail, bot summary, notifications and latest rows, then
    /// report them together.
    TerminalRefresh {
        session: SessionId,
        run_id: RunId,
        generation: u64,
    },
}
