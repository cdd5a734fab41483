use crate::snapshot::{BotSummary, Notification, RunDetail};
use crate::views::{ArtifactItem, PropertyTotal, TimelineEntry};
use crate::{Phase, RunHandle, SessionId};

/// Read-only snapshot of everything an observer may render.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunViewModel {
    pub phase: Phase,
    pub session: SessionId,
    pub run: Option<RunHandle>,
    /// Ordered by property address.
    pub property_totals: Vec<PropertyTotal>,
    /// Insertion order; live captures come before backfilled ones.
    pub artifacts: Vec<ArtifactItem>,
    pub timeline: Vec<TimelineEntry>,
    /// Terminal and fully materialised. A finished run settles only after
    /// its terminal refresh resolved.
    pub settled: bool,
    pub bot_summary: Option<BotSummary>,
    pub notifications: Vec<Notification>,
    pub run_detail: Option<RunDetail>,
}

impl RunViewModel {
    pub fn property(&self, address: &str) -> Option<&PropertyTotal> {
        self.property_totals
            .iter()
            .find(|p| p.property_address == address)
    }

    pub fn error_summary(&self) -> Option<&str> {
        self.run.as_ref().and_then(|run| run.error_summary.as_deref())
    }
}
