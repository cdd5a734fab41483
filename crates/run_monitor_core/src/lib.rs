//! Run monitor core: pure reconciliation state machine and derived views.
mod effect;
mod event;
mod msg;
mod snapshot;
mod state;
mod types;
mod update;
mod view_model;
mod views;

pub use effect::Effect;
pub use event::{
    parse_event, EventKind, EventParseError, EventPayload, ProgressEvent, PropertyScraped,
    RunErrorPayload, RunFinished, ScreenshotCreated,
};
pub use msg::{Fetched, Msg, TerminalRefresh};
pub use snapshot::{
    validate_property_rows, BotSummary, Notification, PropertyRow, RunDetail, RunDetails,
    SnapshotValidationError, UrlResult,
};
pub use state::{Phase, ReconcilerConfig, ReconcilerState, DEFAULT_MAX_STREAM_REOPENS};
pub use types::{parse_timestamp, Amount, RunHandle, RunId, RunStatus, SessionId};
pub use update::update;
pub use view_model::RunViewModel;
pub use views::{
    append_timeline, artifact_url, merge_artifact, merge_property, ArtifactItem, ArtifactMerge,
    ArtifactSource, DerivedViewStore, PropertyTotal, Source, TimelineDisposition, TimelineEntry,
};
