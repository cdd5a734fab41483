//! Run monitor engine: backend I/O and effect execution for the core reducer.
mod reconciler;
mod settings;
mod snapshot;
mod sse;
mod stream;
mod types;

pub use reconciler::RunReconciler;
pub use settings::{EngineSettings, DEFAULT_BASE_URL};
pub use snapshot::{ReqwestSnapshotClient, SnapshotClient};
pub use sse::SseDecoder;
pub use stream::{EventSource, EventStream, ReqwestEventSource, StreamItem, StreamSender};
pub use types::{FailureKind, ReconcilerError, SnapshotError, StreamError};
