use std::sync::LazyLock;
use std::time::Duration;

use run_monitor_core::ReconcilerConfig;
use url::Url;

use crate::types::{FailureKind, SnapshotError};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

static DEFAULT_ORIGIN: LazyLock<Url> =
    LazyLock::new(|| Url::parse(DEFAULT_BASE_URL).expect("default base url"));

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Backend origin, e.g. `http://127.0.0.1:8000`.
    pub base_url: Url,
    pub bot_slug: String,
    pub connect_timeout: Duration,
    /// Per-request timeout for snapshot fetches. Streams have none.
    pub request_timeout: Duration,
    /// Bound on the status check after a stream failure.
    pub corroboration_timeout: Duration,
    pub max_stream_reopens: u32,
    /// Buffered items between a stream reader task and its consumer.
    pub stream_buffer: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let defaults = ReconcilerConfig::default();
        Self {
            base_url: DEFAULT_ORIGIN.clone(),
            bot_slug: "tax".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            corroboration_timeout: Duration::from_secs(10),
            max_stream_reopens: defaults.max_stream_reopens,
            stream_buffer: 256,
        }
    }
}

impl EngineSettings {
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            max_stream_reopens: self.max_stream_reopens,
        }
    }

    /// `{base}/api/{segments...}` with each segment percent-encoded.
    pub(crate) fn api_endpoint(&self, segments: &[&str]) -> Result<Url, SnapshotError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SnapshotError::new(
                    "endpoint",
                    FailureKind::InvalidUrl,
                    format!("{} cannot be a base url", self.base_url),
                )
            })?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    /// `{base}/api/bots/{slug}/{tail...}`.
    pub(crate) fn bot_endpoint(&self, tail: &[&str]) -> Result<Url, SnapshotError> {
        let mut segments = vec!["bots", self.bot_slug.as_str()];
        segments.extend_from_slice(tail);
        self.api_endpoint(&segments)
    }
}
