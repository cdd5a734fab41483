use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{timestamp, Amount};

/// Event type discriminator as sent in the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    RunStarted,
    PropertyScraped,
    ScreenshotCreated,
    DbCommitted,
    RunFinished,
    RunError,
    /// Anything this client does not know yet. Kept for the timeline.
    Other(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "run_started" => Self::RunStarted,
            // `url_scraped` is what the tax bot emits per scraped source URL.
            "property_scraped" | "url_scraped" => Self::PropertyScraped,
            "screenshot_created" => Self::ScreenshotCreated,
            "db_committed" => Self::DbCommitted,
            "run_finished" => Self::RunFinished,
            "run_error" => Self::RunError,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::RunStarted => "run_started",
            Self::PropertyScraped => "property_scraped",
            Self::ScreenshotCreated => "screenshot_created",
            Self::DbCommitted => "db_committed",
            Self::RunFinished => "run_finished",
            Self::RunError => "run_error",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyScraped {
    pub property_address: String,
    pub total_due: Option<Amount>,
    /// Payload `scraped_at`. The event timestamp is not a stand-in: it is
    /// the emission time, not the scrape time.
    pub scraped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotCreated {
    pub path: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunFinished {
    /// Backend outcome, e.g. `success` or `failed`.
    pub status: Option<String>,
    pub error_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunErrorPayload {
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    RunStarted,
    PropertyScraped(PropertyScraped),
    ScreenshotCreated(ScreenshotCreated),
    DbCommitted,
    RunFinished(RunFinished),
    RunError(RunErrorPayload),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub kind: EventKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: EventPayload,
}

impl ProgressEvent {
    pub fn new(kind: EventKind, timestamp: Option<DateTime<Utc>>, payload: EventPayload) -> Self {
        Self {
            kind,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventParseError {
    /// The frame is not a JSON object with a string `type`. The stream
    /// treats this as a transport failure.
    #[error("malformed event frame: {0}")]
    Malformed(String),
    /// The envelope is fine but the type-specific fields are not.
    #[error("invalid `{kind}` payload: {reason}")]
    Invalid {
        kind: EventKind,
        timestamp: Option<DateTime<Utc>>,
        reason: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct PropertyScrapedWire {
    #[serde(alias = "propertyAddress")]
    property_address: String,
    #[serde(default, alias = "totalDue")]
    total_due: Option<Amount>,
    #[serde(
        default,
        alias = "scrapedAt",
        deserialize_with = "timestamp::option::deserialize"
    )]
    scraped_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ScreenshotCreatedWire {
    path: String,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Deserialize)]
struct RunFinishedWire {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "errorSummary")]
    error_summary: Option<String>,
}

#[derive(Deserialize)]
struct RunErrorWire {
    #[serde(default, alias = "errorSummary")]
    error_summary: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Parses one event frame (`data:` payload of a stream message).
pub fn parse_event(data: &str) -> Result<ProgressEvent, EventParseError> {
    let envelope: Envelope =
        serde_json::from_str(data).map_err(|err| EventParseError::Malformed(err.to_string()))?;
    let kind = EventKind::parse(&envelope.kind);
    let timestamp = envelope.timestamp;
    let invalid = |reason: String| EventParseError::Invalid {
        kind: kind.clone(),
        timestamp,
        reason,
    };

    let payload = match &kind {
        EventKind::RunStarted => EventPayload::RunStarted,
        EventKind::DbCommitted => EventPayload::DbCommitted,
        EventKind::Other(_) => EventPayload::Other,
        EventKind::PropertyScraped => {
            let wire: PropertyScrapedWire =
                serde_json::from_str(data).map_err(|err| invalid(err.to_string()))?;
            if wire.property_address.is_empty() {
                return Err(invalid("property_address is empty".into()));
            }
            EventPayload::PropertyScraped(PropertyScraped {
                property_address: wire.property_address,
                total_due: wire.total_due,
                scraped_at: wire.scraped_at,
            })
        }
        EventKind::ScreenshotCreated => {
            let wire: ScreenshotCreatedWire =
                serde_json::from_str(data).map_err(|err| invalid(err.to_string()))?;
            if wire.path.is_empty() {
                return Err(invalid("path is empty".into()));
            }
            EventPayload::ScreenshotCreated(ScreenshotCreated {
                path: wire.path,
                label: wire.label.filter(|label| !label.is_empty()),
            })
        }
        EventKind::RunFinished => {
            let wire: RunFinishedWire =
                serde_json::from_str(data).map_err(|err| invalid(err.to_string()))?;
            EventPayload::RunFinished(RunFinished {
                status: wire.status,
                error_summary: wire.error_summary.filter(|s| !s.trim().is_empty()),
            })
        }
        EventKind::RunError => {
            let wire: RunErrorWire =
                serde_json::from_str(data).map_err(|err| invalid(err.to_string()))?;
            let summary = [wire.error_summary, wire.summary, wire.error]
                .into_iter()
                .flatten()
                .find(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "run reported an error without a summary".to_string());
            EventPayload::RunError(RunErrorPayload { summary })
        }
    };

    Ok(ProgressEvent::new(kind, timestamp, payload))
}
