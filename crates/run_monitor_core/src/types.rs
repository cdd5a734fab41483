use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Identifies one reconciler session. Bumped on every `StartRun`, so
/// results tagged with an older session can be told apart and dropped.
pub type SessionId = u64;

/// Opaque run identifier. The backend uses integers but nothing here
/// depends on that; identity is the string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for RunId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for RunId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RunIdVisitor;

        impl Visitor<'_> for RunIdVisitor {
            type Value = RunId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a run id as integer or string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RunId, E> {
                Ok(RunId::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RunId, E> {
                Ok(RunId(v.to_string()))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RunId, E> {
                if v.is_empty() {
                    return Err(E::custom("run id must not be empty"));
                }
                Ok(RunId(v.to_string()))
            }
        }

        deserializer.deserialize_any(RunIdVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    /// Maps a backend status string. The backend reports `success` for a
    /// finished run; unknown values yield `None`.
    pub fn from_backend(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Some(Self::Pending),
            "running" | "started" => Some(Self::Running),
            "finished" | "success" | "succeeded" | "completed" => Some(Self::Finished),
            "failed" | "error" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: RunId,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_summary: Option<String>,
}

impl RunHandle {
    pub fn pending(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            error_summary: None,
        }
    }
}

/// Monetary amount carried verbatim from the payload.
///
/// Numbers keep their exact JSON text (`120.50` stays `120.50`), strings
/// keep their contents. No arithmetic is ever done on it here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(String);

impl Amount {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_raw(raw: &RawValue) -> Result<Self, String> {
        let text = raw.get().trim();
        if text.starts_with('"') {
            let value: String = serde_json::from_str(text).map_err(|err| err.to_string())?;
            return Ok(Self(value));
        }
        if text.starts_with('-') || text.starts_with(|c: char| c.is_ascii_digit()) {
            return Ok(Self(text.to_string()));
        }
        Err(format!("expected a number or string amount, got `{text}`"))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Box<RawValue> = Deserialize::deserialize(deserializer)?;
        Amount::from_raw(&raw).map_err(de::Error::custom)
    }
}

/// Lenient timestamp parsing: RFC 3339 first, then naive ISO-8601 which is
/// taken as UTC (some backends drop the offset).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp `{raw}`")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer};

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) => crate::types::parse_timestamp(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp `{raw}`"))),
            }
        }
    }
}
