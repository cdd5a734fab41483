use monitor_logging::monitor_debug;
use run_monitor_core::{
    validate_property_rows, BotSummary, Notification, PropertyRow, RunDetail, RunId,
};
use serde::de::DeserializeOwned;
use url::Url;

use crate::settings::EngineSettings;
use crate::types::{FailureKind, SnapshotError};

/// Authoritative point-in-time reads. Calls are independent and may run
/// concurrently.
#[async_trait::async_trait]
pub trait SnapshotClient: Send + Sync {
    async fn bot_summary(&self) -> Result<BotSummary, SnapshotError>;

    async fn run_detail(&self, run_id: &RunId) -> Result<RunDetail, SnapshotError>;

    async fn latest_properties(&self) -> Result<Vec<PropertyRow>, SnapshotError>;

    async fn notifications(&self) -> Result<Vec<Notification>, SnapshotError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestSnapshotClient {
    settings: EngineSettings,
    client: reqwest::Client,
}

impl ReqwestSnapshotClient {
    pub fn new(settings: EngineSettings) -> Result<Self, SnapshotError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| SnapshotError::new("client", FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &'static str,
        url: Url,
    ) -> Result<T, SnapshotError> {
        monitor_debug!("GET {} ({})", url, resource);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| map_reqwest_error(resource, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SnapshotError::new(
                resource,
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| map_reqwest_error(resource, err))?;
        serde_json::from_slice(&body)
            .map_err(|err| SnapshotError::new(resource, FailureKind::Validation, err.to_string()))
    }
}

#[async_trait::async_trait]
impl SnapshotClient for ReqwestSnapshotClient {
    async fn bot_summary(&self) -> Result<BotSummary, SnapshotError> {
        const RESOURCE: &str = "bot summary";
        let url = self.settings.api_endpoint(&["bots"])?;
        let bots: Vec<BotSummary> = self.get_json(RESOURCE, url).await?;
        let summary = bots
            .into_iter()
            .find(|bot| bot.slug == self.settings.bot_slug)
            .ok_or_else(|| {
                SnapshotError::new(
                    RESOURCE,
                    FailureKind::Validation,
                    format!("bot `{}` not listed", self.settings.bot_slug),
                )
            })?;
        summary
            .validate()
            .map_err(|err| SnapshotError::new(RESOURCE, FailureKind::Validation, err.to_string()))?;
        Ok(summary)
    }

    async fn run_detail(&self, run_id: &RunId) -> Result<RunDetail, SnapshotError> {
        const RESOURCE: &str = "run detail";
        let url = self.settings.bot_endpoint(&["runs", run_id.as_str()])?;
        let detail: RunDetail = self.get_json(RESOURCE, url).await?;
        detail
            .validate(run_id)
            .map_err(|err| SnapshotError::new(RESOURCE, FailureKind::Validation, err.to_string()))?;
        Ok(detail)
    }

    async fn latest_properties(&self) -> Result<Vec<PropertyRow>, SnapshotError> {
        const RESOURCE: &str = "latest properties";
        let url = self.settings.bot_endpoint(&["properties", "latest"])?;
        let rows: Vec<PropertyRow> = self.get_json(RESOURCE, url).await?;
        validate_property_rows(&rows)
            .map_err(|err| SnapshotError::new(RESOURCE, FailureKind::Validation, err.to_string()))?;
        Ok(rows)
    }

    async fn notifications(&self) -> Result<Vec<Notification>, SnapshotError> {
        const RESOURCE: &str = "notifications";
        let url = self.settings.bot_endpoint(&["notifications"])?;
        self.get_json(RESOURCE, url).await
    }
}

fn map_reqwest_error(resource: &'static str, err: reqwest::Error) -> SnapshotError {
    if err.is_timeout() {
        return SnapshotError::new(resource, FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return SnapshotError::new(resource, FailureKind::Validation, err.to_string());
    }
    SnapshotError::new(resource, FailureKind::Network, err.to_string())
}
