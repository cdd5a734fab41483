//! RON configuration file plus command-line overrides.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use monitor_logging::monitor_info;
use run_monitor_engine::EngineSettings;
use serde::{Deserialize, Serialize};
use url::Url;

pub const CONFIG_FILENAME: &str = "run_monitor.ron";

/// Everything is optional; unset fields fall back to [`EngineSettings`]
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub base_url: Option<String>,
    pub bot_slug: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub corroboration_timeout_secs: Option<u64>,
    pub max_stream_reopens: Option<u32>,
    pub stream_buffer: Option<usize>,
    pub log_file: Option<PathBuf>,
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub bot_slug: Option<String>,
    pub corroboration_timeout_secs: Option<u64>,
    pub max_stream_reopens: Option<u32>,
    pub log_file: Option<PathBuf>,
}

impl MonitorConfig {
    pub fn with_overrides(self, overrides: Overrides) -> Self {
        Self {
            base_url: overrides.base_url.or(self.base_url),
            bot_slug: overrides.bot_slug.or(self.bot_slug),
            corroboration_timeout_secs: overrides
                .corroboration_timeout_secs
                .or(self.corroboration_timeout_secs),
            max_stream_reopens: overrides.max_stream_reopens.or(self.max_stream_reopens),
            log_file: overrides.log_file.or(self.log_file),
            ..self
        }
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let mut settings = EngineSettings::default();
        if let Some(raw) = &self.base_url {
            settings.base_url =
                Url::parse(raw).with_context(|| format!("invalid base url `{raw}`"))?;
        }
        if let Some(slug) = &self.bot_slug {
            anyhow::ensure!(!slug.trim().is_empty(), "bot slug must not be empty");
            settings.bot_slug = slug.clone();
        }
        if let Some(secs) = self.connect_timeout_secs {
            settings.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout_secs {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.corroboration_timeout_secs {
            settings.corroboration_timeout = Duration::from_secs(secs);
        }
        if let Some(reopens) = self.max_stream_reopens {
            settings.max_stream_reopens = reopens;
        }
        if let Some(buffer) = self.stream_buffer {
            anyhow::ensure!(buffer > 0, "stream_buffer must be positive");
            settings.stream_buffer = buffer;
        }
        Ok(settings)
    }
}

/// Reads `path`. A missing file yields defaults unless `required`.
pub fn load_config(path: &Path, required: bool) -> Result<MonitorConfig> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound && !required => {
            return Ok(MonitorConfig::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read config {}", path.display()))
        }
    };

    let config: MonitorConfig = ron::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    monitor_info!("Loaded configuration from {:?}", path);
    Ok(config)
}

/// Writes a template holding the default settings. Refuses to overwrite.
pub fn write_template(path: &Path) -> Result<()> {
    anyhow::ensure!(!path.exists(), "{} already exists", path.display());

    let defaults = EngineSettings::default();
    let template = MonitorConfig {
        base_url: Some(defaults.base_url.to_string()),
        bot_slug: Some(defaults.bot_slug),
        connect_timeout_secs: Some(defaults.connect_timeout.as_secs()),
        request_timeout_secs: Some(defaults.request_timeout.as_secs()),
        corroboration_timeout_secs: Some(defaults.corroboration_timeout.as_secs()),
        max_stream_reopens: Some(defaults.max_stream_reopens),
        stream_buffer: Some(defaults.stream_buffer),
        log_file: None,
    };
    let content = ron::ser::to_string_pretty(&template, ron::ser::PrettyConfig::new())
        .context("failed to serialize config template")?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    monitor_info!("Wrote configuration template to {:?}", path);
    Ok(())
}
