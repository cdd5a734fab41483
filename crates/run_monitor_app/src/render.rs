//! Plain-text rendering of the run view model for the terminal.

use chrono::{DateTime, Utc};
use run_monitor_core::{
    ArtifactSource, BotSummary, Phase, PropertyRow, RunStatus, RunViewModel, Source,
    TimelineDisposition, TimelineEntry,
};

pub const EXIT_FAILED: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

pub fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "Idle",
        Phase::Pending => "Pending",
        Phase::Running => "Running",
        Phase::Finished => "Finished",
        Phase::Failed => "Failed",
    }
}

fn format_time(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Process exit code for a followed run: the backend's terminal status
/// decides, not how the stream ended.
pub fn exit_code(view: &RunViewModel, interrupted: bool) -> u8 {
    match view.run.as_ref().map(|run| run.status) {
        _ if interrupted => EXIT_INTERRUPTED,
        Some(RunStatus::Finished) => 0,
        Some(RunStatus::Failed) => EXIT_FAILED,
        _ => EXIT_INTERRUPTED,
    }
}

pub fn timeline_line(entry: &TimelineEntry) -> String {
    let disposition = match &entry.disposition {
        TimelineDisposition::Applied => "applied".to_string(),
        TimelineDisposition::Recorded => "recorded".to_string(),
        TimelineDisposition::Duplicate => "duplicate".to_string(),
        TimelineDisposition::Invalid(reason) => format!("invalid: {reason}"),
    };
    format!(
        "#{:<4} {}  {:<20} {}",
        entry.seq,
        format_time(entry.timestamp),
        entry.kind,
        disposition
    )
}

pub fn summary_lines(view: &RunViewModel) -> Vec<String> {
    let mut lines = Vec::new();

    match &view.run {
        Some(run) => {
            lines.push(format!(
                "Run {}: {} (started {}, finished {})",
                run.run_id,
                phase_label(view.phase),
                format_time(run.started_at),
                format_time(run.finished_at)
            ));
            if let Some(summary) = &run.error_summary {
                lines.push(format!("Error: {summary}"));
            }
        }
        None => lines.push(format!("No run ({})", phase_label(view.phase))),
    }

    lines.push(format!("Properties: {}", view.property_totals.len()));
    for total in &view.property_totals {
        let source = match total.source {
            Source::Live => "live",
            Source::Snapshot => "snapshot",
        };
        lines.push(format!(
            "  {:<40} {:>12}  {} ({})",
            total.property_address,
            total.total_due.as_ref().map_or("-", |amount| amount.as_str()),
            format_time(total.scraped_at),
            source
        ));
    }

    lines.push(format!("Artifacts: {}", view.artifacts.len()));
    for artifact in &view.artifacts {
        let source = match artifact.source {
            ArtifactSource::Live => "live",
            ArtifactSource::Backfill => "backfill",
        };
        lines.push(format!("  {} -> {} ({})", artifact.label, artifact.url, source));
    }

    if let Some(bot) = &view.bot_summary {
        lines.extend(bot_lines(bot));
    }
    if !view.notifications.is_empty() {
        lines.push("Notifications:".to_string());
        for notification in &view.notifications {
            lines.push(format!(
                "  {}  {}",
                format_time(Some(notification.created_at)),
                notification.message
            ));
        }
    }
    lines
}

pub fn bot_lines(bot: &BotSummary) -> Vec<String> {
    let mut lines = vec![format!("Bot {} ({})", bot.name, bot.slug)];
    if let Some(run_id) = &bot.last_run_id {
        lines.push(format!(
            "  last run {} {} at {}",
            run_id,
            bot.last_run_status.as_deref().unwrap_or("-"),
            format_time(bot.last_run_at)
        ));
    }
    lines.push(format!("  properties on record: {}", bot.latest_property_count));
    if let Some(summary) = &bot.last_error_summary {
        lines.push(format!("  last error: {summary}"));
    }
    lines
}

pub fn property_row_line(row: &PropertyRow) -> String {
    format!(
        "  {:<40} {:>12}  {}",
        row.property_address,
        row.total_due.as_ref().map_or("-", |amount| amount.as_str()),
        format_time(Some(row.scraped_at))
    )
}
