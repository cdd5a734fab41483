use monitor_logging::{monitor_debug, monitor_info, monitor_warn};

use crate::event::{EventPayload, ProgressEvent};
use crate::msg::{Fetched, TerminalRefresh};
use crate::views::{ArtifactItem, ArtifactSource, PropertyTotal, Source, TimelineDisposition};
use crate::{Effect, Msg, Phase, ReconcilerState, RunDetail, RunStatus};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: ReconcilerState, msg: Msg) -> (ReconcilerState, Vec<Effect>) {
    let effects = match msg {
        Msg::StartRun { run_id } => {
            let mut effects = Vec::with_capacity(2);
            if state.phase().is_active() {
                effects.push(Effect::CloseStream {
                    session: state.session(),
                });
            }
            monitor_info!("following run {}", run_id);
            let session = state.begin_run(run_id.clone());
            effects.push(Effect::OpenStream { session, run_id });
            effects
        }
        Msg::Stop => {
            if state.run().is_none() {
                return (state, Vec::new());
            }
            let session = state.session();
            let was_active = state.phase().is_active();
            state.detach();
            if was_active {
                vec![Effect::CloseStream { session }]
            } else {
                Vec::new()
            }
        }
        Msg::StreamOpened { session } => {
            if state.is_current(session) && state.phase() == Phase::Pending {
                state.mark_running(None);
            }
            Vec::new()
        }
        Msg::EventReceived { session, event } => {
            if !accepts_stream_items(&state, session) {
                return (state, Vec::new());
            }
            apply_event(&mut state, event)
        }
        Msg::EventRejected {
            session,
            kind,
            timestamp,
            reason,
        } => {
            if !accepts_stream_items(&state, session) {
                return (state, Vec::new());
            }
            monitor_warn!("rejected `{}` event: {}", kind, reason);
            state
                .views_mut()
                .record(kind, timestamp, TimelineDisposition::Invalid(reason));
            state.mark_dirty();
            Vec::new()
        }
        Msg::StreamFailed { session, reason } => {
            if !accepts_stream_items(&state, session) || state.is_corroborating() {
                return (state, Vec::new());
            }
            let Some(run_id) = state.run_id() else {
                return (state, Vec::new());
            };
            monitor_warn!(
                "event stream for run {} failed: {}; checking run status",
                run_id,
                reason
            );
            state.begin_corroboration(reason);
            vec![
                Effect::CloseStream { session },
                Effect::CorroborateRunStatus { session, run_id },
            ]
        }
        Msg::CorroborationResolved { session, result } => {
            if !state.is_current(session) || !state.is_corroborating() {
                return (state, Vec::new());
            }
            resolve_corroboration(&mut state, result)
        }
        Msg::RowsRefreshed {
            session,
            generation,
            result,
        } => {
            if !state.is_current(session) {
                return (state, Vec::new());
            }
            match result {
                Ok(rows) => {
                    state.apply_rows(generation, rows);
                }
                // Views stay stale until the next successful refresh.
                Err(reason) => monitor_warn!("latest rows refresh failed: {}", reason),
            }
            Vec::new()
        }
        Msg::TerminalRefreshResolved {
            session,
            generation,
            refresh,
        } => {
            if !state.is_current(session) || state.is_settled() {
                return (state, Vec::new());
            }
            apply_terminal_refresh(&mut state, generation, refresh);
            Vec::new()
        }
    };

    (state, effects)
}

/// Stream items only count for the current session while the run is live.
/// Terminal phases are sticky.
fn accepts_stream_items(state: &ReconcilerState, session: u64) -> bool {
    if !state.is_current(session) {
        return false;
    }
    if !state.phase().is_active() {
        monitor_debug!("ignoring stream item in phase {:?}", state.phase());
        return false;
    }
    true
}

fn apply_event(state: &mut ReconcilerState, event: ProgressEvent) -> Vec<Effect> {
    let ProgressEvent {
        kind,
        timestamp,
        payload,
    } = event;
    let session = state.session();
    let mut effects = Vec::new();

    if state.phase() == Phase::Pending {
        state.mark_running(None);
    }

    let disposition = match payload {
        EventPayload::RunStarted => {
            state.mark_running(timestamp);
            TimelineDisposition::Applied
        }
        EventPayload::PropertyScraped(scraped) => {
            let generation = state.issued_generation();
            let changed = state.views_mut().upsert_property(PropertyTotal {
                property_address: scraped.property_address,
                total_due: scraped.total_due,
                scraped_at: scraped.scraped_at,
                source: Source::Live,
                generation,
            });
            if changed {
                TimelineDisposition::Applied
            } else {
                TimelineDisposition::Recorded
            }
        }
        EventPayload::ScreenshotCreated(shot) => match state.run_id() {
            Some(run_id) => {
                let item = ArtifactItem::new(
                    &shot.path,
                    shot.label.as_deref(),
                    &run_id,
                    ArtifactSource::Live,
                );
                if state.views_mut().insert_artifact(item) {
                    TimelineDisposition::Applied
                } else {
                    TimelineDisposition::Duplicate
                }
            }
            None => TimelineDisposition::Recorded,
        },
        EventPayload::DbCommitted => {
            let generation = state.issue_generation();
            effects.push(Effect::RefreshLatestRows {
                session,
                generation,
            });
            TimelineDisposition::Applied
        }
        EventPayload::RunFinished(finished) => {
            let failed = finished
                .status
                .as_deref()
                .and_then(RunStatus::from_backend)
                == Some(RunStatus::Failed);
            if failed {
                monitor_warn!(
                    "run finished with failed status: {}",
                    finished.error_summary.as_deref().unwrap_or("-")
                );
            }
            state.mark_finished(timestamp, finished.error_summary);
            // The terminal refresh still runs and settles a failed run.
            if failed {
                state.correct_terminal_status(RunStatus::Failed);
            }
            effects.push(Effect::CloseStream { session });
            if let Some(run_id) = state.run_id() {
                monitor_info!("run {} finished; refreshing snapshots", run_id);
                let generation = state.issue_generation();
                effects.push(Effect::TerminalRefresh {
                    session,
                    run_id,
                    generation,
                });
            }
            TimelineDisposition::Applied
        }
        EventPayload::RunError(error) => {
            monitor_warn!("run reported error: {}", error.summary);
            state.mark_failed(timestamp, error.summary);
            effects.push(Effect::CloseStream { session });
            TimelineDisposition::Applied
        }
        EventPayload::Other => TimelineDisposition::Recorded,
    };

    state.views_mut().record(kind, timestamp, disposition);
    state.mark_dirty();
    effects
}

fn resolve_corroboration(state: &mut ReconcilerState, result: Fetched<RunDetail>) -> Vec<Effect> {
    let session = state.session();
    let stream_error = state
        .end_corroboration()
        .unwrap_or_else(|| "unknown transport error".to_string());

    let detail = match result {
        Ok(detail) => detail,
        Err(reason) => {
            state.mark_failed(
                None,
                format!("event stream lost ({stream_error}); run status check failed: {reason}"),
            );
            return Vec::new();
        }
    };

    match detail.run_status() {
        Some(RunStatus::Finished) => {
            monitor_info!(
                "run {} reported finished after stream loss",
                detail.run_id
            );
            let finished_at = detail.finished_at;
            state.apply_run_detail(detail);
            state.mark_finished(finished_at, None);
            match state.run_id() {
                Some(run_id) => {
                    let generation = state.issue_generation();
                    vec![Effect::TerminalRefresh {
                        session,
                        run_id,
                        generation,
                    }]
                }
                None => Vec::new(),
            }
        }
        Some(RunStatus::Failed) => {
            let summary = detail
                .error_summary
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("run failed (event stream lost: {stream_error})"));
            let finished_at = detail.finished_at;
            state.apply_run_detail(detail);
            state.mark_failed(finished_at, summary);
            Vec::new()
        }
        Some(RunStatus::Pending | RunStatus::Running) => {
            if state.try_reopen() {
                monitor_info!(
                    "run still {}; reopening event stream (attempt {})",
                    detail.status,
                    state.stream_reopens()
                );
                match state.run_id() {
                    Some(run_id) => vec![Effect::OpenStream { session, run_id }],
                    None => Vec::new(),
                }
            } else {
                let attempts = state.config().max_stream_reopens;
                state.mark_failed(
                    None,
                    format!(
                        "event stream lost ({stream_error}); gave up after {attempts} reopen attempt(s)"
                    ),
                );
                Vec::new()
            }
        }
        None => {
            state.mark_failed(
                None,
                format!(
                    "event stream lost ({stream_error}); run detail reported unknown status `{}`",
                    detail.status
                ),
            );
            Vec::new()
        }
    }
}

fn apply_terminal_refresh(state: &mut ReconcilerState, generation: u64, refresh: TerminalRefresh) {
    let TerminalRefresh {
        run_detail,
        bot_summary,
        notifications,
        latest_rows,
    } = refresh;

    match latest_rows {
        Ok(rows) => {
            state.apply_rows(generation, rows);
        }
        Err(reason) => monitor_warn!("terminal latest rows refresh failed: {}", reason),
    }
    match run_detail {
        Ok(detail) => state.apply_run_detail(detail),
        Err(reason) => monitor_warn!("terminal run detail refresh failed: {}", reason),
    }
    match bot_summary {
        Ok(summary) => state.set_bot_summary(summary),
        Err(reason) => monitor_warn!("terminal bot summary refresh failed: {}", reason),
    }
    match notifications {
        Ok(items) => state.set_notifications(items),
        Err(reason) => monitor_warn!("terminal notifications refresh failed: {}", reason),
    }
    state.mark_settled();
}
