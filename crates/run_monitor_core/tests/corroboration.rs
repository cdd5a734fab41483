use std::sync::Once;

use pretty_assertions::assert_eq;
use run_monitor_core::{
    update, Effect, Msg, Phase, ReconcilerConfig, ReconcilerState, RunDetail, RunId, RunStatus,
    SessionId,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(monitor_logging::initialize_for_tests);
}

fn running(config: ReconcilerConfig) -> (ReconcilerState, SessionId) {
    let (state, _) = update(
        ReconcilerState::with_config(config),
        Msg::StartRun {
            run_id: RunId::from(42),
        },
    );
    let session = state.session();
    let (state, _) = update(state, Msg::StreamOpened { session });
    (state, session)
}

fn detail(status: &str, error_summary: Option<&str>) -> RunDetail {
    let summary = error_summary
        .map(|s| format!("\"{s}\""))
        .unwrap_or_else(|| "null".to_string());
    serde_json::from_str(&format!(
        r#"{{"run_id":42,"status":"{status}","started_at":"2026-01-05T10:00:00Z","finished_at":null,"error_summary":{summary},"details_json":{{}}}}"#
    ))
    .expect("valid detail")
}

fn drop_stream(state: ReconcilerState, session: SessionId) -> (ReconcilerState, Vec<Effect>) {
    update(
        state,
        Msg::StreamFailed {
            session,
            reason: "connection reset".into(),
        },
    )
}

#[test]
fn transport_error_triggers_single_status_check() {
    init_logging();
    let (state, session) = running(ReconcilerConfig::default());
    let (state, effects) = drop_stream(state, session);

    assert_eq!(state.phase(), Phase::Running);
    assert_eq!(
        effects,
        vec![
            Effect::CloseStream { session },
            Effect::CorroborateRunStatus {
                session,
                run_id: RunId::from(42),
            },
        ]
    );

    // A second failure report while the check is outstanding changes nothing.
    let (state, effects) = drop_stream(state, session);
    assert!(effects.is_empty());
    assert_eq!(state.phase(), Phase::Running);
}

#[test]
fn corroborated_finish_yields_finished_and_terminal_refresh() {
    init_logging();
    let (state, session) = running(ReconcilerConfig::default());
    let (state, _) = drop_stream(state, session);
    let (state, effects) = update(
        state,
        Msg::CorroborationResolved {
            session,
            result: Ok(detail("success", None)),
        },
    );

    assert_eq!(state.phase(), Phase::Finished);
    assert_eq!(state.run().unwrap().status, RunStatus::Finished);
    assert!(!state.is_settled());
    assert_eq!(
        effects,
        vec![Effect::TerminalRefresh {
            session,
            run_id: RunId::from(42),
            generation: 1,
        }]
    );
}

#[test]
fn corroboration_timeout_yields_failed_with_summary() {
    init_logging();
    let (state, session) = running(ReconcilerConfig::default());
    let (state, _) = drop_stream(state, session);
    let (state, effects) = update(
        state,
        Msg::CorroborationResolved {
            session,
            result: Err("timed out after 5s".into()),
        },
    );

    assert!(effects.is_empty());
    assert_eq!(state.phase(), Phase::Failed);
    let summary = state.run().unwrap().error_summary.clone().unwrap();
    assert!(!summary.is_empty());
    assert!(summary.contains("event stream lost"));
    assert!(summary.contains("timed out"));
    assert!(state.is_settled());
}

#[test]
fn corroborated_failure_uses_backend_summary() {
    init_logging();
    let (state, session) = running(ReconcilerConfig::default());
    let (state, _) = drop_stream(state, session);
    let (state, _) = update(
        state,
        Msg::CorroborationResolved {
            session,
            result: Ok(detail("failed", Some("selector not found"))),
        },
    );

    assert_eq!(state.phase(), Phase::Failed);
    assert_eq!(
        state.run().unwrap().error_summary.as_deref(),
        Some("selector not found")
    );
}

#[test]
fn still_running_reopens_until_budget_is_spent() {
    init_logging();
    let (mut state, session) = running(ReconcilerConfig {
        max_stream_reopens: 1,
    });

    state = drop_stream(state, session).0;
    let (next, effects) = update(
        state,
        Msg::CorroborationResolved {
            session,
            result: Ok(detail("running", None)),
        },
    );
    assert_eq!(
        effects,
        vec![Effect::OpenStream {
            session,
            run_id: RunId::from(42),
        }]
    );
    assert_eq!(next.phase(), Phase::Running);

    let (next, _) = update(next, Msg::StreamOpened { session });
    let next = drop_stream(next, session).0;
    let (next, effects) = update(
        next,
        Msg::CorroborationResolved {
            session,
            result: Ok(detail("running", None)),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(next.phase(), Phase::Failed);
    assert!(next
        .run()
        .unwrap()
        .error_summary
        .as_deref()
        .unwrap()
        .contains("gave up after 1 reopen attempt(s)"));
}

#[test]
fn stream_open_failure_is_corroborated_too() {
    init_logging();
    let (state, _) = update(
        ReconcilerState::new(),
        Msg::StartRun {
            run_id: RunId::from(42),
        },
    );
    let session = state.session();
    let (state, effects) = update(
        state,
        Msg::StreamFailed {
            session,
            reason: "http status 502".into(),
        },
    );
    assert_eq!(state.phase(), Phase::Pending);
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::CorroborateRunStatus { .. })));
}

#[test]
fn unsolicited_corroboration_result_is_ignored() {
    init_logging();
    let (state, session) = running(ReconcilerConfig::default());
    let (state, effects) = update(
        state,
        Msg::CorroborationResolved {
            session,
            result: Ok(detail("success", None)),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(state.phase(), Phase::Running);
}
