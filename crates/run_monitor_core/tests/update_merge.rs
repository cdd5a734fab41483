use std::sync::Once;

use pretty_assertions::assert_eq;
use run_monitor_core::{
    parse_event, update, Amount, ArtifactSource, Effect, Msg, Phase, PropertyRow, ReconcilerState,
    RunDetail, RunId, SessionId, Source, TerminalRefresh, TimelineDisposition,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(monitor_logging::initialize_for_tests);
}

fn started(run_id: u64) -> (ReconcilerState, SessionId) {
    let (state, _) = update(
        ReconcilerState::new(),
        Msg::StartRun {
            run_id: RunId::from(run_id),
        },
    );
    let session = state.session();
    let (state, _) = update(state, Msg::StreamOpened { session });
    (state, session)
}

fn send(state: ReconcilerState, session: SessionId, json: &str) -> (ReconcilerState, Vec<Effect>) {
    let event = parse_event(json).expect("valid event");
    update(state, Msg::EventReceived { session, event })
}

fn rows(json: &str) -> Vec<PropertyRow> {
    serde_json::from_str(json).expect("valid rows")
}

fn due(state: &ReconcilerState, address: &str) -> Option<String> {
    state
        .views()
        .property(address)
        .and_then(|p| p.total_due.as_ref())
        .map(|amount| amount.as_str().to_string())
}

#[test]
fn latest_arrival_wins_for_repeated_property_events() {
    init_logging();
    let (mut state, session) = started(1);
    for amount in ["10", "20", "20", "15.50", "99"] {
        let json = format!(
            r#"{{"type":"property_scraped","property_address":"1 Main St","total_due":{amount}}}"#
        );
        state = send(state, session, &json).0;
    }

    assert_eq!(due(&state, "1 Main St").as_deref(), Some("99"));
    assert_eq!(state.views().properties().count(), 1);
}

#[test]
fn monetary_values_pass_through_verbatim() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"url_scraped","property_address":"104 MOONEY AVE.","total_due":"1,204.50"}"#,
    );
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"200 MAIN ST.","total_due":250.10}"#,
    );
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"9 ELM","total_due":null}"#,
    );

    assert_eq!(due(&state, "104 MOONEY AVE.").as_deref(), Some("1,204.50"));
    assert_eq!(due(&state, "200 MAIN ST.").as_deref(), Some("250.10"));
    assert_eq!(due(&state, "9 ELM"), None);
    assert!(state.views().property("9 ELM").is_some());
}

#[test]
fn property_keys_are_case_sensitive() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"1 Main St","total_due":1}"#,
    );
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"1 MAIN ST","total_due":2}"#,
    );
    assert_eq!(state.views().properties().count(), 2);
}

#[test]
fn duplicate_screenshot_yields_one_artifact() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(state, session, r#"{"type":"run_started"}"#);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"screenshot_created","path":"/a.png"}"#,
    );
    let (state, _) = send(
        state,
        session,
        r#"{"type":"screenshot_created","path":"/a.png","label":"again"}"#,
    );
    let (state, _) = send(state, session, r#"{"type":"run_finished"}"#);

    let artifacts = state.views().artifacts();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].path, "/a.png");
    assert_eq!(artifacts[0].label, "a");
    assert_eq!(artifacts[0].url, "/a.png?v=1");
    assert_eq!(
        state.views().timeline()[2].disposition,
        TimelineDisposition::Duplicate
    );
    assert_eq!(state.views().timeline().len(), 4);
}

#[test]
fn db_committed_snapshot_wins_over_streamed_values() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(state, session, r#"{"type":"run_started"}"#);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"1 Main St","total_due":120,"scraped_at":"2026-01-05T10:00:00Z"}"#,
    );
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"1 Main St","total_due":0,"scraped_at":"2026-01-05T10:00:01Z"}"#,
    );
    let (state, effects) = send(state, session, r#"{"type":"db_committed"}"#);
    assert_eq!(
        effects,
        vec![Effect::RefreshLatestRows {
            session,
            generation: 1
        }]
    );
    // Event processing is not blocked by the outstanding refresh.
    let (state, effects) = send(state, session, r#"{"type":"run_finished"}"#);
    assert_eq!(state.phase(), Phase::Finished);
    let generation = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::TerminalRefresh { generation, .. } => Some(*generation),
            _ => None,
        })
        .expect("terminal refresh");
    assert_eq!(generation, 2);

    let snapshot = r#"[{"property_address":"1 Main St","total_due":"118.75","scraped_at":"2026-01-05T10:00:02Z"}]"#;
    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 1,
            result: Ok(rows(snapshot)),
        },
    );
    assert_eq!(due(&state, "1 Main St").as_deref(), Some("118.75"));
    assert_eq!(
        state.views().property("1 Main St").unwrap().source,
        Source::Snapshot
    );

    let (state, _) = update(
        state,
        Msg::TerminalRefreshResolved {
            session,
            generation,
            refresh: TerminalRefresh {
                run_detail: Err("down".into()),
                bot_summary: Err("down".into()),
                notifications: Err("down".into()),
                latest_rows: Ok(rows(snapshot)),
            },
        },
    );
    assert!(state.is_settled());
    assert_eq!(due(&state, "1 Main St").as_deref(), Some("118.75"));
}

#[test]
fn committed_snapshot_replaces_values_streamed_without_scrape_time() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","timestamp":"2026-01-05T10:00:02Z","property_address":"1 Main St","total_due":120}"#,
    );
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","timestamp":"2026-01-05T10:00:04Z","property_address":"1 Main St","total_due":0}"#,
    );
    assert_eq!(due(&state, "1 Main St").as_deref(), Some("0"));
    let (state, _) = send(state, session, r#"{"type":"db_committed"}"#);

    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 1,
            result: Ok(rows(
                r#"[{"property_address":"1 Main St","total_due":"118.75","scraped_at":"2026-01-05T10:00:03Z"}]"#,
            )),
        },
    );
    assert_eq!(due(&state, "1 Main St").as_deref(), Some("118.75"));
    assert_eq!(
        state.views().property("1 Main St").unwrap().source,
        Source::Snapshot
    );
}

#[test]
fn value_streamed_after_commit_survives_its_refresh() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(state, session, r#"{"type":"db_committed"}"#);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","timestamp":"2026-01-05T10:00:01Z","property_address":"A","total_due":5}"#,
    );
    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 1,
            result: Ok(rows(
                r#"[{"property_address":"A","total_due":3,"scraped_at":"2026-01-05T10:00:09Z"}]"#,
            )),
        },
    );
    assert_eq!(due(&state, "A").as_deref(), Some("5"));
    assert_eq!(state.views().property("A").unwrap().source, Source::Live);
}

#[test]
fn snapshot_wins_on_equal_timestamp() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(state, session, r#"{"type":"db_committed"}"#);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"A","total_due":1,"scraped_at":"2026-01-05T10:00:00Z"}"#,
    );
    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 1,
            result: Ok(rows(
                r#"[{"property_address":"A","total_due":2,"scraped_at":"2026-01-05T10:00:00Z"}]"#,
            )),
        },
    );
    assert_eq!(due(&state, "A").as_deref(), Some("2"));
}

#[test]
fn older_snapshot_does_not_revert_newer_live_value() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(state, session, r#"{"type":"db_committed"}"#);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"A","total_due":7,"scraped_at":"2026-01-05T11:00:00Z"}"#,
    );
    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 1,
            result: Ok(rows(
                r#"[{"property_address":"A","total_due":3,"scraped_at":"2026-01-05T10:00:00Z"}]"#,
            )),
        },
    );
    assert_eq!(due(&state, "A").as_deref(), Some("7"));
}

#[test]
fn live_value_older_than_snapshot_is_ignored() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(state, session, r#"{"type":"db_committed"}"#);
    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 1,
            result: Ok(rows(
                r#"[{"property_address":"A","total_due":3,"scraped_at":"2026-01-05T10:00:00Z"}]"#,
            )),
        },
    );
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"A","total_due":1,"scraped_at":"2026-01-05T09:00:00Z"}"#,
    );
    assert_eq!(due(&state, "A").as_deref(), Some("3"));
    assert_eq!(
        state.views().timeline()[1].disposition,
        TimelineDisposition::Recorded
    );
}

#[test]
fn stale_refresh_generation_is_discarded() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(state, session, r#"{"type":"db_committed"}"#);
    let (state, _) = send(state, session, r#"{"type":"db_committed"}"#);

    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 2,
            result: Ok(rows(
                r#"[{"property_address":"A","total_due":"new","scraped_at":"2026-01-05T10:00:00Z"}]"#,
            )),
        },
    );
    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 1,
            result: Ok(rows(
                r#"[{"property_address":"B","total_due":"old","scraped_at":"2026-01-05T10:00:00Z"}]"#,
            )),
        },
    );

    assert_eq!(due(&state, "A").as_deref(), Some("new"));
    assert!(state.views().property("B").is_none());
}

#[test]
fn refresh_replaces_snapshot_baseline_but_keeps_live_rows() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 1,
            result: Ok(rows(
                r#"[{"property_address":"Gone","total_due":1,"scraped_at":"2026-01-05T10:00:00Z"}]"#,
            )),
        },
    );
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"Live","total_due":2}"#,
    );
    let (state, _) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 2,
            result: Ok(rows(
                r#"[{"property_address":"Kept","total_due":3,"scraped_at":"2026-01-05T10:00:00Z"}]"#,
            )),
        },
    );

    let addresses: Vec<_> = state
        .views()
        .properties()
        .map(|p| p.property_address.clone())
        .collect();
    assert_eq!(addresses, vec!["Kept".to_string(), "Live".to_string()]);
}

#[test]
fn failed_rows_refresh_is_swallowed() {
    init_logging();
    let (state, session) = started(1);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"property_scraped","property_address":"A","total_due":4}"#,
    );
    let (state, effects) = update(
        state,
        Msg::RowsRefreshed {
            session,
            generation: 1,
            result: Err("http status 500".into()),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(state.phase(), Phase::Running);
    assert_eq!(due(&state, "A").as_deref(), Some("4"));
    assert!(state.run().unwrap().error_summary.is_none());
}

#[test]
fn terminal_refresh_backfills_artifacts_after_live_ones() {
    init_logging();
    let (state, session) = started(12);
    let (state, _) = send(
        state,
        session,
        r#"{"type":"screenshot_created","path":"/artifacts/runs/run_12/00_x/before.png","label":"live before"}"#,
    );
    let (state, effects) = send(state, session, r#"{"type":"run_finished","status":"success"}"#);
    let generation = match effects.last() {
        Some(Effect::TerminalRefresh { generation, .. }) => *generation,
        other => panic!("unexpected effect {other:?}"),
    };

    let detail: RunDetail = serde_json::from_str(
        r#"{
            "run_id": 12,
            "bot_slug": "tax",
            "status": "success",
            "started_at": "2026-01-05T10:00:00Z",
            "finished_at": "2026-01-05T10:03:00Z",
            "error_summary": null,
            "details_json": {
                "url_results": [{
                    "status": "success",
                    "property_address": "104 MOONEY AVE.",
                    "artifacts": {
                        "before": "/artifacts/runs/run_12/00_x/before.png",
                        "parsed": "/artifacts/runs/run_12/00_x/parsed.png",
                        "error": ""
                    }
                }]
            }
        }"#,
    )
    .expect("valid detail");

    let (state, _) = update(
        state,
        Msg::TerminalRefreshResolved {
            session,
            generation,
            refresh: TerminalRefresh {
                run_detail: Ok(detail),
                bot_summary: Err("down".into()),
                notifications: Ok(Vec::new()),
                latest_rows: Ok(Vec::new()),
            },
        },
    );

    let view = state.view();
    assert!(view.settled);
    assert_eq!(view.artifacts.len(), 2);
    assert_eq!(view.artifacts[0].label, "live before");
    assert_eq!(view.artifacts[0].source, ArtifactSource::Live);
    assert_eq!(view.artifacts[1].label, "parsed (104 MOONEY AVE.)");
    assert_eq!(view.artifacts[1].source, ArtifactSource::Backfill);
    assert_eq!(
        view.artifacts[1].url,
        "/api/artifacts/runs/run_12/00_x/parsed.png?v=12"
    );
    let run = view.run.unwrap();
    assert_eq!(
        run.finished_at.unwrap().to_rfc3339(),
        "2026-01-05T10:03:00+00:00"
    );
    assert!(view.run_detail.is_some());
}

#[test]
fn amounts_compare_by_exact_text() {
    assert_ne!(Amount::new("120"), Amount::new("120.00"));
}
