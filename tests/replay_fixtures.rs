use std::sync::Arc;

use nosim::config::EngineConfig;
use nosim::error::EngineError;
use nosim::grammar::GrammarRegistry;
use nosim::session::{
    NormalizeOptions, SessionEvent, SessionRecordLevel, SessionRecorder, SessionReplayer, Session,
};
use nosim::state::DeviceStore;
use nosim::templates;

const BASIC_FIXTURE: &str = include_str!("fixtures/session_replay_basic.jsonl");
const STAGED_EDIT_FIXTURE: &str = include_str!("fixtures/session_replay_staged_edit.jsonl");
const MISMATCH_FIXTURE: &str = include_str!("fixtures/session_replay_mismatch.jsonl");
const FOREIGN_FIXTURE: &str = r#"{"ts_ms":1,"event":{"kind":"connection_established","device_addr":"admin@192.168.1.1:22","prompt":"router#"}}
"#;

fn fresh_session(level: SessionRecordLevel) -> Session {
    let registry = Arc::new(GrammarRegistry::builtin("huawei_smartax").expect("grammar"));
    let device = Arc::new(DeviceStore::new(
        templates::sample_state("huawei_smartax").expect("sample state"),
    ));
    let config = EngineConfig {
        record_level: level,
        ..EngineConfig::default()
    };
    Session::new(registry, device, "OLT", config).expect("session")
}

#[test]
fn fixture_exposes_session_context() {
    let replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).expect("load fixture");
    let ctx = replayer.initial_context().expect("context");

    assert_eq!(ctx.device_type, "huawei_smartax");
    assert_eq!(ctx.base_prompt, "OLT");
    assert_eq!(ctx.prompt, "OLT>");
}

#[test]
fn fixture_verifies_against_a_fresh_device() {
    let replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).expect("load fixture");
    let mut session = fresh_session(SessionRecordLevel::Off);

    let verified = replayer.verify(&mut session).expect("verify");
    assert_eq!(verified, 8);
    assert!(session.is_closed());
}

#[test]
fn staged_edit_fixture_commits_on_replay() {
    let replayer = SessionReplayer::from_jsonl(STAGED_EDIT_FIXTURE).expect("load fixture");
    let mut session = fresh_session(SessionRecordLevel::Off);

    let verified = replayer.verify(&mut session).expect("verify");
    assert_eq!(verified, 6);

    let state = session.device().snapshot();
    assert!(state.tconts_of(1).any(|t| t.tcont_id == 2 && t.dba_profile_id == 5));
    assert!(!state.tconts_of(1).any(|t| t.tcont_id == 3));
    assert_eq!(session.device().generation(), 1);
}

#[test]
fn fixture_reports_mismatch_for_wrong_output() {
    let replayer = SessionReplayer::from_jsonl(MISMATCH_FIXTURE).expect("load fixture");
    let mut session = fresh_session(SessionRecordLevel::Off);

    let err = match replayer.verify(&mut session) {
        Ok(_) => panic!("divergent output should fail verification"),
        Err(err) => err,
    };
    assert!(matches!(err, EngineError::ReplayMismatchError(_)));
    assert!(err.to_string().contains("display language"));
}

#[test]
fn fixture_replay_next_fills_output_prompt() {
    let mut replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).expect("load fixture");

    let command = replayer.replay_next("conf").expect("replay conf");
    assert_eq!(command.key.as_deref(), Some("config"));
    assert_eq!(command.prompt_before, "OLT#");
    assert_eq!(command.prompt_after, "OLT(config)#");

    let unknown = replayer.replay_next("display nonsense").expect("replay unknown");
    assert_eq!(unknown.key, None);
    assert!(unknown.output.starts_with("% Unknown command"));
}

#[test]
fn fixture_records_termination() {
    let replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).expect("load fixture");
    let last = replayer.commands().pop().expect("commands");

    assert_eq!(last.line, "exit");
    assert!(last.terminated);
}

#[test]
fn normalize_drops_prompt_noise_but_keeps_edits() {
    let normalized =
        SessionRecorder::normalize_jsonl(STAGED_EDIT_FIXTURE, NormalizeOptions::default())
            .expect("normalize");
    let restored = SessionRecorder::from_jsonl(&normalized).expect("restore");
    let entries = restored.entries().expect("entries");

    assert_eq!(entries.len(), 9);
    assert!(
        !entries
            .iter()
            .any(|e| matches!(e.event, SessionEvent::PromptChanged { .. }))
    );
    assert!(
        entries
            .iter()
            .any(|e| matches!(e.event, SessionEvent::StagedEditCommitted { generation: 1 }))
    );
}

#[test]
fn live_recording_replays_on_another_device() {
    let mut recorded = fresh_session(SessionRecordLevel::Commands);
    for line in [
        "enable",
        "config",
        "dba-profile add profile-id 51 profile-name live type4 max 4096",
        "display dba-profile profile-id 51",
        "sysman service ftp enable",
        "di sy s st",
        "quit",
    ] {
        recorded.dispatch(line).expect("dispatch");
    }
    let jsonl = recorded
        .recorder()
        .expect("recorder")
        .to_jsonl()
        .expect("export");

    let replayer = SessionReplayer::from_jsonl(&jsonl).expect("load recording");
    let mut session = fresh_session(SessionRecordLevel::Off);
    assert_eq!(replayer.verify(&mut session).expect("verify"), 7);
    assert_eq!(session.prompt().text(), "OLT#");
}

#[test]
fn foreign_event_kinds_are_rejected() {
    let err = match SessionReplayer::from_jsonl(FOREIGN_FIXTURE) {
        Ok(_) => panic!("unknown event kind should not decode"),
        Err(err) => err,
    };
    assert!(matches!(err, EngineError::InternalServerError(_)));
}
