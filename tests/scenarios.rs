use std::sync::Arc;

use nosim::config::EngineConfig;
use nosim::grammar::{GrammarRegistry, Resolution};
use nosim::session::{Response, Session};
use nosim::state::{DeviceStore, Fsp};
use nosim::templates;

const UNKNOWN: &str = "% Unknown command, the error locates at '^'";

fn device() -> (Arc<GrammarRegistry>, Arc<DeviceStore>) {
    let registry = Arc::new(GrammarRegistry::builtin("huawei_smartax").expect("grammar"));
    let device = Arc::new(DeviceStore::new(
        templates::sample_state("huawei_smartax").expect("sample state"),
    ));
    (registry, device)
}

fn open(registry: &Arc<GrammarRegistry>, device: &Arc<DeviceStore>) -> Session {
    Session::new(
        Arc::clone(registry),
        Arc::clone(device),
        "OLT",
        EngineConfig::default(),
    )
    .expect("session")
}

fn run(session: &mut Session, line: &str) -> String {
    match session.dispatch(line).expect("dispatch") {
        Response::Output(text) => text,
        Response::Terminate => panic!("'{line}' should not terminate the session"),
    }
}

fn run_all(session: &mut Session, lines: &[&str]) {
    for line in lines {
        run(session, line);
    }
}

#[test]
fn registering_an_ont_lands_in_canonical_state_on_commit() {
    let (registry, device) = device();
    let mut session = open(&registry, &device);
    let port = Fsp {
        frame: 0,
        slot: 1,
        port: 0,
    };
    let before = device.snapshot().registered_onts(port).len();

    run_all(&mut session, &["enable", "config", "interface gpon 0/1"]);
    assert_eq!(session.prompt().text(), "OLT(config-if-gpon-0/1)#");

    let out = run(
        &mut session,
        "ont add 0 sn-auth ABCDEF1234567890 omci ont-lineprofile-id 1 ont-srvprofile-id 1 desc test",
    );
    assert!(out.contains("success: 1"), "{out}");
    assert!(out.contains("ONTID :2"), "{out}");
    assert_eq!(device.snapshot().registered_onts(port).len(), before);

    run(&mut session, "commit");
    assert_eq!(session.prompt().text(), "OLT(config)#");

    let state = device.snapshot();
    let onts = state.registered_onts(port);
    assert_eq!(onts.len(), before + 1);
    let added = onts
        .iter()
        .find(|ont| ont.sn == "ABCDEF1234567890")
        .expect("registered ont");
    assert_eq!(added.ont_id, Some(2));
    assert_eq!(added.description, "test");
    assert_eq!(added.lineprofile_id, Some(1));

    run(&mut session, "quit");
    run(&mut session, "quit");
    assert_eq!(session.prompt().text(), "OLT>");
    assert_eq!(session.prompt().level(), templates::LEVEL_INITIAL);
    assert_eq!(device.edit_owner(), None);
}

#[test]
fn adding_a_dba_profile_adds_exactly_one_sorted_row() {
    let (registry, device) = device();
    let mut session = open(&registry, &device);
    run_all(&mut session, &["enable", "config"]);

    let before = run(&mut session, "display dba-profile all");
    let out = run(
        &mut session,
        "dba-profile add profile-id 50 profile-name test50 type3 assure 1000 max 2000",
    );
    assert!(out.contains("Adding a DBA profile succeeded"), "{out}");
    let after = run(&mut session, "display dba-profile all");

    let before_lines = before.split("\r\n").collect::<Vec<_>>();
    let after_lines = after.split("\r\n").collect::<Vec<_>>();
    let added = after_lines
        .iter()
        .copied()
        .filter(|line| !before_lines.contains(line))
        .collect::<Vec<_>>();
    assert_eq!(added.len(), 1, "{after}");
    assert!(added[0].trim_start().starts_with("50 "), "{}", added[0]);

    let remaining = after_lines
        .iter()
        .copied()
        .filter(|line| *line != added[0])
        .collect::<Vec<_>>();
    assert_eq!(remaining, before_lines);

    let ids = after_lines
        .iter()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token.parse::<u32>().ok())
        .collect::<Vec<_>>();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert!(ids.contains(&50));
}

#[test]
fn dba_profile_with_bandwidth_compensation_is_displayed() {
    let (registry, device) = device();
    let mut session = open(&registry, &device);
    run_all(&mut session, &["enable", "config"]);

    let out = run(
        &mut session,
        "dba-profile add profile-id 51 type3 assure 1000 max 2000 bandwidth-compensation yes",
    );
    assert!(out.contains("Adding a DBA profile succeeded"), "{out}");
    assert!(
        device
            .snapshot()
            .dba_profile(51)
            .expect("profile 51")
            .bandwidth_compensation
    );

    let shown = run(&mut session, "display dba-profile profile-id 51");
    let line = shown
        .split("\r\n")
        .find(|line| line.trim_start().starts_with("Bandwidth compensation"))
        .expect("compensation line");
    assert!(line.ends_with(": Yes"), "{shown}");

    let all = run(&mut session, "display dba-profile all");
    let row = all
        .split("\r\n")
        .find(|line| line.trim_start().starts_with("51 "))
        .expect("row 51");
    assert!(row.contains("Yes"), "{all}");
}

#[test]
fn autofind_reports_the_same_discovery_time_on_every_query() {
    let (registry, device) = device();
    let mut session = open(&registry, &device);
    run(&mut session, "enable");

    let first = run(&mut session, "display ont autofind all");
    assert!(first.contains("Ont autofind time"), "{first}");
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let second = run(&mut session, "display ont autofind all");
    assert_eq!(first, second);
}

#[test]
fn binding_a_tcont_to_a_missing_dba_profile_leaves_staged_tconts_alone() {
    let (registry, device) = device();
    let mut session = open(&registry, &device);
    run_all(
        &mut session,
        &["enable", "config", "ont-lineprofile gpon profile-id 1"],
    );
    assert_eq!(session.prompt().text(), "OLT(config-gpon-lineprofile-1)#");
    let tconts = session.staged_state().expect("staged edit").tconts.clone();

    let out = run(&mut session, "tcont 1 dba-profile-id 9999");
    assert!(out.starts_with("  Failure:"), "{out}");
    assert!(out.contains("9999"), "{out}");
    assert_eq!(session.staged_state().expect("staged edit").tconts, tconts);
    assert_eq!(session.prompt().text(), "OLT(config-gpon-lineprofile-1)#");
}

#[test]
fn filtered_out_command_is_indistinguishable_from_unknown() {
    let (registry, device) = device();
    let mut session = open(&registry, &device);

    let filtered = run(&mut session, "dba-profile add profile-id 60 type1 fix 1024");
    let unknown = run(&mut session, "frobnicate the chassis");
    assert_eq!(filtered, unknown);
    assert_eq!(filtered, UNKNOWN);

    run(&mut session, "enable");
    assert_eq!(run(&mut session, "commit"), UNKNOWN);
}

#[test]
fn every_abbreviation_resolves_to_its_command() {
    let (registry, _) = device();
    let grammar = registry.grammar();

    for level in grammar.prompts().levels() {
        for command in grammar.commands_for(&level.name) {
            let Some(pattern) = &command.pattern else {
                continue;
            };
            for spelling in pattern.abbreviations() {
                let line = if pattern.takes_args() {
                    format!("{spelling} 0/1/0")
                } else {
                    spelling.clone()
                };
                match grammar.resolve(&line, &level.name) {
                    Resolution::Matched { command: hit, .. } => {
                        assert_eq!(hit.key, command.key, "'{line}' at '{}'", level.name)
                    }
                    other => panic!("'{line}' at '{}' did not resolve: {other:?}", level.name),
                }
            }
        }
    }
}

#[test]
fn second_session_is_refused_while_an_edit_is_open() {
    let (registry, device) = device();
    let mut first = open(&registry, &device);
    let mut second = open(&registry, &device);
    run_all(&mut first, &["enable", "config", "interface gpon 0/1"]);
    run_all(&mut second, &["enable", "config"]);

    let out = run(&mut second, "interface gpon 0/1");
    assert!(out.contains("locked by another terminal"), "{out}");
    assert_eq!(second.prompt().text(), "OLT(config)#");

    let generation = device.generation();
    let out = run(
        &mut second,
        "dba-profile add profile-id 60 type1 fix 1024",
    );
    assert!(out.contains("locked by another terminal"), "{out}");
    assert_eq!(device.generation(), generation);

    run(&mut first, "quit");
    let out = run(&mut second, "interface gpon 0/1");
    assert_eq!(out, "");
    assert_eq!(second.prompt().text(), "OLT(config-if-gpon-0/1)#");
}

#[test]
fn discarded_edit_leaves_fingerprint_unchanged() {
    let (registry, device) = device();
    let mut session = open(&registry, &device);
    let fingerprint = device.snapshot().fingerprint();

    run_all(
        &mut session,
        &[
            "enable",
            "config",
            "ont-lineprofile gpon profile-id 1",
            "tcont 2 dba-profile-id 5",
        ],
    );
    let staged = session.staged_state().expect("staged edit");
    assert!(staged.tconts_of(1).any(|t| t.tcont_id == 2));
    assert_eq!(device.snapshot().fingerprint(), fingerprint);

    run(&mut session, "quit");
    assert!(!session.has_staged_edit());
    assert_eq!(device.snapshot().fingerprint(), fingerprint);
}

#[test]
fn dropping_a_session_releases_the_edit_lock() {
    let (registry, device) = device();
    {
        let mut session = open(&registry, &device);
        run_all(&mut session, &["enable", "config", "ont-srvprofile gpon profile-id 1"]);
        assert!(device.edit_owner().is_some());
    }
    assert_eq!(device.edit_owner(), None);
}

#[test]
fn sessions_share_committed_state() {
    let (registry, device) = device();
    let mut writer = open(&registry, &device);
    let mut reader = open(&registry, &device);
    run_all(&mut writer, &["enable", "config"]);
    run_all(&mut reader, &["enable"]);

    run(&mut writer, "dba-profile add profile-id 60 profile-name shared type1 fix 1024");
    let out = run(&mut reader, "display dba-profile profile-id 60");
    assert!(out.contains("shared"), "{out}");
}
