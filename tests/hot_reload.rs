use std::fs;
use std::sync::Arc;

use nosim::config::EngineConfig;
use nosim::grammar::{CommandSpec, CommandTable, GrammarRegistry};
use nosim::session::{Response, Session};
use nosim::state::DeviceStore;
use nosim::templates;

fn write_table(path: &std::path::Path, table: &CommandTable) {
    fs::write(path, table.to_json_pretty().expect("serialise table")).expect("write table");
}

fn with_hostname(mut table: CommandTable) -> CommandTable {
    table.commands.insert(
        0,
        CommandSpec::fixed(
            "display hostname",
            Some("di(splay) h(ostname)"),
            None,
            Some("  Hostname: {base_prompt}"),
            None,
            "Display the device name",
        ),
    );
    table
}

fn session_on(path: &std::path::Path) -> Session {
    let registry = Arc::new(GrammarRegistry::from_path(path).expect("registry"));
    let device = Arc::new(DeviceStore::new(
        templates::sample_state("huawei_smartax").expect("sample state"),
    ));
    let config = EngineConfig {
        reload_commands: true,
        ..EngineConfig::default()
    };
    Session::new(registry, device, "OLT", config).expect("session")
}

fn run(session: &mut Session, line: &str) -> String {
    match session.dispatch(line).expect("dispatch") {
        Response::Output(text) => text,
        Response::Terminate => panic!("'{line}' should not terminate the session"),
    }
}

#[test]
fn edited_table_takes_effect_on_next_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("olt.json");
    let table = templates::by_name("huawei_smartax").expect("table");
    write_table(&path, &table);

    let mut session = session_on(&path);
    run(&mut session, "enable");
    assert_eq!(
        run(&mut session, "display hostname"),
        "% Unknown command, the error locates at '^'"
    );

    write_table(&path, &with_hostname(table));
    assert_eq!(run(&mut session, "di h"), "  Hostname: OLT");
    assert_eq!(session.prompt().text(), "OLT#");
}

#[test]
fn reload_keeps_nested_prompt_and_staged_edit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("olt.json");
    let table = templates::by_name("huawei_smartax").expect("table");
    write_table(&path, &table);

    let mut session = session_on(&path);
    for line in ["enable", "config", "interface gpon 0/1"] {
        run(&mut session, line);
    }
    assert!(session.has_staged_edit());

    write_table(&path, &with_hostname(table));
    assert_eq!(run(&mut session, "display hostname"), "  Hostname: OLT");
    assert_eq!(session.prompt().text(), "OLT(config-if-gpon-0/1)#");
    assert!(session.has_staged_edit());
    assert!(session.grammar().command("display hostname").is_some());
}

#[test]
fn broken_table_keeps_previous_grammar() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("olt.json");
    write_table(&path, &templates::by_name("huawei_smartax").expect("table"));

    let mut session = session_on(&path);
    fs::write(&path, "{ not json").expect("corrupt table");

    run(&mut session, "enable");
    assert_eq!(session.prompt().text(), "OLT#");
    assert_eq!(
        run(&mut session, "display language"),
        "  Current language mode: English"
    );
}
