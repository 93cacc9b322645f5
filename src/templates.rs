//! Builtin device templates.
//!
//! A template is a ready-made [`CommandTable`] plus a sample device document
//! for one device family. Templates are looked up by name; the same tables
//! can be exported to JSON and edited for hot reload.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::grammar::{CommandSpec, CommandTable, EditMode, Grammar, GrammarDiagnostics};
use crate::handlers::huawei_smartax::{LEVEL_INTERFACE_GPON, LEVEL_LINEPROFILE, LEVEL_SRVPROFILE};
use crate::handlers::{ENGINE_COMMIT, ENGINE_QUIT};
use crate::prompt::PromptLevel;
use crate::state::DeviceState;

/// Built-in template names supported by this crate.
pub const BUILTIN_TEMPLATES: &[&str] = &["huawei_smartax"];

pub const LEVEL_INITIAL: &str = "initial";
pub const LEVEL_ENABLE: &str = "enable";
pub const LEVEL_CONFIG: &str = "config";

const HUAWEI_SMARTAX_STATE: &str = include_str!("../data/huawei_smartax.json");

/// Capability tags used to describe template features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCapability {
    EnableMode,
    ConfigMode,
    StagedEdit,
    OntAutofind,
    CommandAlias,
}

/// Metadata for a built-in device template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateMetadata {
    pub name: String,
    pub vendor: String,
    pub family: String,
    pub template_version: String,
    pub capabilities: Vec<TemplateCapability>,
}

fn metadata_for(name: &str) -> Option<TemplateMetadata> {
    let meta = match name {
        "huawei_smartax" => TemplateMetadata {
            name: "huawei_smartax".to_string(),
            vendor: "Huawei".to_string(),
            family: "SmartAX MA5800".to_string(),
            template_version: "1.0.0".to_string(),
            capabilities: vec![
                TemplateCapability::EnableMode,
                TemplateCapability::ConfigMode,
                TemplateCapability::StagedEdit,
                TemplateCapability::OntAutofind,
                TemplateCapability::CommandAlias,
            ],
        },
        _ => return None,
    };
    Some(meta)
}

/// Returns names of all built-in templates.
pub fn available_templates() -> &'static [&'static str] {
    BUILTIN_TEMPLATES
}

/// Returns metadata for all built-in templates.
pub fn template_catalog() -> Vec<TemplateMetadata> {
    BUILTIN_TEMPLATES
        .iter()
        .filter_map(|name| metadata_for(name))
        .collect()
}

/// Returns metadata for one template by name (case-insensitive).
pub fn template_metadata(name: &str) -> Result<TemplateMetadata, EngineError> {
    let key = name.to_ascii_lowercase();
    metadata_for(&key).ok_or_else(|| EngineError::TemplateNotFound(name.to_string()))
}

/// Returns a built-in command table by name (case-insensitive).
pub fn by_name(name: &str) -> Result<CommandTable, EngineError> {
    match name.to_ascii_lowercase().as_str() {
        "huawei_smartax" => Ok(huawei_smartax()),
        _ => Err(EngineError::TemplateNotFound(name.to_string())),
    }
}

/// Returns the bundled sample device document for a template.
pub fn sample_state(name: &str) -> Result<DeviceState, EngineError> {
    match name.to_ascii_lowercase().as_str() {
        "huawei_smartax" => DeviceState::from_json(HUAWEI_SMARTAX_STATE),
        _ => Err(EngineError::TemplateNotFound(name.to_string())),
    }
}

/// Builds a template by name and returns its grammar diagnostics.
pub fn diagnose_template(name: &str) -> Result<GrammarDiagnostics, EngineError> {
    let grammar = Grammar::load(&by_name(name)?)?;
    Ok(grammar.diagnose())
}

/// Builds a template by name and exports diagnostics as pretty JSON.
pub fn diagnose_template_json(name: &str) -> Result<String, EngineError> {
    let report = diagnose_template(name)?;
    serde_json::to_string_pretty(&report)
        .map_err(|e| EngineError::InternalServerError(format!("encode diagnostics json: {e}")))
}

/// Exports diagnostics for all built-in templates as pretty JSON.
pub fn diagnose_all_templates_json() -> Result<String, EngineError> {
    let mut reports = std::collections::BTreeMap::new();
    for name in BUILTIN_TEMPLATES {
        reports.insert((*name).to_string(), diagnose_template(name)?);
    }
    serde_json::to_string_pretty(&reports)
        .map_err(|e| EngineError::InternalServerError(format!("encode diagnostics json: {e}")))
}

fn vendor(
    key: &str,
    pattern: &str,
    prompt: &[&str],
    handler: &str,
    edit: EditMode,
    help: &str,
) -> CommandSpec {
    CommandSpec::handled(
        key,
        Some(pattern),
        Some(prompt),
        &format!("huawei_smartax.{handler}"),
        edit,
        help,
    )
}

/// Returns the command table of a Huawei SmartAX MA5800 OLT.
pub fn huawei_smartax() -> CommandTable {
    const PRIVILEGED: &[&str] = &[
        LEVEL_ENABLE,
        LEVEL_CONFIG,
        LEVEL_INTERFACE_GPON,
        LEVEL_LINEPROFILE,
        LEVEL_SRVPROFILE,
    ];
    const ANY_VIEW: &[&str] = &[
        LEVEL_INITIAL,
        LEVEL_ENABLE,
        LEVEL_CONFIG,
        LEVEL_INTERFACE_GPON,
        LEVEL_LINEPROFILE,
        LEVEL_SRVPROFILE,
    ];
    const CONFIG: &[&str] = &[LEVEL_CONFIG];
    const NESTED: &[&str] = &[LEVEL_INTERFACE_GPON, LEVEL_LINEPROFILE, LEVEL_SRVPROFILE];
    const LINE_PROFILE_VIEWS: &[&str] = &[LEVEL_CONFIG, LEVEL_LINEPROFILE];
    const SRV_PROFILE_VIEWS: &[&str] = &[LEVEL_CONFIG, LEVEL_SRVPROFILE];

    let commands = vec![
        CommandSpec::fixed(
            "enable",
            Some("en(able)"),
            Some(&[LEVEL_INITIAL]),
            None,
            Some(LEVEL_ENABLE),
            "Enter the privileged mode",
        ),
        CommandSpec::fixed(
            "config",
            Some("conf(ig)"),
            Some(&[LEVEL_ENABLE]),
            None,
            Some(LEVEL_CONFIG),
            "Enter the global config mode",
        ),
        CommandSpec::fixed(
            "display language",
            Some("di(splay) la(nguage)"),
            Some(ANY_VIEW),
            Some("  Current language mode: English"),
            None,
            "Display the language mode",
        ),
        vendor(
            "display board",
            r"di(splay) b(oard) \S+",
            ANY_VIEW,
            "display_board",
            EditMode::None,
            "Display board information",
        ),
        CommandSpec::alias_of(
            "show board",
            Some(r"sh(ow) b(oard) \S+"),
            Some(&[LEVEL_ENABLE]),
            "display board",
        ),
        vendor(
            "display ont info",
            r"di(splay) o(nt) i(nfo) \S+",
            PRIVILEGED,
            "display_ont_info",
            EditMode::None,
            "Display ONT information",
        ),
        vendor(
            "display ont autofind",
            r"di(splay) o(nt) a(utofind) \S+",
            PRIVILEGED,
            "display_ont_autofind",
            EditMode::None,
            "Display automatically found ONTs",
        ),
        vendor(
            "display sysman service state",
            "di(splay) sy(sman) s(ervice) st(ate)",
            PRIVILEGED,
            "display_sysman_service",
            EditMode::None,
            "Display network service states",
        ),
        vendor(
            "display dba-profile",
            r"di(splay) dba-p(rofile) \S+",
            PRIVILEGED,
            "display_dba_profile",
            EditMode::None,
            "Display DBA profiles",
        ),
        vendor(
            "display ont-lineprofile",
            r"di(splay) ont-l(ineprofile) g(pon) \S+",
            LINE_PROFILE_VIEWS,
            "display_lineprofile",
            EditMode::None,
            "Display a GPON line profile",
        ),
        vendor(
            "display ont-srvprofile",
            r"di(splay) ont-s(rvprofile) g(pon) \S+",
            SRV_PROFILE_VIEWS,
            "display_srvprofile",
            EditMode::None,
            "Display a GPON service profile",
        ),
        vendor(
            "display version",
            "di(splay) v(ersion)",
            ANY_VIEW,
            "display_version",
            EditMode::None,
            "Display the system version and uptime",
        ),
        vendor(
            "dba-profile add",
            r"dba-p(rofile) a(dd) \S+",
            CONFIG,
            "dba_profile_add",
            EditMode::Direct,
            "Add a DBA profile",
        ),
        vendor(
            "dba-profile delete",
            r"dba-p(rofile) d(elete) \S+",
            CONFIG,
            "dba_profile_delete",
            EditMode::Direct,
            "Delete an unbound DBA profile",
        ),
        vendor(
            "sysman service",
            r"sy(sman) s(ervice) \S+",
            CONFIG,
            "sysman_service",
            EditMode::Direct,
            "Enable or disable a network service",
        ),
        vendor(
            "interface gpon",
            r"int(erface) g(pon) \S+",
            CONFIG,
            "interface_gpon",
            EditMode::Open,
            "Enter a GPON board interface",
        ),
        vendor(
            "ont-lineprofile gpon",
            r"ont-l(ineprofile) g(pon) \S+",
            CONFIG,
            "ont_lineprofile",
            EditMode::Open,
            "Create or edit a GPON line profile",
        ),
        vendor(
            "ont-srvprofile gpon",
            r"ont-s(rvprofile) g(pon) \S+",
            CONFIG,
            "ont_srvprofile",
            EditMode::Open,
            "Create or edit a GPON service profile",
        ),
        vendor(
            "ont add",
            r"o(nt) a(dd) \S+",
            &[LEVEL_INTERFACE_GPON],
            "ont_add",
            EditMode::Direct,
            "Register an automatically found ONT",
        ),
        vendor(
            "ont delete",
            r"o(nt) d(elete) \S+",
            &[LEVEL_INTERFACE_GPON],
            "ont_delete",
            EditMode::Direct,
            "Remove an ONT registration",
        ),
        vendor(
            "tcont",
            r"tc(ont) \S+",
            &[LEVEL_LINEPROFILE],
            "tcont",
            EditMode::Staged,
            "Bind a T-CONT to a DBA profile",
        ),
        vendor(
            "gem add",
            r"ge(m) a(dd) \S+",
            &[LEVEL_LINEPROFILE],
            "gem_add",
            EditMode::Staged,
            "Add a GEM port",
        ),
        vendor(
            "gem mapping",
            r"ge(m) m(apping) \S+",
            &[LEVEL_LINEPROFILE],
            "gem_mapping",
            EditMode::Staged,
            "Map a VLAN to a GEM port",
        ),
        vendor(
            "ont-port",
            r"ont-p(ort) \S+",
            &[LEVEL_SRVPROFILE],
            "ont_port",
            EditMode::Staged,
            "Set the ONT port capacity",
        ),
        vendor(
            "port vlan",
            r"p(ort) v(lan) \S+",
            &[LEVEL_SRVPROFILE],
            "port_vlan",
            EditMode::Staged,
            "Set the VLAN of an ONT Ethernet port",
        ),
        CommandSpec::handled(
            "commit",
            Some("comm(it)"),
            Some(NESTED),
            ENGINE_COMMIT,
            EditMode::None,
            "Apply the changes made in this view",
        ),
        CommandSpec::handled(
            "quit",
            Some("q(uit)"),
            None,
            ENGINE_QUIT,
            EditMode::None,
            "Return to the previous view",
        ),
    ];

    CommandTable {
        device_type: "huawei_smartax".to_string(),
        initial_prompt: LEVEL_INITIAL.to_string(),
        unknown_command: Some("% Unknown command, the error locates at '^'".to_string()),
        prompts: vec![
            PromptLevel::new(LEVEL_INITIAL, "{base_prompt}>", None, false),
            PromptLevel::new(LEVEL_ENABLE, "{base_prompt}#", Some(LEVEL_INITIAL), false),
            PromptLevel::new(LEVEL_CONFIG, "{base_prompt}(config)#", Some(LEVEL_ENABLE), false),
            PromptLevel::new(
                LEVEL_INTERFACE_GPON,
                "{base_prompt}(config-if-gpon-{frame}/{slot})#",
                Some(LEVEL_CONFIG),
                true,
            ),
            PromptLevel::new(
                LEVEL_LINEPROFILE,
                "{base_prompt}(config-gpon-lineprofile-{profile_id})#",
                Some(LEVEL_CONFIG),
                true,
            ),
            PromptLevel::new(
                LEVEL_SRVPROFILE,
                "{base_prompt}(config-gpon-srvprofile-{profile_id})#",
                Some(LEVEL_CONFIG),
                true,
            ),
        ],
        commands,
    }
}
