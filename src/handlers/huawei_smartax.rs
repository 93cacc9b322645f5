//! Huawei SmartAX (MA5800 series) command handlers.
//!
//! Report layouts follow the vendor's fixed column spacing: every column has
//! a minimum width taken from the widest value the device normally prints,
//! so tables keep their shape whatever the data.

use chrono::{DateTime, Utc};

use super::{CommandContext, HandlerFn, Reply};
use crate::error::CommandError;
use crate::state::{self, DeviceState, Fsp, Ont, ServiceState, dba, ont, profile};
use crate::table::{self, Align, Column, Table};

pub const LEVEL_INTERFACE_GPON: &str = "interface-gpon";
pub const LEVEL_LINEPROFILE: &str = "gpon-lineprofile";
pub const LEVEL_SRVPROFILE: &str = "gpon-srvprofile";

pub const VERSION: &str = "MA5800V100R019C10";
pub const PATCH: &str = "SPC200";
pub const PRODUCT: &str = "MA5800-X7";

const BOARD_RULE: usize = 73;
const REPORT_RULE: usize = 77;

const BOARD_COLUMNS: &[Column] = &[
    Column::new("SlotID", Align::Left, 6),
    Column::new("BoardName", Align::Left, 9),
    Column::new("Status", Align::Left, 14),
    Column::new("SubType0", Align::Left, 8),
    Column::new("SubType1", Align::Left, 8),
    Column::new("Online/Offline", Align::Left, 14),
];

const ONT_STATE_COLUMNS: &[Column] = &[
    Column::new("F/S/P", Align::Left, 7),
    Column::new("ONT\nID", Align::Right, 3),
    Column::new("SN", Align::Center, 16),
    Column::new("Control\nflag", Align::Left, 11),
    Column::new("Run\nstate", Align::Left, 7),
    Column::new("Config\nstate", Align::Left, 7),
    Column::new("Match\nstate", Align::Left, 8),
    Column::new("Protect\nside", Align::Left, 7),
];

const ONT_DESC_COLUMNS: &[Column] = &[
    Column::new("F/S/P", Align::Left, 7),
    Column::new("ONT-ID", Align::Right, 6),
    Column::new("Description", Align::Left, 11),
];

const SERVICE_COLUMNS: &[Column] = &[
    Column::new("Network service", Align::Left, 15),
    Column::new("Port", Align::Left, 10),
    Column::new("State", Align::Left, 7),
];

const DBA_COLUMNS: &[Column] = &[
    Column::new("Profile-ID", Align::Right, 10),
    Column::new("Type", Align::Right, 4),
    Column::new("Bandwidth\nCompensation", Align::Right, 12),
    Column::new("Fix\n(kbps)", Align::Right, 8),
    Column::new("Assure\n(kbps)", Align::Right, 8),
    Column::new("Max\n(kbps)", Align::Right, 8),
    Column::new("Bind\ntimes", Align::Right, 5),
];

const TCONT_COLUMNS: &[Column] = &[
    Column::new("T-CONT", Align::Right, 6),
    Column::new("DBA\nProfile-ID", Align::Right, 10),
];

const GEM_COLUMNS: &[Column] = &[
    Column::new("GEM\nIndex", Align::Right, 5),
    Column::new("Service\nType", Align::Left, 7),
    Column::new("T-CONT", Align::Right, 6),
    Column::new("Mapping\nIndex", Align::Right, 7),
    Column::new("VLAN", Align::Right, 4),
];

const PORT_VLAN_COLUMNS: &[Column] = &[
    Column::new("Port\nType", Align::Left, 4),
    Column::new("Port\nID", Align::Right, 4),
    Column::new("VLAN", Align::Right, 4),
];

const NO_LEVELS: &[&str] = &[];

fn entry(
    name: &'static str,
    func: HandlerFn,
    enters: &'static [&'static str],
) -> (&'static str, HandlerFn, &'static [&'static str]) {
    (name, func, enters)
}

/// Registered handlers as `(name, function, enterable levels)`.
pub(super) fn handlers() -> Vec<(&'static str, HandlerFn, &'static [&'static str])> {
    vec![
        entry("huawei_smartax.display_board", display_board, NO_LEVELS),
        entry("huawei_smartax.display_ont_info", display_ont_info, NO_LEVELS),
        entry("huawei_smartax.display_ont_autofind", display_ont_autofind, NO_LEVELS),
        entry("huawei_smartax.display_sysman_service", display_sysman_service, NO_LEVELS),
        entry("huawei_smartax.display_dba_profile", display_dba_profile, NO_LEVELS),
        entry("huawei_smartax.display_lineprofile", display_lineprofile, NO_LEVELS),
        entry("huawei_smartax.display_srvprofile", display_srvprofile, NO_LEVELS),
        entry("huawei_smartax.display_version", display_version, NO_LEVELS),
        entry("huawei_smartax.dba_profile_add", dba_profile_add, NO_LEVELS),
        entry("huawei_smartax.dba_profile_delete", dba_profile_delete, NO_LEVELS),
        entry("huawei_smartax.sysman_service", sysman_service, NO_LEVELS),
        entry("huawei_smartax.interface_gpon", interface_gpon, &[LEVEL_INTERFACE_GPON]),
        entry("huawei_smartax.ont_add", ont_add, NO_LEVELS),
        entry("huawei_smartax.ont_delete", ont_delete, NO_LEVELS),
        entry("huawei_smartax.ont_lineprofile", ont_lineprofile, &[LEVEL_LINEPROFILE]),
        entry("huawei_smartax.ont_srvprofile", ont_srvprofile, &[LEVEL_SRVPROFILE]),
        entry("huawei_smartax.tcont", tcont, NO_LEVELS),
        entry("huawei_smartax.gem_add", gem_add, NO_LEVELS),
        entry("huawei_smartax.gem_mapping", gem_mapping, NO_LEVELS),
        entry("huawei_smartax.ont_port", ont_port, NO_LEVELS),
        entry("huawei_smartax.port_vlan", port_vlan, NO_LEVELS),
    ]
}

fn display_board(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let frame_id = match ctx.args.split_whitespace().next() {
        Some(raw) => parse_number("frame", raw)?,
        None => 0,
    };
    let frame = ctx
        .state()
        .frame(frame_id)
        .ok_or_else(|| CommandError::MissingReference(format!("The frame {frame_id} does not exist")))?;
    let mut slots = frame.slots.iter().collect::<Vec<_>>();
    slots.sort_by_key(|b| b.slot_id);

    let mut table = Table::new(BOARD_COLUMNS).with_rule(BOARD_RULE);
    for board in slots {
        table.push_row([
            board.slot_id.to_string(),
            board.board_name.clone(),
            board.status.clone(),
            board.subtype0.clone(),
            board.subtype1.clone(),
            board.online_offline.clone(),
        ]);
    }
    Ok(Reply::lines(table.render()))
}

fn display_ont_info(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let tokens = ctx.args.split_whitespace().collect::<Vec<_>>();
    let (fsp, rest) = parse_fsp_tokens(&tokens)?;
    let state = ctx.state();
    if state.port(fsp).is_none() {
        return Err(CommandError::MissingReference(format!(
            "The port {fsp} does not exist"
        )));
    }
    let onts = state.registered_onts(fsp);

    match rest.first().copied() {
        None | Some("all") => {}
        Some(raw) => {
            let ont_id = parse_number("ont-id", raw)?;
            let ont = onts
                .iter()
                .find(|o| o.ont_id == Some(ont_id))
                .ok_or_else(|| CommandError::MissingReference("The ONT does not exist".to_string()))?;
            return Ok(Reply::lines(ont_detail(state, fsp, ont)));
        }
    }

    if onts.is_empty() {
        return Err(CommandError::MissingReference(
            "There is no ONT available".to_string(),
        ));
    }

    let mut states = Table::new(ONT_STATE_COLUMNS).with_rule(REPORT_RULE);
    let mut descriptions = Table::new(ONT_DESC_COLUMNS).with_rule(REPORT_RULE);
    for ont in &onts {
        let id = ont.ont_id.map(|id| id.to_string()).unwrap_or_default();
        states.push_row([
            fsp.to_string(),
            id.clone(),
            ont.sn.clone(),
            ont.control_flag.clone(),
            ont.run_state.clone(),
            ont.config_state.clone(),
            ont.match_state.clone(),
            ont.protect_side.clone(),
        ]);
        descriptions.push_row([fsp.to_string(), id, ont.description.clone()]);
    }
    let online = onts.iter().filter(|o| o.run_state == "online").count();

    let mut lines = states.render();
    lines.extend(descriptions.header_lines());
    lines.push(descriptions.separator());
    lines.extend(descriptions.row_lines());
    lines.push(descriptions.separator());
    lines.push(format!(
        "  In port {fsp} , the total of ONTs are: {}, online: {online}",
        onts.len()
    ));
    lines.push(descriptions.separator());
    Ok(Reply::lines(lines))
}

fn ont_detail(state: &DeviceState, fsp: Fsp, ont: &Ont) -> Vec<String> {
    let line_profile = ont
        .lineprofile_id
        .and_then(|id| state.line_profile(id))
        .map(|p| p.profile_name.clone())
        .unwrap_or_else(|| "-".to_string());
    let srv_profile = ont
        .srvprofile_id
        .and_then(|id| state.srv_profile(id))
        .map(|p| p.profile_name.clone())
        .unwrap_or_else(|| "-".to_string());
    let mut lines = vec![table::rule(REPORT_RULE)];
    lines.extend(kv_block(&[
        ("F/S/P", format!("{}/{}/{}", fsp.frame, fsp.slot, fsp.port)),
        ("ONT-ID", ont.ont_id.map(|id| id.to_string()).unwrap_or_default()),
        ("Control flag", ont.control_flag.clone()),
        ("Run state", ont.run_state.clone()),
        ("Config state", ont.config_state.clone()),
        ("Match state", ont.match_state.clone()),
        ("Protect side", ont.protect_side.clone()),
        ("SN", ont.sn.clone()),
        ("Description", ont.description.clone()),
        ("Vendor ID", ont.vendor_id.clone()),
        ("Version", ont.version.clone()),
        ("Software version", ont.software_version.clone()),
        ("Equipment-ID", ont.equipment_id.clone()),
        ("Line profile ID", optional_id(ont.lineprofile_id)),
        ("Line profile name", line_profile),
        ("Service profile ID", optional_id(ont.srvprofile_id)),
        ("Service profile name", srv_profile),
    ]));
    lines.push(table::rule(REPORT_RULE));
    lines
}

fn display_ont_autofind(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let raw = ctx.args.trim();
    let filter = match raw {
        "" | "all" => match (ctx.prompt.param("frame"), ctx.prompt.param("slot")) {
            (Some(_), Some(_)) if raw.is_empty() => ont::PortFilter {
                frame: Some(ctx.param_u32("frame")?),
                slot: Some(ctx.param_u32("slot")?),
                port: None,
            },
            _ => ont::PortFilter::default(),
        },
        text if text.contains('/') => {
            let tokens = [text];
            let (fsp, _) = parse_fsp_tokens(&tokens)?;
            ont::PortFilter::exact(fsp)
        }
        text => {
            let port = parse_number("port", text)?;
            ont::PortFilter::exact(Fsp {
                frame: ctx.param_u32("frame")?,
                slot: ctx.param_u32("slot")?,
                port,
            })
        }
    };

    let report = ont::autofind(ctx.state(), filter, ctx.now);
    if report.is_empty() {
        return Err(CommandError::MissingReference(
            "The automatically found ONTs do not exist".to_string(),
        ));
    }

    let mut lines = Vec::new();
    for (label, entries) in [("GPON", &report.gpon), ("EPON", &report.epon)] {
        if entries.is_empty() {
            continue;
        }
        for (idx, entry) in entries.iter().enumerate() {
            lines.push(table::rule(REPORT_RULE));
            lines.extend(kv_block(&[
                ("Number", (idx + 1).to_string()),
                (
                    "F/S/P",
                    format!("{}/{}/{}", entry.fsp.frame, entry.fsp.slot, entry.fsp.port),
                ),
                ("Ont SN", entry.ont.sn.clone()),
                ("Password", entry.ont.password.clone()),
                ("Loid", entry.ont.loid.clone()),
                ("VendorID", entry.ont.vendor_id.clone()),
                ("Ont Version", entry.ont.version.clone()),
                ("Ont SoftwareVersion", entry.ont.software_version.clone()),
                ("Ont EquipmentID", entry.ont.equipment_id.clone()),
                ("Ont autofind time", format_time(entry.discovered_at)),
            ]));
        }
        lines.push(table::rule(REPORT_RULE));
        lines.push(format!(
            "  The number of {label} autofind ONT is {}",
            entries.len()
        ));
    }
    lines.push(table::rule(REPORT_RULE));
    Ok(Reply::lines(lines))
}

fn display_sysman_service(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let mut table = Table::new(SERVICE_COLUMNS);
    for service in &ctx.state().services {
        table.push_row([
            service.network_service.clone(),
            service
                .port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "----".to_string()),
            service.state.as_str().to_string(),
        ]);
    }
    Ok(Reply::lines(table.render()))
}

fn display_dba_profile(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let state = ctx.state();
    if ctx.args.trim() == "all" {
        let mut table = Table::new(DBA_COLUMNS);
        for p in &state.dba_profiles {
            table.push_row([
                p.profile_id.to_string(),
                p.dba_type.to_string(),
                yes_no(p.bandwidth_compensation).to_string(),
                p.fix_kbps.to_string(),
                p.assure_kbps.to_string(),
                p.max_kbps.to_string(),
                p.bind_times.to_string(),
            ]);
        }
        return Ok(Reply::lines(table.render()));
    }

    let profile = match dba::parse_selector(ctx.args)? {
        dba::ProfileSelector::Id(id) => state.dba_profile(id),
        dba::ProfileSelector::Name(name) => state.dba_profile_by_name(&name),
    }
    .ok_or_else(|| CommandError::MissingReference("The DBA profile does not exist".to_string()))?;

    let mut lines = vec![table::rule(REPORT_RULE)];
    lines.extend(kv_block(&[
        ("Profile ID", profile.profile_id.to_string()),
        ("Profile name", profile.profile_name.clone()),
        ("Type", profile.dba_type.to_string()),
        ("Bandwidth compensation", yes_no(profile.bandwidth_compensation).to_string()),
        ("Fix delay", yes_no(profile.fix_delay).to_string()),
        ("Fix (kbps)", profile.fix_kbps.to_string()),
        ("Assure (kbps)", profile.assure_kbps.to_string()),
        ("Max (kbps)", profile.max_kbps.to_string()),
        ("Additional bandwidth", profile.additional_bandwidth.clone()),
        ("Best-effort priority", profile.best_effort_priority.to_string()),
        ("Best-effort weight", profile.best_effort_weight.to_string()),
        ("Bind times", profile.bind_times.to_string()),
    ]));
    lines.push(table::rule(REPORT_RULE));
    Ok(Reply::lines(lines))
}

fn display_lineprofile(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let state = ctx.state();
    let id = match ctx.args.trim() {
        "" => ctx.param_u32("profile_id")?,
        args => {
            let req = profile::parse_profile_ref(args)?;
            match (req.profile_id, &req.profile_name) {
                (Some(id), _) => id,
                (None, Some(name)) => state
                    .line_profiles
                    .iter()
                    .find(|p| &p.profile_name == name)
                    .map(|p| p.profile_id)
                    .ok_or_else(|| missing_profile("line"))?,
                (None, None) => return Err(missing_profile("line")),
            }
        }
    };
    let line_profile = state.line_profile(id).ok_or_else(|| missing_profile("line"))?;

    let mut lines = vec![table::rule(REPORT_RULE)];
    lines.extend(kv_block(&[
        ("Profile-ID", line_profile.profile_id.to_string()),
        ("Profile-name", line_profile.profile_name.clone()),
    ]));

    let mut tconts = Table::new(TCONT_COLUMNS).with_rule(REPORT_RULE);
    let mut bound = state.tconts_of(id).collect::<Vec<_>>();
    bound.sort_by_key(|t| t.tcont_id);
    for t in bound {
        tconts.push_row([t.tcont_id.to_string(), t.dba_profile_id.to_string()]);
    }
    lines.extend(tconts.render());

    let mut gems = Table::new(GEM_COLUMNS).with_rule(REPORT_RULE);
    let mut ports = state.gem_ports_of(id).collect::<Vec<_>>();
    ports.sort_by_key(|g| g.gem_id);
    for gem in ports {
        let mut mappings = state
            .gem_mappings_of(id)
            .filter(|m| m.gem_id == gem.gem_id)
            .collect::<Vec<_>>();
        mappings.sort_by_key(|m| m.index);
        if mappings.is_empty() {
            gems.push_row([
                gem.gem_id.to_string(),
                gem.service_type.clone(),
                gem.tcont_id.to_string(),
                "-".to_string(),
                "-".to_string(),
            ]);
        }
        for m in mappings {
            gems.push_row([
                gem.gem_id.to_string(),
                gem.service_type.clone(),
                gem.tcont_id.to_string(),
                m.index.to_string(),
                m.vlan.to_string(),
            ]);
        }
    }
    lines.extend(gems.header_lines());
    lines.push(gems.separator());
    lines.extend(gems.row_lines());
    lines.push(gems.separator());
    Ok(Reply::lines(lines))
}

fn display_srvprofile(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let state = ctx.state();
    let id = match ctx.args.trim() {
        "" => ctx.param_u32("profile_id")?,
        args => {
            let req = profile::parse_profile_ref(args)?;
            match (req.profile_id, &req.profile_name) {
                (Some(id), _) => id,
                (None, Some(name)) => state
                    .srv_profiles
                    .iter()
                    .find(|p| &p.profile_name == name)
                    .map(|p| p.profile_id)
                    .ok_or_else(|| missing_profile("service"))?,
                (None, None) => return Err(missing_profile("service")),
            }
        }
    };
    let srv = state.srv_profile(id).ok_or_else(|| missing_profile("service"))?;

    let mut lines = vec![table::rule(REPORT_RULE)];
    lines.extend(kv_block(&[
        ("Profile-ID", srv.profile_id.to_string()),
        ("Profile-name", srv.profile_name.clone()),
        ("ETH ports", srv.ont_ports.eth.to_string()),
        ("POTS ports", srv.ont_ports.pots.to_string()),
    ]));
    let mut vlans = Table::new(PORT_VLAN_COLUMNS).with_rule(REPORT_RULE);
    let mut entries = srv.port_vlans.iter().collect::<Vec<_>>();
    entries.sort_by_key(|pv| pv.eth_port);
    for pv in entries {
        vlans.push_row(["ETH".to_string(), pv.eth_port.to_string(), pv.vlan.to_string()]);
    }
    lines.extend(vlans.render());
    Ok(Reply::lines(lines))
}

fn display_version(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let uptime = (ctx.now - ctx.state().boot_time).num_seconds().max(0);
    let (days, rest) = (uptime / 86_400, uptime % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, seconds) = (rest / 60, rest % 60);
    Ok(Reply::lines([
        format!("  VERSION : {VERSION}"),
        format!("  PATCH   : {PATCH}"),
        format!("  PRODUCT : {PRODUCT}"),
        String::new(),
        format!(
            "  Uptime is {days} day(s), {hours} hour(s), {minutes} minute(s), {seconds} second(s)"
        ),
    ]))
}

fn dba_profile_add(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let req = dba::parse_add(ctx.args)?;
    let added = ctx.mutate(|state| dba::add(state, &req))?;
    Ok(Reply::lines([
        "  Adding a DBA profile succeeded".to_string(),
        format!("  Profile ID  : {}", added.profile_id),
        format!("  Profile name: {}", added.profile_name),
    ]))
}

fn dba_profile_delete(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let selector = dba::parse_selector(ctx.args)?;
    let removed = ctx.mutate(|state| dba::delete(state, &selector))?;
    Ok(Reply::lines([
        "  Deleting a DBA profile succeeded".to_string(),
        format!("  Profile ID  : {}", removed.profile_id),
    ]))
}

fn sysman_service(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let mut tokens = ctx.args.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| CommandError::InvalidInput("Expected <service> enable|disable".to_string()))?
        .to_string();
    let target = match tokens.next() {
        Some("enable") => ServiceState::Enable,
        Some("disable") => ServiceState::Disable,
        _ => {
            return Err(CommandError::InvalidInput(
                "Expected <service> enable|disable".to_string(),
            ));
        }
    };
    ctx.mutate(|state| {
        let service = state
            .services
            .iter_mut()
            .find(|s| s.network_service == name)
            .ok_or_else(|| CommandError::InvalidInput(format!("Unknown network service '{name}'")))?;
        service.state = target;
        Ok(())
    })?;
    Ok(Reply::empty())
}

fn interface_gpon(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let coords = match ctx.args.split_whitespace().collect::<Vec<_>>().as_slice() {
        [one] => state::parse_coordinates(one),
        [frame, slot] => state::parse_coordinates(&format!("{frame}/{slot}")),
        _ => None,
    };
    let (frame, slot) = match coords.as_deref() {
        Some([frame, slot]) => (*frame, *slot),
        _ => {
            return Err(CommandError::InvalidInput(
                "Expected interface gpon <frame>/<slot>".to_string(),
            ));
        }
    };
    let board = ctx
        .state()
        .board(frame, slot)
        .ok_or_else(|| CommandError::MissingReference(format!("The board {frame}/{slot} does not exist")))?;
    if board.ports.is_empty() {
        return Err(CommandError::Rejected(format!(
            "The board {frame}/{slot} is not a GPON board"
        )));
    }
    Ok(Reply::enter(
        LEVEL_INTERFACE_GPON,
        &[("frame", frame.to_string()), ("slot", slot.to_string())],
    ))
}

fn ont_add(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let frame = ctx.param_u32("frame")?;
    let slot = ctx.param_u32("slot")?;
    let req = ont::parse_add(ctx.args)?;
    let ont_id = ctx.mutate(|state| ont::register(state, frame, slot, &req))?;
    Ok(Reply::lines([
        "  Number of ONTs that can be added: 1, success: 1".to_string(),
        format!("  PortID :{}, ONTID :{ont_id}", req.port),
    ]))
}

fn ont_delete(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let frame = ctx.param_u32("frame")?;
    let slot = ctx.param_u32("slot")?;
    let (port, ont_id) = ont::parse_delete(ctx.args)?;
    let fsp = Fsp { frame, slot, port };
    let now = ctx.now;
    ctx.mutate(|state| ont::deregister(state, fsp, ont_id, now))?;
    Ok(Reply::text("  Number of ONTs that can be deleted: 1, success: 1"))
}

fn ont_lineprofile(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let req = profile::parse_profile_ref(ctx.args)?;
    let id = ctx.mutate(|state| profile::ensure_line_profile(state, &req))?;
    Ok(Reply::enter(LEVEL_LINEPROFILE, &[("profile_id", id.to_string())]))
}

fn ont_srvprofile(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let req = profile::parse_profile_ref(ctx.args)?;
    let id = ctx.mutate(|state| profile::ensure_srv_profile(state, &req))?;
    Ok(Reply::enter(LEVEL_SRVPROFILE, &[("profile_id", id.to_string())]))
}

fn tcont(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let id = ctx.param_u32("profile_id")?;
    let args = ctx.args;
    ctx.mutate(|state| profile::bind_tcont(state, id, args))?;
    Ok(Reply::empty())
}

fn gem_add(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let id = ctx.param_u32("profile_id")?;
    let args = ctx.args;
    ctx.mutate(|state| profile::add_gem_port(state, id, args))?;
    Ok(Reply::empty())
}

fn gem_mapping(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let id = ctx.param_u32("profile_id")?;
    let args = ctx.args;
    ctx.mutate(|state| profile::add_gem_mapping(state, id, args))?;
    Ok(Reply::empty())
}

fn ont_port(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let id = ctx.param_u32("profile_id")?;
    let args = ctx.args;
    ctx.mutate(|state| profile::set_ont_ports(state, id, args))?;
    Ok(Reply::empty())
}

fn port_vlan(ctx: &mut CommandContext<'_>) -> Result<Reply, CommandError> {
    let id = ctx.param_u32("profile_id")?;
    let args = ctx.args;
    ctx.mutate(|state| profile::set_port_vlan(state, id, args))?;
    Ok(Reply::empty())
}

/// `key : value` lines with keys padded to the widest key.
fn kv_block(pairs: &[(&str, String)]) -> Vec<String> {
    let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    pairs
        .iter()
        .map(|(key, value)| format!("  {key:<width$} : {value}").trim_end().to_string())
        .collect()
}

/// Accepts `F S P ...` or `F/S/P ...`, returning the coordinates and the
/// remaining tokens.
fn parse_fsp_tokens<'t>(tokens: &'t [&'t str]) -> Result<(Fsp, &'t [&'t str]), CommandError> {
    let invalid = || CommandError::InvalidInput("Expected <frame> <slot> <port>".to_string());
    let (coords, rest) = match tokens.first() {
        Some(first) if first.contains('/') => (state::parse_coordinates(first), &tokens[1..]),
        Some(_) if tokens.len() >= 3 => (
            state::parse_coordinates(&tokens[..3].join("/")),
            &tokens[3..],
        ),
        _ => return Err(invalid()),
    };
    match coords.as_deref() {
        Some([frame, slot, port]) => Ok((
            Fsp {
                frame: *frame,
                slot: *slot,
                port: *port,
            },
            rest,
        )),
        _ => Err(invalid()),
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u32, CommandError> {
    raw.parse::<u32>()
        .map_err(|_| CommandError::InvalidInput(format!("Invalid value '{raw}' for '{key}'")))
}

fn missing_profile(kind: &str) -> CommandError {
    CommandError::MissingReference(format!("The {kind} profile does not exist"))
}

fn optional_id(id: Option<u32>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%:z").to_string()
}
