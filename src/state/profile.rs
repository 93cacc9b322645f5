//! GPON line and service profiles with their T-CONT and GEM wiring.
//!
//! These mutators run against a staged copy: the dispatcher only lets them
//! through inside a line-profile or service-profile context.

use super::{DeviceState, GemMapping, GemPort, LineProfile, PortVlan, SrvProfile, Tcont, dba};
use crate::error::CommandError;

pub const MAX_TCONT_ID: u32 = 127;
pub const MAX_GEM_ID: u32 = 1023;
pub const MAX_MAPPING_INDEX: u8 = 7;
pub const MIN_VLAN: u16 = 1;
pub const MAX_VLAN: u16 = 4094;
pub const MAX_PROFILE_ID: u32 = 8192;
pub const MAX_ETH_PORTS: u32 = 24;
pub const MAX_POTS_PORTS: u32 = 8;

pub fn default_gem_service() -> String {
    "eth".to_string()
}

/// Parsed `profile-id <id> [profile-name <name>]` or `profile-name <name>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileRef {
    pub profile_id: Option<u32>,
    pub profile_name: Option<String>,
}

pub fn parse_profile_ref(args: &str) -> Result<ProfileRef, CommandError> {
    let mut out = ProfileRef::default();
    let mut tokens = args.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "profile-id" => {
                let id = number(token, tokens.next())?;
                if id > MAX_PROFILE_ID {
                    return Err(CommandError::InvalidInput(format!(
                        "The profile ID must be between 0 and {MAX_PROFILE_ID}"
                    )));
                }
                out.profile_id = Some(id);
            }
            "profile-name" => out.profile_name = Some(value(token, tokens.next())?.to_string()),
            other => {
                return Err(CommandError::InvalidInput(format!(
                    "Unknown parameter '{other}'"
                )));
            }
        }
    }
    if out.profile_id.is_none() && out.profile_name.is_none() {
        return Err(CommandError::InvalidInput(
            "Expected profile-id <id> or profile-name <name>".to_string(),
        ));
    }
    Ok(out)
}

/// Finds or creates a line profile and returns its id.
pub fn ensure_line_profile(state: &mut DeviceState, req: &ProfileRef) -> Result<u32, CommandError> {
    let existing = match (&req.profile_id, &req.profile_name) {
        (Some(id), _) => state.line_profile(*id).map(|p| p.profile_id),
        (None, Some(name)) => state
            .line_profiles
            .iter()
            .find(|p| &p.profile_name == name)
            .map(|p| p.profile_id),
        (None, None) => None,
    };
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = match req.profile_id {
        Some(id) => id,
        None => (0..=MAX_PROFILE_ID)
            .find(|id| state.line_profile(*id).is_none())
            .ok_or_else(|| CommandError::Rejected("No free line profile ID".to_string()))?,
    };
    let name = req
        .profile_name
        .clone()
        .unwrap_or_else(|| format!("line-profile_{id}"));
    if state.line_profiles.iter().any(|p| p.profile_name == name) {
        return Err(CommandError::Duplicate(format!(
            "The line profile name {name} already exists"
        )));
    }
    let position = state
        .line_profiles
        .iter()
        .position(|p| p.profile_id > id)
        .unwrap_or(state.line_profiles.len());
    state.line_profiles.insert(
        position,
        LineProfile {
            profile_id: id,
            profile_name: name,
        },
    );
    Ok(id)
}

/// Finds or creates a service profile and returns its id.
pub fn ensure_srv_profile(state: &mut DeviceState, req: &ProfileRef) -> Result<u32, CommandError> {
    let existing = match (&req.profile_id, &req.profile_name) {
        (Some(id), _) => state.srv_profile(*id).map(|p| p.profile_id),
        (None, Some(name)) => state
            .srv_profiles
            .iter()
            .find(|p| &p.profile_name == name)
            .map(|p| p.profile_id),
        (None, None) => None,
    };
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = match req.profile_id {
        Some(id) => id,
        None => (0..=MAX_PROFILE_ID)
            .find(|id| state.srv_profile(*id).is_none())
            .ok_or_else(|| CommandError::Rejected("No free service profile ID".to_string()))?,
    };
    let name = req
        .profile_name
        .clone()
        .unwrap_or_else(|| format!("srv-profile_{id}"));
    if state.srv_profiles.iter().any(|p| p.profile_name == name) {
        return Err(CommandError::Duplicate(format!(
            "The service profile name {name} already exists"
        )));
    }
    let position = state
        .srv_profiles
        .iter()
        .position(|p| p.profile_id > id)
        .unwrap_or(state.srv_profiles.len());
    state.srv_profiles.insert(
        position,
        SrvProfile {
            profile_id: id,
            profile_name: name,
            ont_ports: Default::default(),
            port_vlans: Vec::new(),
        },
    );
    Ok(id)
}

/// `tcont <id> dba-profile-id <id>`: binds or rebinds a T-CONT.
pub fn bind_tcont(state: &mut DeviceState, lineprofile_id: u32, args: &str) -> Result<Tcont, CommandError> {
    let mut tokens = args.split_whitespace();
    let tcont_id = number("tcont", tokens.next())?;
    if tcont_id > MAX_TCONT_ID {
        return Err(CommandError::InvalidInput(format!(
            "The T-CONT ID must be between 0 and {MAX_TCONT_ID}"
        )));
    }
    expect_keyword(tokens.next(), "dba-profile-id")?;
    let dba_profile_id = number("dba-profile-id", tokens.next())?;
    reject_extra(tokens.next())?;

    if state.dba_profile(dba_profile_id).is_none() {
        return Err(CommandError::MissingReference(format!(
            "The DBA profile {dba_profile_id} does not exist"
        )));
    }
    let tcont = Tcont {
        lineprofile_id,
        tcont_id,
        dba_profile_id,
    };
    match state
        .tconts
        .iter()
        .position(|t| t.lineprofile_id == lineprofile_id && t.tcont_id == tcont_id)
    {
        Some(idx) => {
            let previous = state.tconts[idx].dba_profile_id;
            state.tconts[idx] = tcont.clone();
            dba::adjust_bind_times(state, previous, -1);
        }
        None => state.tconts.push(tcont.clone()),
    }
    dba::adjust_bind_times(state, dba_profile_id, 1);
    Ok(tcont)
}

/// `gem add <gem> eth tcont <tcont>`.
pub fn add_gem_port(state: &mut DeviceState, lineprofile_id: u32, args: &str) -> Result<GemPort, CommandError> {
    let mut tokens = args.split_whitespace();
    let gem_id = number("gem", tokens.next())?;
    if gem_id > MAX_GEM_ID {
        return Err(CommandError::InvalidInput(format!(
            "The GEM index must be between 0 and {MAX_GEM_ID}"
        )));
    }
    expect_keyword(tokens.next(), "eth")?;
    expect_keyword(tokens.next(), "tcont")?;
    let tcont_id = number("tcont", tokens.next())?;
    match tokens.next() {
        None => {}
        Some("encrypt") => {
            let _ = value("encrypt", tokens.next())?;
        }
        Some(other) => {
            return Err(CommandError::InvalidInput(format!(
                "Unknown parameter '{other}'"
            )));
        }
    }

    if !state.tconts_of(lineprofile_id).any(|t| t.tcont_id == tcont_id) {
        return Err(CommandError::MissingReference(format!(
            "The T-CONT {tcont_id} does not exist"
        )));
    }
    if state.gem_ports_of(lineprofile_id).any(|g| g.gem_id == gem_id) {
        return Err(CommandError::Duplicate(format!(
            "The GEM index {gem_id} already exists"
        )));
    }
    let gem = GemPort {
        lineprofile_id,
        gem_id,
        tcont_id,
        service_type: default_gem_service(),
    };
    state.gem_ports.push(gem.clone());
    Ok(gem)
}

/// `gem mapping <gem> <index> vlan <vlan>`.
pub fn add_gem_mapping(
    state: &mut DeviceState,
    lineprofile_id: u32,
    args: &str,
) -> Result<GemMapping, CommandError> {
    let mut tokens = args.split_whitespace();
    let gem_id = number("gem", tokens.next())?;
    let index = number("mapping index", tokens.next())?;
    if index > u32::from(MAX_MAPPING_INDEX) {
        return Err(CommandError::InvalidInput(format!(
            "The mapping index must be between 0 and {MAX_MAPPING_INDEX}"
        )));
    }
    expect_keyword(tokens.next(), "vlan")?;
    let vlan = parse_vlan(tokens.next())?;
    reject_extra(tokens.next())?;

    if !state.gem_ports_of(lineprofile_id).any(|g| g.gem_id == gem_id) {
        return Err(CommandError::MissingReference(format!(
            "The GEM index {gem_id} does not exist"
        )));
    }
    let index = u8::try_from(index).unwrap_or(MAX_MAPPING_INDEX);
    if state
        .gem_mappings_of(lineprofile_id)
        .any(|m| m.gem_id == gem_id && m.index == index)
    {
        return Err(CommandError::Duplicate(format!(
            "The mapping index {index} of GEM {gem_id} already exists"
        )));
    }
    let mapping = GemMapping {
        lineprofile_id,
        gem_id,
        index,
        vlan,
    };
    state.gem_mappings.push(mapping.clone());
    Ok(mapping)
}

/// `ont-port eth <n> [pots <n>]` in a service profile.
pub fn set_ont_ports(state: &mut DeviceState, srvprofile_id: u32, args: &str) -> Result<(), CommandError> {
    let mut eth = None;
    let mut pots = None;
    let mut tokens = args.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "eth" => eth = Some(bounded("eth", tokens.next(), MAX_ETH_PORTS)?),
            "pots" => pots = Some(bounded("pots", tokens.next(), MAX_POTS_PORTS)?),
            other => {
                return Err(CommandError::InvalidInput(format!(
                    "Unknown parameter '{other}'"
                )));
            }
        }
    }
    if eth.is_none() && pots.is_none() {
        return Err(CommandError::InvalidInput(
            "Expected eth <n> and/or pots <n>".to_string(),
        ));
    }
    let profile = srv_profile_mut(state, srvprofile_id)?;
    if let Some(eth) = eth {
        profile.ont_ports.eth = eth;
        profile.port_vlans.retain(|pv| pv.eth_port <= eth);
    }
    if let Some(pots) = pots {
        profile.ont_ports.pots = pots;
    }
    Ok(())
}

/// `port vlan eth <port> <vlan>` in a service profile.
pub fn set_port_vlan(state: &mut DeviceState, srvprofile_id: u32, args: &str) -> Result<PortVlan, CommandError> {
    let mut tokens = args.split_whitespace();
    expect_keyword(tokens.next(), "eth")?;
    let eth_port = number("eth", tokens.next())?;
    let vlan = parse_vlan(tokens.next())?;
    reject_extra(tokens.next())?;

    let profile = srv_profile_mut(state, srvprofile_id)?;
    if eth_port == 0 || eth_port > profile.ont_ports.eth {
        return Err(CommandError::InvalidInput(format!(
            "The ETH port {eth_port} exceeds the ONT port capacity {}",
            profile.ont_ports.eth
        )));
    }
    let entry = PortVlan { eth_port, vlan };
    match profile.port_vlans.iter_mut().find(|pv| pv.eth_port == eth_port) {
        Some(existing) => *existing = entry.clone(),
        None => profile.port_vlans.push(entry.clone()),
    }
    Ok(entry)
}

fn srv_profile_mut(state: &mut DeviceState, id: u32) -> Result<&mut SrvProfile, CommandError> {
    state
        .srv_profiles
        .iter_mut()
        .find(|p| p.profile_id == id)
        .ok_or_else(|| CommandError::MissingReference(format!("The service profile {id} does not exist")))
}

fn parse_vlan(next: Option<&str>) -> Result<u16, CommandError> {
    let raw = value("vlan", next)?;
    raw.parse::<u16>()
        .ok()
        .filter(|v| (MIN_VLAN..=MAX_VLAN).contains(v))
        .ok_or_else(|| {
            CommandError::InvalidInput(format!(
                "The VLAN ID must be between {MIN_VLAN} and {MAX_VLAN}"
            ))
        })
}

fn bounded(key: &str, next: Option<&str>, max: u32) -> Result<u32, CommandError> {
    let n = number(key, next)?;
    if n > max {
        return Err(CommandError::InvalidInput(format!(
            "The number of {key} ports must be between 0 and {max}"
        )));
    }
    Ok(n)
}

fn expect_keyword(next: Option<&str>, keyword: &str) -> Result<(), CommandError> {
    match next {
        Some(token) if token == keyword => Ok(()),
        Some(token) => Err(CommandError::InvalidInput(format!(
            "Expected '{keyword}' but found '{token}'"
        ))),
        None => Err(CommandError::InvalidInput(format!("Expected '{keyword}'"))),
    }
}

fn reject_extra(next: Option<&str>) -> Result<(), CommandError> {
    match next {
        Some(extra) => Err(CommandError::InvalidInput(format!(
            "Unknown parameter '{extra}'"
        ))),
        None => Ok(()),
    }
}

fn value<'a>(key: &str, next: Option<&'a str>) -> Result<&'a str, CommandError> {
    next.ok_or_else(|| CommandError::InvalidInput(format!("Missing value for '{key}'")))
}

fn number(key: &str, next: Option<&str>) -> Result<u32, CommandError> {
    let raw = value(key, next)?;
    raw.parse::<u32>()
        .map_err(|_| CommandError::InvalidInput(format!("Invalid value '{raw}' for '{key}'")))
}
