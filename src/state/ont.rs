//! ONT autodiscovery, registration and removal.

use chrono::{DateTime, Utc};

use super::{DeviceState, Fsp, Ont};
use crate::error::CommandError;

pub fn default_control_flag() -> String {
    "active".to_string()
}

pub fn default_run_state() -> String {
    "online".to_string()
}

pub fn default_config_state() -> String {
    "normal".to_string()
}

pub fn default_match_state() -> String {
    "match".to_string()
}

pub fn default_protect_side() -> String {
    "no".to_string()
}

/// Description given to ONTs registered without one.
pub const DEFAULT_DESCRIPTION: &str = "ONT_NO_DESCRIPTION";

/// Upper bound of ONT ids on a GPON port.
pub const MAX_ONT_ID: u32 = 127;

/// One unregistered ONT reported by autodiscovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutofindEntry {
    pub fsp: Fsp,
    pub ont: Ont,
    pub discovered_at: DateTime<Utc>,
}

/// Autodiscovery result split by access technology.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AutofindReport {
    pub gpon: Vec<AutofindEntry>,
    pub epon: Vec<AutofindEntry>,
}

impl AutofindReport {
    pub fn is_empty(&self) -> bool {
        self.gpon.is_empty() && self.epon.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gpon.len() + self.epon.len()
    }
}

/// Coordinates filter for autodiscovery. `None` fields match everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortFilter {
    pub frame: Option<u32>,
    pub slot: Option<u32>,
    pub port: Option<u32>,
}

impl PortFilter {
    pub fn exact(fsp: Fsp) -> Self {
        Self {
            frame: Some(fsp.frame),
            slot: Some(fsp.slot),
            port: Some(fsp.port),
        }
    }

    fn admits(&self, fsp: Fsp) -> bool {
        self.frame.is_none_or(|f| f == fsp.frame)
            && self.slot.is_none_or(|s| s == fsp.slot)
            && self.port.is_none_or(|p| p == fsp.port)
    }
}

/// Gives every unregistered ONT without a discovery time the stamp `now`.
/// Stamps already present are kept. Returns how many ONTs were stamped.
pub fn stamp_discovered(state: &mut DeviceState, now: DateTime<Utc>) -> usize {
    let mut stamped = 0;
    let ports = state
        .frames
        .iter_mut()
        .flat_map(|f| f.slots.iter_mut())
        .flat_map(|b| b.ports.iter_mut());
    for port in ports {
        for ont in port.onts.iter_mut() {
            if !ont.registered && ont.autofind_time.is_none() {
                ont.autofind_time = Some(now);
                stamped += 1;
            }
        }
    }
    stamped
}

/// Scans for unregistered ONTs. An ONT without a discovery time (one never
/// passed through [`stamp_discovered`]) reports `now`.
pub fn autofind(state: &DeviceState, filter: PortFilter, now: DateTime<Utc>) -> AutofindReport {
    let mut report = AutofindReport::default();
    for (fsp, ont) in state.all_onts() {
        if ont.registered || !filter.admits(fsp) {
            continue;
        }
        let entry = AutofindEntry {
            fsp,
            ont: ont.clone(),
            discovered_at: ont.autofind_time.unwrap_or(now),
        };
        if ont.is_epon {
            report.epon.push(entry);
        } else {
            report.gpon.push(entry);
        }
    }
    report
}

/// Parsed `ont add` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OntAddRequest {
    pub port: u32,
    pub ont_id: Option<u32>,
    pub sn: String,
    pub lineprofile_id: u32,
    pub srvprofile_id: u32,
    pub description: Option<String>,
}

/// Parses `<port> [<ont-id>] sn-auth <sn> omci ont-lineprofile-id <id>
/// ont-srvprofile-id <id> [desc <text>]`. A quoted description may contain
/// spaces.
pub fn parse_add(args: &str) -> Result<OntAddRequest, CommandError> {
    let tokens = tokenize(args);
    let mut iter = tokens.iter().map(String::as_str).peekable();
    let port = parse_u32("port", iter.next())?;
    let ont_id = match iter.peek() {
        Some(next) if next.chars().all(|c| c.is_ascii_digit()) => Some(parse_u32("ont-id", iter.next())?),
        _ => None,
    };

    let mut sn = None;
    let mut lineprofile_id = None;
    let mut srvprofile_id = None;
    let mut description = None;
    while let Some(token) = iter.next() {
        match token {
            "sn-auth" => sn = Some(required("sn-auth", iter.next())?.to_string()),
            "omci" => {}
            "ont-lineprofile-id" => lineprofile_id = Some(parse_u32(token, iter.next())?),
            "ont-srvprofile-id" => srvprofile_id = Some(parse_u32(token, iter.next())?),
            "desc" => description = Some(required("desc", iter.next())?.to_string()),
            other => {
                return Err(CommandError::InvalidInput(format!(
                    "Unknown parameter '{other}'"
                )));
            }
        }
    }

    let sn = sn.ok_or_else(|| CommandError::InvalidInput("sn-auth <sn> is required".to_string()))?;
    if sn.len() != 16 || !sn.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CommandError::InvalidInput(format!(
            "The SN '{sn}' is not a 16-character serial number"
        )));
    }
    Ok(OntAddRequest {
        port,
        ont_id,
        sn,
        lineprofile_id: lineprofile_id.ok_or_else(|| {
            CommandError::InvalidInput("ont-lineprofile-id <id> is required".to_string())
        })?,
        srvprofile_id: srvprofile_id.ok_or_else(|| {
            CommandError::InvalidInput("ont-srvprofile-id <id> is required".to_string())
        })?,
        description,
    })
}

/// Registers an autodiscovered ONT on `frame/slot/req.port` and returns its
/// new ONT-id. Ids are assigned sequentially after the highest in use unless
/// the request names a free one.
pub fn register(
    state: &mut DeviceState,
    frame: u32,
    slot: u32,
    req: &OntAddRequest,
) -> Result<u32, CommandError> {
    let fsp = Fsp {
        frame,
        slot,
        port: req.port,
    };
    if state.line_profile(req.lineprofile_id).is_none() {
        return Err(CommandError::MissingReference(format!(
            "The line profile {} does not exist",
            req.lineprofile_id
        )));
    }
    if state.srv_profile(req.srvprofile_id).is_none() {
        return Err(CommandError::MissingReference(format!(
            "The service profile {} does not exist",
            req.srvprofile_id
        )));
    }
    if state
        .all_onts()
        .iter()
        .any(|(_, ont)| ont.registered && ont.sn == req.sn)
    {
        return Err(CommandError::Duplicate(format!(
            "The SN {} already exists",
            req.sn
        )));
    }

    let port = state.port_mut(fsp).ok_or_else(|| {
        CommandError::MissingReference(format!("The port {fsp} does not exist"))
    })?;
    let next_id = port
        .onts
        .iter()
        .filter_map(|o| o.ont_id)
        .max()
        .map(|id| id + 1)
        .unwrap_or(0);
    let ont_id = match req.ont_id {
        Some(id) if port.onts.iter().any(|o| o.ont_id == Some(id)) => {
            return Err(CommandError::Duplicate(format!(
                "The ONT ID {id} already exists"
            )));
        }
        Some(id) => id,
        None => next_id,
    };
    if ont_id > MAX_ONT_ID {
        return Err(CommandError::Rejected(format!(
            "The number of ONTs on port {fsp} exceeds the limit"
        )));
    }

    let ont = port
        .onts
        .iter_mut()
        .find(|o| !o.registered && o.sn == req.sn)
        .ok_or_else(|| {
            CommandError::MissingReference(format!(
                "The ONT {} is not in the autofind list of port {fsp}",
                req.sn
            ))
        })?;
    if ont.is_epon {
        return Err(CommandError::Rejected(format!(
            "The ONT {} is an EPON ONT",
            req.sn
        )));
    }

    ont.ont_id = Some(ont_id);
    ont.registered = true;
    ont.lineprofile_id = Some(req.lineprofile_id);
    ont.srvprofile_id = Some(req.srvprofile_id);
    ont.description = req
        .description
        .clone()
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    ont.control_flag = default_control_flag();
    ont.run_state = default_run_state();
    ont.config_state = default_config_state();
    ont.match_state = default_match_state();
    Ok(ont_id)
}

/// Parses `<port> <ont-id>`.
pub fn parse_delete(args: &str) -> Result<(u32, u32), CommandError> {
    let mut tokens = args.split_whitespace();
    let port = parse_u32("port", tokens.next())?;
    let ont_id = parse_u32("ont-id", tokens.next())?;
    if let Some(extra) = tokens.next() {
        return Err(CommandError::InvalidInput(format!(
            "Unknown parameter '{extra}'"
        )));
    }
    Ok((port, ont_id))
}

/// Removes a registration. The ONT stays on the port and shows up in
/// autodiscovery again, discovered at `now`.
pub fn deregister(
    state: &mut DeviceState,
    fsp: Fsp,
    ont_id: u32,
    now: DateTime<Utc>,
) -> Result<Ont, CommandError> {
    let port = state.port_mut(fsp).ok_or_else(|| {
        CommandError::MissingReference(format!("The port {fsp} does not exist"))
    })?;
    let ont = port
        .onts
        .iter_mut()
        .find(|o| o.registered && o.ont_id == Some(ont_id))
        .ok_or_else(|| {
            CommandError::MissingReference(format!("The ONT {ont_id} does not exist"))
        })?;
    let removed = ont.clone();
    ont.ont_id = None;
    ont.registered = false;
    ont.lineprofile_id = None;
    ont.srvprofile_id = None;
    ont.description = String::new();
    ont.control_flag = default_control_flag();
    ont.run_state = "offline".to_string();
    ont.config_state = "initial".to_string();
    ont.match_state = "initial".to_string();
    ont.autofind_time = Some(now);
    Ok(removed)
}

/// Splits on whitespace, keeping double-quoted runs together.
pub fn tokenize(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in args.chars() {
        match ch {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn required<'a>(key: &str, next: Option<&'a str>) -> Result<&'a str, CommandError> {
    next.ok_or_else(|| CommandError::InvalidInput(format!("Missing value for '{key}'")))
}

fn parse_u32(key: &str, next: Option<&str>) -> Result<u32, CommandError> {
    let raw = required(key, next)?;
    raw.parse::<u32>()
        .map_err(|_| CommandError::InvalidInput(format!("Invalid value '{raw}' for '{key}'")))
}
