//! DBA profile creation and deletion.

use super::{DbaProfile, DeviceState};
use crate::error::CommandError;

/// Largest bandwidth accepted for any DBA field.
pub const MAX_KBPS: u32 = 10_240_000;

pub fn default_additional_bandwidth() -> String {
    "best-effort".to_string()
}

/// Parsed `dba-profile add` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbaProfileRequest {
    pub profile_id: Option<u32>,
    pub profile_name: Option<String>,
    pub dba_type: Option<u8>,
    pub bandwidth_compensation: bool,
    pub fix_kbps: Option<u32>,
    pub assure_kbps: Option<u32>,
    pub max_kbps: Option<u32>,
}

/// Selects one profile by id or name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileSelector {
    Id(u32),
    Name(String),
}

/// Parses `key value` tokens such as
/// `profile-id 50 profile-name test50 type3 assure 1000 max 2000`.
pub fn parse_add(args: &str) -> Result<DbaProfileRequest, CommandError> {
    let mut req = DbaProfileRequest::default();
    let mut tokens = args.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "profile-id" => req.profile_id = Some(number(token, tokens.next())?),
            "profile-name" => req.profile_name = Some(value(token, tokens.next())?.to_string()),
            "bandwidth-compensation" | "bandwidth_compensation" => {
                req.bandwidth_compensation = match value(token, tokens.next())? {
                    "yes" => true,
                    "no" => false,
                    other => {
                        return Err(CommandError::InvalidInput(format!(
                            "{token} must be yes or no, not '{other}'"
                        )));
                    }
                }
            }
            "fix" => req.fix_kbps = Some(kbps(token, tokens.next())?),
            "assure" => req.assure_kbps = Some(kbps(token, tokens.next())?),
            "max" => req.max_kbps = Some(kbps(token, tokens.next())?),
            t if t.starts_with("type") => {
                let kind = t["type".len()..]
                    .parse::<u8>()
                    .ok()
                    .filter(|k| (1..=5).contains(k))
                    .ok_or_else(|| {
                        CommandError::InvalidInput(format!("Unknown DBA type '{t}'"))
                    })?;
                req.dba_type = Some(kind);
            }
            other => {
                return Err(CommandError::InvalidInput(format!(
                    "Unknown parameter '{other}'"
                )));
            }
        }
    }
    Ok(req)
}

/// Parses `profile-id <id>` or `profile-name <name>`.
pub fn parse_selector(args: &str) -> Result<ProfileSelector, CommandError> {
    let mut tokens = args.split_whitespace();
    match tokens.next() {
        Some("profile-id") => Ok(ProfileSelector::Id(number("profile-id", tokens.next())?)),
        Some("profile-name") => Ok(ProfileSelector::Name(
            value("profile-name", tokens.next())?.to_string(),
        )),
        _ => Err(CommandError::InvalidInput(
            "Expected profile-id <id> or profile-name <name>".to_string(),
        )),
    }
}

/// Adds a profile built from `req`, keeping the collection sorted by id.
///
/// The id defaults to the lowest unused one and the name to
/// `dba-profile_<id>`. Duplicate ids or names are refused without change.
pub fn add(state: &mut DeviceState, req: &DbaProfileRequest) -> Result<DbaProfile, CommandError> {
    let dba_type = req
        .dba_type
        .ok_or_else(|| CommandError::InvalidInput("The DBA type is required".to_string()))?;
    let fix = req.fix_kbps.unwrap_or(0);
    let assure = req.assure_kbps.unwrap_or(0);
    let max = req.max_kbps.unwrap_or(0);
    check_bandwidth(dba_type, req)?;

    let profile_id = match req.profile_id {
        Some(id) => {
            if state.dba_profile(id).is_some() {
                return Err(CommandError::Duplicate(format!(
                    "The DBA profile ID {id} already exists"
                )));
            }
            id
        }
        None => lowest_unused_id(state),
    };
    let profile_name = req
        .profile_name
        .clone()
        .unwrap_or_else(|| format!("dba-profile_{profile_id}"));
    if state.dba_profile_by_name(&profile_name).is_some() {
        return Err(CommandError::Duplicate(format!(
            "The DBA profile name {profile_name} already exists"
        )));
    }

    let profile = DbaProfile {
        profile_id,
        profile_name,
        dba_type,
        bandwidth_compensation: req.bandwidth_compensation,
        fix_delay: false,
        fix_kbps: fix,
        assure_kbps: assure,
        max_kbps: max,
        additional_bandwidth: default_additional_bandwidth(),
        best_effort_priority: 0,
        best_effort_weight: 0,
        bind_times: 0,
    };
    let position = state
        .dba_profiles
        .iter()
        .position(|p| p.profile_id > profile_id)
        .unwrap_or(state.dba_profiles.len());
    state.dba_profiles.insert(position, profile.clone());
    Ok(profile)
}

/// Deletes a profile that no T-CONT is bound to.
pub fn delete(state: &mut DeviceState, selector: &ProfileSelector) -> Result<DbaProfile, CommandError> {
    let position = state
        .dba_profiles
        .iter()
        .position(|p| match selector {
            ProfileSelector::Id(id) => p.profile_id == *id,
            ProfileSelector::Name(name) => &p.profile_name == name,
        })
        .ok_or_else(|| CommandError::MissingReference("The DBA profile does not exist".to_string()))?;
    let id = state.dba_profiles[position].profile_id;
    if state.tconts.iter().any(|t| t.dba_profile_id == id) {
        return Err(CommandError::Rejected(format!(
            "The DBA profile {id} is bound and cannot be deleted"
        )));
    }
    Ok(state.dba_profiles.remove(position))
}

/// Adjusts the bind counter of a profile, saturating at zero.
pub(crate) fn adjust_bind_times(state: &mut DeviceState, profile_id: u32, delta: i64) {
    if let Some(profile) = state
        .dba_profiles
        .iter_mut()
        .find(|p| p.profile_id == profile_id)
    {
        let next = i64::from(profile.bind_times) + delta;
        profile.bind_times = u32::try_from(next.max(0)).unwrap_or(u32::MAX);
    }
}

fn lowest_unused_id(state: &DeviceState) -> u32 {
    (0..)
        .find(|id| state.dba_profile(*id).is_none())
        .unwrap_or(u32::MAX)
}

fn check_bandwidth(dba_type: u8, req: &DbaProfileRequest) -> Result<(), CommandError> {
    let need = |field: Option<u32>, name: &str| {
        field.map(|_| ()).ok_or_else(|| {
            CommandError::InvalidInput(format!("DBA type{dba_type} requires the {name} bandwidth"))
        })
    };
    match dba_type {
        1 => need(req.fix_kbps, "fix")?,
        2 => need(req.assure_kbps, "assure")?,
        3 => {
            need(req.assure_kbps, "assure")?;
            need(req.max_kbps, "max")?;
        }
        4 => need(req.max_kbps, "max")?,
        _ => {
            need(req.fix_kbps, "fix")?;
            need(req.assure_kbps, "assure")?;
            need(req.max_kbps, "max")?;
        }
    }
    let fix = req.fix_kbps.unwrap_or(0);
    let assure = req.assure_kbps.unwrap_or(0);
    if let Some(max) = req.max_kbps
        && max < fix + assure
    {
        return Err(CommandError::InvalidInput(
            "The max bandwidth must not be less than fix plus assure".to_string(),
        ));
    }
    Ok(())
}

fn value<'a>(key: &str, next: Option<&'a str>) -> Result<&'a str, CommandError> {
    next.ok_or_else(|| CommandError::InvalidInput(format!("Missing value for '{key}'")))
}

fn number(key: &str, next: Option<&str>) -> Result<u32, CommandError> {
    let raw = value(key, next)?;
    raw.parse::<u32>()
        .map_err(|_| CommandError::InvalidInput(format!("Invalid value '{raw}' for '{key}'")))
}

fn kbps(key: &str, next: Option<&str>) -> Result<u32, CommandError> {
    let n = number(key, next)?;
    if n == 0 || n > MAX_KBPS {
        return Err(CommandError::InvalidInput(format!(
            "The {key} bandwidth must be between 1 and {MAX_KBPS} kbps"
        )));
    }
    Ok(n)
}
