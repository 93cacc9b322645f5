//! In-memory device model.
//!
//! [`DeviceState`] is the entity graph a simulated OLT exposes: frames of
//! boards with GPON ports and their ONTs, plus the top-level service,
//! DBA-profile, line-profile, service-profile, T-CONT, GEM port and GEM
//! mapping collections. It holds no presentation logic.
//!
//! Mutating operations live in the submodules and act on a `&mut DeviceState`
//! handed out by the [`DeviceStore`] staged-edit protocol.

pub mod dba;
pub mod ont;
pub mod profile;
mod store;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CommandError, EngineError};

pub use store::{DeviceStore, SessionId, StagedEdit};

/// Whole-device state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceState {
    /// Set once when the state is built; drives `display version` uptime.
    #[serde(default = "Utc::now")]
    pub boot_time: DateTime<Utc>,
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub dba_profiles: Vec<DbaProfile>,
    #[serde(default)]
    pub line_profiles: Vec<LineProfile>,
    #[serde(default)]
    pub srv_profiles: Vec<SrvProfile>,
    #[serde(default)]
    pub tconts: Vec<Tcont>,
    #[serde(default)]
    pub gem_ports: Vec<GemPort>,
    #[serde(default)]
    pub gem_mappings: Vec<GemMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Frame {
    pub frame_id: u32,
    #[serde(default)]
    pub slots: Vec<Board>,
}

/// A slot and the board seated in it. Empty slots have an empty `board_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Board {
    pub slot_id: u32,
    #[serde(default)]
    pub board_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub subtype0: String,
    #[serde(default)]
    pub subtype1: String,
    #[serde(default)]
    pub online_offline: String,
    #[serde(default)]
    pub ports: Vec<Port>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Port {
    pub port_id: u32,
    #[serde(default)]
    pub onts: Vec<Ont>,
}

/// An ONT seen on a port. Unregistered ONTs have no `ont_id` and are what
/// autodiscovery reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Ont {
    #[serde(default)]
    pub ont_id: Option<u32>,
    pub sn: String,
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub is_epon: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default = "ont::default_control_flag")]
    pub control_flag: String,
    #[serde(default = "ont::default_run_state")]
    pub run_state: String,
    #[serde(default = "ont::default_config_state")]
    pub config_state: String,
    #[serde(default = "ont::default_match_state")]
    pub match_state: String,
    #[serde(default = "ont::default_protect_side")]
    pub protect_side: String,
    #[serde(default)]
    pub lineprofile_id: Option<u32>,
    #[serde(default)]
    pub srvprofile_id: Option<u32>,
    #[serde(default)]
    pub vendor_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub software_version: String,
    #[serde(default)]
    pub equipment_id: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub loid: String,
    /// Stamped by the first autodiscovery query that reports the ONT.
    #[serde(default)]
    pub autofind_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Enable,
    Disable,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Enable => "enable",
            ServiceState::Disable => "disable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Service {
    pub network_service: String,
    #[serde(default)]
    pub port: Option<u32>,
    pub state: ServiceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DbaProfile {
    pub profile_id: u32,
    pub profile_name: String,
    /// DBA type 1 to 5.
    #[serde(rename = "type")]
    pub dba_type: u8,
    #[serde(default)]
    pub bandwidth_compensation: bool,
    #[serde(default)]
    pub fix_delay: bool,
    #[serde(default)]
    pub fix_kbps: u32,
    #[serde(default)]
    pub assure_kbps: u32,
    #[serde(default)]
    pub max_kbps: u32,
    #[serde(default = "dba::default_additional_bandwidth")]
    pub additional_bandwidth: String,
    #[serde(default)]
    pub best_effort_priority: u32,
    #[serde(default)]
    pub best_effort_weight: u32,
    #[serde(default)]
    pub bind_times: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LineProfile {
    pub profile_id: u32,
    pub profile_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct OntPortCapacity {
    #[serde(default)]
    pub eth: u32,
    #[serde(default)]
    pub pots: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PortVlan {
    pub eth_port: u32,
    pub vlan: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SrvProfile {
    pub profile_id: u32,
    pub profile_name: String,
    #[serde(default)]
    pub ont_ports: OntPortCapacity,
    #[serde(default)]
    pub port_vlans: Vec<PortVlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Tcont {
    pub lineprofile_id: u32,
    pub tcont_id: u32,
    pub dba_profile_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GemPort {
    pub lineprofile_id: u32,
    pub gem_id: u32,
    pub tcont_id: u32,
    #[serde(default = "profile::default_gem_service")]
    pub service_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GemMapping {
    pub lineprofile_id: u32,
    pub gem_id: u32,
    pub index: u8,
    pub vlan: u16,
}

/// Frame/slot/port coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fsp {
    pub frame: u32,
    pub slot: u32,
    pub port: u32,
}

impl std::fmt::Display for Fsp {
    /// Huawei style, slot padded to two columns: `0/ 1/0`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{:>2}/{}", self.frame, self.slot, self.port)
    }
}

impl DeviceState {
    /// Empty device booted now.
    pub fn new() -> Self {
        Self {
            boot_time: Utc::now(),
            frames: Vec::new(),
            services: Vec::new(),
            dba_profiles: Vec::new(),
            line_profiles: Vec::new(),
            srv_profiles: Vec::new(),
            tconts: Vec::new(),
            gem_ports: Vec::new(),
            gem_mappings: Vec::new(),
        }
    }

    /// Parses and validates a device document.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let mut state: DeviceState = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidDeviceDocument(e.to_string()))?;
        state.dba_profiles.sort_by_key(|p| p.profile_id);
        state.validate()?;
        Ok(state)
    }

    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON schema of the device document.
    pub fn json_schema() -> Result<String, EngineError> {
        let schema = schemars::schema_for!(DeviceState);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    /// SHA-256 hex digest of the canonical serialisation.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub fn frame(&self, frame: u32) -> Option<&Frame> {
        self.frames.iter().find(|f| f.frame_id == frame)
    }

    pub fn board(&self, frame: u32, slot: u32) -> Option<&Board> {
        self.frame(frame)?.slots.iter().find(|b| b.slot_id == slot)
    }

    pub fn port(&self, fsp: Fsp) -> Option<&Port> {
        self.board(fsp.frame, fsp.slot)?
            .ports
            .iter()
            .find(|p| p.port_id == fsp.port)
    }

    pub fn port_mut(&mut self, fsp: Fsp) -> Option<&mut Port> {
        self.frames
            .iter_mut()
            .find(|f| f.frame_id == fsp.frame)?
            .slots
            .iter_mut()
            .find(|b| b.slot_id == fsp.slot)?
            .ports
            .iter_mut()
            .find(|p| p.port_id == fsp.port)
    }

    /// Registered ONTs on a port, ordered by ONT-id.
    pub fn registered_onts(&self, fsp: Fsp) -> Vec<&Ont> {
        let mut onts = self
            .port(fsp)
            .map(|p| p.onts.iter().filter(|o| o.registered).collect::<Vec<_>>())
            .unwrap_or_default();
        onts.sort_by_key(|o| o.ont_id);
        onts
    }

    pub fn dba_profile(&self, profile_id: u32) -> Option<&DbaProfile> {
        self.dba_profiles.iter().find(|p| p.profile_id == profile_id)
    }

    pub fn dba_profile_by_name(&self, name: &str) -> Option<&DbaProfile> {
        self.dba_profiles.iter().find(|p| p.profile_name == name)
    }

    pub fn line_profile(&self, profile_id: u32) -> Option<&LineProfile> {
        self.line_profiles.iter().find(|p| p.profile_id == profile_id)
    }

    pub fn srv_profile(&self, profile_id: u32) -> Option<&SrvProfile> {
        self.srv_profiles.iter().find(|p| p.profile_id == profile_id)
    }

    pub fn tconts_of(&self, lineprofile_id: u32) -> impl Iterator<Item = &Tcont> {
        self.tconts
            .iter()
            .filter(move |t| t.lineprofile_id == lineprofile_id)
    }

    pub fn gem_ports_of(&self, lineprofile_id: u32) -> impl Iterator<Item = &GemPort> {
        self.gem_ports
            .iter()
            .filter(move |g| g.lineprofile_id == lineprofile_id)
    }

    pub fn gem_mappings_of(&self, lineprofile_id: u32) -> impl Iterator<Item = &GemMapping> {
        self.gem_mappings
            .iter()
            .filter(move |m| m.lineprofile_id == lineprofile_id)
    }

    /// Checks the cross-collection references that must hold before a
    /// staged edit is committed. The error names the first broken reference.
    pub fn validate_references(&self) -> Result<(), CommandError> {
        for tcont in &self.tconts {
            if self.line_profile(tcont.lineprofile_id).is_none() {
                return Err(CommandError::MissingReference(format!(
                    "T-CONT {} refers to line profile {} which does not exist",
                    tcont.tcont_id, tcont.lineprofile_id
                )));
            }
            if self.dba_profile(tcont.dba_profile_id).is_none() {
                return Err(CommandError::MissingReference(format!(
                    "T-CONT {} refers to DBA profile {} which does not exist",
                    tcont.tcont_id, tcont.dba_profile_id
                )));
            }
        }
        for gem in &self.gem_ports {
            if !self
                .tconts_of(gem.lineprofile_id)
                .any(|t| t.tcont_id == gem.tcont_id)
            {
                return Err(CommandError::MissingReference(format!(
                    "GEM port {} refers to T-CONT {} which does not exist",
                    gem.gem_id, gem.tcont_id
                )));
            }
        }
        for mapping in &self.gem_mappings {
            if !self
                .gem_ports_of(mapping.lineprofile_id)
                .any(|g| g.gem_id == mapping.gem_id)
            {
                return Err(CommandError::MissingReference(format!(
                    "GEM mapping {} refers to GEM port {} which does not exist",
                    mapping.index, mapping.gem_id
                )));
            }
        }
        for (fsp, ont) in self.all_onts() {
            if !ont.registered {
                continue;
            }
            if let Some(id) = ont.lineprofile_id
                && self.line_profile(id).is_none()
            {
                return Err(CommandError::MissingReference(format!(
                    "ONT {fsp} {} refers to line profile {id} which does not exist",
                    ont.ont_id.unwrap_or_default()
                )));
            }
            if let Some(id) = ont.srvprofile_id
                && self.srv_profile(id).is_none()
            {
                return Err(CommandError::MissingReference(format!(
                    "ONT {fsp} {} refers to service profile {id} which does not exist",
                    ont.ont_id.unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    /// Every ONT with its coordinates, in frame/slot/port order.
    pub fn all_onts(&self) -> Vec<(Fsp, &Ont)> {
        let mut out = Vec::new();
        for frame in &self.frames {
            for board in &frame.slots {
                for port in &board.ports {
                    let fsp = Fsp {
                        frame: frame.frame_id,
                        slot: board.slot_id,
                        port: port.port_id,
                    };
                    out.extend(port.onts.iter().map(|ont| (fsp, ont)));
                }
            }
        }
        out
    }

    /// Full document validation: uniqueness rules plus references.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for profile in &self.dba_profiles {
            if !ids.insert(profile.profile_id) {
                return Err(EngineError::InvalidDeviceDocument(format!(
                    "duplicate DBA profile id {}",
                    profile.profile_id
                )));
            }
            if !names.insert(profile.profile_name.as_str()) {
                return Err(EngineError::InvalidDeviceDocument(format!(
                    "duplicate DBA profile name '{}'",
                    profile.profile_name
                )));
            }
        }
        for frame in &self.frames {
            for board in &frame.slots {
                for port in &board.ports {
                    let mut seen = HashSet::new();
                    for id in port.onts.iter().filter_map(|o| o.ont_id) {
                        if !seen.insert(id) {
                            return Err(EngineError::InvalidDeviceDocument(format!(
                                "duplicate ONT id {id} on port {}",
                                Fsp {
                                    frame: frame.frame_id,
                                    slot: board.slot_id,
                                    port: port.port_id,
                                }
                            )));
                        }
                    }
                }
            }
        }
        self.validate_references()
            .map_err(|e| EngineError::InvalidDeviceDocument(e.to_string().trim().to_string()))
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `F/S/P` or `F/S` style coordinates.
pub fn parse_coordinates(text: &str) -> Option<Vec<u32>> {
    text.split('/')
        .map(|part| part.trim().parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates;

    #[test]
    fn sample_document_is_valid() {
        let state = templates::sample_state("huawei_smartax").expect("sample");
        state.validate().expect("valid");
        assert!(state.board(0, 1).is_some());
        let ids = state
            .dba_profiles
            .iter()
            .map(|p| p.profile_id)
            .collect::<Vec<_>>();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let state = templates::sample_state("huawei_smartax").expect("sample");
        let copy = state.clone();
        assert_eq!(state.fingerprint(), copy.fingerprint());
        assert_eq!(state.fingerprint().len(), 64);

        let mut changed = state.clone();
        changed.services.pop();
        assert_ne!(state.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn validate_references_names_the_broken_link() {
        let mut state = templates::sample_state("huawei_smartax").expect("sample");
        state.tconts.push(Tcont {
            lineprofile_id: 1,
            tcont_id: 7,
            dba_profile_id: 9999,
        });
        let err = match state.validate_references() {
            Ok(_) => panic!("dangling DBA reference should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("DBA profile 9999"));
    }

    #[test]
    fn from_json_rejects_duplicate_ont_ids() {
        let json = r#"{
            "frames": [{"frame_id": 0, "slots": [{"slot_id": 1, "board_name": "H901GPSFE",
                "ports": [{"port_id": 0, "onts": [
                    {"ont_id": 0, "sn": "A", "registered": true},
                    {"ont_id": 0, "sn": "B", "registered": true}
                ]}]}]}]
        }"#;
        let err = match DeviceState::from_json(json) {
            Ok(_) => panic!("duplicate ids should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::InvalidDeviceDocument(_)));
    }

    #[test]
    fn fsp_display_pads_slot() {
        let fsp = Fsp {
            frame: 0,
            slot: 1,
            port: 0,
        };
        assert_eq!(fsp.to_string(), "0/ 1/0");
    }

    #[test]
    fn parse_coordinates_accepts_slashes() {
        assert_eq!(parse_coordinates("0/1/3"), Some(vec![0, 1, 3]));
        assert_eq!(parse_coordinates("0/x"), None);
    }
}
