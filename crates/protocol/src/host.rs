//! Console identity and addressing (shared by discovery, registration and
//! the session handshake).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which console generation we're talking to. The two generations share a
/// wire protocol shape but differ in ports and `RP-Version` strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostType {
    PS4,
    PS5,
}

impl HostType {
    /// TCP/UDP port for `/sce/rp/regist`. PS4 and PS5 disagree.
    ///
    /// Resolved here, as an associated function, rather than as two
    /// free-floating constants at the call sites in C4/C5 -- see
    /// SPEC_FULL.md's open-question note on the PS5 port inconsistency.
    pub fn regist_port(self) -> u16 {
        match self {
            HostType::PS4 => 9295,
            HostType::PS5 => 9302,
        }
    }

    /// TCP port for `GET /sce/rp/session`. Same value as `regist_port` for
    /// both generations, but kept as its own method since the spec lists
    /// them as separate endpoints.
    pub fn session_port(self) -> u16 {
        self.regist_port()
    }

    pub fn rp_version(self) -> &'static str {
        match self {
            HostType::PS4 => "8.0",
            HostType::PS5 => "10.0",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostType::PS4 => "PS4",
            HostType::PS5 => "PS5",
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown host type: {0}")]
pub struct UnknownHostType(pub String);

impl std::str::FromStr for HostType {
    type Err = UnknownHostType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PS4" => Ok(HostType::PS4),
            "PS5" => Ok(HostType::PS5),
            other => Err(UnknownHostType(other.to_string())),
        }
    }
}

/// Power/reachability state reported by discovery's `host-state` header.
/// Absence of the header (an unreachable host) is `Offline`, never a variant
/// here -- discovery returns `None` for hosts it gets no response from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    Ready,
    Standby,
}

impl HostState {
    pub fn as_str(self) -> &'static str {
        match self {
            HostState::Ready => "Ready",
            HostState::Standby => "Standby",
        }
    }
}

impl std::str::FromStr for HostState {
    type Err = UnknownHostType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ready" => Ok(HostState::Ready),
            "Standby" => Ok(HostState::Standby),
            other => Err(UnknownHostType(other.to_string())),
        }
    }
}

/// One discovery response, merged by `host-id` if duplicates arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub host_id: String,
    pub host_type: HostType,
    pub host_name: String,
    pub host_request_port: u16,
    pub system_version: String,
    pub host_state: HostState,
}

/// Status vocabulary reported to the external device store. Distinct from
/// `HostState`: this is the long-lived record's status, not the momentary
/// discovery-probe result (discovery maps `Ready`/`Standby` into this set
/// and adds `Offline`/`Unknown` for cases discovery itself can't produce).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Standby,
    Offline,
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Standby => "standby",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unknown => "unknown",
        }
    }
}

impl From<HostState> for DeviceStatus {
    fn from(state: HostState) -> Self {
        match state {
            HostState::Ready => DeviceStatus::Online,
            HostState::Standby => DeviceStatus::Standby,
        }
    }
}

/// Durable per-console credential record (§3 `DeviceRecord`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub host_id: String,
    pub host_type: HostType,
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub system_version: Option<String>,
    /// Hex-encoded, 32 bytes decoded.
    pub rp_key: Option<String>,
    pub rp_key_type: Option<u8>,
    /// Hex-encoded, 16 bytes decoded.
    pub regist_key: Option<String>,
    pub regist_data: Option<Vec<u8>>,
    pub last_seen_at: Option<i64>,
    pub status: DeviceStatus,
}

impl DeviceRecord {
    pub fn new(device_id: impl Into<String>, host_id: impl Into<String>, host_type: HostType) -> Self {
        Self {
            device_id: device_id.into(),
            host_id: host_id.into(),
            host_type,
            mac_address: None,
            ip_address: None,
            system_version: None,
            rp_key: None,
            rp_key_type: None,
            regist_key: None,
            regist_data: None,
            last_seen_at: None,
            status: DeviceStatus::Unknown,
        }
    }

    /// §3 invariant: `is_registered` iff all three registration fields are
    /// present (and well-formed: `rp_key` decodes to 32 bytes, `regist_key`
    /// to 16).
    pub fn is_registered(&self) -> bool {
        let rp_key_ok = self
            .rp_key
            .as_deref()
            .map(|h| hex::decode(h).map(|b| b.len() == 32).unwrap_or(false))
            .unwrap_or(false);
        let regist_key_ok = self
            .regist_key
            .as_deref()
            .map(|h| hex::decode(h).map(|b| b.len() == 16).unwrap_or(false))
            .unwrap_or(false);
        rp_key_ok && regist_key_ok && self.rp_key_type.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps4_and_ps5_ports_resolve_per_spec() {
        assert_eq!(HostType::PS4.regist_port(), 9295);
        assert_eq!(HostType::PS4.session_port(), 9295);
        assert_eq!(HostType::PS5.regist_port(), 9302);
        assert_eq!(HostType::PS5.session_port(), 9302);
    }

    #[test]
    fn rp_version_differs_by_generation() {
        assert_eq!(HostType::PS4.rp_version(), "8.0");
        assert_eq!(HostType::PS5.rp_version(), "10.0");
    }

    #[test]
    fn host_state_from_str_rejects_offline() {
        assert!("Offline".parse::<HostState>().is_err());
        assert_eq!("Ready".parse::<HostState>().unwrap(), HostState::Ready);
    }

    #[test]
    fn device_status_maps_from_host_state() {
        assert_eq!(DeviceStatus::from(HostState::Ready), DeviceStatus::Online);
        assert_eq!(DeviceStatus::from(HostState::Standby), DeviceStatus::Standby);
    }

    #[test]
    fn unregistered_record_reports_false() {
        let rec = DeviceRecord::new("dev-1", "1122334455AA", HostType::PS5);
        assert!(!rec.is_registered());
    }

    #[test]
    fn fully_populated_record_reports_registered() {
        let mut rec = DeviceRecord::new("dev-1", "1122334455AA", HostType::PS5);
        rec.rp_key = Some("00".repeat(32));
        rec.regist_key = Some("00".repeat(16));
        rec.rp_key_type = Some(0);
        assert!(rec.is_registered());
    }

    #[test]
    fn wrong_length_key_is_not_registered() {
        let mut rec = DeviceRecord::new("dev-1", "1122334455AA", HostType::PS5);
        rec.rp_key = Some("00".repeat(16)); // too short
        rec.regist_key = Some("00".repeat(16));
        rec.rp_key_type = Some(0);
        assert!(!rec.is_registered());
    }
}
