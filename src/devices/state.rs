//! Per-device mutable state
//!
//! A `DeviceState` is owned exclusively by its device actor task; nothing
//! outside the actor mutates it.

use std::collections::HashMap;
use std::time::Instant;

use uuid::Uuid;

use crate::engine::upgrade::{UpgradeSettings, UpgradeState};
use crate::mib::{DeviceType, MibTree, Oid};

/// Everything needed to bring up one simulated device
#[derive(Debug)]
pub struct DeviceSpec {
    pub device_type: DeviceType,
    pub udp_port: u16,
    pub community: String,
    /// Per-device MIB overlay; takes precedence over the shared profile.
    pub oid_map: Option<MibTree>,
    pub upgrade: UpgradeSettings,
}

impl DeviceSpec {
    pub fn new(device_type: DeviceType, udp_port: u16, community: impl Into<String>) -> Self {
        Self {
            device_type,
            udp_port,
            community: community.into(),
            oid_map: None,
            upgrade: UpgradeSettings::default(),
        }
    }

    pub fn with_oid_map(mut self, oid_map: MibTree) -> Self {
        self.oid_map = Some(oid_map);
        self
    }

    pub fn with_upgrade(mut self, upgrade: UpgradeSettings) -> Self {
        self.upgrade = upgrade;
        self
    }
}

/// Mutable state of one simulated device
#[derive(Debug)]
pub struct DeviceState {
    pub device_id: Uuid,
    pub device_type: DeviceType,
    pub udp_port: u16,
    pub community: String,
    pub uptime_start: Instant,
    /// Dynamic counter overrides, updated by behaviors.
    pub counters: HashMap<Oid, u32>,
    /// Dynamic gauge overrides, updated by behaviors.
    pub gauges: HashMap<Oid, u32>,
    pub oid_map: Option<MibTree>,
    pub upgrade: UpgradeState,
    pub last_activity: Instant,
}

impl DeviceState {
    pub fn new(spec: DeviceSpec) -> Self {
        let now = Instant::now();
        Self {
            device_id: Uuid::new_v4(),
            device_type: spec.device_type,
            udp_port: spec.udp_port,
            community: spec.community,
            uptime_start: now,
            counters: HashMap::new(),
            gauges: HashMap::new(),
            oid_map: spec.oid_map,
            upgrade: UpgradeState::new(spec.upgrade),
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// sysUpTime in timeticks (10 ms units) since the actor came up.
    pub fn uptime_ticks(&self) -> u32 {
        (self.uptime_start.elapsed().as_millis() / 10) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_is_monotonic() {
        let state = DeviceState::new(DeviceSpec::new(DeviceType::CableModem, 30000, "public"));
        let first = state.uptime_ticks();
        std::thread::sleep(std::time::Duration::from_millis(25));
        let second = state.uptime_ticks();
        assert!(second >= first);
        assert!(second >= 2, "25ms should be at least 2 ticks");
    }

    #[test]
    fn test_touch_updates_last_activity() {
        let mut state = DeviceState::new(DeviceSpec::new(DeviceType::Router, 30001, "public"));
        let before = state.last_activity;
        std::thread::sleep(std::time::Duration::from_millis(5));
        state.touch();
        assert!(state.last_activity > before);
    }
}
