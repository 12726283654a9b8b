//! DOCSIS firmware-upgrade state machine
//!
//! Cable modems expose four writable OIDs under docsDevSoftware
//! (1.3.6.1.2.1.69.1.3). Writing upgradeFromMgt(1) to docsDevSwAdminStatus
//! triggers an upgrade once the preconditions hold. With a zero phase delay
//! the upgrade completes synchronously in the SET response; with a non-zero
//! delay it walks the phased states and the device actor schedules the
//! transitions.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::UpgradeConfig;
use crate::mib::{Oid, SnmpValue};
use crate::protocol::ErrorStatus;

pub static ADMIN_STATUS_OID: Lazy<Oid> =
    Lazy::new(|| "1.3.6.1.2.1.69.1.3.1.0".parse().expect("admin status OID"));
pub static OPER_STATUS_OID: Lazy<Oid> =
    Lazy::new(|| "1.3.6.1.2.1.69.1.3.2.0".parse().expect("oper status OID"));
pub static SW_SERVER_OID: Lazy<Oid> =
    Lazy::new(|| "1.3.6.1.2.1.69.1.3.3.0".parse().expect("sw server OID"));
pub static SW_FILENAME_OID: Lazy<Oid> =
    Lazy::new(|| "1.3.6.1.2.1.69.1.3.4.0".parse().expect("sw filename OID"));

// docsDevSwAdminStatus values
pub const ADMIN_UPGRADE_FROM_MGT: i64 = 1;
pub const ADMIN_ALLOW_PROVISIONING_UPGRADE: i64 = 2;
pub const ADMIN_IGNORE_PROVISIONING_UPGRADE: i64 = 3;

// docsDevSwOperStatus values
pub const OPER_IN_PROGRESS: i64 = 1;
pub const OPER_COMPLETE_FROM_PROVISIONING: i64 = 2;
pub const OPER_COMPLETE_FROM_MGT: i64 = 3;
pub const OPER_FAILED: i64 = 4;

const MAX_FILENAME_LEN: usize = 64;
const UNKNOWN_FILENAME: &str = "(unknown)";

/// Phases of a firmware upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradePhase {
    Idle,
    CheckingName,
    Downloading,
    Applying,
    Complete,
    Failed,
}

/// Outcome of a SET against one of the writable OIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Value stored; `triggered` is set when AdminStatus=1 started an upgrade.
    Accepted { triggered: bool },
    Rejected(ErrorStatus),
}

/// Effective upgrade settings for one device
#[derive(Debug, Clone, Default)]
pub struct UpgradeSettings {
    pub enabled: bool,
    pub invalid_server: Option<Regex>,
    pub phase_delay: Duration,
}

impl UpgradeSettings {
    pub fn from_config(config: &UpgradeConfig) -> Self {
        let invalid_server = config
            .invalid_server_regex
            .as_deref()
            .filter(|p| !p.is_empty())
            .and_then(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = p, error = %e, "ignoring invalid upgrade server pattern");
                    None
                }
            });

        Self {
            enabled: config.enabled,
            invalid_server,
            phase_delay: config.phase_delay(),
        }
    }
}

/// Per-device firmware-upgrade substate
#[derive(Debug, Clone)]
pub struct UpgradeState {
    settings: UpgradeSettings,
    admin_status: i64,
    oper_status: i64,
    server: Ipv4Addr,
    filename: String,
    phase: UpgradePhase,
    started_at: Option<Instant>,
}

impl UpgradeState {
    pub fn new(settings: UpgradeSettings) -> Self {
        Self {
            settings,
            admin_status: ADMIN_ALLOW_PROVISIONING_UPGRADE,
            oper_status: OPER_COMPLETE_FROM_PROVISIONING,
            server: Ipv4Addr::UNSPECIFIED,
            filename: UNKNOWN_FILENAME.to_string(),
            phase: UpgradePhase::Idle,
            started_at: None,
        }
    }

    pub fn phase(&self) -> UpgradePhase {
        self.phase
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn phase_delay(&self) -> Duration {
        self.settings.phase_delay
    }

    pub fn in_progress(&self) -> bool {
        matches!(
            self.phase,
            UpgradePhase::CheckingName | UpgradePhase::Downloading | UpgradePhase::Applying
        )
    }

    pub fn is_upgrade_oid(oid: &Oid) -> bool {
        oid == &*ADMIN_STATUS_OID
            || oid == &*OPER_STATUS_OID
            || oid == &*SW_SERVER_OID
            || oid == &*SW_FILENAME_OID
    }

    /// Resolves one of the four upgrade OIDs from the live substate.
    pub fn resolve(&self, oid: &Oid) -> Option<SnmpValue> {
        if oid == &*ADMIN_STATUS_OID {
            Some(SnmpValue::Integer(self.admin_status))
        } else if oid == &*OPER_STATUS_OID {
            Some(SnmpValue::Integer(self.oper_status))
        } else if oid == &*SW_SERVER_OID {
            Some(SnmpValue::IpAddress(self.server.octets()))
        } else if oid == &*SW_FILENAME_OID {
            Some(SnmpValue::OctetString(self.filename.as_bytes().to_vec()))
        } else {
            None
        }
    }

    /// Applies a SET to one of the four upgrade OIDs.
    pub fn apply_set(&mut self, oid: &Oid, value: &SnmpValue) -> SetOutcome {
        if oid == &*SW_SERVER_OID {
            self.set_server(value)
        } else if oid == &*SW_FILENAME_OID {
            self.set_filename(value)
        } else if oid == &*OPER_STATUS_OID {
            SetOutcome::Rejected(ErrorStatus::NotWritable)
        } else if oid == &*ADMIN_STATUS_OID {
            self.set_admin_status(value)
        } else {
            SetOutcome::Rejected(ErrorStatus::NoAccess)
        }
    }

    fn set_server(&mut self, value: &SnmpValue) -> SetOutcome {
        let server = match value {
            SnmpValue::IpAddress(octets) => Ipv4Addr::from(*octets),
            SnmpValue::OctetString(bytes) => {
                let text = match std::str::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => return SetOutcome::Rejected(ErrorStatus::WrongValue),
                };
                match text.trim().parse::<Ipv4Addr>() {
                    Ok(addr) => addr,
                    Err(_) => return SetOutcome::Rejected(ErrorStatus::WrongValue),
                }
            }
            _ => return SetOutcome::Rejected(ErrorStatus::WrongType),
        };

        self.server = server;
        SetOutcome::Accepted { triggered: false }
    }

    fn set_filename(&mut self, value: &SnmpValue) -> SetOutcome {
        let bytes = match value {
            SnmpValue::OctetString(bytes) => bytes,
            _ => return SetOutcome::Rejected(ErrorStatus::WrongType),
        };
        if bytes.len() > MAX_FILENAME_LEN {
            return SetOutcome::Rejected(ErrorStatus::WrongLength);
        }

        self.filename = String::from_utf8_lossy(bytes).into_owned();
        SetOutcome::Accepted { triggered: false }
    }

    fn set_admin_status(&mut self, value: &SnmpValue) -> SetOutcome {
        let requested = match value {
            SnmpValue::Integer(v) => *v,
            _ => return SetOutcome::Rejected(ErrorStatus::WrongType),
        };
        if !(ADMIN_UPGRADE_FROM_MGT..=ADMIN_IGNORE_PROVISIONING_UPGRADE).contains(&requested) {
            return SetOutcome::Rejected(ErrorStatus::WrongValue);
        }

        if requested != ADMIN_UPGRADE_FROM_MGT {
            self.admin_status = requested;
            return SetOutcome::Accepted { triggered: false };
        }

        // upgradeFromMgt(1): all preconditions must hold
        if !self.settings.enabled {
            return SetOutcome::Rejected(ErrorStatus::InconsistentValue);
        }
        if self.in_progress() {
            return SetOutcome::Rejected(ErrorStatus::InconsistentValue);
        }
        if self.server.is_unspecified() {
            return SetOutcome::Rejected(ErrorStatus::InconsistentValue);
        }
        if self.filename.is_empty() || self.filename == UNKNOWN_FILENAME {
            return SetOutcome::Rejected(ErrorStatus::InconsistentValue);
        }

        self.trigger();
        SetOutcome::Accepted { triggered: true }
    }

    fn trigger(&mut self) {
        self.started_at = Some(Instant::now());
        self.admin_status = ADMIN_IGNORE_PROVISIONING_UPGRADE;

        let server_text = self.server.to_string();
        if let Some(pattern) = &self.settings.invalid_server {
            if pattern.is_match(&server_text) {
                warn!(server = %server_text, "firmware upgrade rejected by server pattern");
                self.phase = UpgradePhase::Failed;
                self.oper_status = OPER_FAILED;
                return;
            }
        }

        if self.settings.phase_delay.is_zero() {
            info!(server = %server_text, filename = %self.filename, "firmware upgrade completed");
            self.phase = UpgradePhase::Complete;
            self.oper_status = OPER_COMPLETE_FROM_MGT;
        } else {
            info!(server = %server_text, filename = %self.filename, "firmware upgrade started");
            self.phase = UpgradePhase::CheckingName;
            self.oper_status = OPER_IN_PROGRESS;
        }
    }

    /// Advances one phase of a running upgrade.
    ///
    /// Returns true while more phases remain, so the device actor knows to
    /// schedule another transition.
    pub fn advance_phase(&mut self) -> bool {
        self.phase = match self.phase {
            UpgradePhase::CheckingName => UpgradePhase::Downloading,
            UpgradePhase::Downloading => UpgradePhase::Applying,
            UpgradePhase::Applying => {
                self.oper_status = OPER_COMPLETE_FROM_MGT;
                debug!("firmware upgrade phases complete");
                UpgradePhase::Complete
            }
            other => other,
        };
        self.in_progress()
    }
}
