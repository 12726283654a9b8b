//! PDU processing engine: SNMP semantics and the firmware-upgrade machine

pub mod processor;
pub mod upgrade;

pub use processor::{terminal_exception, PduProcessor, TerminalCondition};
pub use upgrade::{SetOutcome, UpgradePhase, UpgradeSettings, UpgradeState};
