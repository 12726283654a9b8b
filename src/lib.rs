//! snmpsim - High-scale SNMP device simulator
//!
//! Impersonates thousands of distinct network devices (cable modems, CMTS,
//! routers, switches) on real UDP ports, serving SNMPv1 and SNMPv2c GET,
//! GETNEXT, GETBULK and SET requests from recorded walk data or programmatic
//! device profiles.

pub mod config;
pub mod core;
pub mod mib;
pub mod protocol;
pub mod engine;
pub mod devices;
pub mod services;
pub mod server;
pub mod error;
pub mod utils;

pub use error::{Error, Result};

/// Simulator version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
