//! SNMP wire protocol: BER primitives and the message codec

pub mod ber;
pub mod message;

pub use message::{ErrorStatus, Pdu, PduType, SnmpMessage, SnmpVersion};
