//! SNMP value types and variable bindings

use std::fmt;

use super::oid::Oid;

/// SNMP data types
///
/// The last three variants are the v2c in-band exception values. They carry
/// no payload on the wire and never appear in a loaded MIB tree; the PDU
/// processor inserts them into responses.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }

    /// Type label in walk-file notation.
    pub fn type_name(&self) -> &'static str {
        match self {
            SnmpValue::Integer(_) => "INTEGER",
            SnmpValue::OctetString(_) => "STRING",
            SnmpValue::Null => "NULL",
            SnmpValue::ObjectId(_) => "OID",
            SnmpValue::IpAddress(_) => "IpAddress",
            SnmpValue::Counter32(_) => "Counter32",
            SnmpValue::Gauge32(_) => "Gauge32",
            SnmpValue::TimeTicks(_) => "Timeticks",
            SnmpValue::Opaque(_) => "Opaque",
            SnmpValue::Counter64(_) => "Counter64",
            SnmpValue::NoSuchObject => "noSuchObject",
            SnmpValue::NoSuchInstance => "noSuchInstance",
            SnmpValue::EndOfMibView => "endOfMibView",
        }
    }
}

impl fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpValue::Integer(v) => write!(f, "{}", v),
            SnmpValue::OctetString(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => write!(f, "{}", s),
                Err(_) => write!(f, "{}", hex::encode_upper(bytes)),
            },
            SnmpValue::Null => write!(f, "NULL"),
            SnmpValue::ObjectId(oid) => write!(f, "{}", oid),
            SnmpValue::IpAddress(octets) => write!(
                f,
                "{}.{}.{}.{}",
                octets[0], octets[1], octets[2], octets[3]
            ),
            SnmpValue::Counter32(v) => write!(f, "{}", v),
            SnmpValue::Gauge32(v) => write!(f, "{}", v),
            SnmpValue::TimeTicks(v) => write!(f, "({})", v),
            SnmpValue::Opaque(bytes) => write!(f, "{}", hex::encode_upper(bytes)),
            SnmpValue::Counter64(v) => write!(f, "{}", v),
            SnmpValue::NoSuchObject => write!(f, "noSuchObject"),
            SnmpValue::NoSuchInstance => write!(f, "noSuchInstance"),
            SnmpValue::EndOfMibView => write!(f, "endOfMibView"),
        }
    }
}

/// MIB variable binding
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: Oid, value: SnmpValue) -> Self {
        Self { oid, value }
    }

    pub fn null(oid: Oid) -> Self {
        Self {
            oid,
            value: SnmpValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_values() {
        assert!(SnmpValue::NoSuchObject.is_exception());
        assert!(SnmpValue::NoSuchInstance.is_exception());
        assert!(SnmpValue::EndOfMibView.is_exception());
        assert!(!SnmpValue::Null.is_exception());
        assert!(!SnmpValue::Integer(3).is_exception());
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(SnmpValue::Integer(-12).to_string(), "-12");
        assert_eq!(
            SnmpValue::OctetString(b"Motorola SB6141".to_vec()).to_string(),
            "Motorola SB6141"
        );
        assert_eq!(SnmpValue::IpAddress([10, 0, 0, 1]).to_string(), "10.0.0.1");
        assert_eq!(SnmpValue::TimeTicks(12345).to_string(), "(12345)");
    }
}
