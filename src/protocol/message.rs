//! SNMP message and PDU codec (v1 and v2c)

use bytes::Bytes;

use super::ber::{self, BerReader, BerWriter};
use crate::mib::{Oid, SnmpValue, VarBind};
use crate::{Error, Result};

/// SNMP protocol version as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl SnmpVersion {
    pub fn wire_value(self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }

    pub fn from_wire(value: i64) -> Result<Self> {
        match value {
            0 => Ok(SnmpVersion::V1),
            1 => Ok(SnmpVersion::V2c),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }
}

/// SNMP PDU types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    GetResponse,
    SetRequest,
    GetBulkRequest,
    Report,
}

impl PduType {
    pub fn tag(self) -> u8 {
        match self {
            PduType::GetRequest => ber::TAG_GET_REQUEST,
            PduType::GetNextRequest => ber::TAG_GET_NEXT_REQUEST,
            PduType::GetResponse => ber::TAG_GET_RESPONSE,
            PduType::SetRequest => ber::TAG_SET_REQUEST,
            PduType::GetBulkRequest => ber::TAG_GET_BULK_REQUEST,
            PduType::Report => ber::TAG_REPORT,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            ber::TAG_GET_REQUEST => Ok(PduType::GetRequest),
            ber::TAG_GET_NEXT_REQUEST => Ok(PduType::GetNextRequest),
            ber::TAG_GET_RESPONSE => Ok(PduType::GetResponse),
            ber::TAG_SET_REQUEST => Ok(PduType::SetRequest),
            ber::TAG_GET_BULK_REQUEST => Ok(PduType::GetBulkRequest),
            ber::TAG_REPORT => Ok(PduType::Report),
            other => Err(Error::protocol(format!(
                "unknown PDU tag 0x{:02X}",
                other
            ))),
        }
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            PduType::GetRequest
                | PduType::GetNextRequest
                | PduType::SetRequest
                | PduType::GetBulkRequest
        )
    }
}

/// SNMP error status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    NoError = 0,
    TooBig = 1,
    NoSuchName = 2,
    BadValue = 3,
    ReadOnly = 4,
    GenErr = 5,
    NoAccess = 6,
    WrongType = 7,
    WrongLength = 8,
    WrongEncoding = 9,
    WrongValue = 10,
    NoCreation = 11,
    InconsistentValue = 12,
    ResourceUnavailable = 13,
    CommitFailed = 14,
    UndoFailed = 15,
    AuthorizationError = 16,
    NotWritable = 17,
    InconsistentName = 18,
}

impl ErrorStatus {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Result<Self> {
        Ok(match code {
            0 => ErrorStatus::NoError,
            1 => ErrorStatus::TooBig,
            2 => ErrorStatus::NoSuchName,
            3 => ErrorStatus::BadValue,
            4 => ErrorStatus::ReadOnly,
            5 => ErrorStatus::GenErr,
            6 => ErrorStatus::NoAccess,
            7 => ErrorStatus::WrongType,
            8 => ErrorStatus::WrongLength,
            9 => ErrorStatus::WrongEncoding,
            10 => ErrorStatus::WrongValue,
            11 => ErrorStatus::NoCreation,
            12 => ErrorStatus::InconsistentValue,
            13 => ErrorStatus::ResourceUnavailable,
            14 => ErrorStatus::CommitFailed,
            15 => ErrorStatus::UndoFailed,
            16 => ErrorStatus::AuthorizationError,
            17 => ErrorStatus::NotWritable,
            18 => ErrorStatus::InconsistentName,
            other => {
                return Err(Error::protocol(format!(
                    "unknown error-status code {}",
                    other
                )))
            }
        })
    }
}

/// SNMP PDU
///
/// For GETBULK the wire reuses the error fields: the third integer is
/// non_repeaters and the fourth max_repetitions. Both views are kept as
/// separate fields and the codec picks the right pair per PDU type.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i32,
    pub error_status: ErrorStatus,
    pub error_index: u32,
    pub non_repeaters: u32,
    pub max_repetitions: u32,
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    pub fn request(pdu_type: PduType, request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type,
            request_id,
            error_status: ErrorStatus::NoError,
            error_index: 0,
            non_repeaters: 0,
            max_repetitions: 0,
            varbinds,
        }
    }

    pub fn get_bulk(
        request_id: i32,
        non_repeaters: u32,
        max_repetitions: u32,
        varbinds: Vec<VarBind>,
    ) -> Self {
        Self {
            pdu_type: PduType::GetBulkRequest,
            request_id,
            error_status: ErrorStatus::NoError,
            error_index: 0,
            non_repeaters,
            max_repetitions,
            varbinds,
        }
    }

    pub fn response(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type: PduType::GetResponse,
            request_id,
            error_status: ErrorStatus::NoError,
            error_index: 0,
            non_repeaters: 0,
            max_repetitions: 0,
            varbinds,
        }
    }

    pub fn error_response(
        request_id: i32,
        error_status: ErrorStatus,
        error_index: u32,
        varbinds: Vec<VarBind>,
    ) -> Self {
        Self {
            pdu_type: PduType::GetResponse,
            request_id,
            error_status,
            error_index,
            non_repeaters: 0,
            max_repetitions: 0,
            varbinds,
        }
    }
}

/// SNMP request/response message
#[derive(Debug, Clone, PartialEq)]
pub struct SnmpMessage {
    pub version: SnmpVersion,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

impl SnmpMessage {
    pub fn new(version: SnmpVersion, community: impl Into<Vec<u8>>, pdu: Pdu) -> Self {
        Self {
            version,
            community: community.into(),
            pdu,
        }
    }

    /// Builds the response message for this request, echoing version,
    /// community and request id.
    pub fn response_with(&self, pdu: Pdu) -> Self {
        Self {
            version: self.version,
            community: self.community.clone(),
            pdu,
        }
    }

    /// Decodes a BER-encoded SNMP message.
    ///
    /// SNMPv3 and other unknown versions are rejected with
    /// [`Error::UnsupportedVersion`]; callers silently drop those packets.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = BerReader::new(bytes);
        let envelope = reader.expect(ber::TAG_SEQUENCE)?;

        let mut msg = BerReader::new(envelope);
        let version = SnmpVersion::from_wire(msg.read_integer()?)?;
        let community = msg.read_octet_string()?.to_vec();

        let (pdu_tag, pdu_content) = msg.read_tlv()?;
        let pdu_type = PduType::from_tag(pdu_tag)?;

        let mut body = BerReader::new(pdu_content);
        let request_id = body.read_integer()?;
        if request_id < i64::from(i32::MIN) || request_id > i64::from(i32::MAX) {
            return Err(Error::protocol("request-id out of range"));
        }

        let third = body.read_integer()?;
        let fourth = body.read_integer()?;
        if !(0..=i64::from(u32::MAX)).contains(&third)
            || !(0..=i64::from(u32::MAX)).contains(&fourth)
        {
            return Err(Error::protocol("PDU error fields out of range"));
        }

        let (error_status, error_index, non_repeaters, max_repetitions) =
            if pdu_type == PduType::GetBulkRequest {
                (ErrorStatus::NoError, 0, third as u32, fourth as u32)
            } else {
                (ErrorStatus::from_code(third)?, fourth as u32, 0, 0)
            };

        let varbind_content = body.expect(ber::TAG_SEQUENCE)?;
        let mut varbinds = Vec::new();
        let mut list = BerReader::new(varbind_content);
        while !list.is_empty() {
            let entry = list.expect(ber::TAG_SEQUENCE)?;
            let mut vb = BerReader::new(entry);
            let oid = vb.read_oid()?;
            let (value_tag, value_content) = vb.read_tlv()?;
            let value = decode_value(value_tag, value_content)?;
            varbinds.push(VarBind::new(oid, value));
        }

        Ok(SnmpMessage {
            version,
            community,
            pdu: Pdu {
                pdu_type,
                request_id: request_id as i32,
                error_status,
                error_index,
                non_repeaters,
                max_repetitions,
                varbinds,
            },
        })
    }

    /// BER-encodes this message.
    pub fn encode(&self) -> Result<Bytes> {
        let mut varbind_list = BerWriter::new();
        for varbind in &self.pdu.varbinds {
            let mut entry = BerWriter::new();
            entry.push_oid(&varbind.oid)?;
            encode_value(&mut entry, &varbind.value)?;
            varbind_list.push_constructed(ber::TAG_SEQUENCE, entry);
        }

        let mut body = BerWriter::new();
        body.push_integer(i64::from(self.pdu.request_id));
        if self.pdu.pdu_type == PduType::GetBulkRequest {
            body.push_integer(i64::from(self.pdu.non_repeaters));
            body.push_integer(i64::from(self.pdu.max_repetitions));
        } else {
            body.push_integer(self.pdu.error_status.code());
            body.push_integer(i64::from(self.pdu.error_index));
        }
        body.push_constructed(ber::TAG_SEQUENCE, varbind_list);

        let mut msg = BerWriter::new();
        msg.push_integer(self.version.wire_value());
        msg.push_octet_string(&self.community);
        msg.push_constructed(self.pdu.pdu_type.tag(), body);

        let mut out = BerWriter::new();
        out.push_constructed(ber::TAG_SEQUENCE, msg);
        Ok(out.finish())
    }
}

fn decode_value(tag: u8, content: &[u8]) -> Result<SnmpValue> {
    Ok(match tag {
        ber::TAG_INTEGER => SnmpValue::Integer(ber::decode_integer(content)?),
        ber::TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        ber::TAG_NULL => SnmpValue::Null,
        ber::TAG_OBJECT_IDENTIFIER => SnmpValue::ObjectId(ber::decode_oid(content)?),
        ber::TAG_IPADDRESS => {
            let octets: [u8; 4] = content
                .try_into()
                .map_err(|_| Error::protocol("IpAddress must be 4 octets"))?;
            SnmpValue::IpAddress(octets)
        }
        ber::TAG_COUNTER32 => SnmpValue::Counter32(unsigned32(content)?),
        ber::TAG_GAUGE32 => SnmpValue::Gauge32(unsigned32(content)?),
        ber::TAG_TIMETICKS => SnmpValue::TimeTicks(unsigned32(content)?),
        ber::TAG_OPAQUE => SnmpValue::Opaque(content.to_vec()),
        ber::TAG_COUNTER64 => SnmpValue::Counter64(ber::decode_unsigned(content)?),
        ber::TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        ber::TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        ber::TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => {
            return Err(Error::protocol(format!(
                "unknown value tag 0x{:02X}",
                other
            )))
        }
    })
}

fn unsigned32(content: &[u8]) -> Result<u32> {
    let value = ber::decode_unsigned(content)?;
    u32::try_from(value).map_err(|_| Error::protocol("unsigned value exceeds 32 bits"))
}

fn encode_value(writer: &mut BerWriter, value: &SnmpValue) -> Result<()> {
    match value {
        SnmpValue::Integer(v) => writer.push_integer(*v),
        SnmpValue::OctetString(bytes) => writer.push_octet_string(bytes),
        SnmpValue::Null => writer.push_null(),
        SnmpValue::ObjectId(oid) => writer.push_oid(oid)?,
        SnmpValue::IpAddress(octets) => writer.push_ipaddress(*octets),
        SnmpValue::Counter32(v) => writer.push_unsigned(ber::TAG_COUNTER32, u64::from(*v)),
        SnmpValue::Gauge32(v) => writer.push_unsigned(ber::TAG_GAUGE32, u64::from(*v)),
        SnmpValue::TimeTicks(v) => writer.push_unsigned(ber::TAG_TIMETICKS, u64::from(*v)),
        SnmpValue::Opaque(bytes) => writer.push_tlv(ber::TAG_OPAQUE, bytes),
        SnmpValue::Counter64(v) => writer.push_unsigned(ber::TAG_COUNTER64, *v),
        SnmpValue::NoSuchObject => writer.push_exception(ber::TAG_NO_SUCH_OBJECT),
        SnmpValue::NoSuchInstance => writer.push_exception(ber::TAG_NO_SUCH_INSTANCE),
        SnmpValue::EndOfMibView => writer.push_exception(ber::TAG_END_OF_MIB_VIEW),
    }
    Ok(())
}
