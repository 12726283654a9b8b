//! SNMP PDU processor
//!
//! Runs GET, GETNEXT, GETBULK and SET against a device's dynamic state,
//! its optional per-device overlay and the shared profile tree. Every valid
//! request yields a GetResponse; terminal walk conditions are reported as
//! in-band exception values mapped per protocol version.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::trace;

use crate::devices::state::DeviceState;
use crate::mib::{DeviceType, Oid, ProfileRegistry, SnmpValue, VarBind};
use crate::protocol::{ErrorStatus, Pdu, PduType, SnmpMessage, SnmpVersion};

use super::upgrade::{SetOutcome, UpgradeState};

static SYS_UPTIME_OID: Lazy<Oid> =
    Lazy::new(|| "1.3.6.1.2.1.1.3.0".parse().expect("sysUpTime OID"));

/// Why a walk could not continue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalCondition {
    PastEndOfMib,
    MissingValue,
    InvalidStartOid,
}

/// Maps a terminal walk condition to the in-band exception for `version`.
///
/// v1 predates the v2c exception values, so the closest "no such datum"
/// carriers are used while the response error-status stays 0.
pub fn terminal_exception(version: SnmpVersion, condition: TerminalCondition) -> SnmpValue {
    match (version, condition) {
        (SnmpVersion::V1, TerminalCondition::PastEndOfMib) => SnmpValue::NoSuchObject,
        (SnmpVersion::V2c, TerminalCondition::PastEndOfMib) => SnmpValue::EndOfMibView,
        (SnmpVersion::V1, TerminalCondition::MissingValue) => SnmpValue::NoSuchInstance,
        (SnmpVersion::V2c, TerminalCondition::MissingValue) => SnmpValue::NoSuchObject,
        (SnmpVersion::V1, TerminalCondition::InvalidStartOid) => SnmpValue::NoSuchObject,
        (SnmpVersion::V2c, TerminalCondition::InvalidStartOid) => SnmpValue::NoSuchObject,
    }
}

enum NextOutcome {
    Found(Oid),
    EndOfMib,
    InvalidStart,
}

/// Stateless PDU engine shared by all device actors
pub struct PduProcessor {
    registry: Arc<ProfileRegistry>,
    bulk_cap: u32,
}

impl PduProcessor {
    pub fn new(registry: Arc<ProfileRegistry>, bulk_cap: u32) -> Self {
        Self { registry, bulk_cap }
    }

    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.registry
    }

    /// Processes one request against the device, producing the response.
    pub fn process(&self, request: &SnmpMessage, state: &mut DeviceState) -> SnmpMessage {
        let pdu = match request.pdu.pdu_type {
            PduType::GetRequest => self.handle_get(request, state),
            PduType::GetNextRequest => self.handle_get_next(request, state),
            PduType::GetBulkRequest => self.handle_get_bulk(request, state),
            PduType::SetRequest => self.handle_set(request, state),
            other => {
                trace!(pdu_type = ?other, "non-request PDU, answering genErr");
                Pdu::error_response(
                    request.pdu.request_id,
                    ErrorStatus::GenErr,
                    0,
                    request.pdu.varbinds.clone(),
                )
            }
        };
        request.response_with(pdu)
    }

    /// Resolves a single OID against the device (spec order: dynamic
    /// counters, gauges, uptime, upgrade substate, overlay, shared profile).
    pub fn resolve_value(&self, state: &DeviceState, oid: &Oid) -> Option<SnmpValue> {
        if let Some(value) = state.counters.get(oid) {
            return Some(SnmpValue::Counter32(*value));
        }
        if let Some(value) = state.gauges.get(oid) {
            return Some(SnmpValue::Gauge32(*value));
        }
        if oid == &*SYS_UPTIME_OID {
            return Some(SnmpValue::TimeTicks(state.uptime_ticks()));
        }
        if state.device_type == DeviceType::CableModem && UpgradeState::is_upgrade_oid(oid) {
            if let Some(value) = state.upgrade.resolve(oid) {
                return Some(value);
            }
        }
        if let Some(overlay) = &state.oid_map {
            if let Some(entry) = overlay.get(oid) {
                return Some(entry.value.clone());
            }
        }
        self.registry
            .get_oid_value(&state.device_type, oid)
            .ok()
            .flatten()
    }

    /// Collects every entry under `root` in lexicographic order.
    pub fn walk_subtree(&self, state: &DeviceState, root: &Oid) -> Vec<VarBind> {
        let mut varbinds = Vec::new();
        let mut cursor = root.clone();

        while let NextOutcome::Found(next) = self.next_of(state, &cursor) {
            if !next.starts_with(root) {
                break;
            }
            if let Some(value) = self.resolve_value(state, &next) {
                varbinds.push(VarBind::new(next.clone(), value));
            }
            cursor = next;
        }
        varbinds
    }

    fn next_of(&self, state: &DeviceState, oid: &Oid) -> NextOutcome {
        if let Some(overlay) = &state.oid_map {
            return match overlay.get_next(oid) {
                Some((next, _)) => NextOutcome::Found(next),
                None => NextOutcome::EndOfMib,
            };
        }
        match self.registry.get_next_oid(&state.device_type, oid) {
            Ok(Some((next, _))) => NextOutcome::Found(next),
            Ok(None) => NextOutcome::EndOfMib,
            Err(_) => NextOutcome::InvalidStart,
        }
    }

    fn handle_get(&self, request: &SnmpMessage, state: &mut DeviceState) -> Pdu {
        let mut varbinds = Vec::with_capacity(request.pdu.varbinds.len());
        let mut first_exception: Option<u32> = None;

        for (index, requested) in request.pdu.varbinds.iter().enumerate() {
            let value = match self.resolve_value(state, &requested.oid) {
                Some(value) => value,
                None => {
                    if first_exception.is_none() {
                        first_exception = Some(index as u32 + 1);
                    }
                    SnmpValue::NoSuchObject
                }
            };
            varbinds.push(VarBind::new(requested.oid.clone(), value));
        }

        match first_exception {
            Some(index) => Pdu::error_response(
                request.pdu.request_id,
                ErrorStatus::NoSuchName,
                index,
                varbinds,
            ),
            None => Pdu::response(request.pdu.request_id, varbinds),
        }
    }

    fn handle_get_next(&self, request: &SnmpMessage, state: &mut DeviceState) -> Pdu {
        let varbinds = request
            .pdu
            .varbinds
            .iter()
            .map(|requested| self.next_varbind(request.version, state, &requested.oid))
            .collect();
        Pdu::response(request.pdu.request_id, varbinds)
    }

    fn next_varbind(&self, version: SnmpVersion, state: &DeviceState, oid: &Oid) -> VarBind {
        match self.next_of(state, oid) {
            NextOutcome::Found(next) => match self.resolve_value(state, &next) {
                Some(value) => VarBind::new(next, value),
                None => VarBind::new(
                    next,
                    terminal_exception(version, TerminalCondition::MissingValue),
                ),
            },
            NextOutcome::EndOfMib => VarBind::new(
                oid.clone(),
                terminal_exception(version, TerminalCondition::PastEndOfMib),
            ),
            NextOutcome::InvalidStart => VarBind::new(
                oid.clone(),
                terminal_exception(version, TerminalCondition::InvalidStartOid),
            ),
        }
    }

    fn handle_get_bulk(&self, request: &SnmpMessage, state: &mut DeviceState) -> Pdu {
        // A v1 GETBULK is malformed but observed in the wild; it degrades
        // to a plain GETNEXT per varbind with v1 terminal semantics.
        if request.version == SnmpVersion::V1 {
            return self.handle_get_next(request, state);
        }

        let cap = request.pdu.max_repetitions.min(self.bulk_cap) as usize;
        let split = (request.pdu.non_repeaters as usize).min(request.pdu.varbinds.len());
        let (non_repeaters, repeaters) = request.pdu.varbinds.split_at(split);

        let mut varbinds: Vec<VarBind> = non_repeaters
            .iter()
            .map(|requested| self.next_varbind(request.version, state, &requested.oid))
            .collect();

        for repeater in repeaters {
            let mut cursor = repeater.oid.clone();
            let mut collected = 0usize;

            while collected < cap {
                match self.next_of(state, &cursor) {
                    NextOutcome::Found(next) => {
                        let value = match self.resolve_value(state, &next) {
                            Some(value) => value,
                            None => terminal_exception(
                                request.version,
                                TerminalCondition::MissingValue,
                            ),
                        };
                        varbinds.push(VarBind::new(next.clone(), value));
                        cursor = next;
                        collected += 1;
                    }
                    NextOutcome::EndOfMib | NextOutcome::InvalidStart => break,
                }
            }

            if collected == 0 {
                let exception =
                    terminal_exception(request.version, TerminalCondition::PastEndOfMib);
                for _ in 0..cap {
                    varbinds.push(VarBind::new(repeater.oid.clone(), exception.clone()));
                }
            }
        }

        Pdu::response(request.pdu.request_id, varbinds)
    }

    fn handle_set(&self, request: &SnmpMessage, state: &mut DeviceState) -> Pdu {
        let echoed = request.pdu.varbinds.clone();

        if state.device_type != DeviceType::CableModem {
            return Pdu::error_response(
                request.pdu.request_id,
                ErrorStatus::ReadOnly,
                1,
                echoed,
            );
        }

        for (index, varbind) in request.pdu.varbinds.iter().enumerate() {
            if !UpgradeState::is_upgrade_oid(&varbind.oid) {
                return Pdu::error_response(
                    request.pdu.request_id,
                    ErrorStatus::ReadOnly,
                    1,
                    echoed,
                );
            }

            match state.upgrade.apply_set(&varbind.oid, &varbind.value) {
                SetOutcome::Accepted { .. } => {}
                SetOutcome::Rejected(status) => {
                    return Pdu::error_response(
                        request.pdu.request_id,
                        status,
                        index as u32 + 1,
                        echoed,
                    );
                }
            }
        }

        Pdu::response(request.pdu.request_id, echoed)
    }
}
