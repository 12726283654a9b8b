//! Device actor: one task per simulated device
//!
//! The actor owns its `DeviceState` outright and drains a FIFO mailbox, so
//! every mutation is serialized without locks. Workers talk to it through a
//! cloneable `DeviceHandle` and wait on oneshot replies bounded by the
//! request deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::engine::PduProcessor;
use crate::mib::{DeviceType, Oid, SnmpValue, VarBind};
use crate::protocol::{Pdu, PduType, SnmpMessage, SnmpVersion};
use crate::services::resources::ResourceManager;
use crate::services::telemetry::{DestroyReason, TelemetryEvent, TelemetryHandle};
use crate::{Error, Result};

use super::state::{DeviceSpec, DeviceState};

const MAILBOX_DEPTH: usize = 64;

/// Messages a device actor understands
#[derive(Debug)]
pub enum DeviceCommand {
    HandlePdu {
        request: SnmpMessage,
        respond_to: oneshot::Sender<SnmpMessage>,
    },
    Get {
        oid: Oid,
        respond_to: oneshot::Sender<Option<SnmpValue>>,
    },
    GetNext {
        oid: Oid,
        respond_to: oneshot::Sender<Option<VarBind>>,
    },
    Walk {
        root: Oid,
        respond_to: oneshot::Sender<Vec<VarBind>>,
    },
    AdjustCounter {
        oid: Oid,
        delta: u32,
    },
    SetGauge {
        oid: Oid,
        value: u32,
    },
    FinishUpgrade,
    Stop {
        reason: DestroyReason,
    },
}

/// Cloneable handle to a running device actor
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    device_id: Uuid,
    device_type: DeviceType,
    udp_port: u16,
    community: String,
    tx: mpsc::Sender<DeviceCommand>,
    // Milliseconds since `anchor` of the last processed request
    last_activity_ms: Arc<AtomicU64>,
    anchor: Instant,
}

impl DeviceHandle {
    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    pub fn device_type(&self) -> &DeviceType {
        &self.device_type
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn community(&self) -> &str {
        &self.community
    }

    /// Time since the actor last processed a request.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.anchor.elapsed().saturating_sub(last)
    }

    /// Sends a PDU to the actor and waits for the response within `deadline`.
    pub async fn handle_pdu(
        &self,
        request: SnmpMessage,
        deadline: Duration,
    ) -> Result<SnmpMessage> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(DeviceCommand::HandlePdu {
                request,
                respond_to,
            })
            .await
            .map_err(|_| Error::device("device actor is gone"))?;

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::device("device actor dropped the request")),
            Err(_) => Err(Error::timeout("device did not respond before deadline")),
        }
    }

    pub async fn get(&self, oid: Oid) -> Result<Option<SnmpValue>> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(DeviceCommand::Get { oid, respond_to })
            .await
            .map_err(|_| Error::device("device actor is gone"))?;
        response
            .await
            .map_err(|_| Error::device("device actor dropped the request"))
    }

    pub async fn get_next(&self, oid: Oid) -> Result<Option<VarBind>> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(DeviceCommand::GetNext { oid, respond_to })
            .await
            .map_err(|_| Error::device("device actor is gone"))?;
        response
            .await
            .map_err(|_| Error::device("device actor dropped the request"))
    }

    pub async fn walk(&self, root: Oid) -> Result<Vec<VarBind>> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(DeviceCommand::Walk { root, respond_to })
            .await
            .map_err(|_| Error::device("device actor is gone"))?;
        response
            .await
            .map_err(|_| Error::device("device actor dropped the request"))
    }

    pub async fn adjust_counter(&self, oid: Oid, delta: u32) -> Result<()> {
        self.tx
            .send(DeviceCommand::AdjustCounter { oid, delta })
            .await
            .map_err(|_| Error::device("device actor is gone"))
    }

    pub async fn set_gauge(&self, oid: Oid, value: u32) -> Result<()> {
        self.tx
            .send(DeviceCommand::SetGauge { oid, value })
            .await
            .map_err(|_| Error::device("device actor is gone"))
    }

    /// Asks the actor to shut down; in-flight requests ahead in the mailbox
    /// still finish first.
    pub async fn stop(&self, reason: DestroyReason) {
        let _ = self.tx.send(DeviceCommand::Stop { reason }).await;
    }
}

/// Spawns a device actor and returns its handle.
///
/// Admission is checked against the resource manager before the task is
/// spawned; the actor unregisters itself when its task exits for any reason.
pub fn spawn_device(
    spec: DeviceSpec,
    processor: Arc<PduProcessor>,
    resources: Arc<ResourceManager>,
    telemetry: TelemetryHandle,
) -> Result<DeviceHandle> {
    let state = DeviceState::new(spec);
    resources.try_register(state.device_id, state.device_type.clone(), state.udp_port)?;

    let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);

    let handle = DeviceHandle {
        device_id: state.device_id,
        device_type: state.device_type.clone(),
        udp_port: state.udp_port,
        community: state.community.clone(),
        tx: tx.clone(),
        last_activity_ms: Arc::new(AtomicU64::new(0)),
        anchor: Instant::now(),
    };

    telemetry.emit(TelemetryEvent::DeviceCreated {
        device_id: state.device_id,
        device_type: state.device_type.clone(),
        udp_port: state.udp_port,
    });

    let actor = DeviceActor {
        state,
        processor,
        resources,
        telemetry,
        self_tx: tx,
        last_activity_ms: Arc::clone(&handle.last_activity_ms),
        anchor: handle.anchor,
        upgrade_timer_armed: false,
    };
    tokio::spawn(actor.run(rx));

    Ok(handle)
}

struct DeviceActor {
    state: DeviceState,
    processor: Arc<PduProcessor>,
    resources: Arc<ResourceManager>,
    telemetry: TelemetryHandle,
    self_tx: mpsc::Sender<DeviceCommand>,
    last_activity_ms: Arc<AtomicU64>,
    anchor: Instant,
    upgrade_timer_armed: bool,
}

impl DeviceActor {
    async fn run(mut self, mut rx: mpsc::Receiver<DeviceCommand>) {
        debug!(
            device_id = %self.state.device_id,
            device_type = %self.state.device_type,
            udp_port = self.state.udp_port,
            "device actor started"
        );

        let mut destroy_reason = DestroyReason::Crashed;
        while let Some(command) = rx.recv().await {
            match command {
                DeviceCommand::HandlePdu {
                    request,
                    respond_to,
                } => {
                    self.touch();
                    let started = Instant::now();
                    let response = self.processor.process(&request, &mut self.state);
                    self.maybe_arm_upgrade_timer();

                    let delivered = respond_to.send(response).is_ok();
                    self.telemetry.emit(TelemetryEvent::Request {
                        udp_port: self.state.udp_port,
                        pdu_type: pdu_type_label(&request),
                        duration_us: started.elapsed().as_micros() as u64,
                        success: delivered,
                    });
                }
                DeviceCommand::Get { oid, respond_to } => {
                    self.touch();
                    let value = self.processor.resolve_value(&self.state, &oid);
                    let _ = respond_to.send(value);
                }
                DeviceCommand::GetNext { oid, respond_to } => {
                    self.touch();
                    let request = SnmpMessage::new(
                        SnmpVersion::V2c,
                        self.state.community.as_bytes().to_vec(),
                        Pdu::request(PduType::GetNextRequest, 0, vec![VarBind::null(oid)]),
                    );
                    let response = self.processor.process(&request, &mut self.state);
                    let varbind = response
                        .pdu
                        .varbinds
                        .into_iter()
                        .next()
                        .filter(|vb| !vb.value.is_exception());
                    let _ = respond_to.send(varbind);
                }
                DeviceCommand::Walk { root, respond_to } => {
                    self.touch();
                    let varbinds = self.processor.walk_subtree(&self.state, &root);
                    let _ = respond_to.send(varbinds);
                }
                DeviceCommand::AdjustCounter { oid, delta } => {
                    let counter = self.state.counters.entry(oid).or_insert(0);
                    *counter = counter.wrapping_add(delta);
                }
                DeviceCommand::SetGauge { oid, value } => {
                    self.state.gauges.insert(oid, value);
                }
                DeviceCommand::FinishUpgrade => {
                    self.upgrade_timer_armed = false;
                    if self.state.upgrade.advance_phase() {
                        self.maybe_arm_upgrade_timer();
                    } else {
                        trace!(device_id = %self.state.device_id, "firmware upgrade settled");
                    }
                }
                DeviceCommand::Stop { reason } => {
                    destroy_reason = reason;
                    break;
                }
            }
        }

        if destroy_reason == DestroyReason::Crashed {
            // Loop ended without an explicit stop
            warn!(device_id = %self.state.device_id, "device mailbox closed unexpectedly");
        }

        self.resources.unregister(self.state.device_id);
        self.telemetry.emit(TelemetryEvent::DeviceDestroyed {
            device_id: self.state.device_id,
            device_type: self.state.device_type.clone(),
            udp_port: self.state.udp_port,
            reason: destroy_reason,
        });
        debug!(device_id = %self.state.device_id, "device actor stopped");
    }

    fn touch(&mut self) {
        self.state.touch();
        self.last_activity_ms
            .store(self.anchor.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Schedules the deferred upgrade phase transition when a phased
    /// upgrade is running and no timer is already pending.
    fn maybe_arm_upgrade_timer(&mut self) {
        if self.upgrade_timer_armed || !self.state.upgrade.in_progress() {
            return;
        }
        let delay = self.state.upgrade.phase_delay();
        if delay.is_zero() {
            return;
        }

        self.upgrade_timer_armed = true;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DeviceCommand::FinishUpgrade).await;
        });
    }
}

fn pdu_type_label(request: &SnmpMessage) -> &'static str {
    match request.pdu.pdu_type {
        PduType::GetRequest => "get",
        PduType::GetNextRequest => "get_next",
        PduType::GetBulkRequest => "get_bulk",
        PduType::SetRequest => "set",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceConfig, TelemetryConfig};
    use crate::engine::UpgradeSettings;
    use crate::mib::{ManualValue, ProfileRegistry};
    use crate::protocol::{ErrorStatus, Pdu, PduType, SnmpVersion};
    use crate::services::telemetry::TelemetryService;
    use std::collections::HashMap;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn test_fixture() -> (Arc<PduProcessor>, Arc<ResourceManager>, TelemetryHandle) {
        let registry = ProfileRegistry::new();
        let mut spec = HashMap::new();
        spec.insert(
            "1.3.6.1.2.1.1.1.0".to_string(),
            ManualValue::Text("Motorola SB6141".to_string()),
        );
        spec.insert("1.3.6.1.2.1.1.5.0".to_string(), ManualValue::Text("cm1".into()));
        registry
            .load_manual(DeviceType::CableModem, &spec)
            .unwrap();

        let telemetry = TelemetryService::new(TelemetryConfig::default())
            .unwrap()
            .handle();
        let resources = Arc::new(ResourceManager::new(
            ResourceConfig::default(),
            telemetry.clone(),
        ));
        (
            Arc::new(PduProcessor::new(Arc::new(registry), 50)),
            resources,
            telemetry,
        )
    }

    fn modem_spec(port: u16) -> DeviceSpec {
        DeviceSpec::new(DeviceType::CableModem, port, "public").with_upgrade(UpgradeSettings {
            enabled: true,
            invalid_server: None,
            phase_delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_actor_answers_get() {
        let (processor, resources, telemetry) = test_fixture();
        let handle = spawn_device(modem_spec(30000), processor, resources.clone(), telemetry).unwrap();

        let request = SnmpMessage::new(
            SnmpVersion::V2c,
            b"public".to_vec(),
            Pdu::request(
                PduType::GetRequest,
                99,
                vec![VarBind::null(oid("1.3.6.1.2.1.1.1.0"))],
            ),
        );
        let response = handle
            .handle_pdu(request, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(response.pdu.request_id, 99);
        assert_eq!(response.pdu.error_status, ErrorStatus::NoError);
        assert_eq!(
            response.pdu.varbinds[0].value,
            SnmpValue::OctetString(b"Motorola SB6141".to_vec())
        );

        handle.stop(DestroyReason::Stopped).await;
    }

    #[tokio::test]
    async fn test_actor_registers_and_unregisters() {
        let (processor, resources, telemetry) = test_fixture();
        let handle = spawn_device(modem_spec(30001), processor, resources.clone(), telemetry).unwrap();
        assert_eq!(resources.stats().active_devices, 1);

        handle.stop(DestroyReason::Stopped).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while resources.stats().active_devices != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("device did not unregister");
    }

    #[tokio::test]
    async fn test_actor_idle_tracking() {
        let (processor, resources, telemetry) = test_fixture();
        let handle = spawn_device(modem_spec(30002), processor, resources, telemetry).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let idle_before = handle.idle_for();
        assert!(idle_before >= Duration::from_millis(20));

        let request = SnmpMessage::new(
            SnmpVersion::V2c,
            b"public".to_vec(),
            Pdu::request(
                PduType::GetRequest,
                1,
                vec![VarBind::null(oid("1.3.6.1.2.1.1.1.0"))],
            ),
        );
        handle
            .handle_pdu(request, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(handle.idle_for() < idle_before);

        handle.stop(DestroyReason::Stopped).await;
    }

    #[tokio::test]
    async fn test_actor_walk_subtree() {
        let (processor, resources, telemetry) = test_fixture();
        let handle = spawn_device(modem_spec(30003), processor, resources, telemetry).unwrap();

        let varbinds = handle.walk(oid("1.3.6.1.2.1.1")).await.unwrap();
        assert_eq!(varbinds.len(), 2);
        assert_eq!(varbinds[0].oid, oid("1.3.6.1.2.1.1.1.0"));
        assert_eq!(varbinds[1].oid, oid("1.3.6.1.2.1.1.5.0"));

        handle.stop(DestroyReason::Stopped).await;
    }

    #[tokio::test]
    async fn test_phased_upgrade_finishes_via_timer() {
        let (processor, resources, telemetry) = test_fixture();
        let spec = DeviceSpec::new(DeviceType::CableModem, 30004, "public").with_upgrade(
            UpgradeSettings {
                enabled: true,
                invalid_server: None,
                phase_delay: Duration::from_millis(10),
            },
        );
        let handle = spawn_device(spec, processor, resources, telemetry).unwrap();

        let prime = SnmpMessage::new(
            SnmpVersion::V2c,
            b"public".to_vec(),
            Pdu::request(
                PduType::SetRequest,
                2,
                vec![
                    VarBind::new(
                        oid("1.3.6.1.2.1.69.1.3.3.0"),
                        SnmpValue::OctetString(b"10.0.0.1".to_vec()),
                    ),
                    VarBind::new(
                        oid("1.3.6.1.2.1.69.1.3.4.0"),
                        SnmpValue::OctetString(b"fw.bin".to_vec()),
                    ),
                    VarBind::new(oid("1.3.6.1.2.1.69.1.3.1.0"), SnmpValue::Integer(1)),
                ],
            ),
        );
        let response = handle
            .handle_pdu(prime, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.pdu.error_status, ErrorStatus::NoError);

        // In progress right after the trigger
        let oper = handle
            .get(oid("1.3.6.1.2.1.69.1.3.2.0"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(oper, SnmpValue::Integer(1));

        // Three phases at 10ms each settle well within a second
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let oper = handle
                    .get(oid("1.3.6.1.2.1.69.1.3.2.0"))
                    .await
                    .unwrap()
                    .unwrap();
                if oper == SnmpValue::Integer(3) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("phased upgrade never completed");

        handle.stop(DestroyReason::Stopped).await;
    }
}
