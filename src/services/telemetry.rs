//! Telemetry service: event bus, counters and periodic reports
//!
//! Core paths emit events through a cloneable handle; delivery to
//! subscribers is best-effort over a broadcast channel and never blocks
//! request processing. Prometheus metrics are updated synchronously on emit.

use std::sync::Arc;

use async_trait::async_trait;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TelemetryConfig;
use crate::mib::DeviceType;
use crate::Result;

const EVENT_BUS_CAPACITY: usize = 1024;

/// Why a device went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    Stopped,
    Idle,
    Evicted,
    Crashed,
}

/// Telemetry events with structured payloads
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    DeviceCreated {
        device_id: Uuid,
        device_type: DeviceType,
        udp_port: u16,
    },
    DeviceDestroyed {
        device_id: Uuid,
        device_type: DeviceType,
        udp_port: u16,
        reason: DestroyReason,
    },
    Request {
        udp_port: u16,
        pdu_type: &'static str,
        duration_us: u64,
        success: bool,
    },
    PerformanceReport {
        active_devices: i64,
        requests_total: u64,
        packets_dropped: u64,
        memory_bytes: i64,
    },
    ResourceUsage {
        active_devices: usize,
        peak_devices: usize,
        memory_bytes: u64,
        memory_limit_bytes: u64,
    },
    ResourceLimitExceeded {
        active_devices: usize,
        max_devices: usize,
    },
    PacketsDropped {
        count: u64,
    },
}

struct Metrics {
    requests_total: IntCounterVec,
    request_duration: Histogram,
    packets_dropped_total: IntCounter,
    devices_created_total: IntCounter,
    devices_destroyed_total: IntCounter,
    resource_limit_hits_total: IntCounter,
    active_devices: IntGauge,
    memory_bytes: IntGauge,
}

impl Metrics {
    fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("snmpsim_requests_total", "SNMP requests processed"),
            &["pdu_type"],
        )
        .map_err(prom_err)?;
        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "snmpsim_request_duration_seconds",
                "Request processing latency",
            )
            .buckets(vec![
                0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001, 0.002_5, 0.005, 0.01, 0.05, 0.1,
                0.5, 1.0, 5.0,
            ]),
        )
        .map_err(prom_err)?;
        let packets_dropped_total = IntCounter::new(
            "snmpsim_packets_dropped_total",
            "Inbound packets dropped under burst",
        )
        .map_err(prom_err)?;
        let devices_created_total =
            IntCounter::new("snmpsim_devices_created_total", "Devices created")
                .map_err(prom_err)?;
        let devices_destroyed_total =
            IntCounter::new("snmpsim_devices_destroyed_total", "Devices destroyed")
                .map_err(prom_err)?;
        let resource_limit_hits_total = IntCounter::new(
            "snmpsim_resource_limit_hits_total",
            "Device creations refused by resource limits",
        )
        .map_err(prom_err)?;
        let active_devices =
            IntGauge::new("snmpsim_active_devices", "Currently active devices")
                .map_err(prom_err)?;
        let memory_bytes =
            IntGauge::new("snmpsim_memory_bytes", "Resident memory of the simulator")
                .map_err(prom_err)?;

        registry
            .register(Box::new(requests_total.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(request_duration.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(packets_dropped_total.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(devices_created_total.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(devices_destroyed_total.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(resource_limit_hits_total.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(active_devices.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(memory_bytes.clone()))
            .map_err(prom_err)?;

        Ok(Self {
            requests_total,
            request_duration,
            packets_dropped_total,
            devices_created_total,
            devices_destroyed_total,
            resource_limit_hits_total,
            active_devices,
            memory_bytes,
        })
    }
}

fn prom_err(e: prometheus::Error) -> crate::Error {
    crate::Error::internal(format!("prometheus: {}", e))
}

struct TelemetryInner {
    registry: Registry,
    metrics: Metrics,
    event_tx: broadcast::Sender<TelemetryEvent>,
}

/// Cheap-to-clone handle used by core paths to emit events
#[derive(Clone)]
pub struct TelemetryHandle {
    inner: Arc<TelemetryInner>,
}

impl TelemetryHandle {
    /// Updates metrics and fans the event out; never blocks.
    pub fn emit(&self, event: TelemetryEvent) {
        let metrics = &self.inner.metrics;
        match &event {
            TelemetryEvent::DeviceCreated { .. } => {
                metrics.devices_created_total.inc();
                metrics.active_devices.inc();
            }
            TelemetryEvent::DeviceDestroyed { .. } => {
                metrics.devices_destroyed_total.inc();
                metrics.active_devices.dec();
            }
            TelemetryEvent::Request {
                pdu_type,
                duration_us,
                ..
            } => {
                metrics.requests_total.with_label_values(&[pdu_type]).inc();
                metrics
                    .request_duration
                    .observe(*duration_us as f64 / 1_000_000.0);
            }
            TelemetryEvent::PacketsDropped { count } => {
                metrics.packets_dropped_total.inc_by(*count);
            }
            TelemetryEvent::ResourceUsage { memory_bytes, .. } => {
                metrics.memory_bytes.set(*memory_bytes as i64);
            }
            TelemetryEvent::ResourceLimitExceeded { .. } => {
                metrics.resource_limit_hits_total.inc();
            }
            TelemetryEvent::PerformanceReport { .. } => {}
        }

        // Best-effort: no subscribers is fine
        let _ = self.inner.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.inner.registry.gather()
    }

    pub fn active_devices(&self) -> i64 {
        self.inner.metrics.active_devices.get()
    }

    /// Attaches an observer; lagging observers lose events rather than
    /// applying backpressure.
    pub fn attach_sink(&self, sink: Arc<dyn TelemetrySink>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => sink.consume(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "telemetry sink lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Observer interface for telemetry events
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn consume(&self, event: TelemetryEvent);
}

/// Default sink: structured logs
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn consume(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::DeviceCreated {
                device_id,
                device_type,
                udp_port,
            } => {
                debug!(%device_id, %device_type, udp_port, "device created");
            }
            TelemetryEvent::DeviceDestroyed {
                device_id,
                udp_port,
                reason,
                ..
            } => {
                debug!(%device_id, udp_port, ?reason, "device destroyed");
            }
            TelemetryEvent::PerformanceReport {
                active_devices,
                requests_total,
                packets_dropped,
                memory_bytes,
            } => {
                info!(
                    active_devices,
                    requests_total, packets_dropped, memory_bytes, "performance report"
                );
            }
            TelemetryEvent::ResourceLimitExceeded {
                active_devices,
                max_devices,
            } => {
                warn!(active_devices, max_devices, "resource limit exceeded");
            }
            _ => {}
        }
    }
}

/// Telemetry service owning the registry and the periodic reporter
pub struct TelemetryService {
    config: TelemetryConfig,
    handle: TelemetryHandle,
    report_task: Option<JoinHandle<()>>,
    is_running: bool,
}

impl TelemetryService {
    pub fn new(config: TelemetryConfig) -> Result<Self> {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry)?;
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        let handle = TelemetryHandle {
            inner: Arc::new(TelemetryInner {
                registry,
                metrics,
                event_tx,
            }),
        };

        Ok(Self {
            config,
            handle,
            report_task: None,
            is_running: false,
        })
    }

    pub fn handle(&self) -> TelemetryHandle {
        self.handle.clone()
    }

    pub async fn start(&mut self) -> Result<()> {
        if !self.config.enabled {
            info!("Telemetry is disabled");
            return Ok(());
        }

        info!(
            interval_ms = self.config.report_interval_ms,
            "Starting telemetry reporter"
        );

        let handle = self.handle.clone();
        let report_interval = self.config.report_interval();
        let task = tokio::spawn(async move {
            let mut ticker = interval(report_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let metrics = &handle.inner.metrics;
                let requests_total: u64 = metrics
                    .requests_total
                    .with_label_values(&["get"])
                    .get()
                    + metrics.requests_total.with_label_values(&["get_next"]).get()
                    + metrics.requests_total.with_label_values(&["get_bulk"]).get()
                    + metrics.requests_total.with_label_values(&["set"]).get()
                    + metrics.requests_total.with_label_values(&["other"]).get();
                handle.emit(TelemetryEvent::PerformanceReport {
                    active_devices: metrics.active_devices.get(),
                    requests_total,
                    packets_dropped: metrics.packets_dropped_total.get(),
                    memory_bytes: metrics.memory_bytes.get(),
                });
            }
        });
        self.report_task = Some(task);
        self.is_running = true;
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping telemetry service");
        if let Some(task) = self.report_task.take() {
            task.abort();
        }
        self.is_running = false;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> TelemetryService {
        TelemetryService::new(TelemetryConfig {
            enabled: true,
            report_interval_ms: 50,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_emit_updates_metrics() {
        let service = create_test_service();
        let handle = service.handle();

        handle.emit(TelemetryEvent::DeviceCreated {
            device_id: Uuid::new_v4(),
            device_type: DeviceType::CableModem,
            udp_port: 30000,
        });
        handle.emit(TelemetryEvent::Request {
            udp_port: 30000,
            pdu_type: "get",
            duration_us: 120,
            success: true,
        });
        handle.emit(TelemetryEvent::PacketsDropped { count: 3 });

        assert_eq!(handle.active_devices(), 1);
        let families = handle.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "snmpsim_requests_total"));
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let service = create_test_service();
        let handle = service.handle();
        let mut rx = handle.subscribe();

        handle.emit(TelemetryEvent::PacketsDropped { count: 1 });
        match rx.recv().await.unwrap() {
            TelemetryEvent::PacketsDropped { count } => assert_eq!(count, 1),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_fail() {
        let service = create_test_service();
        let handle = service.handle();
        handle.emit(TelemetryEvent::PacketsDropped { count: 1 });
    }

    #[tokio::test]
    async fn test_periodic_report_emitted() {
        let mut service = create_test_service();
        let handle = service.handle();
        let mut rx = handle.subscribe();
        service.start().await.unwrap();

        let report = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if let TelemetryEvent::PerformanceReport { .. } = rx.recv().await.unwrap() {
                    break;
                }
            }
        })
        .await;
        assert!(report.is_ok(), "no performance report within 2s");

        service.stop().await.unwrap();
    }
}
