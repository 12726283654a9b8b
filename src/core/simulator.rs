//! Main orchestrator for the SNMP simulator

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::SimulatorConfig;
use crate::devices::DevicePool;
use crate::engine::PduProcessor;
use crate::mib::ProfileRegistry;
use crate::server::UdpServer;
use crate::services::resources::ResourceManager;
use crate::services::telemetry::{
    DestroyReason, LogSink, TelemetryEvent, TelemetryHandle, TelemetryService,
};
use crate::Result;

/// Simulator status information
#[derive(Debug, Clone)]
pub struct SimulatorStatus {
    pub running: bool,
    pub uptime: Duration,
    pub active_devices: usize,
    pub peak_devices: usize,
    pub loaded_profiles: usize,
    pub port_range: (u16, u16),
}

/// Simulator events
#[derive(Debug, Clone)]
pub enum SimulatorEvent {
    Started,
    Stopped,
    DeviceCreated { udp_port: u16 },
    DeviceDestroyed { udp_port: u16, reason: DestroyReason },
    ResourceLimitExceeded { active_devices: usize, max_devices: usize },
    PerformanceReport { active_devices: i64, requests_total: u64 },
    Error { message: String },
}

/// Main simulator implementation
pub struct Simulator {
    config: Arc<SimulatorConfig>,
    registry: Arc<ProfileRegistry>,
    resources: Arc<ResourceManager>,
    pool: Arc<DevicePool>,
    telemetry_service: TelemetryService,
    telemetry: TelemetryHandle,
    server: Option<UdpServer>,

    // Event handling
    event_tx: mpsc::UnboundedSender<SimulatorEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SimulatorEvent>>,

    // Runtime state
    is_running: Arc<RwLock<bool>>,
    start_time: Option<std::time::Instant>,

    // Background tasks
    tasks: Vec<JoinHandle<()>>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(ProfileRegistry::new());

        let telemetry_service = TelemetryService::new(config.telemetry.clone())?;
        let telemetry = telemetry_service.handle();

        let resources = Arc::new(ResourceManager::new(
            config.resources.clone(),
            telemetry.clone(),
        ));
        let processor = Arc::new(PduProcessor::new(
            Arc::clone(&registry),
            config.engine.getbulk_max_repetitions_cap,
        ));
        let pool = Arc::new(DevicePool::new(
            Arc::clone(&config),
            processor,
            Arc::clone(&resources),
            telemetry.clone(),
        ));

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            registry,
            resources,
            pool,
            telemetry_service,
            telemetry,
            server: None,
            event_tx,
            event_rx: Some(event_rx),
            is_running: Arc::new(RwLock::new(false)),
            start_time: None,
            tasks: Vec::new(),
        })
    }

    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SimulatorEvent>> {
        self.event_rx.take()
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.registry
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn pool(&self) -> &Arc<DevicePool> {
        &self.pool
    }

    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry.clone()
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Starting SNMP simulator");

        self.load_profiles()?;

        self.telemetry_service.start().await?;
        let sink_task = self.telemetry.attach_sink(Arc::new(LogSink));
        self.tasks.push(sink_task);

        Arc::clone(&self.resources).start(Arc::clone(&self.pool));

        let mut server = UdpServer::new(
            Arc::clone(&self.config),
            Arc::clone(&self.pool),
            self.telemetry.clone(),
        );
        server.start().await?;
        self.server = Some(server);

        self.setup_event_fanin();

        {
            let mut is_running = self.is_running.write().await;
            *is_running = true;
        }
        self.start_time = Some(std::time::Instant::now());

        let _ = self.event_tx.send(SimulatorEvent::Started);
        info!("SNMP simulator started successfully");
        Ok(())
    }

    fn load_profiles(&self) -> Result<()> {
        for profile in &self.config.devices.profiles {
            if let Some(walk_file) = &profile.walk_file {
                self.registry
                    .load_walk_file(profile.device_type.clone(), walk_file)?;
            } else if let Some(oids) = &profile.oids {
                self.registry.load_manual(profile.device_type.clone(), oids)?;
            }
        }

        if self.registry.is_empty() {
            info!("No profiles configured, devices will answer from dynamic state only");
        } else {
            info!(profiles = self.registry.len(), "Profiles loaded");
        }
        Ok(())
    }

    fn setup_event_fanin(&mut self) {
        let mut telemetry_rx = self.telemetry.subscribe();
        let event_tx = self.event_tx.clone();

        let task = tokio::spawn(async move {
            loop {
                match telemetry_rx.recv().await {
                    Ok(event) => {
                        if let Some(mapped) = map_telemetry_event(event) {
                            let _ = event_tx.send(mapped);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.push(task);
    }

    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping SNMP simulator");

        {
            let mut is_running = self.is_running.write().await;
            *is_running = false;
        }

        if let Some(ref mut server) = self.server {
            if let Err(e) = server.stop().await {
                error!("Error stopping UDP server: {}", e);
            }
        }

        self.pool.stop_all(DestroyReason::Stopped).await;
        self.resources.stop();

        if let Err(e) = self.telemetry_service.stop().await {
            error!("Error stopping telemetry: {}", e);
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        let _ = self.event_tx.send(SimulatorEvent::Stopped);
        info!("SNMP simulator stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn status(&self) -> SimulatorStatus {
        let stats = self.resources.stats();
        SimulatorStatus {
            running: self.is_running().await,
            uptime: self
                .start_time
                .map(|start| start.elapsed())
                .unwrap_or_default(),
            active_devices: stats.active_devices,
            peak_devices: stats.peak_devices,
            loaded_profiles: self.registry.len(),
            port_range: (self.config.devices.port_start, self.config.devices.port_end),
        }
    }
}

fn map_telemetry_event(event: TelemetryEvent) -> Option<SimulatorEvent> {
    match event {
        TelemetryEvent::DeviceCreated { udp_port, .. } => {
            Some(SimulatorEvent::DeviceCreated { udp_port })
        }
        TelemetryEvent::DeviceDestroyed {
            udp_port, reason, ..
        } => Some(SimulatorEvent::DeviceDestroyed { udp_port, reason }),
        TelemetryEvent::ResourceLimitExceeded {
            active_devices,
            max_devices,
        } => Some(SimulatorEvent::ResourceLimitExceeded {
            active_devices,
            max_devices,
        }),
        TelemetryEvent::PerformanceReport {
            active_devices,
            requests_total,
            ..
        } => Some(SimulatorEvent::PerformanceReport {
            active_devices,
            requests_total,
        }),
        _ => None,
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        // Abort any remaining tasks
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
