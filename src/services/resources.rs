//! Resource manager: admission control, idle reaping and the memory watchdog

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::System;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ResourceConfig;
use crate::devices::pool::DevicePool;
use crate::mib::DeviceType;
use crate::services::telemetry::{DestroyReason, TelemetryEvent, TelemetryHandle};
use crate::{Error, Result};

const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const MEMORY_WARN_RATIO: f64 = 0.9;
// Ceiling on how many devices one emergency sweep may evict
const EMERGENCY_EVICT_RATIO: f64 = 0.1;

#[derive(Debug, Clone)]
struct Registration {
    device_type: DeviceType,
    #[allow(dead_code)]
    udp_port: u16,
    #[allow(dead_code)]
    registered_at: Instant,
}

#[derive(Debug, Default)]
struct ResourceTable {
    registrations: HashMap<Uuid, Registration>,
    peak: usize,
    total_registered: u64,
}

/// Snapshot of resource usage
#[derive(Debug, Clone)]
pub struct ResourceStats {
    pub active_devices: usize,
    pub peak_devices: usize,
    pub total_registered: u64,
    pub devices_by_type: HashMap<String, usize>,
    pub max_devices: usize,
    pub memory_limit_bytes: u64,
}

/// Enforces the device and memory caps and reaps idle devices
pub struct ResourceManager {
    config: ResourceConfig,
    telemetry: TelemetryHandle,
    table: Mutex<ResourceTable>,
    system: Mutex<System>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    is_running: AtomicBool,
}

impl ResourceManager {
    pub fn new(config: ResourceConfig, telemetry: TelemetryHandle) -> Self {
        Self {
            config,
            telemetry,
            table: Mutex::new(ResourceTable::default()),
            system: Mutex::new(System::new()),
            tasks: Mutex::new(Vec::new()),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// True when a new device would stay within both caps.
    pub fn can_allocate(&self) -> bool {
        let count = {
            let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.registrations.len()
        };
        count < self.config.max_devices && self.memory_usage_bytes() <= self.memory_limit_bytes()
    }

    /// Capacity-checked registration; refuses instead of exceeding the caps.
    pub fn try_register(
        &self,
        device_id: Uuid,
        device_type: DeviceType,
        udp_port: u16,
    ) -> Result<()> {
        let refused = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            if table.registrations.contains_key(&device_id) {
                return Ok(());
            }
            if table.registrations.len() >= self.config.max_devices {
                Some(table.registrations.len())
            } else {
                self.insert_locked(&mut table, device_id, device_type, udp_port);
                None
            }
        };

        if let Some(active) = refused {
            self.telemetry.emit(TelemetryEvent::ResourceLimitExceeded {
                active_devices: active,
                max_devices: self.config.max_devices,
            });
            return Err(Error::resource_limit(format!(
                "device limit {} reached",
                self.config.max_devices
            )));
        }

        if self.memory_usage_bytes() > self.memory_limit_bytes() {
            // Over the memory cap: roll back and refuse
            self.unregister(device_id);
            self.telemetry.emit(TelemetryEvent::ResourceLimitExceeded {
                active_devices: self.stats().active_devices,
                max_devices: self.config.max_devices,
            });
            return Err(Error::resource_limit(format!(
                "memory limit {} MB reached",
                self.config.max_memory_mb
            )));
        }

        Ok(())
    }

    /// Idempotent registration without a capacity check.
    pub fn register(&self, device_id: Uuid, device_type: DeviceType, udp_port: u16) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if table.registrations.contains_key(&device_id) {
            return;
        }
        self.insert_locked(&mut table, device_id, device_type, udp_port);
    }

    fn insert_locked(
        &self,
        table: &mut ResourceTable,
        device_id: Uuid,
        device_type: DeviceType,
        udp_port: u16,
    ) {
        table.registrations.insert(
            device_id,
            Registration {
                device_type,
                udp_port,
                registered_at: Instant::now(),
            },
        );
        table.total_registered += 1;
        table.peak = table.peak.max(table.registrations.len());
    }

    /// Idempotent removal.
    pub fn unregister(&self, device_id: Uuid) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.registrations.remove(&device_id);
    }

    pub fn stats(&self) -> ResourceStats {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let mut devices_by_type: HashMap<String, usize> = HashMap::new();
        for registration in table.registrations.values() {
            *devices_by_type
                .entry(registration.device_type.to_string())
                .or_insert(0) += 1;
        }

        ResourceStats {
            active_devices: table.registrations.len(),
            peak_devices: table.peak,
            total_registered: table.total_registered,
            devices_by_type,
            max_devices: self.config.max_devices,
            memory_limit_bytes: self.memory_limit_bytes(),
        }
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.config.max_memory_mb * 1024 * 1024
    }

    /// Resident memory of this process.
    pub fn memory_usage_bytes(&self) -> u64 {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(_) => return 0,
        };
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_process(pid);
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// Starts the idle and memory sweeps against `pool`.
    pub fn start(self: Arc<Self>, pool: Arc<DevicePool>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            cleanup_interval_ms = self.config.cleanup_interval_ms,
            idle_threshold_ms = self.config.idle_threshold_ms,
            max_devices = self.config.max_devices,
            max_memory_mb = self.config.max_memory_mb,
            "Starting resource manager"
        );

        let idle_task = {
            let manager = Arc::clone(&self);
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let mut ticker = interval(manager.config.cleanup_interval());
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    manager.idle_sweep(&pool).await;
                }
            })
        };

        let memory_task = {
            let manager = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = interval(MEMORY_SWEEP_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    manager.memory_sweep(&pool).await;
                }
            })
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(idle_task);
        tasks.push(memory_task);
    }

    pub fn stop(&self) {
        info!("Stopping resource manager");
        self.is_running.store(false, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stops every device idle beyond the threshold.
    pub async fn idle_sweep(&self, pool: &DevicePool) {
        let threshold = self.config.idle_threshold();
        let idle_ports: Vec<u16> = pool
            .snapshot()
            .into_iter()
            .filter(|handle| handle.idle_for() > threshold)
            .map(|handle| handle.udp_port())
            .collect();

        if idle_ports.is_empty() {
            return;
        }

        debug!(count = idle_ports.len(), "reaping idle devices");
        for port in idle_ports {
            pool.remove(port, DestroyReason::Idle).await;
        }
    }

    /// Warns near the memory cap and evicts the idlest devices past it.
    pub async fn memory_sweep(&self, pool: &DevicePool) {
        let usage = self.memory_usage_bytes();
        let limit = self.memory_limit_bytes();
        let stats = self.stats();

        self.telemetry.emit(TelemetryEvent::ResourceUsage {
            active_devices: stats.active_devices,
            peak_devices: stats.peak_devices,
            memory_bytes: usage,
            memory_limit_bytes: limit,
        });

        if usage as f64 > limit as f64 * MEMORY_WARN_RATIO && usage <= limit {
            warn!(
                usage_mb = usage / (1024 * 1024),
                limit_mb = self.config.max_memory_mb,
                "memory usage above 90% of cap"
            );
            return;
        }

        if usage > limit {
            let mut handles = pool.snapshot();
            handles.sort_by_key(|handle| std::cmp::Reverse(handle.idle_for()));
            let evict = ((handles.len() as f64 * EMERGENCY_EVICT_RATIO).ceil() as usize)
                .clamp(1, handles.len());

            warn!(
                usage_mb = usage / (1024 * 1024),
                limit_mb = self.config.max_memory_mb,
                evicting = evict,
                "memory cap exceeded, evicting idlest devices"
            );
            for handle in handles.into_iter().take(evict) {
                pool.remove(handle.udp_port(), DestroyReason::Evicted).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::services::telemetry::TelemetryService;

    fn manager(max_devices: usize) -> ResourceManager {
        let telemetry = TelemetryService::new(TelemetryConfig::default())
            .unwrap()
            .handle();
        ResourceManager::new(
            ResourceConfig {
                max_devices,
                ..ResourceConfig::default()
            },
            telemetry,
        )
    }

    #[test]
    fn test_register_is_idempotent() {
        let manager = manager(10);
        let id = Uuid::new_v4();

        manager.register(id, DeviceType::CableModem, 30000);
        manager.register(id, DeviceType::CableModem, 30000);
        assert_eq!(manager.stats().active_devices, 1);

        manager.unregister(id);
        manager.unregister(id);
        assert_eq!(manager.stats().active_devices, 0);
    }

    #[test]
    fn test_try_register_enforces_cap() {
        let manager = manager(2);
        manager
            .try_register(Uuid::new_v4(), DeviceType::CableModem, 30000)
            .unwrap();
        manager
            .try_register(Uuid::new_v4(), DeviceType::CableModem, 30001)
            .unwrap();

        let refused = manager.try_register(Uuid::new_v4(), DeviceType::CableModem, 30002);
        assert!(matches!(refused, Err(Error::ResourceLimit(_))));
        assert_eq!(manager.stats().active_devices, 2);
        assert!(!manager.can_allocate());
    }

    #[test]
    fn test_stats_track_peak_and_types() {
        let manager = manager(10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        manager.register(a, DeviceType::CableModem, 30000);
        manager.register(b, DeviceType::Cmts, 30001);
        manager.unregister(a);

        let stats = manager.stats();
        assert_eq!(stats.active_devices, 1);
        assert_eq!(stats.peak_devices, 2);
        assert_eq!(stats.total_registered, 2);
        assert_eq!(stats.devices_by_type.get("cmts"), Some(&1));
    }

    #[test]
    fn test_memory_usage_reports_something() {
        let manager = manager(10);
        // Process RSS should be nonzero on any supported platform
        assert!(manager.memory_usage_bytes() > 0);
    }

    #[tokio::test]
    async fn test_idle_sweep_is_idempotent() {
        use crate::config::SimulatorConfig;
        use crate::engine::PduProcessor;
        use crate::mib::{ManualValue, ProfileRegistry};
        use std::collections::HashMap;

        let registry = ProfileRegistry::new();
        let mut spec = HashMap::new();
        spec.insert("1.3.6.1.2.1.1.1.0".to_string(), ManualValue::Text("cm".into()));
        registry
            .load_manual(DeviceType::CableModem, &spec)
            .unwrap();

        let mut config = SimulatorConfig::default_config();
        config.resources.idle_threshold_ms = 40;
        let config = Arc::new(config);

        let telemetry = TelemetryService::new(crate::config::TelemetryConfig::default())
            .unwrap()
            .handle();
        let manager = Arc::new(ResourceManager::new(
            config.resources.clone(),
            telemetry.clone(),
        ));
        let processor = Arc::new(PduProcessor::new(Arc::new(registry), 50));
        let pool = Arc::new(DevicePool::new(
            Arc::clone(&config),
            processor,
            Arc::clone(&manager),
            telemetry,
        ));

        pool.get_or_create(30000).unwrap().unwrap();
        pool.get_or_create(30001).unwrap().unwrap();

        // Fresh devices survive back-to-back sweeps (no false positives)
        manager.idle_sweep(&pool).await;
        manager.idle_sweep(&pool).await;
        assert_eq!(pool.len(), 2);

        // Once past the threshold a sweep removes them, and a second
        // sweep finds the same (empty) surviving set
        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.idle_sweep(&pool).await;
        assert_eq!(pool.len(), 0);
        manager.idle_sweep(&pool).await;
        assert_eq!(pool.len(), 0);
    }
}
