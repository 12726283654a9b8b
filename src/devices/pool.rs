//! Device pool: routes UDP ports to device actors
//!
//! Devices come up lazily: the first packet to a port inside the simulated
//! range creates the actor, subject to resource admission. The pool is the
//! single owner of the port-to-actor map; the resource manager's sweeps call
//! back into `remove`.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::config::SimulatorConfig;
use crate::engine::{PduProcessor, UpgradeSettings};
use crate::services::resources::ResourceManager;
use crate::services::telemetry::{DestroyReason, TelemetryHandle};
use crate::Result;

use super::actor::{spawn_device, DeviceHandle};
use super::state::DeviceSpec;

/// Port-to-actor router with lazy creation
pub struct DevicePool {
    config: Arc<SimulatorConfig>,
    processor: Arc<PduProcessor>,
    resources: Arc<ResourceManager>,
    telemetry: TelemetryHandle,
    devices: DashMap<u16, DeviceHandle>,
}

impl DevicePool {
    pub fn new(
        config: Arc<SimulatorConfig>,
        processor: Arc<PduProcessor>,
        resources: Arc<ResourceManager>,
        telemetry: TelemetryHandle,
    ) -> Self {
        Self {
            config,
            processor,
            resources,
            telemetry,
            devices: DashMap::new(),
        }
    }

    /// Looks up the device for `port`, creating it when the port resolves
    /// to a device type and the resource manager admits it.
    ///
    /// Returns `Ok(None)` for ports outside the simulated range (the caller
    /// drops such packets silently) and `Err(ResourceLimit)` when admission
    /// was refused.
    pub fn get_or_create(&self, port: u16) -> Result<Option<DeviceHandle>> {
        if let Some(handle) = self.devices.get(&port) {
            return Ok(Some(handle.clone()));
        }

        let (device_type, community) = match self.config.resolve_port(port) {
            Some(resolved) => resolved,
            None => {
                trace!(port, "no device type resolves for port");
                return Ok(None);
            }
        };

        // Entry lock serializes racing creations for the same port
        match self.devices.entry(port) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Ok(Some(entry.get().clone())),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let spec = DeviceSpec::new(device_type, port, community).with_upgrade(
                    UpgradeSettings::from_config(&self.config.upgrade),
                );
                let handle = spawn_device(
                    spec,
                    Arc::clone(&self.processor),
                    Arc::clone(&self.resources),
                    self.telemetry.clone(),
                )?;
                debug!(port, device_id = %handle.device_id(), "created device for port");
                entry.insert(handle.clone());
                Ok(Some(handle))
            }
        }
    }

    pub fn get(&self, port: u16) -> Option<DeviceHandle> {
        self.devices.get(&port).map(|handle| handle.clone())
    }

    /// Registers an externally spawned device.
    pub fn put(&self, handle: DeviceHandle) {
        self.devices.insert(handle.udp_port(), handle);
    }

    /// Removes and stops the device on `port`.
    pub async fn remove(&self, port: u16, reason: DestroyReason) {
        if let Some((_, handle)) = self.devices.remove(&port) {
            handle.stop(reason).await;
        }
    }

    pub fn snapshot(&self) -> Vec<DeviceHandle> {
        self.devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub async fn stop_all(&self, reason: DestroyReason) {
        let ports: Vec<u16> = self.devices.iter().map(|entry| *entry.key()).collect();
        for port in ports {
            self.remove(port, reason).await;
        }
    }
}

impl Drop for DevicePool {
    fn drop(&mut self) {
        self.devices.clear();
    }
}
