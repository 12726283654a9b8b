//! Simulated devices: per-device actors, state and the port router

pub mod actor;
pub mod pool;
pub mod state;

pub use actor::{spawn_device, DeviceCommand, DeviceHandle};
pub use pool::DevicePool;
pub use state::{DeviceSpec, DeviceState};
