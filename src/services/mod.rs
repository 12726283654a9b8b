//! Services: resource management and telemetry

pub mod resources;
pub mod telemetry;

pub use resources::{ResourceManager, ResourceStats};
pub use telemetry::{
    DestroyReason, LogSink, TelemetryEvent, TelemetryHandle, TelemetryService, TelemetrySink,
};
