//! SNMP simulator main application

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};

use snmpsim::{
    config::SimulatorConfig,
    core::{Simulator, SimulatorEvent},
    utils::setup_logging,
    Result,
};

#[derive(Parser)]
#[command(name = "snmpsim")]
#[command(about = "High-scale SNMP device simulator")]
#[command(version = snmpsim::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the simulator
    Start,
    /// Validate configuration
    ValidateConfig,
    /// Generate default configuration
    GenerateConfig {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = load_configuration(&cli).await?;

    // Setup logging; the guard keeps buffered file output flowing
    let _log_guard = setup_logging(&config.general, &config.logging)?;

    info!("Starting {} v{}", snmpsim::NAME, snmpsim::VERSION);

    // Handle commands
    match &cli.command {
        Some(Commands::Start) | None => run_simulator(config).await,
        Some(Commands::ValidateConfig) => validate_configuration(&config).await,
        Some(Commands::GenerateConfig { output }) => {
            generate_default_config(output.clone()).await
        }
    }
}

async fn load_configuration(cli: &Cli) -> Result<SimulatorConfig> {
    let mut config = if let Some(config_path) = &cli.config {
        SimulatorConfig::load_from_file(config_path)?
    } else {
        match SimulatorConfig::load_from_env() {
            Ok(config) => config,
            Err(_) => SimulatorConfig::default_config(),
        }
    };

    if cli.log_level != "info" {
        config.logging.level = cli.log_level.clone();
    }

    // Validate configuration
    config.validate()?;

    Ok(config)
}

async fn run_simulator(config: SimulatorConfig) -> Result<()> {
    info!("Initializing SNMP simulator");

    let mut simulator = Simulator::new(config)?;

    // Take the event receiver before starting
    let mut event_rx = simulator
        .take_event_receiver()
        .ok_or_else(|| snmpsim::Error::internal("Failed to get event receiver"))?;

    simulator.start().await?;

    let simulator = Arc::new(tokio::sync::Mutex::new(simulator));
    let simulator_shutdown = Arc::clone(&simulator);

    // Handle events
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            handle_simulator_event(event).await;
        }
    });

    // Handle shutdown signals
    let shutdown_task = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully");
                let mut simulator = simulator_shutdown.lock().await;
                if let Err(e) = simulator.stop().await {
                    error!("Error during shutdown: {}", e);
                }
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    });

    // Wait for shutdown
    tokio::select! {
        _ = event_task => {
            info!("Event handling completed");
        }
        _ = shutdown_task => {
            info!("Shutdown signal received");
        }
    }

    // Final cleanup
    let mut simulator = simulator.lock().await;
    if simulator.is_running().await {
        simulator.stop().await?;
    }

    info!("SNMP simulator shutdown complete");
    Ok(())
}

async fn handle_simulator_event(event: SimulatorEvent) {
    match event {
        SimulatorEvent::Started => {
            info!("Simulator started successfully");
        }
        SimulatorEvent::Stopped => {
            info!("Simulator stopped");
        }
        SimulatorEvent::DeviceCreated { udp_port } => {
            info!("Device created on port {}", udp_port);
        }
        SimulatorEvent::DeviceDestroyed { udp_port, reason } => {
            info!("Device on port {} destroyed ({:?})", udp_port, reason);
        }
        SimulatorEvent::ResourceLimitExceeded {
            active_devices,
            max_devices,
        } => {
            warn!(
                "Resource limit exceeded: {} of {} devices",
                active_devices, max_devices
            );
        }
        SimulatorEvent::PerformanceReport {
            active_devices,
            requests_total,
        } => {
            info!(
                "Performance: {} active devices, {} requests served",
                active_devices, requests_total
            );
        }
        SimulatorEvent::Error { message } => {
            error!("Simulator error: {}", message);
        }
    }
}

async fn validate_configuration(config: &SimulatorConfig) -> Result<()> {
    config.validate()?;

    println!("Configuration is valid");
    println!("  Node ID: {}", config.general.node_id);
    println!(
        "  Port range: {}-{}",
        config.devices.port_start, config.devices.port_end
    );
    println!("  Default device type: {}", config.devices.default_device_type);
    println!("  Max devices: {}", config.resources.max_devices);
    println!("  Max memory: {} MB", config.resources.max_memory_mb);
    println!("  Sockets per port: {}", config.server.socket_count);
    println!("  Worker pool: {}", config.server.worker_pool_size);
    println!("  Profiles: {}", config.devices.profiles.len());

    Ok(())
}

async fn generate_default_config(output_path: Option<PathBuf>) -> Result<()> {
    let config = SimulatorConfig::default_config();
    let toml_content = toml::to_string_pretty(&config)
        .map_err(|e| snmpsim::Error::internal(format!("Failed to serialize config: {}", e)))?;

    match output_path {
        Some(path) => {
            std::fs::write(&path, toml_content)?;
            println!("Default configuration written to: {}", path.display());
        }
        None => {
            println!("{}", toml_content);
        }
    }

    Ok(())
}
