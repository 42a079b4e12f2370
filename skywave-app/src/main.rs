//! Skywave CLI host.
//!
//! One binary: `skywave [CONFIG]` boots the agent against a config file or
//! layered config directory; `--list-devices` enumerates audio endpoints
//! and exits. SIGINT/SIGTERM shut down gracefully. Exit code 0 on normal
//! shutdown, non-zero on initialization failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use skywave_core::{
    audio::device::{list_input_devices, list_output_devices},
    tools::CurrentTimeTool,
    AgentConfig, ToolRegistry, VoiceAgent,
};

#[derive(Parser)]
#[command(name = "skywave", about = "Half-duplex radio voice agent", version)]
struct Cli {
    /// Configuration file or directory.
    #[arg(default_value = "config/config.json")]
    config: PathBuf,

    /// List audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        return list_devices();
    }

    let config = match AgentConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), "failed to load configuration: {e}");
            return ExitCode::from(2);
        }
    };

    let mut agent = VoiceAgent::new(config.clone(), build_registry(&config));
    if let Err(e) = agent.start() {
        error!("agent failed to start: {e}");
        return ExitCode::from(1);
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    agent.stop();
    tokio::task::block_in_place(|| agent.wait());
    info!("agent stopped");
    ExitCode::SUCCESS
}

fn list_devices() -> ExitCode {
    let inputs = match list_input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            error!("cannot enumerate input devices: {e}");
            return ExitCode::from(1);
        }
    };
    println!("Input devices:");
    for device in inputs {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{marker}", device.name);
    }

    match list_output_devices() {
        Ok(devices) => {
            println!("Output devices:");
            for device in devices {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("  {}{marker}", device.name);
            }
        }
        Err(e) => {
            error!("cannot enumerate output devices: {e}");
            return ExitCode::from(1);
        }
    }
    ExitCode::SUCCESS
}

/// Instantiate the tools named in `tools.enabled`.
fn build_registry(config: &AgentConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for name in &config.tools.enabled {
        let result = match name.as_str() {
            "current_time" => registry.register(Arc::new(CurrentTimeTool)),
            other => {
                warn!(tool = other, "unknown tool in tools.enabled; skipping");
                continue;
            }
        };
        if let Err(e) = result {
            warn!(tool = name.as_str(), "tool registration failed: {e}");
        }
    }
    registry
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
