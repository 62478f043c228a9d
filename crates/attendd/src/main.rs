use anyhow::Result;
use attend_hw::{DeviceCamera, SimulatedCamera};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod engine;

use config::{CameraSource, Config};

#[derive(Parser)]
#[command(name = "attendd", about = "Attendance session daemon with operator console")]
struct Cli {
    /// TOML roster file (overrides ATTEND_ROSTER_FILE)
    #[arg(short, long)]
    roster: Option<PathBuf>,
    /// Camera device path, or "simulated" (overrides ATTEND_CAMERA_DEVICE)
    #[arg(short, long)]
    device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(device) = cli.device {
        config.camera = CameraSource::parse(&device);
    }
    if let Some(path) = cli.roster.or_else(|| config.roster_file.clone()) {
        config.apply_roster_file(&path)?;
    }

    tracing::info!(
        camera = ?config.camera,
        roster = config.roster.len(),
        include_unknown = config.include_unknown,
        "attendd starting"
    );

    let recognizer = config.recognizer()?;
    let counter = config.face_counter();
    let settings = config.engine_settings();
    let handle = match &config.camera {
        CameraSource::Simulated => engine::spawn_engine(
            SimulatedCamera::new(config.frame_width, config.frame_height),
            counter,
            recognizer,
            settings,
        ),
        CameraSource::Device(path) => engine::spawn_engine(
            DeviceCamera::new(path, config.frame_width, config.frame_height),
            counter,
            recognizer,
            settings,
        ),
    };

    tracing::info!("attendd ready");

    tokio::select! {
        result = console::run(handle.clone()) => result?,
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupted");
        }
    }

    // Release the camera before exiting if a session is still running.
    if handle.snapshot().await.map(|s| s.active).unwrap_or(false) {
        if let Err(err) = handle.stop().await {
            tracing::warn!(error = %err, "stop on shutdown failed");
        }
    }

    tracing::info!("attendd shutting down");
    Ok(())
}
