//! valve-pa-server - HTTP-controlled tube PA amplifier and speaker server
//!
//! Reads one INI configuration file (first CLI argument, default
//! `./speaker.cfg`), opens the power relay and the default (or configured)
//! audio output device, and serves the channel control API described in
//! `config.rs`'s section layout until killed.

mod config;
mod http;
mod wav;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use pa_core::{AmplifierController, SpeakerSession};
use pa_relay::PowerRelay;
use tracing::{error, info};

use config::Config;
use http::AppState;

const RECONCILE_TICK: Duration = Duration::from_millis(16);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter("valve_pa=info,tower_http=info")
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./speaker.cfg".to_string());

    let config = match Config::from_ini(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config {config_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> anyhow::Result<()> {
    info!(channels = config.channels.len(), port = config.port, "starting valve-pa-server");

    let relay = PowerRelay::open(&config.power_port)?;

    let host = cpal::default_host();
    let device = match &config.audio_device {
        Some(name) => host
            .output_devices()?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("audio device not found: {name}"))?,
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no default audio output device"))?,
    };

    let channel_count = config.channels.len();
    let amplifier = Arc::new(AmplifierController::new(
        relay,
        &device,
        channel_count,
        config.warming,
        config.cooling,
        RECONCILE_TICK,
    )?);

    let session = Arc::new(SpeakerSession::new(
        Arc::clone(&amplifier),
        config.channels.clone(),
    ));

    let state = AppState {
        session,
        token: config.token.clone(),
    };
    let app = http::build_router(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let addr = format!("0.0.0.0:{}", config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "listening");
        axum::serve(listener, app).await?;
        Ok::<(), anyhow::Error>(())
    })?;

    drop(amplifier);
    error!("server exited");
    Ok(())
}
