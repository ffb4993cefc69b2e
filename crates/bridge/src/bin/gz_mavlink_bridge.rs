//! Run the MAVLink bridge against the built-in kinematic vehicle.
//!
//! Connects to an autopilot SITL instance over UDP and steps the vehicle,
//! either paced against the wall clock or in lockstep with the autopilot.
//!
//! Usage:
//!   cargo run -p gz_mavlink_bridge -- [OPTIONS]
//!
//! Set `RUST_LOG` to adjust verbosity (default: info).

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gz_mavlink_bridge::sim;
use gz_mavlink_bridge::{
    BridgeConfig, BridgeError, KinematicConfig, KinematicHost, MavlinkBridge, MavlinkUdpConfig,
    MavlinkUdpLink, SyncStatus,
};

/// Ticks between progress summaries.
const SUMMARY_EVERY: u64 = 2_500;

#[derive(Parser, Debug)]
#[command(name = "gz_mavlink_bridge", version, about = "Simulation to autopilot MAVLink HIL bridge")]
struct Args {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Autopilot host name or address.
    #[arg(long)]
    host: Option<String>,

    /// Autopilot UDP port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Wait for the autopilot after every sensor send.
    #[arg(long)]
    lockstep: bool,

    /// Stop after this many ticks. Runs until Ctrl+C when omitted.
    #[arg(long)]
    ticks: Option<u64>,
}

fn load_config(args: &Args) -> Result<BridgeConfig, BridgeError> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_json_file(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(host) = &args.host {
        config.hostname = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.lockstep {
        config.enable_lockstep = true;
    }
    Ok(config)
}

async fn run(args: Args) -> Result<(), BridgeError> {
    let config = load_config(&args)?;
    let link = MavlinkUdpLink::new(MavlinkUdpConfig::from_bridge(&config));
    let mut host = KinematicHost::new(KinematicConfig::from_bridge(&config));
    let mut bridge = MavlinkBridge::configure(config, Box::new(link))?;
    bridge.start()?;

    let shutdown = bridge.shutdown_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("shutdown requested");
        signal_token.cancel();
    });

    let dt_us = host.update_info().dt_us;
    let realtime = Duration::from_micros(dt_us);
    let wall_start = Instant::now();
    let mut tick: u64 = 0;
    let mut was_connected = false;

    while !shutdown.is_cancelled() && args.ticks.map_or(true, |limit| tick < limit) {
        let tick_start = Instant::now();
        let status = sim::step(&mut bridge, &mut host).await;
        if status == SyncStatus::Shutdown {
            break;
        }
        tick += 1;

        let connected = bridge.is_connected();
        if connected != was_connected {
            was_connected = connected;
            info!(connected, "autopilot link state changed");
        }

        if tick % SUMMARY_EVERY == 0 {
            info!(
                tick,
                sim_time_s = host.sim_time_us() as f64 / 1e6,
                wall_s = wall_start.elapsed().as_secs_f64(),
                altitude_m = host.altitude(),
                yaw_rad = host.yaw(),
                armed = bridge.is_armed(),
                diagnostics = ?bridge.diagnostics(),
                "bridge running"
            );
        }

        // Lockstep ticks run as fast as the autopilot replies; until it does,
        // hold real time so the link is not flooded.
        let target = match bridge.scheduler().pacing_delay(dt_us) {
            Some(delay) => delay,
            None if status == SyncStatus::Acknowledged => Duration::ZERO,
            None => realtime,
        };
        let remaining = target.saturating_sub(tick_start.elapsed());
        if !remaining.is_zero() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }

    bridge.shutdown().await;
    info!(
        ticks = tick,
        sim_time_us = host.sim_time_us(),
        "simulation complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
