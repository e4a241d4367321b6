mod bridge;
mod device;
mod hal;
mod handlers;
#[cfg(feature = "mqtt")]
mod mqtt;
mod reconnect;
mod runner;
mod scheduler;
mod sim;
mod status;
mod watchdog;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use portal_core::cfg::{self, AppId, Config};
use portal_core::fault::FatalFault;
use portal_core::logx;
use tokio::sync::watch;
use tracing::{error, info};

use crate::hal::BusClient;
use crate::scheduler::Scheduler;
use crate::sim::SimRig;
use crate::watchdog::{SoftDog, WatchdogGuard};

const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: env!("CARGO_PKG_NAME"),
};

/// Exit status asking the supervisor to restart the device.
const RESTART_EXIT_CODE: i32 = 75;

#[derive(Parser, Debug)]
#[command(name = "portal", version, about = "Interval scheduler for a networked display")]
struct Cli {
    /// Config file (created with defaults if missing)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Do not arm the watchdog
    #[arg(long)]
    no_watchdog: bool,
    /// Log level, overrides the config file
    #[arg(long)]
    log: Option<String>,
    /// Stop after this many loop iterations
    #[arg(long)]
    ticks: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => cfg::load_from(path)?,
        None => cfg::load_or_init(&APP)?,
    };
    logx::init(cli.log.as_deref().unwrap_or(&cfg.log_level));
    info!("{} boot", APP.application);

    let rig = SimRig::new(&format!("{}:{}", cfg.broker.host, cfg.broker.port));

    #[cfg(feature = "mqtt")]
    let bus = mqtt::MqttBus::new(&cfg.broker);
    #[cfg(not(feature = "mqtt"))]
    let bus = rig.bus.clone();

    run_with(&cfg, &cli, bus, &rig).await
}

async fn run_with<B: BusClient>(cfg: &Config, cli: &Cli, bus: B, rig: &SimRig) -> Result<()> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            let _ = tx.send(true);
        }
    });

    let dog = WatchdogGuard::configure(
        Box::new(SoftDog::new(RESTART_EXIT_CODE)),
        cfg.watchdog.enabled && !cli.no_watchdog,
        Duration::from_secs(cfg.watchdog.timeout_secs),
    );
    let mut sched = Scheduler::new(cfg, bus, rig.device(), dog)?;

    // start() disarms the watchdog when it fails, so the delay below holds
    if let Err(fatal) = sched.start().await {
        restart(&fatal, cfg.looping.fatal_delay()).await;
    }
    match sched.run(rx, cli.ticks).await {
        Ok(iterations) => {
            let counters = sched.device().counters.snapshot();
            info!(
                ?counters,
                connected = sched.connection().connected,
                "stopped after {iterations} iterations, {} jobs",
                sched.jobs().len()
            );
            Ok(())
        }
        Err(fatal) => {
            restart(&fatal, Duration::ZERO).await;
            Ok(())
        }
    }
}

/// Log, wait out `delay`, then exit so the supervisor restarts us.
async fn restart(fatal: &FatalFault, delay: Duration) {
    error!("{fatal}; restarting in {}s", delay.as_secs());
    tokio::time::sleep(delay).await;
    std::process::exit(RESTART_EXIT_CODE);
}
