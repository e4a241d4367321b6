use anyhow::Result;
use portal_core::cfg::{Config, LoopConfig};
use portal_core::fault::FatalFault;
use portal_core::job::{secs_to_ms, JobTable};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::bridge::{Bridge, ConnectionState, Tick};
use crate::device::Device;
use crate::handlers::HandlerCtx;
use crate::hal::BusClient;
use crate::reconnect::recover;
use crate::runner::{self, JobEnv};
use crate::watchdog::WatchdogGuard;

/// Single-threaded cooperative main loop.
///
/// Each iteration feeds the watchdog, gives the bus one bounded service
/// tick, then runs every due job in table order.
pub struct Scheduler<B> {
    bridge: Bridge<B>,
    jobs: JobTable,
    dev: Device,
    dog: WatchdogGuard,
    looping: LoopConfig,
    retry_delay_ms: u64,
    started: Instant,
}

impl<B: BusClient> Scheduler<B> {
    pub fn new(cfg: &Config, bus: B, dev: Device, dog: WatchdogGuard) -> Result<Self> {
        Ok(Self {
            bridge: Bridge::new(bus, cfg),
            jobs: JobTable::with_defaults(&cfg.jobs)?,
            dev,
            dog,
            looping: cfg.looping.clone(),
            retry_delay_ms: secs_to_ms(cfg.jobs.retry_delay),
            started: Instant::now(),
        })
    }

    /// Milliseconds on the loop clock.
    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn jobs(&self) -> &JobTable { &self.jobs }

    pub fn device(&self) -> &Device { &self.dev }

    pub fn connection(&self) -> ConnectionState { self.bridge.connection() }

    /// Light the screen, join the network and open the broker session.
    /// Failing to reach the broker here is fatal. The watchdog is disarmed
    /// first so the caller's restart delay can run out.
    pub async fn start(&mut self) -> Result<(), FatalFault> {
        self.dog.feed();
        self.dev.display.set_brightness(1.0);

        info!("connecting to network");
        match self.dev.network.connect() {
            Ok(()) => info!("network up, address {}", self.dev.network.ip_address()),
            Err(e) => warn!("network connect failed: {e}"),
        }

        self.dog.feed();
        if let Err(e) = self.bridge.connect().await {
            error!("FATAL! unable to connect to {}: {e}", self.bridge.broker());
            if self.dog.is_enabled() && !self.dog.disarm() {
                warn!("watchdog still armed; it may fire before the restart");
            }
            return Err(FatalFault::InitialConnect(e.to_string()));
        }
        Ok(())
    }

    /// One pass: feed, service the bus, run due jobs.
    pub async fn iterate(&mut self) -> Result<(), FatalFault> {
        self.dog.feed();

        let now = self.now_ms();
        let mut ctx = HandlerCtx { dev: &mut self.dev, jobs: &mut self.jobs, now_ms: now };
        match self.bridge.tick(self.looping.service_timeout(), &mut ctx).await {
            Tick::Worked | Tick::Faulted(_) => {}
            Tick::Idle => tokio::time::sleep(self.looping.idle()).await,
            Tick::Escalate(cause) => {
                let outcome = recover(
                    &cause,
                    &mut self.bridge,
                    &mut self.dev,
                    &mut self.dog,
                    self.looping.reconnect_pause(),
                )
                .await;
                self.bridge.reset_failures();
                let recovery = outcome?;
                info!(?recovery, "bus recovered");
            }
        }

        let now = self.now_ms();
        for name in self.jobs.due(now) {
            let mut env = JobEnv { dev: &mut self.dev, bridge: &mut self.bridge, now_ms: now };
            runner::run(&name, &mut self.jobs, &mut env, self.retry_delay_ms);
        }
        Ok(())
    }

    /// Loop until shutdown is signalled, `max_iterations` is reached, or a
    /// fatal fault demands a restart. Returns the number of iterations run.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>, max_iterations: Option<u64>) -> Result<u64, FatalFault> {
        info!(
            jobs = self.jobs.len(),
            watchdog = self.dog.is_enabled(),
            "main loop starting (watchdog timeout {:?})",
            self.dog.timeout()
        );
        let mut iterations = 0u64;
        loop {
            if *shutdown.borrow() {
                info!("scheduler stopping");
                break;
            }
            if max_iterations.is_some_and(|max| iterations >= max) {
                info!("scheduler stopping after {iterations} iterations");
                break;
            }
            self.iterate().await?;
            iterations += 1;
        }
        Ok(iterations)
    }
}
