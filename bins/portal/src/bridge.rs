//! Message-bus bridge.
//!
//! Owns the broker client and the connection state, routes inbound
//! messages to handlers by exact topic match, and runs one bounded service
//! tick per loop iteration.

use std::time::Duration;

use portal_core::cfg::Config;
use portal_core::fault::BusFault;
use tracing::{debug, info, trace, warn};

use crate::handlers::{self, HandlerCtx, Route};
use crate::hal::{BusClient, BusEvent};

/// Topics the device publishes to.
#[derive(Debug, Clone)]
pub struct Topics {
    pub temperature: String,
    pub light: String,
    pub status: String,
}

impl Topics {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            temperature: cfg.topic("temperature"),
            light: cfg.topic("light"),
            status: cfg.topic("status"),
        }
    }
}

/// Topic to handler table, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct Routes {
    entries: Vec<(String, Route)>,
}

impl Routes {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            entries: vec![
                (cfg.topic("ping"), Route::Ping),
                (cfg.topic("brightness"), Route::Brightness),
                (cfg.topic("neopixel"), Route::Neopixel),
                (cfg.topic("blinkrate"), Route::BlinkRate),
                (cfg.topics.weather.clone(), Route::Weather),
                (cfg.topics.local_time.clone(), Route::LocalTime),
                (cfg.topics.inside_temperature.clone(), Route::InsideTemperature),
            ],
        }
    }

    pub fn lookup(&self, topic: &str) -> Option<Route> {
        self.entries.iter().find(|(t, _)| t == topic).map(|(_, r)| *r)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub consecutive_failures: u32,
}

/// Result of one service tick.
#[derive(Debug, PartialEq)]
pub enum Tick {
    /// Events were processed.
    Worked,
    /// Nothing happened; the loop may idle.
    Idle,
    /// The tick failed, still under the threshold.
    Faulted(BusFault),
    /// Too many consecutive failures; recover the connection.
    Escalate(BusFault),
}

pub struct Bridge<B> {
    client: B,
    routes: Routes,
    topics: Topics,
    conn: ConnectionState,
    failure_threshold: u32,
}

impl<B: BusClient> Bridge<B> {
    pub fn new(client: B, cfg: &Config) -> Self {
        Self {
            client,
            routes: Routes::from_config(cfg),
            topics: Topics::from_config(cfg),
            conn: ConnectionState::default(),
            failure_threshold: cfg.looping.failure_threshold,
        }
    }

    pub fn topics(&self) -> &Topics { &self.topics }

    pub fn connection(&self) -> ConnectionState { self.conn }

    pub fn broker(&self) -> String { self.client.broker() }

    pub async fn connect(&mut self) -> Result<(), BusFault> {
        info!("connecting to broker {}", self.client.broker());
        self.client.connect().await?;
        self.conn.connected = true;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), BusFault> {
        self.client.disconnect().await?;
        self.conn.connected = false;
        Ok(())
    }

    pub fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BusFault> {
        self.client.publish(topic, payload)
    }

    /// Forget past failures; called after a recovery attempt, won or lost.
    pub fn reset_failures(&mut self) {
        self.conn.consecutive_failures = 0;
    }

    /// Give the client one service opportunity bounded by `timeout` and
    /// dispatch whatever it delivered.
    pub async fn tick(&mut self, timeout: Duration, ctx: &mut HandlerCtx<'_>) -> Tick {
        let events = match tokio::time::timeout(timeout, self.client.service(timeout)).await {
            Err(_elapsed) => {
                self.conn.consecutive_failures = 0;
                return Tick::Idle;
            }
            Ok(Err(e)) => {
                self.conn.consecutive_failures += 1;
                warn!(failures = self.conn.consecutive_failures, "bus service failed: {e}");
                if self.conn.consecutive_failures > self.failure_threshold {
                    return Tick::Escalate(e);
                }
                return Tick::Faulted(e);
            }
            Ok(Ok(events)) => events,
        };
        self.conn.consecutive_failures = 0;
        if events.is_empty() {
            return Tick::Idle;
        }
        for event in events {
            self.deliver(event, ctx);
        }
        Tick::Worked
    }

    fn deliver(&mut self, event: BusEvent, ctx: &mut HandlerCtx<'_>) {
        match event {
            BusEvent::Connected => {
                self.conn.connected = true;
                info!("connected to broker {}", self.client.broker());
                for topic in self.routes.topics() {
                    debug!("subscribing to {topic}");
                    if let Err(e) = self.client.subscribe(topic) {
                        warn!("subscribe {topic}: {e}");
                    }
                }
                ctx.dev.counters.inc("connect");
            }
            BusEvent::Disconnected => {
                self.conn.connected = false;
                warn!("disconnected from broker");
                ctx.dev.counters.inc("disconnected");
            }
            BusEvent::Subscribed(what) => {
                debug!("subscribed: {what}");
                ctx.dev.counters.inc("subscribe");
            }
            BusEvent::Published(what) => {
                trace!("published: {what}");
                ctx.dev.counters.inc("publish");
            }
            BusEvent::Message { topic, payload } => match self.routes.lookup(&topic) {
                Some(route) => handlers::dispatch(route, &topic, &payload, ctx),
                None => trace!("dropping message on unrouted topic {topic}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::hal::Display;
    use crate::sim::{SimBus, SimRig};
    use portal_core::job::{JobTable, SEND_STATUS};

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn setup() -> (SimRig, Bridge<SimBus>, Device, JobTable) {
        let cfg = Config::default();
        let rig = SimRig::new("test");
        let bridge = Bridge::new(rig.bus.clone(), &cfg);
        let dev = rig.device();
        let jobs = JobTable::with_defaults(&cfg.jobs).unwrap();
        (rig, bridge, dev, jobs)
    }

    #[test]
    fn routes_match_exactly() {
        let routes = Routes::from_config(&Config::default());
        assert_eq!(routes.lookup("/pyportal/ping"), Some(Route::Ping));
        assert_eq!(routes.lookup("/aio/local_time"), Some(Route::LocalTime));
        assert_eq!(routes.lookup("/pyportal/ping/extra"), None);
        assert_eq!(routes.lookup("/PYPORTAL/ping"), None);
        assert_eq!(routes.topics().count(), 7);
    }

    #[tokio::test]
    async fn connect_subscribes_every_route() {
        let (rig, mut bridge, mut dev, mut jobs) = setup();
        bridge.connect().await.unwrap();
        let mut ctx = HandlerCtx { dev: &mut dev, jobs: &mut jobs, now_ms: 0 };
        assert_eq!(bridge.tick(TIMEOUT, &mut ctx).await, Tick::Worked);
        assert_eq!(rig.bus.subscriptions().len(), 7);
        assert!(rig.bus.subscriptions().contains(&"/sensor/temperature_house".to_string()));
        assert_eq!(bridge.tick(TIMEOUT, &mut ctx).await, Tick::Worked);
        assert_eq!(ctx.dev.counters.get("connect"), 1);
        assert_eq!(ctx.dev.counters.get("subscribe"), 7);
        assert!(bridge.connection().connected);
    }

    #[tokio::test]
    async fn messages_reach_their_handler_and_strays_are_dropped() {
        let (rig, mut bridge, mut dev, mut jobs) = setup();
        bridge.connect().await.unwrap();
        jobs.mark_run(SEND_STATUS, 0);
        rig.bus.deliver("/pyportal/brightness", "min");
        rig.bus.deliver("/pyportal/ping", "");
        rig.bus.deliver("/elsewhere", "42");
        let mut ctx = HandlerCtx { dev: &mut dev, jobs: &mut jobs, now_ms: 10 };
        assert_eq!(bridge.tick(TIMEOUT, &mut ctx).await, Tick::Worked);
        assert_eq!(rig.display.brightness(), 0.01);
        assert!(jobs.is_due(SEND_STATUS, 10));
    }

    #[tokio::test]
    async fn empty_tick_is_idle() {
        let (_rig, mut bridge, mut dev, mut jobs) = setup();
        bridge.connect().await.unwrap();
        let mut ctx = HandlerCtx { dev: &mut dev, jobs: &mut jobs, now_ms: 0 };
        bridge.tick(TIMEOUT, &mut ctx).await;
        bridge.tick(TIMEOUT, &mut ctx).await;
        assert_eq!(bridge.tick(TIMEOUT, &mut ctx).await, Tick::Idle);
    }

    #[tokio::test]
    async fn failures_escalate_past_threshold_and_success_resets() {
        let (rig, mut bridge, mut dev, mut jobs) = setup();
        bridge.connect().await.unwrap();
        let mut ctx = HandlerCtx { dev: &mut dev, jobs: &mut jobs, now_ms: 0 };

        rig.bus.fail_service(2);
        assert!(matches!(bridge.tick(TIMEOUT, &mut ctx).await, Tick::Faulted(_)));
        assert!(matches!(bridge.tick(TIMEOUT, &mut ctx).await, Tick::Faulted(_)));
        assert_eq!(bridge.connection().consecutive_failures, 2);
        bridge.tick(TIMEOUT, &mut ctx).await;
        assert_eq!(bridge.connection().consecutive_failures, 0);

        rig.bus.fail_service(3);
        bridge.tick(TIMEOUT, &mut ctx).await;
        bridge.tick(TIMEOUT, &mut ctx).await;
        assert!(matches!(bridge.tick(TIMEOUT, &mut ctx).await, Tick::Escalate(_)));
        bridge.reset_failures();
        assert_eq!(bridge.connection().consecutive_failures, 0);
    }
}
