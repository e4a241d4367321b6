//! Host implementations of every collaborator.
//!
//! Each sim is a cheap handle over shared state: keep a clone around to
//! script failures or inspect what the device did. Everything here is
//! single-threaded, like the loop that drives it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use portal_core::directive::LocalTime;
use portal_core::fault::{BusFault, InputFault, RuntimeFault};
use portal_core::weather::{calendar_text, clock_text, WeatherSummary};
use tracing::{debug, info};

use crate::device::Device;
use crate::hal::{Board, BusClient, BusEvent, Clock, Display, NetworkAdapter, Sensors};
#[cfg(test)]
use crate::hal::WatchdogHw;

/// Ordered record of collaborator calls, shared by the sims of one rig.
#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<&'static str>>>);

impl Journal {
    fn record(&self, call: &'static str) { self.0.borrow_mut().push(call); }

    #[cfg(test)]
    pub fn entries(&self) -> Vec<&'static str> { self.0.borrow().clone() }
}

/* --------------------- bus --------------------- */

// counts and outbox are only inspected by tests
#[cfg_attr(not(test), allow(dead_code))]
#[derive(Default)]
struct BusState {
    connected: bool,
    inbox: VecDeque<BusEvent>,
    published: Vec<(String, String)>,
    subscribed: Vec<String>,
    connects: u32,
    disconnects: u32,
    fail_connect: u32,
    fail_disconnect: u32,
    fail_service: u32,
}

/// In-process broker: messages are injected with [`SimBus::deliver`] and
/// publishes are recorded instead of sent.
#[derive(Clone)]
pub struct SimBus {
    broker: String,
    state: Rc<RefCell<BusState>>,
    journal: Journal,
}

impl SimBus {
    pub fn new(broker: &str, journal: Journal) -> Self {
        Self { broker: broker.to_string(), state: Rc::default(), journal }
    }
}

#[cfg(test)]
impl SimBus {
    /// Queue an inbound message for the next service tick.
    pub fn deliver(&self, topic: &str, payload: &str) {
        self.state.borrow_mut().inbox.push_back(BusEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Make the next `n` service ticks fail.
    pub fn fail_service(&self, n: u32) { self.state.borrow_mut().fail_service = n; }
    /// Make the next `n` connect attempts fail.
    pub fn fail_connect(&self, n: u32) { self.state.borrow_mut().fail_connect = n; }
    /// Make the next `n` disconnect attempts fail.
    pub fn fail_disconnect(&self, n: u32) { self.state.borrow_mut().fail_disconnect = n; }

    pub fn published(&self) -> Vec<(String, String)> { self.state.borrow().published.clone() }
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.state
            .borrow()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }
    pub fn subscriptions(&self) -> Vec<String> { self.state.borrow().subscribed.clone() }
    pub fn connects(&self) -> u32 { self.state.borrow().connects }
    pub fn disconnects(&self) -> u32 { self.state.borrow().disconnects }
    pub fn is_connected(&self) -> bool { self.state.borrow().connected }
}

impl BusClient for SimBus {
    fn broker(&self) -> String { self.broker.clone() }

    async fn connect(&mut self) -> Result<(), BusFault> {
        self.journal.record("bus.connect");
        let mut st = self.state.borrow_mut();
        st.connects += 1;
        if st.fail_connect > 0 {
            st.fail_connect -= 1;
            return Err(BusFault::Connect(format!("{} refused the connection", self.broker)));
        }
        st.connected = true;
        // a new session starts clean; nothing from the old one is delivered
        st.inbox.clear();
        st.inbox.push_back(BusEvent::Connected);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BusFault> {
        self.journal.record("bus.disconnect");
        let mut st = self.state.borrow_mut();
        st.disconnects += 1;
        if st.fail_disconnect > 0 {
            st.fail_disconnect -= 1;
            return Err(BusFault::Disconnect("socket already closed".to_string()));
        }
        st.connected = false;
        st.inbox.push_back(BusEvent::Disconnected);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BusFault> {
        let mut st = self.state.borrow_mut();
        if !st.connected {
            return Err(BusFault::Request(format!("publish to {topic} while disconnected")));
        }
        st.published.push((topic.to_string(), payload.to_string()));
        st.inbox.push_back(BusEvent::Published(topic.to_string()));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BusFault> {
        let mut st = self.state.borrow_mut();
        if !st.connected {
            return Err(BusFault::Request(format!("subscribe to {topic} while disconnected")));
        }
        st.subscribed.push(topic.to_string());
        st.inbox.push_back(BusEvent::Subscribed(topic.to_string()));
        Ok(())
    }

    async fn service(&mut self, _timeout: Duration) -> Result<Vec<BusEvent>, BusFault> {
        let mut st = self.state.borrow_mut();
        if st.fail_service > 0 {
            st.fail_service -= 1;
            return Err(BusFault::Service("connection reset by peer".to_string()));
        }
        if !st.connected && st.inbox.is_empty() {
            return Err(BusFault::Service("not connected".to_string()));
        }
        Ok(st.inbox.drain(..).collect())
    }
}

/* --------------------- network --------------------- */

#[cfg_attr(not(test), allow(dead_code))]
#[derive(Default)]
struct NetState {
    connects: u32,
    resets: u32,
    fail_connect: u32,
    fail_reset: u32,
}

#[derive(Clone, Default)]
pub struct SimNetwork {
    state: Rc<RefCell<NetState>>,
    journal: Journal,
}

impl SimNetwork {
    pub fn new(journal: Journal) -> Self {
        Self { state: Rc::default(), journal }
    }
}

#[cfg(test)]
impl SimNetwork {
    pub fn fail_connect(&self, n: u32) { self.state.borrow_mut().fail_connect = n; }
    pub fn fail_reset(&self, n: u32) { self.state.borrow_mut().fail_reset = n; }
    pub fn connects(&self) -> u32 { self.state.borrow().connects }
    pub fn resets(&self) -> u32 { self.state.borrow().resets }
}

impl NetworkAdapter for SimNetwork {
    fn connect(&mut self) -> Result<(), RuntimeFault> {
        self.journal.record("net.connect");
        let mut st = self.state.borrow_mut();
        st.connects += 1;
        if st.fail_connect > 0 {
            st.fail_connect -= 1;
            return Err(RuntimeFault("no access point found".to_string()));
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), RuntimeFault> {
        self.journal.record("net.reset");
        let mut st = self.state.borrow_mut();
        st.resets += 1;
        if st.fail_reset > 0 {
            st.fail_reset -= 1;
            return Err(RuntimeFault("adapter did not come back after reset".to_string()));
        }
        Ok(())
    }

    fn ip_address(&self) -> String { "127.0.0.1".to_string() }
}

/* --------------------- sensors --------------------- */

struct SensorState {
    celsius: f64,
    light: u16,
    fail_reads: u32,
}

#[derive(Clone)]
pub struct SimSensors(Rc<RefCell<SensorState>>);

impl Default for SimSensors {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(SensorState { celsius: 21.5, light: 32_000, fail_reads: 0 })))
    }
}

impl SimSensors {
    #[cfg(test)]
    pub fn set(&self, celsius: f64, light: u16) {
        let mut st = self.0.borrow_mut();
        st.celsius = celsius;
        st.light = light;
    }
    /// Make the next `n` reads fail.
    #[cfg(test)]
    pub fn fail_reads(&self, n: u32) { self.0.borrow_mut().fail_reads = n; }

    fn take_failure(&self) -> Result<(), RuntimeFault> {
        let mut st = self.0.borrow_mut();
        if st.fail_reads > 0 {
            st.fail_reads -= 1;
            return Err(RuntimeFault("i2c read timed out".to_string()));
        }
        Ok(())
    }
}

impl Sensors for SimSensors {
    fn read_temperature(&mut self) -> Result<f64, RuntimeFault> {
        self.take_failure()?;
        Ok(self.0.borrow().celsius)
    }

    fn read_light_level(&mut self) -> Result<u16, RuntimeFault> {
        self.take_failure()?;
        Ok(self.0.borrow().light)
    }
}

/* --------------------- display --------------------- */

// what was drawn is kept for tests to inspect
#[cfg_attr(not(test), allow(dead_code))]
struct DisplayState {
    brightness: f64,
    celsius: bool,
    am_pm: bool,
    weather: Option<WeatherSummary>,
    inside: Option<i64>,
    clock: String,
    calendar: String,
}

/// Logs what a real screen would draw.
#[derive(Clone)]
pub struct SimDisplay(Rc<RefCell<DisplayState>>);

impl Default for SimDisplay {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(DisplayState {
            brightness: 0.0,
            celsius: false,
            am_pm: true,
            weather: None,
            inside: None,
            clock: String::new(),
            calendar: String::new(),
        })))
    }
}

#[cfg(test)]
impl SimDisplay {
    pub fn weather(&self) -> Option<WeatherSummary> { self.0.borrow().weather.clone() }
    pub fn inside(&self) -> Option<i64> { self.0.borrow().inside }
    pub fn clock(&self) -> String { self.0.borrow().clock.clone() }
    pub fn calendar(&self) -> String { self.0.borrow().calendar.clone() }
}

impl Display for SimDisplay {
    fn set_brightness(&mut self, level: f64) {
        debug!(level, "backlight");
        self.0.borrow_mut().brightness = level;
    }

    fn brightness(&self) -> f64 { self.0.borrow().brightness }

    fn display_weather(&mut self, payload: &str) -> Result<(), InputFault> {
        let w = WeatherSummary::from_json(payload)?;
        let mut st = self.0.borrow_mut();
        info!(
            icon = %w.icon,
            "{} | {} | {} | {} | {}",
            w.city,
            w.main,
            w.temperature_text(st.celsius),
            w.description,
            w.wind_text()
        );
        st.weather = Some(w);
        Ok(())
    }

    fn display_inside_temperature(&mut self, value: i64) {
        info!("inside: {value} °F");
        self.0.borrow_mut().inside = Some(value);
    }

    fn update_time(&mut self, now: &NaiveDateTime) {
        let mut st = self.0.borrow_mut();
        st.clock = clock_text(now, st.am_pm);
        st.calendar = calendar_text(now);
        debug!("{} {}", st.calendar, st.clock);
    }
}

/* --------------------- board --------------------- */

#[cfg_attr(not(test), allow(dead_code))]
#[derive(Default)]
struct BoardState {
    led: bool,
    pixel: (u8, u8, u8),
    mem_free: Option<u64>,
}

#[derive(Clone, Default)]
pub struct SimBoard(Rc<RefCell<BoardState>>);

#[cfg(test)]
impl SimBoard {
    pub fn pixel(&self) -> (u8, u8, u8) { self.0.borrow().pixel }
    pub fn set_mem_free(&self, bytes: u64) { self.0.borrow_mut().mem_free = Some(bytes); }
}

impl Board for SimBoard {
    fn set_led(&mut self, on: bool) { self.0.borrow_mut().led = on; }
    fn led(&self) -> bool { self.0.borrow().led }
    fn set_pixel(&mut self, rgb: (u8, u8, u8)) { self.0.borrow_mut().pixel = rgb; }
    fn mem_free(&self) -> Option<u64> { self.0.borrow().mem_free }
}

/* --------------------- clock --------------------- */

/// Wall clock that starts at host local time and can be set.
#[derive(Clone)]
pub struct SimClock(Rc<RefCell<(NaiveDateTime, Instant)>>);

impl Default for SimClock {
    fn default() -> Self {
        Self(Rc::new(RefCell::new((chrono::Local::now().naive_local(), Instant::now()))))
    }
}

impl Clock for SimClock {
    fn now(&self) -> NaiveDateTime {
        let (base, at) = *self.0.borrow();
        base + chrono::Duration::from_std(at.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn set(&mut self, time: &LocalTime) -> Result<(), RuntimeFault> {
        info!("clock set to {}", time.datetime);
        *self.0.borrow_mut() = (time.datetime, Instant::now());
        Ok(())
    }
}

/* --------------------- watchdog --------------------- */

#[cfg(test)]
#[derive(Default)]
struct DogState {
    timeout: Option<Duration>,
    feeds: u32,
    disarms: u32,
    fail_arm: bool,
}

/// Records watchdog calls instead of enforcing them.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct SimDog {
    state: Rc<RefCell<DogState>>,
    journal: Journal,
}

#[cfg(test)]
impl SimDog {
    pub fn new(journal: Journal) -> Self {
        Self { state: Rc::default(), journal }
    }

    pub fn fail_arm(&self) { self.state.borrow_mut().fail_arm = true; }
    pub fn feeds(&self) -> u32 { self.state.borrow().feeds }
    pub fn disarms(&self) -> u32 { self.state.borrow().disarms }
    pub fn armed(&self) -> bool { self.state.borrow().timeout.is_some() }
    pub fn timeout(&self) -> Option<Duration> { self.state.borrow().timeout }
}

#[cfg(test)]
impl WatchdogHw for SimDog {
    fn arm(&mut self, timeout: Duration) -> Result<(), RuntimeFault> {
        let mut st = self.state.borrow_mut();
        if st.fail_arm {
            return Err(RuntimeFault("watchdog peripheral busy".to_string()));
        }
        st.timeout = Some(timeout);
        Ok(())
    }

    fn feed(&mut self) {
        self.journal.record("dog.feed");
        self.state.borrow_mut().feeds += 1;
    }

    fn disarm(&mut self) -> Result<(), RuntimeFault> {
        let mut st = self.state.borrow_mut();
        st.timeout = None;
        st.disarms += 1;
        Ok(())
    }
}

/* --------------------- rig --------------------- */

/// One of each sim, with handles kept for inspection.
#[derive(Clone)]
pub struct SimRig {
    // replaced by the broker client when built with `mqtt`
    #[cfg_attr(feature = "mqtt", allow(dead_code))]
    pub bus: SimBus,
    pub network: SimNetwork,
    pub sensors: SimSensors,
    pub display: SimDisplay,
    pub board: SimBoard,
    pub clock: SimClock,
    #[cfg(test)]
    pub dog: SimDog,
    #[cfg(test)]
    pub journal: Journal,
}

impl SimRig {
    pub fn new(broker: &str) -> Self {
        let journal = Journal::default();
        Self {
            bus: SimBus::new(broker, journal.clone()),
            network: SimNetwork::new(journal.clone()),
            sensors: SimSensors::default(),
            display: SimDisplay::default(),
            board: SimBoard::default(),
            clock: SimClock::default(),
            #[cfg(test)]
            dog: SimDog::new(journal.clone()),
            #[cfg(test)]
            journal,
        }
    }

    /// A device wired to this rig's sims.
    pub fn device(&self) -> Device {
        Device::new(
            Box::new(self.network.clone()),
            Box::new(self.sensors.clone()),
            Box::new(self.display.clone()),
            Box::new(self.board.clone()),
            Box::new(self.clock.clone()),
        )
    }
}
