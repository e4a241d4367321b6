//! Narrow interfaces to the device's collaborators.
//!
//! The loop only ever talks to hardware and the broker through these
//! traits. `sim` has host implementations; a board support crate provides
//! the real ones.

use std::time::Duration;

use chrono::NaiveDateTime;
use portal_core::directive::LocalTime;
use portal_core::fault::{BusFault, InputFault, RuntimeFault};

/// Something the broker connection reported during a service tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Session established.
    Connected,
    /// Session lost or closed.
    Disconnected,
    /// A subscription was acknowledged.
    Subscribed(String),
    /// A publish went out.
    Published(String),
    /// Inbound message.
    Message {
        /// Topic it arrived on.
        topic: String,
        /// Payload as text.
        payload: String,
    },
}

/// Message-bus client.
///
/// `service` is the only call made every loop iteration; it must return
/// within `timeout`. `publish` and `subscribe` only queue work.
#[allow(async_fn_in_trait)]
pub trait BusClient {
    /// Broker address, for logs.
    fn broker(&self) -> String;
    /// Open a session.
    async fn connect(&mut self) -> Result<(), BusFault>;
    /// Close the session.
    async fn disconnect(&mut self) -> Result<(), BusFault>;
    /// Queue a publish.
    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BusFault>;
    /// Queue a subscription.
    fn subscribe(&mut self, topic: &str) -> Result<(), BusFault>;
    /// Do one bounded round of network work and return what happened.
    async fn service(&mut self, timeout: Duration) -> Result<Vec<BusEvent>, BusFault>;
}

/// Radio / network stack.
pub trait NetworkAdapter {
    /// Join the network.
    fn connect(&mut self) -> Result<(), RuntimeFault>;
    /// Hard-reset the adapter.
    fn reset(&mut self) -> Result<(), RuntimeFault>;
    /// Current address, for status reports.
    fn ip_address(&self) -> String;
}

/// On-board sensors.
pub trait Sensors {
    /// Temperature in Celsius.
    fn read_temperature(&mut self) -> Result<f64, RuntimeFault>;
    /// Raw 16-bit light level.
    fn read_light_level(&mut self) -> Result<u16, RuntimeFault>;
}

/// Screen and the renderer drawing on it.
pub trait Display {
    /// Backlight level in `[0, 1]`.
    fn set_brightness(&mut self, level: f64);
    /// Current backlight level.
    fn brightness(&self) -> f64;
    /// Render a raw weather payload.
    fn display_weather(&mut self, payload: &str) -> Result<(), InputFault>;
    /// Render the inside temperature (Fahrenheit).
    fn display_inside_temperature(&mut self, value: i64);
    /// Redraw clock and calendar for `now`.
    fn update_time(&mut self, now: &NaiveDateTime);
}

/// Board LED, status pixel and memory stats.
pub trait Board {
    /// Drive the board LED.
    fn set_led(&mut self, on: bool);
    /// Board LED state.
    fn led(&self) -> bool;
    /// Set the RGB indicator pixel.
    fn set_pixel(&mut self, rgb: (u8, u8, u8));
    /// Free heap bytes, where the platform can tell.
    fn mem_free(&self) -> Option<u64>;
}

/// Real-time clock.
pub trait Clock {
    /// Local wall-clock time.
    fn now(&self) -> NaiveDateTime;
    /// Set the clock.
    fn set(&mut self, time: &LocalTime) -> Result<(), RuntimeFault>;
}

/// Hardware dead-man's switch. Once armed it resets the device unless fed
/// within the timeout; the enforcement happens outside this process.
pub trait WatchdogHw {
    /// Start the countdown.
    fn arm(&mut self, timeout: Duration) -> Result<(), RuntimeFault>;
    /// Restart the countdown.
    fn feed(&mut self);
    /// Stop the countdown.
    fn disarm(&mut self) -> Result<(), RuntimeFault>;
}
