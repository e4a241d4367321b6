use std::collections::BTreeMap;

use serde::Serialize;

use crate::device::Device;

/// What the status job publishes. Built on demand, never stored.
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub lux: u16,
    pub uptime_mins: u64,
    pub brightness: f64,
    pub ip: String,
    pub counters: BTreeMap<String, u64>,
    pub mem_free: Option<u64>,
}

impl StatusSnapshot {
    pub fn collect(dev: &Device, lux: u16, uptime_ms: u64) -> Self {
        Self {
            lux,
            uptime_mins: uptime_ms / 60_000,
            brightness: dev.display.brightness(),
            ip: dev.network.ip_address(),
            counters: dev.counters.snapshot(),
            mem_free: dev.board.mem_free(),
        }
    }
}

/// Celsius to Fahrenheit.
pub fn fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// 16-bit light reading mapped onto 10 bits.
pub fn light_10bit(raw: u16) -> u16 {
    raw / 64
}
