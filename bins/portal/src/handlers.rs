//! Inbound message handlers.
//!
//! Every handler owns its failure handling: a bad payload is logged and
//! counted under the handler's own counter name, and nothing is returned
//! to the bridge.

use portal_core::directive::{parse_blink_rate, parse_brightness, parse_local_time, parse_pixel, BlinkDirective};
use portal_core::fault::{InputFault, JobError};
use portal_core::job::{secs_to_ms, Action, JobSpec, JobTable, LED_BLINK, LOCALTIME, SEND_STATUS, WEATHER};
use tracing::{debug, info, warn};

use crate::device::Device;

/// What to do with a message on a routed topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Ping,
    Brightness,
    Neopixel,
    BlinkRate,
    Weather,
    LocalTime,
    InsideTemperature,
}

/// State a handler may change.
pub struct HandlerCtx<'a> {
    pub dev: &'a mut Device,
    pub jobs: &'a mut JobTable,
    pub now_ms: u64,
}

pub fn dispatch(route: Route, topic: &str, payload: &str, ctx: &mut HandlerCtx<'_>) {
    debug!(topic, len = payload.len(), ?route, "message");
    match route {
        Route::Ping => ping(ctx),
        Route::Brightness => brightness(ctx, payload),
        Route::Neopixel => neopixel(ctx, payload),
        Route::BlinkRate => blink_rate(ctx, payload),
        Route::Weather => weather(ctx, payload),
        Route::LocalTime => local_time(ctx, payload),
        Route::InsideTemperature => inside_temperature(ctx, payload),
    }
}

fn ping(ctx: &mut HandlerCtx<'_>) {
    // status goes out on the next job pass
    ctx.jobs.clear_last_run(SEND_STATUS);
    ctx.dev.counters.inc("ping");
}

fn brightness(ctx: &mut HandlerCtx<'_>, payload: &str) {
    match parse_brightness(payload) {
        Some(level) => ctx.dev.display.set_brightness(level),
        None => warn!("ignoring brightness {payload:?}"),
    }
    ctx.dev.counters.inc("brightness");
}

fn neopixel(ctx: &mut HandlerCtx<'_>, payload: &str) {
    match parse_pixel(payload) {
        Ok(rgb) => {
            ctx.dev.board.set_pixel(rgb);
            ctx.dev.counters.inc("neo");
        }
        Err(e) => {
            warn!("{e}");
            ctx.dev.counters.inc("neo_bad");
        }
    }
}

fn blink_rate(ctx: &mut HandlerCtx<'_>, payload: &str) {
    match parse_blink_rate(payload) {
        Ok(BlinkDirective::Every(secs)) => {
            let spec = JobSpec { period_ms: secs_to_ms(secs).max(1), action: Action::LedBlink };
            if let Err(e) = ctx.jobs.upsert(LED_BLINK, spec) {
                warn!("blink rate {payload:?}: {e}");
                ctx.dev.counters.inc("blink_bad");
                return;
            }
            info!("led blinks every {secs}s");
        }
        Ok(BlinkDirective::Stop { led_on }) => {
            ctx.jobs.remove(LED_BLINK);
            ctx.dev.board.set_led(led_on);
            info!("led blink stopped, led {}", if led_on { "on" } else { "off" });
        }
        Err(e) => {
            warn!("{e}");
            ctx.dev.counters.inc("blink_bad");
            return;
        }
    }
    ctx.dev.counters.inc("blink");
}

fn weather(ctx: &mut HandlerCtx<'_>, payload: &str) {
    match ctx.dev.display.display_weather(payload) {
        Ok(()) => {
            // fresh data, skip the next scheduled fetch
            ctx.jobs.mark_run(WEATHER, ctx.now_ms);
            ctx.dev.counters.inc("weather_mqtt");
        }
        Err(e) => {
            warn!("weather message: {e}");
            ctx.dev.counters.inc("weather_mqtt_failed");
        }
    }
}

fn local_time(ctx: &mut HandlerCtx<'_>, payload: &str) {
    debug!("local time: {payload}");
    let synced = parse_local_time(payload)
        .map_err(JobError::from)
        .and_then(|t| ctx.dev.clock.set(&t).map_err(JobError::from));
    match synced {
        Ok(()) => {
            ctx.jobs.mark_run(LOCALTIME, ctx.now_ms);
            ctx.dev.counters.inc("local_time_mqtt");
        }
        Err(e) => {
            warn!("local time message: {e}");
            ctx.dev.counters.inc("local_time_mqtt_failed");
        }
    }
}

fn inside_temperature(ctx: &mut HandlerCtx<'_>, payload: &str) {
    let parsed = payload
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| InputFault(format!("bad inside temperature {payload:?}")));
    match parsed {
        Ok(v) => {
            ctx.dev.display.display_inside_temperature(v.round() as i64);
            ctx.dev.counters.inc("inside_temp");
        }
        Err(e) => {
            warn!("{e}");
            ctx.dev.counters.inc("inside_temp_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRig;
    use portal_core::cfg::JobPeriods;
    use crate::hal::{Board, Display};

    struct Fixture {
        rig: SimRig,
        dev: Device,
        jobs: JobTable,
    }

    impl Fixture {
        fn new() -> Self {
            let rig = SimRig::new("test");
            let dev = rig.device();
            let jobs = JobTable::with_defaults(&JobPeriods::default()).unwrap();
            Self { rig, dev, jobs }
        }

        fn send(&mut self, route: Route, payload: &str, now_ms: u64) {
            let mut ctx = HandlerCtx { dev: &mut self.dev, jobs: &mut self.jobs, now_ms };
            dispatch(route, "topic", payload, &mut ctx);
        }
    }

    #[test]
    fn ping_makes_status_due() {
        let mut f = Fixture::new();
        f.jobs.mark_run(SEND_STATUS, 1_000);
        assert!(!f.jobs.is_due(SEND_STATUS, 2_000));
        f.send(Route::Ping, "", 2_000);
        assert!(f.jobs.is_due(SEND_STATUS, 2_000));
        assert_eq!(f.dev.counters.get("ping"), 1);
    }

    #[test]
    fn brightness_applies_or_keeps_level() {
        let mut f = Fixture::new();
        f.send(Route::Brightness, "0.73", 0);
        assert_eq!(f.rig.display.brightness(), 0.73);
        f.send(Route::Brightness, "dim please", 0);
        assert_eq!(f.rig.display.brightness(), 0.73);
        f.send(Route::Brightness, "MID", 0);
        assert_eq!(f.rig.display.brightness(), 0.5);
        assert_eq!(f.dev.counters.get("brightness"), 3);
    }

    #[test]
    fn neopixel_sets_color_and_ignores_garbage() {
        let mut f = Fixture::new();
        f.send(Route::Neopixel, "255", 0);
        assert_eq!(f.rig.board.pixel(), (0, 0, 255));
        f.send(Route::Neopixel, "blue", 0);
        assert_eq!(f.rig.board.pixel(), (0, 0, 255));
        assert_eq!(f.dev.counters.get("neo"), 1);
        assert_eq!(f.dev.counters.get("neo_bad"), 1);
    }

    #[test]
    fn blink_rate_reconfigures_job() {
        let mut f = Fixture::new();
        f.send(Route::BlinkRate, "45", 0);
        assert_eq!(f.jobs.get(LED_BLINK).unwrap().spec.period_ms, 45_000);

        f.send(Route::BlinkRate, "off", 0);
        assert!(f.jobs.get(LED_BLINK).is_none());
        assert!(!f.rig.board.led());

        f.send(Route::BlinkRate, "on", 0);
        assert!(f.jobs.get(LED_BLINK).is_none());
        assert!(f.rig.board.led());

        f.send(Route::BlinkRate, "", 0);
        assert_eq!(f.jobs.get(LED_BLINK).unwrap().spec.period_ms, 60_000);
        assert!(f.jobs.is_due(LED_BLINK, 0));

        f.send(Route::BlinkRate, "sometimes", 0);
        assert_eq!(f.jobs.get(LED_BLINK).unwrap().spec.period_ms, 60_000);
        assert_eq!(f.dev.counters.get("blink"), 4);
        assert_eq!(f.dev.counters.get("blink_bad"), 1);
    }

    #[test]
    fn weather_message_suppresses_fetch() {
        let mut f = Fixture::new();
        let payload = r#"{"weather":[{"main":"Rain","description":"light rain","icon":"10d"}],
            "main":{"temp":50.0},"wind":{"speed":3.0},"sys":{"country":"NL"},"name":"Delft"}"#;
        f.send(Route::Weather, payload, 5_000);
        assert!(!f.jobs.is_due(WEATHER, 5_000));
        assert_eq!(f.rig.display.weather().unwrap().city, "Delft, NL");
        assert_eq!(f.dev.counters.get("weather_mqtt"), 1);

        f.send(Route::Weather, "{", 6_000);
        assert_eq!(f.dev.counters.get("weather_mqtt_failed"), 1);
    }

    #[test]
    fn local_time_sets_clock_or_counts_failure() {
        use chrono::{Datelike, Timelike};
        use crate::hal::Clock;

        let mut f = Fixture::new();
        f.send(Route::LocalTime, "2021-01-15 23:07:36.339 015 5 -0500 EST", 7_000);
        let now = f.rig.clock.now();
        assert_eq!((now.year(), now.month(), now.day(), now.hour()), (2021, 1, 15, 23));
        assert!(!f.jobs.is_due(LOCALTIME, 7_000));
        assert_eq!(f.dev.counters.get("local_time_mqtt"), 1);

        f.send(Route::LocalTime, "tomorrow", 8_000);
        assert_eq!(f.dev.counters.get("local_time_mqtt_failed"), 1);
        assert_eq!(f.dev.counters.get("local_time_mqtt"), 1);
    }

    #[test]
    fn inside_temperature_rounds() {
        let mut f = Fixture::new();
        f.send(Route::InsideTemperature, "68.6", 0);
        assert_eq!(f.rig.display.inside(), Some(69));
        f.send(Route::InsideTemperature, "warm", 0);
        assert_eq!(f.rig.display.inside(), Some(69));
        assert_eq!(f.dev.counters.get("inside_temp"), 1);
        assert_eq!(f.dev.counters.get("inside_temp_failed"), 1);
    }
}
