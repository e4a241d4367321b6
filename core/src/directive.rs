//! Control payload parsers.
//!
//! Each parser turns the raw text of a control message into a typed
//! directive, or an [`InputFault`] that the caller logs, counts and drops.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::fault::InputFault;
use crate::job::LED_BLINK_DEFAULT_SECS;

/// Parse a display brightness directive.
///
/// Accepts the keywords `on/off/mid/min/max/yes/no/y/n` (any case) or a
/// number, clamped to `[0, 1]`. Anything else yields `None`, which leaves
/// the brightness unchanged.
pub fn parse_brightness(raw: &str) -> Option<f64> {
    let s = raw.trim().to_ascii_lowercase();
    let value = match s.as_str() {
        "on" | "max" | "yes" | "y" => 1.0,
        "off" | "no" | "n" => 0.0,
        "mid" => 0.5,
        "min" => 0.01,
        other => other.parse::<f64>().ok()?,
    };
    if value.is_nan() {
        return None;
    }
    Some(value.clamp(0.0, 1.0))
}

/// What the blink-rate control message asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlinkDirective {
    /// Blink with this period (seconds).
    Every(f64),
    /// Stop blinking and leave the LED in the given state.
    Stop {
        /// LED state once blinking stops.
        led_on: bool,
    },
}

/// Parse a blink-rate directive.
///
/// `""` restores the default period, `off`/`no` (or `0`) stop with the LED
/// off, `on`/`yes` (or any negative value) stop with the LED on, and a
/// positive number sets the period in seconds.
pub fn parse_blink_rate(raw: &str) -> Result<BlinkDirective, InputFault> {
    let s = raw.trim().to_ascii_lowercase();
    match s.as_str() {
        "" => return Ok(BlinkDirective::Every(LED_BLINK_DEFAULT_SECS)),
        "off" | "no" => return Ok(BlinkDirective::Stop { led_on: false }),
        "on" | "yes" => return Ok(BlinkDirective::Stop { led_on: true }),
        _ => {}
    }
    if s.starts_with('-') {
        return Ok(BlinkDirective::Stop { led_on: true });
    }
    let secs: f64 = s
        .parse()
        .map_err(|e| InputFault(format!("bad blink value {raw:?}: {e}")))?;
    if !secs.is_finite() {
        return Err(InputFault(format!("bad blink value {raw:?}: not finite")));
    }
    if secs == 0.0 {
        Ok(BlinkDirective::Stop { led_on: false })
    } else {
        Ok(BlinkDirective::Every(secs))
    }
}

/// Parse a 24-bit RGB integer into `(r, g, b)`.
pub fn parse_pixel(raw: &str) -> Result<(u8, u8, u8), InputFault> {
    let v: i64 = raw
        .trim()
        .parse()
        .map_err(|e| InputFault(format!("bad neo value {raw:?}: {e}")))?;
    Ok((((v >> 16) & 0xFF) as u8, ((v >> 8) & 0xFF) as u8, (v & 0xFF) as u8))
}

/// A wall-clock reading pushed by the time service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    /// Date and time of day (fractional seconds dropped).
    pub datetime: NaiveDateTime,
    /// Day of the year, 1-based.
    pub year_day: u32,
    /// Day of the week as sent by the time service.
    pub week_day: u32,
}

/// Parse a time-sync payload such as
/// `2021-01-15 23:07:36.339 015 5 -0500 EST`.
///
/// Only the first four fields are used; the UTC offset and zone name are
/// ignored.
pub fn parse_local_time(raw: &str) -> Result<LocalTime, InputFault> {
    let bad = |why: &str| InputFault(format!("bad local time {raw:?}: {why}"));
    let mut fields = raw.split_whitespace();
    let (Some(date), Some(time), Some(yday), Some(wday)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(bad("expected date, time, year day and week day"));
    };

    let ymd = split_ints(date, '-').ok_or_else(|| bad("date"))?;
    let &[year, month, mday] = ymd.as_slice() else { return Err(bad("date")) };
    let whole = time.split('.').next().unwrap_or(time);
    let hms = split_ints(whole, ':').ok_or_else(|| bad("time"))?;
    let &[hour, minute, second] = hms.as_slice() else { return Err(bad("time")) };

    let date = NaiveDate::from_ymd_opt(year, month as u32, mday as u32)
        .ok_or_else(|| bad("date out of range"))?;
    let tod = NaiveTime::from_hms_opt(hour as u32, minute as u32, second as u32)
        .ok_or_else(|| bad("time out of range"))?;
    let year_day: u32 = yday.parse().map_err(|_| bad("year day"))?;
    let week_day: u32 = wday.parse().map_err(|_| bad("week day"))?;

    Ok(LocalTime { datetime: NaiveDateTime::new(date, tod), year_day, week_day })
}

fn split_ints(s: &str, sep: char) -> Option<Vec<i32>> {
    s.split(sep).map(|p| p.parse::<i32>().ok()).collect()
}
