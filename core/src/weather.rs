//! Text shown on the weather screen.
//!
//! Drawing is someone else's job; this module only turns the weather
//! payload and the wall clock into the strings that get drawn.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Deserialize;

use crate::fault::InputFault;

#[derive(Deserialize)]
struct Payload {
    name: String,
    sys: Sys,
    weather: Vec<Condition>,
    main: Main,
    wind: Wind,
}

#[derive(Deserialize)]
struct Sys {
    country: String,
}

#[derive(Deserialize)]
struct Condition {
    main: String,
    description: String,
    icon: String,
}

#[derive(Deserialize)]
struct Main {
    temp: f64,
}

#[derive(Deserialize)]
struct Wind {
    speed: f64,
}

/// Fields of a weather report that end up on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSummary {
    /// Icon code, e.g. `"01d"`.
    pub icon: String,
    /// `"City, CC"`.
    pub city: String,
    /// Short condition, e.g. `"Clouds"`.
    pub main: String,
    /// Temperature in Fahrenheit (the feed uses imperial units).
    pub temp_f: f64,
    /// Description with the first letter capitalised.
    pub description: String,
    /// Wind speed in mph, truncated.
    pub wind_mph: i64,
}

impl WeatherSummary {
    /// Parse an OpenWeatherMap "current weather" JSON document.
    pub fn from_json(raw: &str) -> Result<Self, InputFault> {
        let p: Payload = serde_json::from_str(raw)
            .map_err(|e| InputFault(format!("bad weather payload: {e}")))?;
        let cond = p
            .weather
            .into_iter()
            .next()
            .ok_or_else(|| InputFault("weather payload has no conditions".to_string()))?;
        Ok(Self {
            icon: cond.icon,
            city: format!("{}, {}", p.name, p.sys.country),
            main: cond.main,
            temp_f: p.main.temp,
            description: capitalize(&cond.description),
            wind_mph: p.wind.speed as i64,
        })
    }

    /// Temperature label, `"72 °F"` or `"22 °C"`.
    pub fn temperature_text(&self, celsius: bool) -> String {
        if celsius {
            format!("{} °C", ((self.temp_f - 32.0) * 5.0 / 9.0) as i64)
        } else {
            format!("{} °F", self.temp_f as i64)
        }
    }

    /// Wind label, `"Wind: 12 mph"`.
    pub fn wind_text(&self) -> String {
        format!("Wind: {} mph", self.wind_mph)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Clock label: `"9:05 pm"` in 12-hour mode, `"21:05"` otherwise.
pub fn clock_text(now: &NaiveDateTime, am_pm: bool) -> String {
    let (hour, minute) = (now.hour(), now.minute());
    if !am_pm {
        return format!("{hour}:{minute:02}");
    }
    let suffix = if hour >= 12 { "pm" } else { "am" };
    let h12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{h12}:{minute:02} {suffix}")
}

/// Calendar label: `"Fri, 15/Jan/2021"`.
pub fn calendar_text(now: &NaiveDateTime) -> String {
    format!("{}, {}/{}/{}", now.format("%a"), now.day(), now.format("%b"), now.year())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"{
        "weather": [{"id": 803, "main": "Clouds", "description": "broken clouds", "icon": "04n"}],
        "main": {"temp": 41.9, "humidity": 70},
        "wind": {"speed": 9.8, "deg": 250},
        "sys": {"country": "US"},
        "name": "Boston"
    }"#;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, 15).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn summary_from_openweather_payload() {
        let w = WeatherSummary::from_json(SAMPLE).unwrap();
        assert_eq!(w.icon, "04n");
        assert_eq!(w.city, "Boston, US");
        assert_eq!(w.main, "Clouds");
        assert_eq!(w.description, "Broken clouds");
        assert_eq!(w.temperature_text(false), "41 °F");
        assert_eq!(w.temperature_text(true), "5 °C");
        assert_eq!(w.wind_text(), "Wind: 9 mph");
    }

    #[test]
    fn malformed_payload_is_input_fault() {
        assert!(WeatherSummary::from_json("not json").is_err());
        assert!(WeatherSummary::from_json(r#"{"name": "x"}"#).is_err());
    }

    #[test]
    fn clock_wraps_to_twelve_hours() {
        assert_eq!(clock_text(&at(0, 5), true), "12:05 am");
        assert_eq!(clock_text(&at(12, 0), true), "12:00 pm");
        assert_eq!(clock_text(&at(23, 7), true), "11:07 pm");
        assert_eq!(clock_text(&at(9, 30), false), "9:30");
    }

    #[test]
    fn calendar_line() {
        assert_eq!(calendar_text(&at(8, 0)), "Fri, 15/Jan/2021");
    }
}
