//! Duration values in config files.
//!
//! Accepted forms:
//! - humantime strings: `"30s"`, `"5m"`, `"1h 30m"`
//! - clock strings: `"00:00:30"`, `"00:00:22.5"`, `"1.02:00:00"` (`[d.]hh:mm:ss[.frac]`)
//! - bare numbers, read as seconds: `30`, `22.5`
//!
//! Serialisation always writes the humantime form.

use std::time::Duration;

use serde::de::{self, Deserializer, Visitor};
use serde::Serializer;

/// Parse a duration string in humantime, clock or plain-seconds form.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<f64>() {
        Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{s}': {e}"))
    } else if s.contains(':') {
        parse_clock(s)
    } else {
        humantime::parse_duration(s).map_err(|e| format!("invalid duration '{s}': {e}"))
    }
}

fn parse_clock(s: &str) -> Result<Duration, String> {
    let err = || format!("invalid duration '{s}': expected [d.]hh:mm:ss[.frac]");

    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err(err());
    }

    let (days, hours) = match parts[0].split_once('.') {
        Some((d, h)) => (d.parse::<u64>().map_err(|_| err())?, h),
        None => (0, parts[0]),
    };
    let hours: u64 = hours.parse().map_err(|_| err())?;
    let minutes: u64 = parts[1].parse().map_err(|_| err())?;
    let seconds: f64 = parts[2].parse().map_err(|_| err())?;

    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return Err(err());
    }

    let whole = days * 86_400 + hours * 3_600 + minutes * 60;
    Ok(Duration::from_secs(whole) + Duration::from_secs_f64(seconds))
}

pub fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_duration(*d))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    deserializer.deserialize_any(DurationVisitor)
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a duration string (\"30s\", \"00:00:30\") or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        parse_duration(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom(format!("negative duration: {v}")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
        Duration::try_from_secs_f64(v).map_err(|e| E::custom(format!("invalid duration {v}: {e}")))
    }
}
