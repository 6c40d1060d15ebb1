//! Counter definitions and samples.
//!
//! A counter is identified by `host\category\counter[\instance]`. That string is the
//! key for stale-interval tracking and handle caching, so two configs with the same
//! tuple are the same counter even if their label or output file differ.

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The (host, category, counter, instance) tuple naming a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterIdentity {
    pub host: String,
    pub category: String,
    pub counter: String,
    pub instance: Option<String>,
}

impl CounterIdentity {
    pub fn new(
        host: impl Into<String>,
        category: impl Into<String>,
        counter: impl Into<String>,
        instance: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            category: category.into(),
            counter: counter.into(),
            instance: instance.filter(|i| !i.is_empty()),
        }
    }

    /// Cache key, identical to the display form.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CounterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}\\{}", self.host, self.category, self.counter)?;
        if let Some(instance) = &self.instance {
            write!(f, "\\{}", instance)?;
        }
        Ok(())
    }
}

/// How a counter's value is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ValueKind {
    /// Instantaneous raw value.
    #[default]
    Raw,
    /// Rate since the previous read, rounded to the nearest integer.
    Rate,
}

impl ValueKind {
    /// Lenient parse: anything unrecognised is `Raw`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "rate" | "nextvalue" | "nextsample" => ValueKind::Rate,
            _ => ValueKind::Raw,
        }
    }
}

impl<'de> Deserialize<'de> for ValueKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Ordinals: 0 = Raw, 1 = NextValue, 2 = NextSample.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Ordinal(i64),
        }
        Ok(match Option::<Repr>::deserialize(deserializer)? {
            Some(Repr::Text(s)) => ValueKind::parse_lenient(&s),
            Some(Repr::Ordinal(1)) | Some(Repr::Ordinal(2)) => ValueKind::Rate,
            Some(Repr::Ordinal(_)) | None => ValueKind::Raw,
        })
    }
}

/// One entry of the counter configuration document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CounterConfig {
    pub server: String,
    pub category: String,
    pub counter_name: String,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub pretty_name: String,
    #[serde(default)]
    pub value_type: ValueKind,
    #[serde(deserialize_with = "deserialize_check_frequency")]
    pub check_frequency: Duration,
    pub output_file: PathBuf,
}

impl CounterConfig {
    pub fn identity(&self) -> CounterIdentity {
        CounterIdentity::new(
            self.server.clone(),
            self.category.clone(),
            self.counter_name.clone(),
            self.instance_name.clone(),
        )
    }

    /// Instance name with empty strings treated as absent.
    pub fn instance(&self) -> Option<&str> {
        self.instance_name.as_deref().filter(|i| !i.is_empty())
    }
}

impl fmt::Display for CounterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.identity().fmt(f)
    }
}

/// Parses `[d.]hh:mm:ss[.fffffff]`.
pub fn parse_time_span(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.starts_with('-') {
        return None;
    }

    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        // A bare integer is a day count.
        let days = s.parse::<u64>().ok()?;
        return days.checked_mul(86_400).map(Duration::from_secs);
    }

    let (days, hours) = match parts[0].split_once('.') {
        Some((d, h)) => (d.parse::<u64>().ok()?, h.parse::<u64>().ok()?),
        None => (0, parts[0].parse::<u64>().ok()?),
    };
    let minutes = parts[1].parse::<u64>().ok()?;
    let (seconds, fraction) = match parts[2].split_once('.') {
        Some((sec, frac)) => (sec.parse::<u64>().ok()?, Some(frac)),
        None => (parts[2].parse::<u64>().ok()?, None),
    };
    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }

    let mut nanos = 0u32;
    if let Some(frac) = fraction {
        if frac.is_empty() || frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let padded = format!("{:0<9}", frac);
        nanos = padded.parse::<u32>().ok()?;
    }

    let total = days
        .checked_mul(86_400)?
        .checked_add(hours * 3_600 + minutes * 60 + seconds)?;
    Some(Duration::new(total, nanos))
}

fn deserialize_check_frequency<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Seconds(f64),
    }
    match Repr::deserialize(deserializer)? {
        Repr::Text(s) => parse_time_span(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid CheckFrequency '{}'", s))),
        Repr::Seconds(secs) => Duration::try_from_secs_f64(secs).map_err(|e| {
            serde::de::Error::custom(format!("invalid CheckFrequency {}: {}", secs, e))
        }),
    }
}

/// A single sample.
///
/// `config` routes the result to its output file and is never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct CounterResult {
    pub timestamp: DateTime<Local>,
    pub host: String,
    pub counter: String,
    pub instance: Option<String>,
    pub value: i64,
    #[serde(skip)]
    pub config: Arc<CounterConfig>,
}

impl CounterResult {
    /// `<identity>; <date> <time>; <value>`, with a fixed `%Y-%m-%d %H:%M:%S`
    /// timestamp whatever the host locale.
    pub fn display_row(&self) -> String {
        format!(
            "{}; {}; {}",
            self.config,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.value
        )
    }
}
