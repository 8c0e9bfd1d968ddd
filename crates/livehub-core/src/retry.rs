//! Reconnect policy for room sessions.
//!
//! The deterministic delay for retry `n` (1-based) is
//! `min(initial_delay * multiplier^(n-1), max_delay)`: non-decreasing in `n`
//! and back at `initial_delay` after a success resets the counter. Jitter is
//! applied on top so that many rooms dropped by the same outage do not all
//! retry at the same instant.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry configuration for room connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of reconnect attempts before the session fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fraction of the delay added as random jitter (0 disables).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Sets the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial and maximum delays.
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Sets the jitter ratio.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns true if another attempt is allowed after `attempts` attempts.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    /// Deterministic delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Delay before retry number `attempt`, with jitter, clamped to `max_delay`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = base.as_secs_f64() * self.jitter * rand::random::<f64>();
        let total = base.as_secs_f64() + extra;
        if !total.is_finite() || total >= self.max_delay.as_secs_f64() {
            self.max_delay.max(base)
        } else {
            Duration::from_secs_f64(total)
        }
    }
}

/// Serde module for human-readable durations (`"500ms"`, `"2s"`, `"1m"`).
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parses `"250ms"`, `"3s"`, `"2m"`, `"1h"`, or a bare number of seconds.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let parse = |n: &str| n.trim().parse::<u64>().map_err(|e| e.to_string());
        if let Some(ms) = s.strip_suffix("ms") {
            parse(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            parse(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            parse(mins).map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            parse(hours).map(|h| Duration::from_secs(h * 3600))
        } else {
            parse(s).map(Duration::from_secs)
        }
    }
}
