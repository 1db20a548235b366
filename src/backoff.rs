//! Retry configuration and the backoff schedule derived from it.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::FetchError;

/// How the delay grows between retries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// `delay * n` before the n-th retry.
    #[default]
    Linear,
    /// `delay * 2^(n - 1)` before the n-th retry.
    Exponential,
}

impl std::str::FromStr for Strategy {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(FetchError::config(format!(
                "retry strategy not supported ({other})"
            ))),
        }
    }
}

/// Randomization applied on top of the computed delay.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    #[default]
    None,
    /// Uniform in `0..=delay`.
    Full,
    /// Uniform in `delay/2..=delay`.
    Equal,
}

/// Bounded retry settings. Absence of a config means a single attempt.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max: u32,
    /// Base delay in milliseconds.
    pub delay_ms: u64,
    pub strategy: Strategy,
    pub jitter: Jitter,
    /// Upper bound applied before jitter.
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max: 3,
            delay_ms: 0,
            strategy: Strategy::Linear,
            jitter: Jitter::None,
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn new(max: u32, delay_ms: u64) -> Self {
        Self {
            max,
            delay_ms,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let factor = match self.strategy {
            Strategy::Linear => u64::from(retry),
            Strategy::Exponential => 1u64 << (retry - 1).min(16),
        };
        let mut delay_ms = self.delay_ms.saturating_mul(factor);
        if let Some(max_delay_ms) = self.max_delay_ms {
            delay_ms = delay_ms.min(max_delay_ms);
        }
        Duration::from_millis(delay_ms)
    }
}

/// Decision returned for a retryable failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackoffStep {
    /// Wait this long, then start the next attempt.
    Wait(Duration),
    /// Retry budget exhausted; settle with the triggering error.
    GiveUp,
}

/// Lazy schedule of backoff steps for one fetch.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: Option<RetryConfig>,
    retries: u32,
}

impl Backoff {
    pub fn new(config: Option<RetryConfig>) -> Self {
        Self { config, retries: 0 }
    }

    /// Number of retries granted so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Consumes one step of the schedule for `error`.
    pub fn next_step(&mut self, error: &FetchError) -> BackoffStep {
        let Some(config) = &self.config else {
            return BackoffStep::GiveUp;
        };
        if self.retries >= config.max {
            return BackoffStep::GiveUp;
        }

        self.retries += 1;
        let delay = apply_jitter(config.base_delay(self.retries), config.jitter);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            retry = self.retries,
            max = config.max,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            %error,
            "scheduling retry"
        );

        #[cfg(not(feature = "tracing"))]
        let _ = error;

        BackoffStep::Wait(delay)
    }
}

fn apply_jitter(delay: Duration, jitter: Jitter) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms == 0 {
        return delay;
    }

    let jittered = match jitter {
        Jitter::None => delay_ms,
        Jitter::Full => rand::thread_rng().gen_range(0..=delay_ms),
        Jitter::Equal => {
            let half = delay_ms / 2;
            half + rand::thread_rng().gen_range(0..=delay_ms - half)
        }
    };
    Duration::from_millis(jittered)
}
