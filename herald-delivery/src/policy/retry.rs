//! Retry policy for delivery attempts.
//!
//! A pure function of the record's retry count and the failure: no clock, no
//! randomness. The dispatcher turns the returned delay into a `scheduled_for`
//! timestamp.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Shape of the delay curve between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backoff {
    /// `base * 2^retry_count`, capped at `max_delay_secs`
    #[default]
    Exponential,
    /// Always `base`
    Fixed,
}

/// Outcome of [`RetryPolicy::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again once `delay` has passed
    Retry { delay: Duration },
    /// Mark the record as failed
    GiveUp,
}

/// Retry policy configuration for delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt before giving up.
    ///
    /// Default: 5
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay curve.
    ///
    /// Default: `Exponential`
    #[serde(default)]
    pub backoff: Backoff,

    /// Base delay (in seconds).
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::base_delay_secs")]
    pub base_delay_secs: u64,

    /// Upper bound for the exponential curve (in seconds).
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::max_delay_secs")]
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            backoff: Backoff::default(),
            base_delay_secs: defaults::base_delay_secs(),
            max_delay_secs: defaults::max_delay_secs(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed delay between every attempt
    #[must_use]
    pub const fn fixed(max_retries: u32, delay_secs: u64) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed,
            base_delay_secs: delay_secs,
            max_delay_secs: delay_secs,
        }
    }

    /// Whether a record that already failed `retry_count` times may be retried.
    #[must_use]
    pub const fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before the retry that follows `retry_count` earlier retries.
    ///
    /// Non-decreasing in `retry_count`.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let secs = match self.backoff {
            Backoff::Fixed => self.base_delay_secs,
            Backoff::Exponential => 1u64
                .checked_shl(retry_count)
                .map_or(u64::MAX, |multiplier| {
                    self.base_delay_secs.saturating_mul(multiplier)
                })
                .min(self.max_delay_secs.max(self.base_delay_secs)),
        };

        Duration::from_secs(secs)
    }

    /// Decide what happens to a record whose attempt just failed.
    #[must_use]
    pub fn decide(&self, retry_count: u32, error: &DeliveryError) -> RetryDecision {
        if error.is_permanent() || !self.should_retry(retry_count) {
            return RetryDecision::GiveUp;
        }

        RetryDecision::Retry {
            delay: self.delay_for(retry_count),
        }
    }

    /// Get the number of remaining retries.
    #[must_use]
    pub const fn remaining_retries(&self, retry_count: u32) -> u32 {
        self.max_retries.saturating_sub(retry_count)
    }

    /// Reject policies that would reschedule a retry at the instant it failed.
    ///
    /// # Errors
    /// A description of the invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 0 && self.base_delay_secs == 0 {
            return Err("retry.base_delay_secs must be greater than zero".to_string());
        }

        Ok(())
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        5
    }

    pub const fn base_delay_secs() -> u64 {
        60
    }

    pub const fn max_delay_secs() -> u64 {
        3600
    }
}
