use crate::config::PollConfig;
use std::time::Duration;

/// Exponential backoff schedule shared by every polling loop in the client.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Retries allowed while the poll endpoint answers 409.
    pub max_conflict_retries: u32,
    /// Successful poll responses accepted before giving up on a non-terminal status.
    pub max_status_attempts: u32,
    /// Attempts at the Genie query-result endpoint while the statement is still running.
    pub max_sql_result_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &PollConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_conflict_retries: config.max_conflict_retries,
            max_status_attempts: config.max_status_attempts,
            max_sql_result_attempts: config.max_sql_result_attempts,
        }
    }

    /// Delay before retry number `retry` (zero based): base * multiplier^retry, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            multiplier: 1.5,
            max_delay: Duration::from_millis(10_000),
            max_conflict_retries: 15,
            max_status_attempts: 20,
            max_sql_result_attempts: 15,
        }
    }
}
