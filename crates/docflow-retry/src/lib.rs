//! Retry strategies and backoff policies for docflow.
//!
//! This crate provides the backoff math shared by two very different retry
//! needs in the pipeline:
//! - the OCR handler's "blob not committed yet" retry, a small bounded
//!   exponential backoff that only fires for a specific error predicate;
//! - the webhook delivery engine's attempt scheduling, which follows the
//!   exact `base * 2^(attempts-1)` formula with additive jitter and a
//!   `Retry-After` floor.
//!
//! Both are built on [`RetryStrategyConfig`] / [`calculate_delay`], and both
//! run under a cooperative (tokio) runtime rather than blocking a thread.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries - retry immediately.
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default).
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt.
    Linear,
    /// Constant delay: same delay every attempt.
    Constant,
}

/// Predefined retry policies with sensible defaults for different use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Balanced retry behavior for general transient failures.
    #[default]
    Default,
    /// The OCR blob-fetch retry: 5 attempts, 1s base, small cap.
    BlobFetch,
    /// Fully custom configuration.
    Custom,
}

impl RetryPolicy {
    /// Get the default retry configuration for this policy.
    pub fn to_config(self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 6,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(120),
                jitter: 0.5,
            },
            RetryPolicy::BlobFetch => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 5,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(16),
                jitter: 0.0,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    /// Strategy type for calculating delay between retries.
    #[serde(default)]
    pub strategy: RetryStrategyType,
    /// Maximum number of retry attempts.
    #[serde(default)]
    pub max_attempts: u32,
    /// Base delay for backoff calculations.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Maximum delay cap for backoff.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor for randomized delays (0.0 = no jitter, 1.0 = full jitter).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        RetryPolicy::Default.to_config()
    }
}

/// Calculate the delay for the next retry attempt (1-indexed) using
/// multiplicative jitter: `delay * (1 - jitter .. 1 + jitter)`.
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter_multiplicative(capped, config.jitter)
    } else {
        capped
    }
}

fn apply_jitter_multiplicative(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::thread_rng();
    let random_value: f64 = rng.r#gen();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Webhook delivery backoff, per the engine's own formula — additive jitter
/// on top of the capped exponential delay, not the multiplicative jitter
/// [`calculate_delay`] uses elsewhere. `attempts` is the number of attempts
/// made so far (1 after the first failed attempt).
pub fn webhook_backoff(attempts: u32, base: Duration, cap: Duration) -> Duration {
    let pow = attempts.saturating_sub(1).min(20);
    let exp = base.saturating_mul(2_u32.saturating_pow(pow));
    let capped = exp.min(cap);
    capped + apply_jitter_additive(capped)
}

/// Jitter in `[0, 0.2 * delay)`, added on top of the delay (never subtracted).
fn apply_jitter_additive(delay: Duration) -> Duration {
    use rand::Rng;

    if delay.is_zero() {
        return Duration::ZERO;
    }
    let mut rng = rand::thread_rng();
    let fraction: f64 = rng.r#gen::<f64>() * 0.2;
    let millis = (delay.as_millis() as f64 * fraction).round() as u64;
    Duration::from_millis(millis)
}

/// An async retry executor that runs a fallible operation under a
/// cooperative runtime, sleeping between attempts with `tokio::time::sleep`
/// rather than blocking a worker thread.
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration.
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    /// Create a retry executor from a predefined policy.
    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.to_config())
    }

    /// Run a fallible async operation, retrying on every `Err` up to
    /// `max_attempts`. The operation receives the current attempt number
    /// (1-indexed).
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.run_if(operation_always_retries, &mut operation).await
    }

    /// Run a fallible async operation, retrying only while `should_retry`
    /// returns true for the error. Used by the OCR handler, which must only
    /// retry a "blob not committed yet" race and give up immediately on any
    /// other failure.
    pub async fn run_if<T, E, F, Fut, P>(&self, should_retry: P, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.config.max_attempts || !should_retry(&e) {
                        return Err(e);
                    }
                    let delay = calculate_delay(&self.config, attempt);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn operation_always_retries<E>(_: &E) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_fetch_policy_matches_spec() {
        let config = RetryPolicy::BlobFetch.to_config();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.strategy, RetryStrategyType::Exponential);
    }

    #[test]
    fn calculate_delay_exponential_no_jitter() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(60));
    }

    #[test]
    fn webhook_backoff_matches_spec_formula() {
        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(3600);
        for attempts in 1..=8 {
            let expected_floor = base.saturating_mul(2_u32.saturating_pow(attempts - 1)).min(cap);
            for _ in 0..20 {
                let d = webhook_backoff(attempts, base, cap);
                assert!(d >= expected_floor, "attempt {attempts}: {d:?} < {expected_floor:?}");
                assert!(
                    d <= expected_floor + expected_floor.mul_f64(0.2) + Duration::from_millis(1),
                    "attempt {attempts}: {d:?} exceeds jitter bound"
                );
            }
        }
    }

    #[test]
    fn webhook_backoff_caps_at_one_hour() {
        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(3600);
        let d = webhook_backoff(8, base, cap);
        assert!(d >= cap);
        assert!(d <= cap + cap.mul_f64(0.2) + Duration::from_millis(1));
    }

    #[tokio::test]
    async fn retry_executor_retries_then_succeeds() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        });

        let mut seen = 0;
        let result = executor
            .run(|attempt| {
                seen = attempt;
                async move {
                    if attempt < 3 {
                        Err::<&str, &str>("not found")
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn retry_executor_run_if_stops_on_non_retryable_error() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        });

        let mut calls = 0;
        let result = executor
            .run_if(
                |e: &&str| *e == "not_found",
                |_attempt| {
                    calls += 1;
                    async move { Err::<(), &str>("permission_denied") }
                },
            )
            .await;

        assert_eq!(result, Err("permission_denied"));
        assert_eq!(calls, 1);
    }
}
