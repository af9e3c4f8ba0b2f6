use std::time::Duration;

use serde::Serialize;

use crate::out::OutMode;
use crate::utils::{env_or, env_parse};

pub const DEFAULT_REGION: &str = "ap-northeast-2";
pub const DEFAULT_LOOKBACK_DAYS: u32 = 14;
pub const DEFAULT_TOP_K: usize = 50;

/// Bounded retry with exponential backoff, applied to every control-plane call.
#[derive(Debug, Clone, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling up to `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub region: String,
    pub lookback_days: u32,
    pub top_k: usize,
    /// Concurrent describe calls during the crawl.
    pub crawl_concurrency: usize,
    /// Buckets scored concurrently.
    pub scoring_concurrency: usize,
    pub retry: RetryPolicy,
    /// Overall budget for one ranking or annotation request.
    pub deadline: Duration,
    /// Upper bound on pages drained from any single listing.
    pub max_pages: usize,
    pub audit_max_pages: usize,
    pub out_mode: OutMode,
    pub out_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            top_k: DEFAULT_TOP_K,
            crawl_concurrency: 8,
            scoring_concurrency: 8,
            retry: RetryPolicy::default(),
            deadline: Duration::from_secs(900),
            max_pages: 1000,
            audit_max_pages: 400,
            out_mode: OutMode::Stdout,
            out_endpoint: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Settings::default();
        let retry = RetryPolicy {
            max_attempts: env_parse("MLOPS_MAX_ATTEMPTS", d.retry.max_attempts).max(1),
            base_delay: Duration::from_millis(env_parse("MLOPS_BACKOFF_BASE_MS", 200u64)),
            max_delay: Duration::from_millis(env_parse("MLOPS_BACKOFF_MAX_MS", 5_000u64)),
            call_timeout: Duration::from_secs(env_parse("MLOPS_CALL_TIMEOUT_SECS", 30u64).max(1)),
        };
        let out_endpoint = env_or("OUT_ENDPOINT", "");
        Self {
            region: env_or("AWS_REGION", DEFAULT_REGION),
            lookback_days: env_parse("MLOPS_LOOKBACK_DAYS", d.lookback_days),
            top_k: env_parse("MLOPS_TOP_K", d.top_k),
            crawl_concurrency: env_parse("MLOPS_CRAWL_CONCURRENCY", d.crawl_concurrency).max(1),
            scoring_concurrency: env_parse("MLOPS_SCORING_CONCURRENCY", d.scoring_concurrency)
                .max(1),
            retry,
            deadline: Duration::from_secs(env_parse("MLOPS_DEADLINE_SECS", 900u64).max(1)),
            max_pages: env_parse("MLOPS_MAX_PAGES", d.max_pages).max(1),
            audit_max_pages: env_parse("MLOPS_AUDIT_MAX_PAGES", d.audit_max_pages).max(1),
            out_mode: OutMode::parse(&env_or("OUT_MODE", "stdout")),
            out_endpoint: (!out_endpoint.trim().is_empty()).then_some(out_endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(40), Duration::from_millis(350));
    }
}
