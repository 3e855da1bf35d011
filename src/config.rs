use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::time::Duration;

/// Default number of page-view requests allowed in flight at once
pub const DEFAULT_CONCURRENCY: usize = 40;

/// Wait before retrying a request that failed at the transport level
pub const DEFAULT_BACKOFF_SECS: u64 = 3;

/// Total attempts per title (first try plus retries) for transport faults
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Per-request timeout for the metrics API
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_API_HOST: &str = "https://wikimedia.org";

pub const DEFAULT_PROJECT: &str = "en.wikipedia.org";

/// Monthly ranges are inclusive on both ends, formatted as YYYYMMDD in the URL
pub const DEFAULT_RANGE_START: &str = "2015-10-01";
pub const DEFAULT_RANGE_END: &str = "2020-01-01";

/// The metrics API rejects requests without a descriptive agent
pub const USER_AGENT: &str = concat!("wikipulse/", env!("CARGO_PKG_VERSION"));

/// Progress update interval (tick every N pages)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Buffer size for CSV writers
pub const CSV_WRITE_BUFFER: usize = 128 * 1024;

/// Read buffer wrapped around the decompressor
pub const DUMP_READ_BUFFER: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Double the wait after each failed attempt instead of keeping it fixed
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SECS),
            exponential: false,
        }
    }
}

impl RetryPolicy {
    /// Delay to apply after `attempt` (1-based) has failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.backoff;
        }
        let exponent = attempt.saturating_sub(1).min(8);
        self.backoff.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dump_path: String,
    pub concurrency: usize,
    pub date_range_start: NaiveDate,
    pub date_range_end: NaiveDate,
    /// Overall budget for the fetch pass; titles still pending when it
    /// expires are reported as failed
    pub fetch_deadline: Option<Duration>,
    pub api_host: String,
    pub project: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dump_path: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            date_range_start: parse_date(DEFAULT_RANGE_START).unwrap_or_default(),
            date_range_end: parse_date(DEFAULT_RANGE_END).unwrap_or_default(),
            fetch_deadline: None,
            api_host: DEFAULT_API_HOST.to_string(),
            project: DEFAULT_PROJECT.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be greater than zero");
        }
        if self.date_range_start > self.date_range_end {
            bail!(
                "date range start {} is after end {}",
                self.date_range_start,
                self.date_range_end
            );
        }
        if self.retry.max_attempts == 0 {
            bail!("retry policy needs at least one attempt");
        }
        Ok(())
    }
}

/// Parses `YYYY-MM-DD` (the form accepted on the command line).
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?)
}
