//! Client configuration: host, retry policies, per-call timeouts.

use crate::error::{WkcError, WkcResult};
use std::time::Duration;

pub const HOST_ENV: &str = "WKC_HOST";
pub const MAX_RETRIES_ENV: &str = "WKC_MAX_RETRIES";
pub const BACKOFF_FACTOR_ENV: &str = "WKC_BACKOFF_FACTOR";
pub const TIMEOUT_ENV: &str = "WKC_TIMEOUT_SECS";
pub const SEARCH_TIMEOUT_ENV: &str = "WKC_SEARCH_TIMEOUT_SECS";
pub const UPDATE_TIMEOUT_ENV: &str = "WKC_UPDATE_TIMEOUT_SECS";

/// Bounded retry on transient status codes with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub total: u32,
    /// Seconds; the n-th retry waits `backoff_factor * 2^(n-1)`.
    pub backoff_factor: f64,
    pub status_forcelist: Vec<u16>,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: 10,
            backoff_factor: 0.5,
            status_forcelist: vec![500, 504],
            max_backoff: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn with_total(mut self, total: u32) -> Self {
        self.total = total;
        self
    }

    /// No waiting between attempts (tests, dry environments).
    pub fn immediate(mut self) -> Self {
        self.backoff_factor = 0.0;
        self
    }

    pub fn should_retry(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 || self.backoff_factor.is_nan() || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exp = retry.saturating_sub(1).min(30) as i32;
        let secs = self.backoff_factor * 2f64.powi(exp);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Which family of call is being made; selects timeout and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Login, catalog listing, attribute create/read/delete.
    Default,
    /// Category, business term and asset searches.
    Search,
    /// Column patch updates.
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    pub default: Duration,
    pub search: Duration,
    pub update: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_millis(500),
            search: Duration::from_secs(10),
            update: Duration::from_secs(15),
        }
    }
}

impl Timeouts {
    pub fn for_call(&self, kind: CallKind) -> Duration {
        match kind {
            CallKind::Default => self.default,
            CallKind::Search => self.search,
            CallKind::Update => self.update,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the cluster, e.g. `https://cpd.example.com`.
    pub host: String,
    pub retry: RetryPolicy,
    pub update_retry: RetryPolicy,
    pub timeouts: Timeouts,
    /// Page size of the business-term search (first page only).
    pub term_page_size: usize,
    pub asset_list_limit: usize,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: normalize_host(&host.into()),
            retry: RetryPolicy::default(),
            update_retry: RetryPolicy::default().with_total(15),
            timeouts: Timeouts::default(),
            term_page_size: 300,
            asset_list_limit: 200,
        }
    }

    /// Defaults overlaid with `WKC_*` environment variables.
    pub fn from_env() -> WkcResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> WkcResult<Self> {
        let host = lookup(HOST_ENV)
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| WkcError::Config(format!("{HOST_ENV} is not set")))?;
        let mut config = Self::new(host);

        if let Some(raw) = lookup(MAX_RETRIES_ENV) {
            config.retry.total = parse_env(MAX_RETRIES_ENV, &raw)?;
        }
        if let Some(raw) = lookup(BACKOFF_FACTOR_ENV) {
            let factor = parse_backoff_factor(BACKOFF_FACTOR_ENV, &raw)?;
            config.retry.backoff_factor = factor;
            config.update_retry.backoff_factor = factor;
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            config.timeouts.default = parse_secs(TIMEOUT_ENV, &raw)?;
        }
        if let Some(raw) = lookup(SEARCH_TIMEOUT_ENV) {
            config.timeouts.search = parse_secs(SEARCH_TIMEOUT_ENV, &raw)?;
        }
        if let Some(raw) = lookup(UPDATE_TIMEOUT_ENV) {
            config.timeouts.update = parse_secs(UPDATE_TIMEOUT_ENV, &raw)?;
        }
        Ok(config)
    }

    pub fn retry_for(&self, kind: CallKind) -> &RetryPolicy {
        match kind {
            CallKind::Update => &self.update_retry,
            CallKind::Default | CallKind::Search => &self.retry,
        }
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('/').to_string()
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> WkcResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| WkcError::Config(format!("{key} has an invalid value: {raw:?}")))
}

/// A finite, non-negative number of seconds.
pub fn parse_backoff_factor(key: &str, raw: &str) -> WkcResult<f64> {
    let factor: f64 = parse_env(key, raw)?;
    if !factor.is_finite() || factor < 0.0 {
        return Err(WkcError::Config(format!(
            "{key} must be a finite, non-negative number of seconds"
        )));
    }
    Ok(factor)
}

fn parse_secs(key: &str, raw: &str) -> WkcResult<Duration> {
    let secs: f64 = parse_env(key, raw)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(WkcError::Config(format!("{key} must be a positive number of seconds")));
    }
    Ok(Duration::from_secs_f64(secs))
}
