//! # Rate Limiter Module
//!
//! This module implements sliding-window admission control for the public
//! product database. Each governed operation class gets its own window so
//! that heavy product reads never starve searches and vice versa.

use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// Fixed delay added after the oldest grant expires
const WAKE_MARGIN: Duration = Duration::from_millis(100);
/// Upper bound of the random jitter added on top of `WAKE_MARGIN`
const WAKE_JITTER_MS: u64 = 25;

/// Operation classes with independent ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateClass {
    /// Single product reads
    Product,
    /// Keyword searches
    Search,
    /// Facet and aggregate queries
    Facet,
}

impl RateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateClass::Product => "product",
            RateClass::Search => "search",
            RateClass::Facet => "facet",
        }
    }
}

/// Snapshot of a limiter's window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterStats {
    pub max_requests: usize,
    pub window_secs: u64,
    pub current_count: usize,
    pub remaining: usize,
    pub percent_used: f64,
}

/// Sliding-window rate limiter
///
/// Keeps the timestamps of granted acquisitions. A request is admitted when
/// fewer than `max_requests` grants fall inside the trailing `window`.
///
/// # Concurrency
///
/// The window sits behind a mutex that is held only while it is inspected or
/// mutated. Waiting callers sleep outside the lock and re-check on wake-up,
/// because other callers may have taken the freed slot in the meantime.
#[derive(Debug)]
pub struct RateLimiter {
    grants: Mutex<VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nutrition_lookup::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(10, Duration::from_secs(60));
    /// assert_eq!(limiter.stats().remaining, 10);
    /// ```
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            grants: Mutex::new(VecDeque::with_capacity(max_requests)),
            max_requests,
            window,
        }
    }

    /// Acquire permission to make a request
    ///
    /// # Arguments
    ///
    /// * `wait` - When `true`, suspend until a slot frees up. When `false`,
    ///   return immediately.
    ///
    /// # Returns
    ///
    /// `true` once the request may proceed, `false` if the window is full and
    /// `wait` is `false`. A limiter configured with zero capacity never grants.
    pub async fn acquire(&self, wait: bool) -> bool {
        if self.max_requests == 0 {
            warn!("Rate limiter configured with zero capacity, denying request");
            return false;
        }

        loop {
            let wake_in = {
                let mut grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                self.purge(&mut grants, now);

                if grants.len() < self.max_requests {
                    grants.push_back(now);
                    return true;
                }

                if !wait {
                    return false;
                }

                match grants.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=WAKE_JITTER_MS));
            debug!(
                wait_ms = wake_in.as_millis() as u64,
                max_requests = self.max_requests,
                "Rate limit reached, waiting for a free slot"
            );
            tokio::time::sleep(wake_in + WAKE_MARGIN + jitter).await;
        }
    }

    /// Number of grants inside the current window
    pub fn current_count(&self) -> usize {
        let grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        grants
            .iter()
            .filter(|granted| now.duration_since(**granted) < self.window)
            .count()
    }

    /// Read-only statistics for the current window
    pub fn stats(&self) -> RateLimiterStats {
        let count = self.current_count();
        let percent = if self.max_requests > 0 {
            count as f64 / self.max_requests as f64 * 100.0
        } else {
            0.0
        };

        RateLimiterStats {
            max_requests: self.max_requests,
            window_secs: self.window.as_secs(),
            current_count: count,
            remaining: self.max_requests.saturating_sub(count),
            percent_used: (percent * 10.0).round() / 10.0,
        }
    }

    fn purge(&self, grants: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = grants.front() {
            if now.duration_since(*oldest) >= self.window {
                grants.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Independent limiters for every governed operation class
#[derive(Debug)]
pub struct RateLimiters {
    product: RateLimiter,
    search: RateLimiter,
    facet: RateLimiter,
}

impl RateLimiters {
    pub fn new(config: &RateLimitConfig) -> Self {
        let window = Duration::from_secs(config.window_secs);
        Self {
            product: RateLimiter::new(config.product_per_window, window),
            search: RateLimiter::new(config.search_per_window, window),
            facet: RateLimiter::new(config.facet_per_window, window),
        }
    }

    /// The limiter governing `class`
    pub fn limiter(&self, class: RateClass) -> &RateLimiter {
        match class {
            RateClass::Product => &self.product,
            RateClass::Search => &self.search,
            RateClass::Facet => &self.facet,
        }
    }

    pub async fn acquire(&self, class: RateClass, wait: bool) -> bool {
        self.limiter(class).acquire(wait).await
    }

    /// Statistics for every limiter keyed by class name
    pub fn all_stats(&self) -> BTreeMap<&'static str, RateLimiterStats> {
        [RateClass::Product, RateClass::Search, RateClass::Facet]
            .into_iter()
            .map(|class| (class.as_str(), self.limiter(class).stats()))
            .collect()
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}
