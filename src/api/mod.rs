use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::models::{HistoryWindow, LiveQuote};

pub mod chart_client;
pub mod quote_page_client;
pub use chart_client::ChartClient;
pub use quote_page_client::QuotePageClient;

/// Trailing history window requested for instrument metrics
pub const HISTORY_WINDOW_DAYS: i64 = 365;
/// Trailing window requested for market indices
pub const INDEX_WINDOW_DAYS: i64 = 10;

pub const ONE_MONTH_SESSIONS: usize = 21;
pub const THREE_MONTH_SESSIONS: usize = 63;

/// Shared request pacing for all outbound calls
#[derive(Clone)]
pub struct ApiRateLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        }
    }

    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

/// Real-time quote source: current price and display name.
///
/// Any failure (network, missing element, malformed number) is reported as
/// `None`, never as an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveQuoteSource: Send + Sync {
    async fn fetch_live(&self, ticker: &str) -> Option<LiveQuote>;
}

/// Daily close history source.
///
/// Failures and empty responses both come back as an empty window.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self, symbol: &str, days: i64) -> HistoryWindow;
}

/// `round(((latest - past) / past) * 100, 2)`, absent when `past` is unusable.
pub fn percent_change(latest: f64, past: Option<f64>) -> Option<f64> {
    let past = past?;
    if past == 0.0 || !past.is_finite() || !latest.is_finite() {
        return None;
    }
    Some(round2((latest - past) / past * 100.0))
}

pub fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    // Normalise -0.0
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Percentage changes of the latest close at the four lookback horizons
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HorizonChanges {
    pub previous: Option<f64>,
    pub one_month: Option<f64>,
    pub three_month: Option<f64>,
    pub one_year: Option<f64>,
}

impl HorizonChanges {
    pub fn from_window(window: &HistoryWindow) -> Self {
        let latest = match window.latest() {
            Some(point) => point.close,
            None => return Self::default(),
        };

        let back = |offset: usize| window.rows_back(offset).map(|p| p.close);

        // The one-year horizon is the first row of the window; a single point
        // would only compare the latest close with itself.
        let first = if window.len() >= 2 {
            window.first().map(|p| p.close)
        } else {
            None
        };

        Self {
            previous: percent_change(latest, back(1)),
            one_month: percent_change(latest, back(ONE_MONTH_SESSIONS)),
            three_month: percent_change(latest, back(THREE_MONTH_SESSIONS)),
            one_year: percent_change(latest, first),
        }
    }
}
