//! History adapter over the v8 chart endpoint.
//!
//! Requests daily bars for a trailing window and keeps only the closes. Dates
//! are taken in the market's own UTC offset so a session that closes at
//! 15:30 KST is not attributed to the previous UTC day.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ApiRateLimiter, HistorySource};
use crate::error::{SyncError, SyncResult};
use crate::models::{Config, HistoryPoint, HistoryWindow};

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    close: Vec<Option<f64>>,
}

pub struct ChartClient {
    client: Client,
    base_url: url::Url,
    offset: FixedOffset,
    rate_limiter: ApiRateLimiter,
}

impl ChartClient {
    pub fn new(config: &Config, offset: FixedOffset, rate_limiter: ApiRateLimiter) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;

        let base_url = url::Url::parse(&config.chart_base_url).map_err(|e| {
            SyncError::Config(format!("invalid CHART_BASE_URL '{}': {}", config.chart_base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "CHART_BASE_URL '{}' cannot be used as a base",
                config.chart_base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            offset,
            rate_limiter,
        })
    }

    fn chart_url(&self, symbol: &str) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["v8", "finance", "chart", symbol]);
        }
        url
    }

    async fn request(&self, symbol: &str, days: i64) -> anyhow::Result<ChartResponse> {
        let end = Utc::now();
        let start = end - Duration::days(days);

        let url = self.chart_url(symbol);
        debug!("Fetching chart history: {} ({} days)", url, days);

        self.rate_limiter.wait().await;

        let response = self
            .client
            .get(url)
            .query(&[
                ("period1", start.timestamp().to_string()),
                ("period2", end.timestamp().to_string()),
                ("interval", "1d".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<ChartResponse>().await?)
    }
}

/// Turn a chart response into an ascending close window.
fn parse_response(resp: ChartResponse, offset: FixedOffset) -> anyhow::Result<HistoryWindow> {
    if let Some(err) = resp.chart.error {
        anyhow::bail!("{}: {}", err.code, err.description);
    }

    let data = match resp.chart.result.and_then(|r| r.into_iter().next()) {
        Some(data) => data,
        None => return Ok(HistoryWindow::empty()),
    };

    let timestamps = data.timestamp.unwrap_or_default();
    let closes = match data.indicators.quote.into_iter().next() {
        Some(quote) => quote.close,
        None => return Ok(HistoryWindow::empty()),
    };

    let points = timestamps
        .iter()
        .zip(closes)
        .filter_map(|(&ts, close)| {
            // Null closes are halted or not-yet-settled sessions
            let close = close?;
            let date = DateTime::from_timestamp(ts, 0)?
                .with_timezone(&offset)
                .date_naive();
            Some(HistoryPoint { date, close })
        })
        .collect();

    Ok(HistoryWindow::new(points))
}

#[async_trait]
impl HistorySource for ChartClient {
    async fn fetch_history(&self, symbol: &str, days: i64) -> HistoryWindow {
        let window = self
            .request(symbol, days)
            .await
            .and_then(|resp| parse_response(resp, self.offset));

        match window {
            Ok(window) if window.is_empty() => {
                warn!("No history available for {}", symbol);
                window
            }
            Ok(window) => {
                debug!("Retrieved {} closes for {}", window.len(), symbol);
                window
            }
            Err(e) => {
                warn!("History request failed for {}: {}", symbol, e);
                HistoryWindow::empty()
            }
        }
    }
}
