use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ApiRateLimiter, LiveQuoteSource};
use crate::error::SyncResult;
use crate::models::{Config, LiveQuote};

/// Class list of the element holding the last traded price
const PRICE_CLASSES: &str = "YMlKec fxKbKc";
/// Class list of the element holding the company name
const NAME_CLASSES: &str = "zzDege";

const CURRENCY_SYMBOLS: &[char] = &['₩', '$', '€', '£', '¥', '￦'];

/// Live-quote adapter: fetches the public quote page for a ticker and
/// extracts the current price and display name.
pub struct QuotePageClient {
    client: Client,
    base_url: String,
    exchange: String,
    rate_limiter: ApiRateLimiter,
}

impl QuotePageClient {
    pub fn new(config: &Config, rate_limiter: ApiRateLimiter) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent("Mozilla/5.0")
            .build()?;

        Ok(Self {
            client,
            base_url: config.quote_base_url.trim_end_matches('/').to_string(),
            exchange: config.quote_exchange.clone(),
            rate_limiter,
        })
    }

    fn quote_url(&self, ticker: &str) -> String {
        format!("{}/quote/{}:{}", self.base_url, ticker, self.exchange)
    }

    async fn fetch_page(&self, ticker: &str) -> Result<String, reqwest::Error> {
        self.rate_limiter.wait().await;

        let url = self.quote_url(ticker);
        debug!("Fetching quote page: {}", url);

        self.client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl LiveQuoteSource for QuotePageClient {
    async fn fetch_live(&self, ticker: &str) -> Option<LiveQuote> {
        let html = match self.fetch_page(ticker).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Quote page request failed for {}: {}", ticker, e);
                return None;
            }
        };

        let quote = extract_live_quote(&html);
        if quote.is_none() {
            warn!("Quote page for {} is missing price or name elements", ticker);
        }
        quote
    }
}

/// Pull price and name out of a quote page. Both must be present and the
/// price must parse, otherwise the whole extraction is absent.
pub fn extract_live_quote(html: &str) -> Option<LiveQuote> {
    let price_text = extract_class_text(html, PRICE_CLASSES)?;
    let name = extract_class_text(html, NAME_CLASSES)?;
    let price = parse_price(&price_text)?;

    Some(LiveQuote {
        price,
        display_name: Some(name),
    })
}

/// Text of the first element whose class attribute contains every class in
/// `classes`. Only direct text up to the next tag is taken.
pub fn extract_class_text(html: &str, classes: &str) -> Option<String> {
    let wanted: Vec<&str> = classes.split_whitespace().collect();
    let mut rest = html;

    while let Some(start) = rest.find("class=") {
        let after = &rest[start + 6..];
        let quote = after.chars().next()?;
        if quote != '"' && quote != '\'' {
            rest = after;
            continue;
        }

        let value_and_tail = &after[1..];
        let end = value_and_tail.find(quote)?;
        let class_value = &value_and_tail[..end];
        let tail = &value_and_tail[end + 1..];

        let present: Vec<&str> = class_value.split_whitespace().collect();
        if wanted.iter().all(|w| present.contains(w)) {
            if let Some(open_end) = tail.find('>') {
                let body = &tail[open_end + 1..];
                let text_end = body.find('<').unwrap_or(body.len());
                let text = decode_entities(body[..text_end].trim());
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }

        rest = tail;
    }

    None
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Parse display text such as `₩71,300` or `$1,234.50` into a number.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace() && !CURRENCY_SYMBOLS.contains(c))
        .collect();

    let value: f64 = cleaned.parse().ok()?;
    if value.is_finite() && value > 0.0 {
        Some(value)
    } else {
        None
    }
}
