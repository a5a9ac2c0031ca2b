//! HTTP adapters against a local mock server

use chrono::FixedOffset;
use pretty_assertions::assert_eq;
use rust_market_sync::api::{ApiRateLimiter, ChartClient, HistorySource, LiveQuoteSource, QuotePageClient};
use rust_market_sync::models::Config;
use std::time::{Duration, Instant};
use test_log::test;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUOTE_PAGE: &str = r#"<!doctype html>
<html><body>
  <div class="zzDege">Samsung Electronics Co Ltd</div>
  <div class="AHmHk"><span><div class="YMlKec fxKbKc">₩71,300.00</div></span></div>
</body></html>"#;

const CHART_BODY: &str = r#"{"chart":{"result":[{
    "meta":{"currency":"KRW","symbol":"005930.KS"},
    "timestamp":[1735776000,1735862400,1736121600],
    "indicators":{"quote":[{"open":[1,2,3],"close":[53400.0,null,55900.0]}]}
}],"error":null}}"#;

fn config(server: &MockServer) -> Config {
    Config {
        quote_base_url: server.uri(),
        chart_base_url: server.uri(),
        http_timeout_secs: 2,
        ..Config::default()
    }
}

fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

#[test(tokio::test)]
async fn test_quote_page_extracts_price_and_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote/005930:KRX"))
        .respond_with(ResponseTemplate::new(200).set_body_string(QUOTE_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let client = QuotePageClient::new(&config(&server), ApiRateLimiter::new(600)).unwrap();
    let quote = client.fetch_live("005930").await.unwrap();

    assert_eq!(quote.price, 71300.0);
    assert_eq!(quote.display_name.as_deref(), Some("Samsung Electronics Co Ltd"));
}

#[test(tokio::test)]
async fn test_quote_page_failures_are_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote/000660:KRX"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/quote/068270:KRX"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><div class=\"zzDege\">Celltrion</div></html>"))
        .mount(&server)
        .await;

    let client = QuotePageClient::new(&config(&server), ApiRateLimiter::new(600)).unwrap();
    assert_eq!(client.fetch_live("000660").await, None);
    assert_eq!(client.fetch_live("068270").await, None);
}

#[test(tokio::test)]
async fn test_chart_history_in_market_dates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/005930.KS"))
        .and(query_param("interval", "1d"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHART_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let client = ChartClient::new(&config(&server), kst(), ApiRateLimiter::new(600)).unwrap();
    let window = client.fetch_history("005930.KS", 365).await;

    assert_eq!(window.len(), 2);
    let dates: Vec<String> = window.points().iter().map(|p| p.date.to_string()).collect();
    assert_eq!(dates, vec!["2025-01-02", "2025-01-06"]);
    assert_eq!(window.latest().unwrap().close, 55900.0);
}

#[test(tokio::test)]
async fn test_chart_server_error_is_empty_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = ChartClient::new(&config(&server), kst(), ApiRateLimiter::new(600)).unwrap();
    assert!(client.fetch_history("005930.KS", 365).await.is_empty());
}

#[test(tokio::test)]
async fn test_chart_malformed_body_is_empty_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/005930.KS"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = ChartClient::new(&config(&server), kst(), ApiRateLimiter::new(600)).unwrap();
    assert!(client.fetch_history("005930.KS", 365).await.is_empty());
}

fn impatient_config(server: &MockServer) -> Config {
    Config {
        http_timeout_secs: 1,
        ..config(server)
    }
}

#[test(tokio::test)]
async fn test_slow_quote_page_times_out_as_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote/005930:KRX"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(QUOTE_PAGE)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = QuotePageClient::new(&impatient_config(&server), ApiRateLimiter::new(600)).unwrap();
    let started = Instant::now();
    let quote = tokio::time::timeout(Duration::from_secs(2), client.fetch_live("005930"))
        .await
        .expect("request should give up at the client timeout");

    assert_eq!(quote, None);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test(tokio::test)]
async fn test_slow_chart_times_out_as_empty_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/005930.KS"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(CHART_BODY)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = ChartClient::new(&impatient_config(&server), kst(), ApiRateLimiter::new(600)).unwrap();
    let started = Instant::now();
    let window = tokio::time::timeout(Duration::from_secs(2), client.fetch_history("005930.KS", 365))
        .await
        .expect("request should give up at the client timeout");

    assert!(window.is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
}
