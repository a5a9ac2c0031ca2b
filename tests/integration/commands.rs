//! On-demand command responses

use pretty_assertions::assert_eq;
use rust_market_sync::commands::{update_all, update_category, update_indices};
use rust_market_sync::concurrent_fetcher::BatchOrchestrator;
use rust_market_sync::data_collector::DataCollector;
use rust_market_sync::models::{Config, MarketIndex};
use rust_market_sync::utils::MarketCalendar;
use std::sync::Arc;
use test_log::test;

use crate::common::{temp_database, test_data, FakeHistorySource, FakeLiveSource, TestDatabase};

fn setup(db: &TestDatabase) -> (BatchOrchestrator, MarketCalendar) {
    let live = Arc::new(
        FakeLiveSource::new()
            .with_quote("005380", 210000.0, "Hyundai Motor")
            .with_quote("000270", 98000.0, "Kia"),
    );
    let history = Arc::new(FakeHistorySource::new().with_window("^DJI", test_data::history(&[42000.0, 42420.0])));
    let catalog = test_data::catalog(&[("005380", "car"), ("000270", "car"), ("012330", "car")]);

    let orchestrator = BatchOrchestrator::new(
        Arc::new(DataCollector::new(live, history, ".KS")),
        Arc::clone(&db.database),
        Arc::new(catalog),
        vec![MarketIndex::new("Dow Jones", "^DJI")],
        2,
    );
    let calendar = MarketCalendar::from_config(&Config::default()).unwrap();
    (orchestrator, calendar)
}

#[test(tokio::test)]
async fn test_update_all_reports_partial_success() {
    let db = temp_database().await;
    let (orchestrator, calendar) = setup(&db);

    let response = update_all(&orchestrator, &calendar).await;
    assert_eq!(response.status_code(), 200);

    let json = serde_json::to_value(&response).unwrap();
    let message = json["message"].as_str().unwrap();
    assert!(message.contains("2 succeeded"), "unexpected message: {}", message);
    assert!(message.contains("1 skipped"), "unexpected message: {}", message);
}

#[test(tokio::test)]
async fn test_update_unknown_category_is_client_error() {
    let db = temp_database().await;
    let (orchestrator, calendar) = setup(&db);

    let response = update_category(&orchestrator, &calendar, "crypto").await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        serde_json::json!({"error": "Unknown category: crypto"})
    );
    assert_eq!(db.database.count_snapshots().await.unwrap(), 0);
}

#[test(tokio::test)]
async fn test_update_category_and_indices() {
    let db = temp_database().await;
    let (orchestrator, calendar) = setup(&db);

    assert!(update_category(&orchestrator, &calendar, "CAR").await.is_success());
    assert_eq!(db.database.count_snapshots().await.unwrap(), 2);

    let response = update_indices(&orchestrator).await;
    assert!(response.is_success());
    let stored = db.database.get_index_snapshots().await.unwrap();
    assert_eq!(stored[0].change_percent, 1.0);
}
