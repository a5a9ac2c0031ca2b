//! Common test utilities and helpers


pub use database::{temp_database, TestDatabase};
pub use fakes::{FakeHistorySource, FakeLiveSource};

/// Test data utilities
pub mod test_data {
    use chrono::{Duration, NaiveDate};
    use rust_market_sync::models::{Catalog, Category, HistoryPoint, HistoryWindow, Instrument};

    /// Ascending daily closes starting 2024-01-01
    pub fn history(closes: &[f64]) -> HistoryWindow {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        HistoryWindow::new(
            closes
                .iter()
                .enumerate()
                .map(|(i, &close)| HistoryPoint {
                    date: start + Duration::days(i as i64),
                    close,
                })
                .collect(),
        )
    }

    /// A year-long window rising by one per session from `start`
    pub fn rising_history(start: f64, sessions: usize) -> HistoryWindow {
        let closes: Vec<f64> = (0..sessions).map(|i| start + i as f64).collect();
        history(&closes)
    }

    pub fn catalog(entries: &[(&str, &str)]) -> Catalog {
        Catalog::new(
            entries
                .iter()
                .map(|(ticker, category)| Instrument::new(*ticker, category.parse::<Category>().unwrap()))
                .collect(),
        )
    }
}

/// Logging utilities for tests
pub mod logging {
    use std::sync::Once;
    use tracing::info;

    static INIT: Once = Once::new();

    /// Initialize test logging
    pub fn init_test_logging() {
        INIT.call_once(|| {
            // Another test (or test-log) may already own the global subscriber
            let _ = tracing::subscriber::set_global_default(
                tracing_subscriber::fmt()
                    .with_env_filter("rust_market_sync=debug")
                    .with_test_writer()
                    .finish(),
            );
        });
    }

    /// Log test step
    pub fn log_test_step(step: &str) {
        info!("🧪 Test Step: {}", step);
    }
}
