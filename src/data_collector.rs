use std::sync::Arc;
use tracing::warn;

use crate::api::{round2, HistorySource, HorizonChanges, LiveQuoteSource, HISTORY_WINDOW_DAYS, INDEX_WINDOW_DAYS};
use crate::models::{IndexSnapshot, Instrument, MarketIndex, MetricSnapshot};

/// Why an instrument produced no snapshot this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither the live quote nor the history source returned anything
    NoData,
    /// History came back but the live quote did not; a stale close is not
    /// published as the current price
    NoLiveQuote,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    Snapshot(MetricSnapshot),
    Skip(SkipReason),
}

/// Merges the live quote and the close history for one instrument into a
/// normalized snapshot.
pub struct DataCollector {
    live: Arc<dyn LiveQuoteSource>,
    history: Arc<dyn HistorySource>,
    history_symbol_suffix: String,
}

impl DataCollector {
    pub fn new(
        live: Arc<dyn LiveQuoteSource>,
        history: Arc<dyn HistorySource>,
        history_symbol_suffix: impl Into<String>,
    ) -> Self {
        Self {
            live,
            history,
            history_symbol_suffix: history_symbol_suffix.into(),
        }
    }

    pub fn history_symbol(&self, ticker: &str) -> String {
        format!("{}{}", ticker, self.history_symbol_suffix)
    }

    /// Fetch both sources concurrently and merge.
    ///
    /// The current price always comes from the live quote, so a missing
    /// quote skips the instrument and the stored row keeps its last good
    /// values. An empty history with a live quote still yields a snapshot,
    /// with all four changes absent.
    pub async fn aggregate(&self, instrument: &Instrument) -> AggregateOutcome {
        let symbol = self.history_symbol(&instrument.ticker);
        let (live, window) = tokio::join!(
            self.live.fetch_live(&instrument.ticker),
            self.history.fetch_history(&symbol, HISTORY_WINDOW_DAYS)
        );

        let quote = match live {
            Some(quote) => quote,
            None if window.is_empty() => {
                warn!("Skipping {}: no live quote and no history", instrument.ticker);
                return AggregateOutcome::Skip(SkipReason::NoData);
            }
            None => {
                warn!("Skipping {}: no live quote", instrument.ticker);
                return AggregateOutcome::Skip(SkipReason::NoLiveQuote);
            }
        };
        let display_name = quote.display_name.or_else(|| instrument.display_name.clone());

        if window.is_empty() {
            warn!("No history for {}, publishing price without changes", instrument.ticker);
        }

        let changes = HorizonChanges::from_window(&window);

        AggregateOutcome::Snapshot(MetricSnapshot {
            ticker: instrument.ticker.clone(),
            category: instrument.category,
            display_name,
            current_price: quote.price,
            change_prev: changes.previous,
            change_1m: changes.one_month,
            change_3m: changes.three_month,
            change_1y: changes.one_year,
            last_updated: None,
        })
    }

    /// Latest value and day-over-day move for a market index
    pub async fn aggregate_index(&self, index: &MarketIndex) -> Option<IndexSnapshot> {
        let window = self.history.fetch_history(&index.symbol, INDEX_WINDOW_DAYS).await;

        let latest = match window.latest() {
            Some(point) => *point,
            None => {
                warn!("Skipping index {}: no data", index.name);
                return None;
            }
        };
        let previous = window.rows_back(1).map(|p| p.close).unwrap_or(latest.close);

        let change = latest.close - previous;
        let change_percent = if previous != 0.0 {
            change / previous * 100.0
        } else {
            0.0
        };

        Some(IndexSnapshot {
            index_name: index.name.clone(),
            current_value: round2(latest.close),
            change_value: round2(change),
            change_percent: round2(change_percent),
            as_of_date: latest.date,
        })
    }
}
