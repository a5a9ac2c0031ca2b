use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::concurrent_fetcher::BatchOrchestrator;
use crate::models::{BatchResult, CalendarBasis, IndexBatchResult};
use crate::utils::MarketCalendar;

/// Results of one scheduled cycle. A batch that failed as a whole is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub basis: CalendarBasis,
    pub instruments: Option<BatchResult>,
    pub indices: Option<IndexBatchResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Ran(CycleReport),
    /// A previous cycle was still running
    Busy,
    /// Non-trading day and off-day syncing is disabled
    Suppressed(CalendarBasis),
}

/// Recurring trigger for the batch orchestrator. A cycle holds the
/// orchestrator's batch slot for both of its batches, so it never overlaps
/// another cycle or an on-demand command. A trigger that arrives while the
/// slot is taken is dropped, not queued.
pub struct Scheduler {
    orchestrator: Arc<BatchOrchestrator>,
    calendar: MarketCalendar,
    interval: Duration,
    sync_on_non_trading_days: bool,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        calendar: MarketCalendar,
        interval: Duration,
        sync_on_non_trading_days: bool,
    ) -> Self {
        Self {
            orchestrator,
            calendar,
            interval,
            sync_on_non_trading_days,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.orchestrator.is_busy()
    }

    pub async fn trigger(&self) -> TriggerOutcome {
        self.trigger_at(Utc::now()).await
    }

    /// Run one cycle as if the wall clock read `now`
    pub async fn trigger_at(&self, now: DateTime<Utc>) -> TriggerOutcome {
        let basis = self.calendar.basis_for(now);

        if basis == CalendarBasis::NonTrading && !self.sync_on_non_trading_days {
            let market_date = now.with_timezone(&self.calendar.offset()).date_naive();
            match self.calendar.previous_trading_day(market_date) {
                Some(last) => info!(
                    "Market closed on {}, stored data already reflects the {} session; skipping",
                    market_date, last
                ),
                None => info!("Market closed on {}, skipping scheduled sync", market_date),
            }
            return TriggerOutcome::Suppressed(basis);
        }

        let permit = match self.orchestrator.try_acquire() {
            Some(permit) => permit,
            None => {
                warn!("Previous sync still running, skipping this trigger");
                return TriggerOutcome::Busy;
            }
        };

        info!("⏰ Sync cycle starting ({} basis)", basis);

        let instruments = match self.orchestrator.run_with(&permit, None, basis).await {
            Ok(result) => Some(result),
            Err(e) => {
                error!("Instrument batch failed: {}", e);
                None
            }
        };

        let indices = match self.orchestrator.run_indices_with(&permit).await {
            Ok(result) => Some(result),
            Err(e) => {
                error!("Index batch failed: {}", e);
                None
            }
        };

        TriggerOutcome::Ran(CycleReport {
            basis,
            instruments,
            indices,
        })
    }

    /// Tick until `shutdown` flips to true (or its sender is dropped).
    ///
    /// Every tick runs in its own task so a panicking cycle is reported here
    /// and the loop carries on. On shutdown the running batch is cancelled
    /// between instruments and awaited, then the flag is cleared so the
    /// orchestrator stays usable.
    pub async fn run_forever(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles: JoinSet<TriggerOutcome> = JoinSet::new();

        info!("Scheduler started, interval {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self);
                    cycles.spawn(async move { scheduler.trigger().await });
                }
                Some(joined) = cycles.join_next() => {
                    log_cycle(joined);
                }
                changed = shutdown.changed() => {
                    let stop = changed.is_err() || *shutdown.borrow();
                    if stop {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopping, waiting for the running cycle");
        self.orchestrator.cancellation_flag().cancel();
        while let Some(joined) = cycles.join_next().await {
            log_cycle(joined);
        }
        self.orchestrator.cancellation_flag().reset();
        info!("🛑 Scheduler stopped");
    }
}

fn log_cycle(joined: Result<TriggerOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(TriggerOutcome::Ran(report)) => debug!("Cycle finished: {:?}", report),
        Ok(_) => {}
        Err(e) => error!("Sync cycle failed: {}", e),
    }
}
