//! Batch orchestration over the instrument catalog
//!
//! Instruments are processed through a bounded pool of spawned tasks. Only
//! one batch runs per orchestrator at a time: scheduled cycles and on-demand
//! commands both take the same [`BatchPermit`], and a caller that finds it
//! taken gets [`SyncError::Busy`]. A failure or panic in one instrument is
//! counted without touching the rest of the batch.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::data_collector::{AggregateOutcome, DataCollector};
use crate::database_sqlx::{DatabaseManagerSqlx, UpsertOutcome};
use crate::error::{SyncError, SyncResult};
use crate::models::{BatchResult, CalendarBasis, Catalog, IndexBatchResult, Instrument, MarketIndex};

/// Cooperative cancellation shared between a batch and whoever may stop it.
/// Checked before each instrument starts; in-flight work is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One async mutex per key, created on first use
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

/// Per-instrument result inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstrumentStatus {
    Written,
    Skipped,
    Failed,
    Cancelled,
}

/// What a spawned worker needs; cheap to clone into each task
#[derive(Clone)]
struct WorkerContext {
    collector: Arc<DataCollector>,
    database: Arc<DatabaseManagerSqlx>,
    locks: Arc<KeyedLocks>,
    cancel: CancellationFlag,
}

impl WorkerContext {
    async fn process(&self, instrument: Instrument) -> InstrumentStatus {
        if self.cancel.is_cancelled() {
            return InstrumentStatus::Cancelled;
        }

        let lock = self.locks.lock_for(&instrument.ticker);
        let _guard = lock.lock().await;

        let snapshot = match self.collector.aggregate(&instrument).await {
            AggregateOutcome::Snapshot(snapshot) => snapshot,
            AggregateOutcome::Skip(reason) => {
                debug!("{} skipped: {:?}", instrument.ticker, reason);
                return InstrumentStatus::Skipped;
            }
        };

        match self.database.upsert_snapshot(&snapshot).await {
            Ok(outcome) => {
                debug!(
                    "{} {} at {}",
                    instrument.ticker,
                    if outcome == UpsertOutcome::Inserted { "inserted" } else { "updated" },
                    snapshot.current_price
                );
                InstrumentStatus::Written
            }
            Err(e) => {
                error!("Failed to store snapshot for {}: {}", instrument.ticker, e);
                InstrumentStatus::Failed
            }
        }
    }
}

/// Holds the orchestrator's single batch slot; released on drop, panics included
pub struct BatchPermit<'a> {
    busy: &'a AtomicBool,
}

impl Drop for BatchPermit<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Runs the instrument and index batches against an immutable catalog
pub struct BatchOrchestrator {
    context: WorkerContext,
    catalog: Arc<Catalog>,
    indices: Vec<MarketIndex>,
    worker_count: usize,
    schema_ready: OnceCell<()>,
    busy: AtomicBool,
}

impl BatchOrchestrator {
    pub fn new(
        collector: Arc<DataCollector>,
        database: Arc<DatabaseManagerSqlx>,
        catalog: Arc<Catalog>,
        indices: Vec<MarketIndex>,
        worker_count: usize,
    ) -> Self {
        Self {
            context: WorkerContext {
                collector,
                database,
                locks: Arc::new(KeyedLocks::new()),
                cancel: CancellationFlag::new(),
            },
            catalog,
            indices,
            worker_count: worker_count.max(1),
            schema_ready: OnceCell::new(),
            busy: AtomicBool::new(false),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn database(&self) -> &DatabaseManagerSqlx {
        &self.context.database
    }

    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.context.cancel.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Take the batch slot, or `None` while another batch holds it
    pub fn try_acquire(&self) -> Option<BatchPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BatchPermit { busy: &self.busy })
    }

    fn acquire(&self) -> SyncResult<BatchPermit<'_>> {
        self.try_acquire().ok_or_else(|| {
            warn!("Another batch is still running, rejecting this one");
            SyncError::Busy
        })
    }

    /// Create the tables on first use; later calls are free
    async fn ensure_schema(&self) -> SyncResult<()> {
        self.schema_ready
            .get_or_try_init(|| async { self.context.database.ensure_schema().await })
            .await?;
        Ok(())
    }

    /// Synchronize every instrument, or only those in `filter`'s category.
    ///
    /// An unknown category is rejected before anything is fetched, and a
    /// batch already in flight makes this return [`SyncError::Busy`]. After
    /// that only a storage failure while preparing the schema is returned as
    /// an error; per-instrument problems are counted in the result.
    pub async fn run(&self, filter: Option<&str>, basis: CalendarBasis) -> SyncResult<BatchResult> {
        let instruments = self.catalog.select(filter)?;
        let _permit = self.acquire()?;
        self.run_instruments(instruments, basis).await
    }

    /// [`run`](Self::run) for a caller that already holds the batch slot
    pub async fn run_with(
        &self,
        _permit: &BatchPermit<'_>,
        filter: Option<&str>,
        basis: CalendarBasis,
    ) -> SyncResult<BatchResult> {
        let instruments = self.catalog.select(filter)?;
        self.run_instruments(instruments, basis).await
    }

    async fn run_instruments(&self, instruments: Vec<Instrument>, basis: CalendarBasis) -> SyncResult<BatchResult> {
        self.ensure_schema().await?;

        let mut result = BatchResult::new(basis, instruments.len());
        info!(
            "🚀 Starting batch of {} instruments ({} basis, {} workers)",
            result.total, basis, self.worker_count
        );

        let mut statuses = stream::iter(instruments)
            .map(|instrument| {
                let context = self.context.clone();
                let ticker = instrument.ticker.clone();
                let handle = tokio::spawn(async move { context.process(instrument).await });
                async move { (ticker, handle.await) }
            })
            .buffer_unordered(self.worker_count);

        while let Some((ticker, joined)) = statuses.next().await {
            let status = joined.unwrap_or_else(|e| {
                error!("Worker for {} did not finish: {}", ticker, e);
                InstrumentStatus::Failed
            });
            match status {
                InstrumentStatus::Written => result.succeeded += 1,
                InstrumentStatus::Skipped => result.skipped += 1,
                InstrumentStatus::Failed => result.failed += 1,
                InstrumentStatus::Cancelled => result.cancelled += 1,
            }
        }

        if result.cancelled > 0 {
            warn!("Batch cancelled with {} instruments not started", result.cancelled);
        }
        info!(
            "✅ Batch finished: {} succeeded, {} skipped, {} failed",
            result.succeeded, result.skipped, result.failed
        );
        Ok(result)
    }

    /// Synchronize the market index dataset
    pub async fn run_indices(&self) -> SyncResult<IndexBatchResult> {
        let _permit = self.acquire()?;
        self.run_index_batch().await
    }

    pub async fn run_indices_with(&self, _permit: &BatchPermit<'_>) -> SyncResult<IndexBatchResult> {
        self.run_index_batch().await
    }

    async fn run_index_batch(&self) -> SyncResult<IndexBatchResult> {
        self.ensure_schema().await?;

        let mut result = IndexBatchResult::default();
        for index in &self.indices {
            if self.context.cancel.is_cancelled() {
                break;
            }

            match self.context.collector.aggregate_index(index).await {
                Some(snapshot) => match self.context.database.upsert_index(&snapshot).await {
                    Ok(()) => result.succeeded += 1,
                    Err(e) => {
                        error!("Failed to store index {}: {}", index.name, e);
                        result.failed += 1;
                    }
                },
                None => result.skipped += 1,
            }
        }

        info!(
            "📈 Index batch finished: {} succeeded, {} skipped, {} failed",
            result.succeeded, result.skipped, result.failed
        );
        Ok(result)
    }
}
