use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::SyncResult;
use crate::models::{Category, IndexSnapshot, MetricSnapshot};

/// Whether an upsert touched an existing row or created one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    Inserted,
}

/// SQLX-based store for instrument and index snapshots
#[derive(Clone)]
pub struct DatabaseManagerSqlx {
    pool: SqlitePool,
}

impl DatabaseManagerSqlx {
    /// Open (creating if missing) the SQLite database at `database_path`.
    /// Schema creation is separate, see [`ensure_schema`](Self::ensure_schema).
    pub async fn new(database_path: &str) -> SyncResult<Self> {
        let path = database_path.strip_prefix("sqlite:").unwrap_or(database_path);
        info!("Connecting to database: {}", path);

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent "create if absent" for both snapshot tables
    pub async fn ensure_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL,
                display_name TEXT,
                current_price REAL NOT NULL,
                change_prev REAL,
                change_1m REAL,
                change_3m REAL,
                change_1y REAL,
                last_updated TEXT NOT NULL,
                revision INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshot_category ON snapshot(category)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_snapshot (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                index_name TEXT NOT NULL UNIQUE,
                current_value REAL NOT NULL,
                change_value REAL NOT NULL,
                change_percent REAL NOT NULL,
                as_of_date DATE NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Snapshot schema verified");
        Ok(())
    }

    /// Insert or update the row for `snapshot.ticker` in one statement.
    ///
    /// The native upsert takes the write lock up front, so concurrent writers
    /// for different tickers queue on `busy_timeout` instead of failing. A
    /// missing display name never erases a stored one. `last_updated` is kept
    /// at the later of the stored and the new write time.
    pub async fn upsert_snapshot(&self, snapshot: &MetricSnapshot) -> SyncResult<UpsertOutcome> {
        let revision = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO snapshot (ticker, category, display_name, current_price,
                                  change_prev, change_1m, change_3m, change_1y, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticker) DO UPDATE SET
                category = excluded.category,
                display_name = COALESCE(excluded.display_name, snapshot.display_name),
                current_price = excluded.current_price,
                change_prev = excluded.change_prev,
                change_1m = excluded.change_1m,
                change_3m = excluded.change_3m,
                change_1y = excluded.change_1y,
                last_updated = MAX(snapshot.last_updated, excluded.last_updated),
                revision = snapshot.revision + 1
            RETURNING revision
            "#,
        )
        .bind(&snapshot.ticker)
        .bind(snapshot.category.as_str())
        .bind(&snapshot.display_name)
        .bind(snapshot.current_price)
        .bind(snapshot.change_prev)
        .bind(snapshot.change_1m)
        .bind(snapshot.change_3m)
        .bind(snapshot.change_1y)
        .bind(timestamp_text(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        if revision == 1 {
            debug!("Inserted first row for {}", snapshot.ticker);
            Ok(UpsertOutcome::Inserted)
        } else {
            Ok(UpsertOutcome::Updated)
        }
    }

    /// Native upsert keyed by index name
    pub async fn upsert_index(&self, index: &IndexSnapshot) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO index_snapshot (index_name, current_value, change_value, change_percent, as_of_date, last_updated)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(index_name) DO UPDATE SET
                current_value = excluded.current_value,
                change_value = excluded.change_value,
                change_percent = excluded.change_percent,
                as_of_date = excluded.as_of_date,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&index.index_name)
        .bind(index.current_value)
        .bind(index.change_value)
        .bind(index.change_percent)
        .bind(index.as_of_date)
        .bind(timestamp_text(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_snapshot(&self, ticker: &str) -> SyncResult<Option<MetricSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT ticker, category, display_name, current_price,
                   change_prev, change_1m, change_3m, change_1y, last_updated
            FROM snapshot
            WHERE ticker = ?
            "#,
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(snapshot_from_row).transpose()?)
    }

    pub async fn get_snapshots_by_category(&self, category: Category) -> SyncResult<Vec<MetricSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, category, display_name, current_price,
                   change_prev, change_1m, change_3m, change_1y, last_updated
            FROM snapshot
            WHERE category = ?
            ORDER BY ticker
            "#,
        )
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(snapshot_from_row).collect::<Result<_, _>>()?)
    }

    pub async fn get_all_snapshots(&self) -> SyncResult<Vec<MetricSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, category, display_name, current_price,
                   change_prev, change_1m, change_3m, change_1y, last_updated
            FROM snapshot
            ORDER BY category, ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(snapshot_from_row).collect::<Result<_, _>>()?)
    }

    pub async fn count_snapshots(&self) -> SyncResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM snapshot")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    pub async fn get_index_snapshots(&self) -> SyncResult<Vec<IndexSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT index_name, current_value, change_value, change_percent, as_of_date
            FROM index_snapshot
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| IndexSnapshot {
                index_name: r.get::<String, _>("index_name"),
                current_value: r.get::<f64, _>("current_value"),
                change_value: r.get::<f64, _>("change_value"),
                change_percent: r.get::<f64, _>("change_percent"),
                as_of_date: r.get::<NaiveDate, _>("as_of_date"),
            })
            .collect())
    }
}

/// Fixed-width UTC text (`2025-01-02T03:04:05.123456Z`), so SQL `MAX` on the
/// column orders by time
fn timestamp_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(r: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let text = r.try_get::<String, _>(column)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

fn snapshot_from_row(r: &SqliteRow) -> Result<MetricSnapshot, sqlx::Error> {
    let category = r
        .try_get::<String, _>("category")?
        .parse::<Category>()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: "category".to_string(),
            source: Box::new(e),
        })?;

    Ok(MetricSnapshot {
        ticker: r.try_get::<String, _>("ticker")?,
        category,
        display_name: r.try_get::<Option<String>, _>("display_name")?,
        current_price: r.try_get::<f64, _>("current_price")?,
        change_prev: r.try_get::<Option<f64>, _>("change_prev")?,
        change_1m: r.try_get::<Option<f64>, _>("change_1m")?,
        change_3m: r.try_get::<Option<f64>, _>("change_3m")?,
        change_1y: r.try_get::<Option<f64>, _>("change_1y")?,
        last_updated: Some(parse_timestamp(r, "last_updated")?),
    })
}
