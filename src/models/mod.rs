use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::SyncError;

/// Instrument category. The lowercase name is what gets persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Bank,
    Bio,
    Semiconductor,
    Food,
    Video,
    Car,
    Beauty,
    Travel,
    Shipbuilding,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Bank,
        Category::Bio,
        Category::Semiconductor,
        Category::Food,
        Category::Video,
        Category::Car,
        Category::Beauty,
        Category::Travel,
        Category::Shipbuilding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bank => "bank",
            Category::Bio => "bio",
            Category::Semiconductor => "semiconductor",
            Category::Food => "food",
            Category::Video => "video",
            Category::Car => "car",
            Category::Beauty => "beauty",
            Category::Travel => "travel",
            Category::Shipbuilding => "shipbuilding",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| SyncError::UnknownCategory(s.to_string()))
    }
}

/// Catalog entry for a tradable security
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub ticker: String,
    pub category: Category,
    pub display_name: Option<String>,
}

impl Instrument {
    pub fn new(ticker: impl Into<String>, category: Category) -> Self {
        Self {
            ticker: ticker.into(),
            category,
            display_name: None,
        }
    }
}

/// Immutable category -> instruments catalog, built once at startup.
#[derive(Debug, Clone)]
pub struct Catalog {
    groups: Vec<(Category, Vec<Instrument>)>,
}

const DEFAULT_TICKERS: &[(Category, &[&str])] = &[
    (Category::Bank, &["323410", "055550", "138930", "086790", "105560", "024110"]),
    (Category::Bio, &["068270", "207940"]),
    (Category::Semiconductor, &["005930", "000660"]),
    (Category::Food, &["003230", "007310", "271560", "097950"]),
    (Category::Video, &["352820"]),
    (Category::Car, &["005380", "000270", "012330"]),
    (Category::Beauty, &["090430", "003350"]),
    (Category::Travel, &["020560", "003490"]),
    (Category::Shipbuilding, &["010140", "009540"]),
];

#[derive(Debug, Deserialize)]
struct CatalogRow {
    category: String,
    ticker: String,
    #[serde(default)]
    name: Option<String>,
}

impl Catalog {
    /// Build a catalog from instruments, grouping by category in first-seen order.
    /// Duplicate tickers keep their first occurrence.
    pub fn new(instruments: Vec<Instrument>) -> Self {
        let mut groups: Vec<(Category, Vec<Instrument>)> = Vec::new();
        let mut seen = BTreeSet::new();

        for instrument in instruments {
            if !seen.insert(instrument.ticker.clone()) {
                continue;
            }
            match groups.iter_mut().find(|(c, _)| *c == instrument.category) {
                Some((_, members)) => members.push(instrument),
                None => groups.push((instrument.category, vec![instrument])),
            }
        }

        Self { groups }
    }

    /// Production ticker set
    pub fn default_catalog() -> Self {
        let instruments = DEFAULT_TICKERS
            .iter()
            .flat_map(|(category, tickers)| {
                tickers.iter().map(move |t| Instrument::new(*t, *category))
            })
            .collect();
        Self::new(instruments)
    }

    /// Load a `category,ticker[,name]` CSV file.
    pub fn from_csv_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let mut instruments = Vec::new();

        for row in reader.deserialize::<CatalogRow>() {
            let row = row?;
            let category: Category = row.category.parse()?;
            instruments.push(Instrument {
                ticker: row.ticker.trim().to_string(),
                category,
                display_name: row.name.filter(|n| !n.trim().is_empty()),
            });
        }

        if instruments.is_empty() {
            anyhow::bail!("catalog file {} contains no instruments", path.as_ref().display());
        }
        Ok(Self::new(instruments))
    }

    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.groups.iter().map(|(c, _)| *c)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.groups.iter().flat_map(|(_, members)| members.iter())
    }

    pub fn instruments_in(&self, category: Category) -> &[Instrument] {
        self.groups
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, members)| members.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, m)| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve an optional category filter into the instruments to process.
    /// An unknown name is rejected before any work is scheduled.
    pub fn select(&self, filter: Option<&str>) -> Result<Vec<Instrument>, SyncError> {
        match filter {
            None => Ok(self.instruments().cloned().collect()),
            Some(name) => {
                let category: Category = name.parse()?;
                if !self.categories().any(|c| c == category) {
                    return Err(SyncError::UnknownCategory(name.to_string()));
                }
                Ok(self.instruments_in(category).to_vec())
            }
        }
    }
}

/// Latest computed metrics for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub ticker: String,
    pub category: Category,
    pub display_name: Option<String>,
    pub current_price: f64,
    pub change_prev: Option<f64>,
    pub change_1m: Option<f64>,
    pub change_3m: Option<f64>,
    pub change_1y: Option<f64>,
    /// Set by the store at write time
    pub last_updated: Option<DateTime<Utc>>,
}

/// One daily close
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Trailing window of daily closes, always ascending by date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryWindow {
    points: Vec<HistoryPoint>,
}

impl HistoryWindow {
    pub fn new(mut points: Vec<HistoryPoint>) -> Self {
        points.retain(|p| p.close.is_finite());
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self { points }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[HistoryPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.last()
    }

    pub fn first(&self) -> Option<&HistoryPoint> {
        self.points.first()
    }

    /// Point `offset` rows before the most recent one.
    pub fn rows_back(&self, offset: usize) -> Option<&HistoryPoint> {
        let len = self.points.len();
        if len < offset + 1 {
            return None;
        }
        self.points.get(len - 1 - offset)
    }
}

/// Result of a successful live quote extraction
#[derive(Debug, Clone, PartialEq)]
pub struct LiveQuote {
    pub price: f64,
    pub display_name: Option<String>,
}

/// Market-session context used to label a synchronization cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarBasis {
    Regular,
    Closing,
    PreviousClosing,
    NonTrading,
}

impl CalendarBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarBasis::Regular => "regular",
            CalendarBasis::Closing => "closing",
            CalendarBasis::PreviousClosing => "previous_closing",
            CalendarBasis::NonTrading => "non_trading",
        }
    }
}

impl fmt::Display for CalendarBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A market index tracked alongside the instrument catalog
#[derive(Debug, Clone, PartialEq)]
pub struct MarketIndex {
    pub name: String,
    pub symbol: String,
}

impl MarketIndex {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
        }
    }

    pub fn default_indices() -> Vec<MarketIndex> {
        vec![
            MarketIndex::new("KOSPI", "^KS11"),
            MarketIndex::new("KOSDAQ", "^KQ11"),
            MarketIndex::new("NASDAQ Composite", "^IXIC"),
            MarketIndex::new("S&P 500", "^GSPC"),
            MarketIndex::new("Dow Jones", "^DJI"),
            MarketIndex::new("USD/KRW", "KRW=X"),
        ]
    }
}

/// Latest value for one market index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    pub index_name: String,
    pub current_value: f64,
    pub change_value: f64,
    pub change_percent: f64,
    pub as_of_date: NaiveDate,
}

/// Outcome counters for one instrument batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub basis: CalendarBasis,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchResult {
    pub fn new(basis: CalendarBasis, total: usize) -> Self {
        Self {
            basis,
            total,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            cancelled: 0,
        }
    }
}

/// Outcome counters for one index batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexBatchResult {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub quote_base_url: String,
    pub chart_base_url: String,
    pub quote_exchange: String,
    pub history_symbol_suffix: String,
    pub http_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
    pub worker_count: usize,
    pub sync_interval_secs: u64,
    pub market_utc_offset_hours: i32,
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub holidays: Vec<NaiveDate>,
    pub sync_on_non_trading_days: bool,
    pub catalog_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "market_sync.db".to_string(),
            quote_base_url: "https://www.google.com/finance".to_string(),
            chart_base_url: "https://query1.finance.yahoo.com".to_string(),
            quote_exchange: "KRX".to_string(),
            history_symbol_suffix: ".KS".to_string(),
            http_timeout_secs: 10,
            rate_limit_per_minute: 120,
            worker_count: 4,
            sync_interval_secs: 60,
            market_utc_offset_hours: 9,
            market_open: NaiveTime::from_hms_opt(9, 0, 0).expect("valid market open"),
            market_close: NaiveTime::from_hms_opt(15, 30, 0).expect("valid market close"),
            holidays: default_holidays(),
            sync_on_non_trading_days: false,
            catalog_path: None,
        }
    }
}

fn default_holidays() -> Vec<NaiveDate> {
    [2025, 2026]
        .iter()
        .flat_map(|&year| {
            [(3, 1), (5, 5), (8, 15), (10, 3), (12, 25)]
                .into_iter()
                .filter_map(move |(m, d)| NaiveDate::from_ymd_opt(year, m, d))
        })
        .collect()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let defaults = Config::default();

        let market_open = match std::env::var("MARKET_OPEN") {
            Ok(v) => parse_clock(&v)?,
            Err(_) => defaults.market_open,
        };
        let market_close = match std::env::var("MARKET_CLOSE") {
            Ok(v) => parse_clock(&v)?,
            Err(_) => defaults.market_close,
        };
        if market_open >= market_close {
            anyhow::bail!("MARKET_OPEN ({}) must be before MARKET_CLOSE ({})", market_open, market_close);
        }

        let holidays = match std::env::var("MARKET_HOLIDAYS") {
            Ok(v) => parse_holidays(&v)?,
            Err(_) => defaults.holidays,
        };

        let sync_on_non_trading_days = match std::env::var("SYNC_ON_NON_TRADING_DAYS") {
            Ok(v) => parse_flag("SYNC_ON_NON_TRADING_DAYS", &v)?,
            Err(_) => defaults.sync_on_non_trading_days,
        };

        let market_utc_offset_hours = env_or("MARKET_UTC_OFFSET_HOURS", defaults.market_utc_offset_hours);
        if !(-23..=23).contains(&market_utc_offset_hours) {
            anyhow::bail!("MARKET_UTC_OFFSET_HOURS out of range: {}", market_utc_offset_hours);
        }

        Ok(Config {
            database_path: std::env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            quote_base_url: std::env::var("QUOTE_BASE_URL").unwrap_or(defaults.quote_base_url),
            chart_base_url: std::env::var("CHART_BASE_URL").unwrap_or(defaults.chart_base_url),
            quote_exchange: std::env::var("QUOTE_EXCHANGE").unwrap_or(defaults.quote_exchange),
            history_symbol_suffix: std::env::var("HISTORY_SYMBOL_SUFFIX")
                .unwrap_or(defaults.history_symbol_suffix),
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs).max(1),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            worker_count: env_or("WORKER_COUNT", defaults.worker_count).max(1),
            sync_interval_secs: env_or("SYNC_INTERVAL_SECS", defaults.sync_interval_secs).max(1),
            market_utc_offset_hours,
            market_open,
            market_close,
            holidays,
            sync_on_non_trading_days,
            catalog_path: std::env::var("CATALOG_PATH").ok().filter(|p| !p.trim().is_empty()),
        })
    }

    /// Catalog from `CATALOG_PATH` if set, otherwise the built-in one
    pub fn load_catalog(&self) -> anyhow::Result<Catalog> {
        match &self.catalog_path {
            Some(path) => Catalog::from_csv_path(path),
            None => Ok(Catalog::default_catalog()),
        }
    }
}

fn parse_clock(value: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| anyhow::anyhow!("Invalid time '{}': {}. Expected HH:MM", value, e))
}

fn parse_flag(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => anyhow::bail!("Invalid {} '{}'. Expected true or false", key, other),
    }
}

fn parse_holidays(value: &str) -> anyhow::Result<Vec<NaiveDate>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("Invalid holiday '{}': {}. Expected YYYY-MM-DD", s, e))
        })
        .collect()
}
