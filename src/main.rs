use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rust_market_sync::{
    api::{ApiRateLimiter, ChartClient, QuotePageClient},
    commands::{self, CommandResponse},
    concurrent_fetcher::BatchOrchestrator,
    data_collector::DataCollector,
    database_sqlx::DatabaseManagerSqlx,
    models::{Category, Config, MarketIndex},
    scheduler::Scheduler,
    utils::MarketCalendar,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Keeps per-instrument market snapshots in sync", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler loop until Ctrl-C
    Run,
    /// Synchronize every instrument once
    UpdateAll,
    /// Synchronize one category once
    Update {
        /// Category name, e.g. bank or semiconductor
        category: String,
    },
    /// Synchronize the market indices once
    Indices,
    /// Print stored snapshots for a category
    Show {
        category: String,
    },
    /// Print the current calendar basis
    Basis,
}

struct App {
    config: Config,
    calendar: MarketCalendar,
    orchestrator: Arc<BatchOrchestrator>,
}

async fn build_app(config: Config) -> Result<App> {
    let calendar = MarketCalendar::from_config(&config)?;
    let catalog = config.load_catalog()?;
    info!("📋 Catalog loaded: {} instruments", catalog.len());

    let rate_limiter = ApiRateLimiter::new(config.rate_limit_per_minute);
    let live = QuotePageClient::new(&config, rate_limiter.clone())?;
    let history = ChartClient::new(&config, calendar.offset(), rate_limiter)?;
    let collector = DataCollector::new(Arc::new(live), Arc::new(history), config.history_symbol_suffix.clone());

    let database = DatabaseManagerSqlx::new(&config.database_path).await?;
    info!("💾 Database ready at {}", config.database_path);

    let orchestrator = BatchOrchestrator::new(
        Arc::new(collector),
        Arc::new(database),
        Arc::new(catalog),
        MarketIndex::default_indices(),
        config.worker_count,
    );

    Ok(App {
        config,
        calendar,
        orchestrator: Arc::new(orchestrator),
    })
}

fn print_response(response: &CommandResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_scheduler(app: App) -> Result<()> {
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&app.orchestrator),
        app.calendar.clone(),
        Duration::from_secs(app.config.sync_interval_secs),
        app.config.sync_on_non_trading_days,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&scheduler).run_forever(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown requested");
    shutdown_tx.send(true)?;

    if let Err(e) = handle.await {
        error!("Scheduler task ended abnormally: {}", e);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rust_market_sync=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;

    if let Command::Basis = args.command {
        let calendar = MarketCalendar::from_config(&config)?;
        let now = chrono::Utc::now();
        println!(
            "{}",
            serde_json::json!({
                "basis": calendar.basis_for(now),
                "marketDate": calendar.today(),
            })
        );
        return Ok(());
    }

    let app = build_app(config).await?;

    match args.command {
        Command::Run => run_scheduler(app).await?,
        Command::UpdateAll => {
            print_response(&commands::update_all(&app.orchestrator, &app.calendar).await)?;
        }
        Command::Update { category } => {
            print_response(&commands::update_category(&app.orchestrator, &app.calendar, &category).await)?;
        }
        Command::Indices => {
            print_response(&commands::update_indices(&app.orchestrator).await)?;
        }
        Command::Show { category } => {
            let category: Category = category.parse()?;
            let database = app.orchestrator.database();
            database.ensure_schema().await?;
            let snapshots = database.get_snapshots_by_category(category).await?;
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }
        Command::Basis => {}
    }

    Ok(())
}
