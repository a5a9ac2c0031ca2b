// On-demand sync commands
// Invoke the orchestrator directly and shape the result for an API layer

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::concurrent_fetcher::BatchOrchestrator;
use crate::error::SyncError;
use crate::utils::MarketCalendar;

/// `{"message": ...}` on success, `{"error": ...}` otherwise
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Success {
        message: String,
    },
    Failure {
        error: String,
        #[serde(skip)]
        status: u16,
    },
}

impl CommandResponse {
    pub fn success(message: impl Into<String>) -> Self {
        CommandResponse::Success { message: message.into() }
    }

    pub fn from_error(err: &SyncError) -> Self {
        CommandResponse::Failure {
            error: err.to_string(),
            status: err.status_code(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandResponse::Success { .. })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            CommandResponse::Success { .. } => 200,
            CommandResponse::Failure { status, .. } => *status,
        }
    }
}

/// Synchronize the whole catalog now
pub async fn update_all(orchestrator: &BatchOrchestrator, calendar: &MarketCalendar) -> CommandResponse {
    run_batch(orchestrator, calendar, None).await
}

/// Synchronize one category now
pub async fn update_category(
    orchestrator: &BatchOrchestrator,
    calendar: &MarketCalendar,
    category: &str,
) -> CommandResponse {
    run_batch(orchestrator, calendar, Some(category)).await
}

async fn run_batch(
    orchestrator: &BatchOrchestrator,
    calendar: &MarketCalendar,
    category: Option<&str>,
) -> CommandResponse {
    let basis = calendar.basis_for(Utc::now());
    let scope = category.unwrap_or("all categories");
    info!("Manual update requested for {} ({} basis)", scope, basis);

    match orchestrator.run(category, basis).await {
        Ok(result) => CommandResponse::success(format!(
            "Update finished for {}: {} succeeded, {} skipped, {} failed",
            scope, result.succeeded, result.skipped, result.failed
        )),
        Err(e) => {
            if e.status_code() < 500 {
                warn!("Rejected manual update: {}", e);
            } else {
                error!("Manual update failed: {}", e);
            }
            CommandResponse::from_error(&e)
        }
    }
}

/// Synchronize the market indices now
pub async fn update_indices(orchestrator: &BatchOrchestrator) -> CommandResponse {
    match orchestrator.run_indices().await {
        Ok(result) => CommandResponse::success(format!(
            "Index update finished: {} succeeded, {} skipped, {} failed",
            result.succeeded, result.skipped, result.failed
        )),
        Err(SyncError::Busy) => {
            warn!("Rejected index update: a batch is already running");
            CommandResponse::from_error(&SyncError::Busy)
        }
        Err(e) => {
            error!("Index update failed: {}", e);
            CommandResponse::from_error(&e)
        }
    }
}
