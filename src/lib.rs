#![recursion_limit = "256"]

pub mod cache;
pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod generation;
pub mod harness;
pub mod migration;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod redaction;
pub mod service;
pub mod state;
pub mod synthesizer;

pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{FeatureArea, GenerateOptions, GeneratedPlanDocument, PlanOutcome, PlanSource, UserProfile};
pub use crate::service::PlanService;
pub use crate::state::PlanState;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs to a daily file under `log_dir`. `RUST_LOG` overrides the
/// default `info` filter. Only the first call installs a subscriber.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "plan-engine.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(format!("failed to install tracing subscriber: {}", error)))
}
