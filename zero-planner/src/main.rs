//! Zero Planner - Rebalancing decision engine for the Zero ecosystem.
//!
//! Generates, simulates and scores candidate trade sequences over HTTP.

use anyhow::Result;
use zero_common::config::Config;
use zero_common::logging::init_logging_with_exclusions;
use zero_planner::PlannerService;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    // Load and validate configuration
    let config = Config::load_and_validate()?;

    // Initialize logging
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Zero Planner v{}", env!("CARGO_PKG_VERSION"));

    let service = PlannerService::new(config)?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = u64::try_from(startup_duration.as_millis()).unwrap_or(u64::MAX),
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
