use anyhow::{Result, bail};

use super::{quotes, ui};
use crate::core::config::AppConfig;
use crate::core::snapshot::DEFAULT_TIMESTAMP_FORMAT;
use crate::core::{CycleOutcome, RefreshScheduler};

/// Runs a single refresh cycle and prints the resulting table.
pub async fn run(scheduler: &RefreshScheduler, config: &AppConfig) -> Result<()> {
    let spinner = ui::new_spinner("Fetching quotes...");
    let outcome = scheduler.refresh().await;
    spinner.finish_and_clear();

    let snapshot = scheduler.store().snapshot();
    println!(
        "{}",
        quotes::render_snapshot(
            &snapshot,
            scheduler.symbols(),
            &config.base_currency,
            DEFAULT_TIMESTAMP_FORMAT,
        )
    );

    match outcome {
        CycleOutcome::Completed(report) if !report.quotes_updated => {
            bail!("Failed to fetch quotes, run with --verbose for details")
        }
        CycleOutcome::Completed(report) => {
            if !report.series_failed.is_empty() {
                tracing::warn!(symbols = ?report.series_failed, "Some histories could not be fetched");
            }
            Ok(())
        }
        CycleOutcome::Skipped => bail!("Refresh was skipped"),
    }
}
