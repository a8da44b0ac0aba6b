use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use super::{quotes, ui};
use crate::core::config::AppConfig;
use crate::core::snapshot::DEFAULT_TIMESTAMP_FORMAT;
use crate::core::{MarketSnapshot, RefreshScheduler};

fn render_screen(snapshot: &MarketSnapshot, symbols: &[String], config: &AppConfig) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        ui::style_text(
            &format!("Quotes against {}", config.base_currency),
            ui::StyleType::Title
        ),
        quotes::render_snapshot(
            snapshot,
            symbols,
            &config.base_currency,
            DEFAULT_TIMESTAMP_FORMAT,
        ),
        ui::style_text(
            &format!(
                "Refreshing every {}s. Press Enter to refresh now, Ctrl-C to quit.",
                config.refresh_interval_secs
            ),
            ui::StyleType::Subtle
        )
    )
}

fn redraw(snapshot: &MarketSnapshot, symbols: &[String], config: &AppConfig) {
    let term = console::Term::stdout();
    if let Err(e) = term.clear_screen() {
        debug!(error = %e, "Failed to clear the terminal");
    }
    println!("{}", render_screen(snapshot, symbols, config));
}

/// Keeps refreshing on the configured interval and redraws as results merge in.
pub async fn run(scheduler: &RefreshScheduler, config: &AppConfig) -> Result<()> {
    let mut snapshots = scheduler.store().subscribe();
    let mut loading = scheduler.subscribe_loading();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut spinner: Option<indicatif::ProgressBar> = None;

    redraw(&snapshots.borrow_and_update().clone(), scheduler.symbols(), config);
    scheduler.start();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                debug!("Ctrl-C received");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                match &spinner {
                    Some(pb) => pb.suspend(|| redraw(&snapshot, scheduler.symbols(), config)),
                    None => redraw(&snapshot, scheduler.symbols(), config),
                }
            }
            changed = loading.changed() => {
                if changed.is_err() {
                    break;
                }
                let is_loading = *loading.borrow_and_update();
                if is_loading {
                    spinner = Some(ui::new_spinner("Refreshing..."));
                } else if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => scheduler.trigger_manual_refresh(),
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Stopped reading stdin");
                    stdin_open = false;
                }
            },
        }
    }

    if let Some(pb) = spinner.take() {
        pb.finish_and_clear();
    }
    scheduler.shutdown();
    scheduler.join().await;
    Ok(())
}
