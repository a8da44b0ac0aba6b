//! Drives refresh cycles and merges their results into the snapshot store

use futures::future::{join, join_all};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::history::HistoryFetcher;
use super::quote::QuoteFetcher;
use super::snapshot::SnapshotStore;

/// What happened to each call of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub quotes_updated: bool,
    /// Symbols whose series was merged, including empty degraded ones.
    pub series_updated: BTreeSet<String>,
    /// Symbols whose series was left as it was because the call failed.
    pub series_failed: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was in flight, or the scheduler was shut down.
    Skipped,
}

#[derive(Default)]
struct Gate {
    in_flight: bool,
    shut_down: bool,
}

struct Inner {
    quote_fetcher: Arc<dyn QuoteFetcher>,
    history_fetcher: Arc<dyn HistoryFetcher>,
    store: SnapshotStore,
    symbols: Vec<String>,
    window_days: u32,
    gate: Mutex<Gate>,
    loading: watch::Sender<bool>,
    cycles: AtomicU64,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct CycleGuard<'a> {
    inner: &'a Inner,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        // Loading must drop before the gate reopens.
        self.inner.loading.send_replace(false);
        self.inner.gate().in_flight = false;
    }
}

impl Inner {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_cycle(&self) -> Option<CycleGuard<'_>> {
        let mut gate = self.gate();
        if gate.in_flight || gate.shut_down {
            return None;
        }
        gate.in_flight = true;
        drop(gate);

        self.loading.send_replace(true);
        Some(CycleGuard { inner: self })
    }

    async fn refresh(&self) -> CycleOutcome {
        let Some(_guard) = self.begin_cycle() else {
            debug!("Refresh skipped, a cycle is already running or the scheduler is stopped");
            return CycleOutcome::Skipped;
        };

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        CycleOutcome::Completed(self.run_cycle(cycle).await)
    }

    #[instrument(name = "RefreshCycle", skip(self))]
    async fn run_cycle(&self, cycle: u64) -> CycleReport {
        debug!(symbols = ?self.symbols, "Starting refresh cycle");

        // Every call is polled from this one future, and each result is
        // merged as soon as it settles.
        let quote_task = async {
            match self.quote_fetcher.fetch_quotes(&self.symbols).await {
                Ok(quotes) => {
                    self.store.apply_quotes(quotes);
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Quote fetch failed, keeping previous quotes");
                    false
                }
            }
        };

        let history_tasks = self.symbols.iter().map(|symbol| async move {
            match self
                .history_fetcher
                .fetch_history(symbol, self.window_days)
                .await
            {
                Ok(series) => {
                    self.store.apply_series(symbol, series);
                    (symbol.clone(), true)
                }
                Err(e) => {
                    warn!(%symbol, error = %e, "History fetch failed, keeping previous series");
                    (symbol.clone(), false)
                }
            }
        });

        let (quotes_updated, history) = join(quote_task, join_all(history_tasks)).await;

        let mut report = CycleReport {
            cycle,
            quotes_updated,
            ..Default::default()
        };
        for (symbol, merged) in history {
            if merged {
                report.series_updated.insert(symbol);
            } else {
                report.series_failed.insert(symbol);
            }
        }

        info!(
            quotes_updated = report.quotes_updated,
            series_updated = report.series_updated.len(),
            series_failed = report.series_failed.len(),
            "Refresh cycle finished"
        );
        report
    }
}

/// Owns the refresh timer and the single-flight gate for one session.
pub struct RefreshScheduler {
    inner: Arc<Inner>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(
        quote_fetcher: Arc<dyn QuoteFetcher>,
        history_fetcher: Arc<dyn HistoryFetcher>,
        store: SnapshotStore,
        symbols: Vec<String>,
        window_days: u32,
        interval: Duration,
    ) -> Self {
        let (loading, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);

        RefreshScheduler {
            inner: Arc::new(Inner {
                quote_fetcher,
                history_fetcher,
                store,
                symbols,
                window_days,
                gate: Mutex::new(Gate::default()),
                loading,
                cycles: AtomicU64::new(0),
            }),
            interval,
            shutdown,
            timer: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.inner.store
    }

    pub fn symbols(&self) -> &[String] {
        &self.inner.symbols
    }

    /// True while a cycle is running.
    pub fn is_loading(&self) -> bool {
        *self.inner.loading.borrow()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.inner.loading.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.gate().shut_down
    }

    /// Runs one cycle to completion, or skips it if one is already running.
    pub async fn refresh(&self) -> CycleOutcome {
        self.inner.refresh().await
    }

    /// Fire-and-forget refresh. Must be called from within a tokio runtime.
    pub fn trigger_manual_refresh(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.refresh().await;
        });
    }

    /// Spawns the repeating timer. The first tick fires immediately.
    ///
    /// Calling it again while the timer runs, or after shutdown, does nothing.
    pub fn start(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() || self.is_shut_down() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        // `interval` panics on a zero period
        let period = self.interval.max(Duration::from_millis(1));
        let mut shutdown = self.shutdown.subscribe();
        info!(?period, "Starting refresh timer");

        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = async { shutdown.wait_for(|stopped| *stopped).await.map(|_| ()) } => break,
                    _ = ticker.tick() => {}
                }
                inner.refresh().await;
            }
            debug!("Refresh timer stopped");
        }));
    }

    /// Stops the timer and refuses any further cycle. Idempotent.
    ///
    /// A cycle already running keeps going and still merges its results.
    pub fn shutdown(&self) {
        {
            let mut gate = self.inner.gate();
            if gate.shut_down {
                return;
            }
            gate.shut_down = true;
        }
        self.shutdown.send_replace(true);
        info!("Refresh scheduler shut down");
    }

    /// Waits for the timer task to exit after [`shutdown`](Self::shutdown).
    pub async fn join(&self) {
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        CurrencyQuote, CurrencySeries, FetchError, HistoricalPoint, QuoteMap,
    };
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    const SYMBOLS: [&str; 7] = ["USD", "EUR", "BTC", "GBP", "JPY", "CAD", "ETH"];

    fn symbols() -> Vec<String> {
        SYMBOLS.iter().map(|s| s.to_string()).collect()
    }

    fn quote_map(bid: i64) -> QuoteMap {
        SYMBOLS
            .iter()
            .map(|s| {
                (
                    s.to_string(),
                    CurrencyQuote::new(s, Decimal::new(bid, 2), Decimal::ZERO),
                )
            })
            .collect()
    }

    fn series_of(value: i64) -> CurrencySeries {
        vec![HistoricalPoint::from_unix(1700000000, Decimal::new(value, 2)).unwrap()]
    }

    #[derive(Default)]
    struct CallStats {
        quote_calls: AtomicUsize,
        history_calls: AtomicUsize,
        quotes_outstanding: AtomicUsize,
        max_quotes_outstanding: AtomicUsize,
        history_outstanding: AtomicUsize,
        max_history_outstanding: AtomicUsize,
    }

    fn enter(current: &AtomicUsize, max: &AtomicUsize) {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
    }

    /// Fetcher with scripted latency and per-symbol failures.
    struct FakeFetcher {
        stats: Arc<CallStats>,
        quote_delay: Duration,
        history_delays: HashMap<String, Duration>,
        fail_quotes: bool,
        failing_history: Vec<String>,
        degraded_history: Vec<String>,
        bid: i64,
    }

    impl FakeFetcher {
        fn new(stats: Arc<CallStats>) -> Self {
            FakeFetcher {
                stats,
                quote_delay: Duration::from_millis(100),
                history_delays: HashMap::new(),
                fail_quotes: false,
                failing_history: vec![],
                degraded_history: vec![],
                bid: 500,
            }
        }
    }

    #[async_trait]
    impl QuoteFetcher for FakeFetcher {
        async fn fetch_quotes(&self, _symbols: &[String]) -> Result<QuoteMap, FetchError> {
            self.stats.quote_calls.fetch_add(1, Ordering::SeqCst);
            enter(
                &self.stats.quotes_outstanding,
                &self.stats.max_quotes_outstanding,
            );
            tokio::time::sleep(self.quote_delay).await;
            self.stats.quotes_outstanding.fetch_sub(1, Ordering::SeqCst);

            if self.fail_quotes {
                Err(FetchError::format("http://fake/last", "boom"))
            } else {
                Ok(quote_map(self.bid))
            }
        }
    }

    #[async_trait]
    impl HistoryFetcher for FakeFetcher {
        async fn fetch_history(
            &self,
            symbol: &str,
            _window_days: u32,
        ) -> Result<CurrencySeries, FetchError> {
            self.stats.history_calls.fetch_add(1, Ordering::SeqCst);
            enter(
                &self.stats.history_outstanding,
                &self.stats.max_history_outstanding,
            );
            let delay = self
                .history_delays
                .get(symbol)
                .copied()
                .unwrap_or(Duration::from_millis(50));
            tokio::time::sleep(delay).await;
            self.stats.history_outstanding.fetch_sub(1, Ordering::SeqCst);

            if self.failing_history.iter().any(|s| s == symbol) {
                Err(FetchError::format("http://fake/daily", "boom"))
            } else if self.degraded_history.iter().any(|s| s == symbol) {
                Ok(Vec::new())
            } else {
                Ok(series_of(self.bid))
            }
        }
    }

    fn scheduler_with(fetcher: FakeFetcher, store: SnapshotStore) -> RefreshScheduler {
        let fetcher = Arc::new(fetcher);
        RefreshScheduler::new(
            fetcher.clone(),
            fetcher,
            store,
            symbols(),
            30,
            Duration::from_secs(30),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_merges_everything() {
        let stats = Arc::new(CallStats::default());
        let store = SnapshotStore::new();
        let scheduler = scheduler_with(FakeFetcher::new(stats.clone()), store.clone());

        let outcome = scheduler.refresh().await;
        let CycleOutcome::Completed(report) = outcome else {
            panic!("Expected a completed cycle");
        };
        assert_eq!(report.cycle, 1);
        assert!(report.quotes_updated);
        assert_eq!(report.series_updated.len(), 7);
        assert!(report.series_failed.is_empty());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.quotes, Some(quote_map(500)));
        assert_eq!(snapshot.series.len(), 7);
        assert!(snapshot.last_updated_at.is_some());
        assert!(!scheduler.is_loading());
        assert_eq!(stats.quote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.history_calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_quotes_keep_previous_snapshot() {
        let stats = Arc::new(CallStats::default());
        let store = SnapshotStore::new();
        scheduler_with(FakeFetcher::new(stats.clone()), store.clone())
            .refresh()
            .await;
        let before = store.snapshot();

        let mut failing = FakeFetcher::new(stats.clone());
        failing.fail_quotes = true;
        failing.bid = 999;
        let scheduler = scheduler_with(failing, store.clone());

        let CycleOutcome::Completed(report) = scheduler.refresh().await else {
            panic!("Expected a completed cycle");
        };
        assert!(!report.quotes_updated);

        let after = store.snapshot();
        assert_eq!(after.quotes, before.quotes);
        assert_eq!(after.last_updated_at, before.last_updated_at);
        // History still refreshed on its own
        assert_eq!(after.series_for("USD"), series_of(999).as_slice());
        assert!(!scheduler.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_failure_is_isolated_per_symbol() {
        let stats = Arc::new(CallStats::default());
        let store = SnapshotStore::new();
        for symbol in SYMBOLS {
            store.apply_series(symbol, series_of(100));
        }

        let mut fetcher = FakeFetcher::new(stats);
        fetcher.failing_history = vec!["EUR".to_string()];
        fetcher.degraded_history = vec!["BTC".to_string()];
        fetcher.bid = 200;
        let scheduler = scheduler_with(fetcher, store.clone());

        let CycleOutcome::Completed(report) = scheduler.refresh().await else {
            panic!("Expected a completed cycle");
        };
        assert_eq!(
            report.series_failed,
            BTreeSet::from(["EUR".to_string()])
        );
        assert!(report.series_updated.contains("BTC"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.series_for("EUR"), series_of(100).as_slice());
        assert!(snapshot.series_for("BTC").is_empty());
        for symbol in ["USD", "GBP", "JPY", "CAD", "ETH"] {
            assert_eq!(snapshot.series_for(symbol), series_of(200).as_slice());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_merges_are_visible_while_cycle_runs() {
        let store = SnapshotStore::new();
        let mut snapshots = store.subscribe();
        let mut fetcher = FakeFetcher::new(Arc::new(CallStats::default()));
        fetcher.history_delays = HashMap::from([("ETH".to_string(), Duration::from_secs(5))]);
        let scheduler = Arc::new(scheduler_with(fetcher, store.clone()));

        let running = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.refresh().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(scheduler.is_loading());
        assert!(snapshots.has_changed().unwrap());
        let partial = snapshots.borrow_and_update().clone();
        assert_eq!(partial.quotes, Some(quote_map(500)));
        assert_eq!(partial.series_for("USD"), series_of(500).as_slice());
        assert!(partial.series_for("ETH").is_empty());

        running.await.unwrap();
        assert!(snapshots.has_changed().unwrap());
        assert_eq!(
            snapshots.borrow_and_update().series_for("ETH"),
            series_of(500).as_slice()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_order_does_not_change_result() {
        let orders: [Vec<u64>; 3] = [
            vec![10, 20, 30, 40, 50, 60, 70],
            vec![70, 60, 50, 40, 30, 20, 10],
            vec![40, 10, 70, 20, 60, 30, 50],
        ];

        let mut results = Vec::new();
        for order in orders {
            let store = SnapshotStore::new();
            let mut fetcher = FakeFetcher::new(Arc::new(CallStats::default()));
            fetcher.history_delays = SYMBOLS
                .iter()
                .zip(order)
                .map(|(s, ms)| (s.to_string(), Duration::from_millis(ms)))
                .collect();
            fetcher.degraded_history = vec!["JPY".to_string()];
            scheduler_with(fetcher, store.clone()).refresh().await;
            results.push(store.snapshot().series);
        }

        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_while_fetching_is_ignored() {
        let stats = Arc::new(CallStats::default());
        let mut fetcher = FakeFetcher::new(stats.clone());
        fetcher.quote_delay = Duration::from_secs(5);
        let scheduler = Arc::new(scheduler_with(fetcher, SnapshotStore::new()));

        let running = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.refresh().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.is_loading());

        for _ in 0..5 {
            scheduler.trigger_manual_refresh();
        }
        assert_eq!(scheduler.refresh().await, CycleOutcome::Skipped);

        let outcome = running.await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(_)));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(stats.quote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.history_calls.load(Ordering::SeqCst), 7);
        assert!(!scheduler.is_loading());

        // Idle again, so the next trigger goes through
        assert!(matches!(
            scheduler.refresh().await,
            CycleOutcome::Completed(_)
        ));
        assert_eq!(stats.quote_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_flag_tracks_cycle() {
        let mut fetcher = FakeFetcher::new(Arc::new(CallStats::default()));
        fetcher.quote_delay = Duration::from_millis(10);
        fetcher
            .history_delays
            .insert("ETH".to_string(), Duration::from_secs(3));
        let scheduler = Arc::new(scheduler_with(fetcher, SnapshotStore::new()));
        let mut loading = scheduler.subscribe_loading();
        assert!(!*loading.borrow());

        scheduler.trigger_manual_refresh();
        loading.wait_for(|l| *l).await.unwrap();

        // Quotes are in but ETH history is still outstanding
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.store().snapshot().quotes.is_some());
        assert!(scheduler.is_loading());

        loading.wait_for(|l| !*l).await.unwrap();
        assert_eq!(scheduler.store().snapshot().series.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_runs_three_cycles_without_overlap() {
        let stats = Arc::new(CallStats::default());
        let mut fetcher = FakeFetcher::new(stats.clone());
        fetcher.quote_delay = Duration::from_secs(1);
        let scheduler = scheduler_with(fetcher, SnapshotStore::new());

        // Ticks at 0s, 30s and 60s
        scheduler.start();
        tokio::time::sleep(Duration::from_secs(65)).await;
        scheduler.shutdown();
        scheduler.join().await;

        assert_eq!(stats.quote_calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.history_calls.load(Ordering::SeqCst), 21);
        assert_eq!(stats.max_quotes_outstanding.load(Ordering::SeqCst), 1);
        assert!(stats.max_history_outstanding.load(Ordering::SeqCst) <= 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_cycle_lets_it_finish() {
        let stats = Arc::new(CallStats::default());
        let mut fetcher = FakeFetcher::new(stats.clone());
        fetcher.quote_delay = Duration::from_secs(10);
        let store = SnapshotStore::new();
        let scheduler = scheduler_with(fetcher, store.clone());

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.is_loading());

        scheduler.shutdown();
        scheduler.shutdown();
        assert!(scheduler.is_shut_down());

        tokio::time::sleep(Duration::from_secs(120)).await;
        scheduler.join().await;

        assert_eq!(stats.quote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.history_calls.load(Ordering::SeqCst), 7);
        assert!(store.snapshot().quotes.is_some());
        assert!(!scheduler.is_loading());

        // Neither a manual trigger nor a restart can start a cycle now
        assert_eq!(scheduler.refresh().await, CycleOutcome::Skipped);
        scheduler.trigger_manual_refresh();
        scheduler.start();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(stats.quote_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_tick() {
        let stats = Arc::new(CallStats::default());
        let scheduler = scheduler_with(FakeFetcher::new(stats.clone()), SnapshotStore::new());

        scheduler.shutdown();
        scheduler.start();
        tokio::time::sleep(Duration::from_secs(90)).await;
        scheduler.join().await;

        assert_eq!(stats.quote_calls.load(Ordering::SeqCst), 0);
    }
}
