//! The runner: feeds, detection loop, dispatch, reporting and shutdown.

use crate::arbitrage_engine::{ArbitrageEngine, ArbitrageOpportunity};
use crate::config::Config;
use crate::feed::spawn_feed;
use crate::market_registry::MarketRegistry;
use crate::notifier::TelegramNotifier;
use crate::order_executor::{ExecutionResult, OrderExecutor};
use crate::orderbook_cache::OrderbookCache;
use crate::position_tracker::{ExecutionStatistics, PositionTracker};
use crate::risk_gate::RiskGate;
use crate::venue::VenueClients;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct ArbitrageBot {
    config: Config,
    registry: Arc<MarketRegistry>,
    cache: Arc<OrderbookCache>,
    engine: ArbitrageEngine,
    risk: Arc<RiskGate>,
    executor: Arc<OrderExecutor>,
    tracker: Arc<Mutex<PositionTracker>>,
    notifier: Option<Arc<TelegramNotifier>>,
    clients: VenueClients,
}

impl ArbitrageBot {
    pub fn new(
        config: Config,
        registry: MarketRegistry,
        clients: VenueClients,
        cache: Arc<OrderbookCache>,
    ) -> Self {
        let registry = Arc::new(registry);
        let tracker = Arc::new(Mutex::new(PositionTracker::new()));
        let engine = ArbitrageEngine::new(registry.clone(), cache.clone(), config.arbitrage.clone());
        let risk = RiskGate::new(cache.clone(), config.risk.clone());
        let executor = Arc::new(
            OrderExecutor::new(clients.clone(), config.execution.clone())
                .with_position_tracker(tracker.clone()),
        );

        Self {
            config,
            registry,
            cache,
            engine,
            risk,
            executor,
            tracker,
            notifier: None,
            clients,
        }
    }

    pub fn with_notifier(mut self, notifier: TelegramNotifier) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    pub fn risk(&self) -> &Arc<RiskGate> {
        &self.risk
    }

    pub fn executor(&self) -> &Arc<OrderExecutor> {
        &self.executor
    }

    pub fn tracker(&self) -> &Arc<Mutex<PositionTracker>> {
        &self.tracker
    }

    pub fn cache(&self) -> &Arc<OrderbookCache> {
        &self.cache
    }

    /// One polling feed per venue that has at least one instrument.
    pub fn spawn_feeds(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<usize>> {
        self.registry
            .venues()
            .into_iter()
            .filter_map(|venue| {
                let client = self.clients.get(&venue)?.clone();
                let instruments = self.registry.instruments_for(venue);
                if instruments.is_empty() {
                    return None;
                }
                Some(spawn_feed(
                    client,
                    instruments,
                    self.config.venues.poll_interval(venue),
                    self.cache.clone(),
                    shutdown.clone(),
                ))
            })
            .collect()
    }

    /// Scan once and spawn an execution for every approved opportunity.
    /// Returns how many executions were started.
    pub fn dispatch(
        &self,
        tasks: &mut JoinSet<()>,
        results: &mpsc::UnboundedSender<ExecutionResult>,
    ) -> usize {
        let opportunities = self.engine.scan();
        if opportunities.is_empty() {
            return 0;
        }
        debug!(count = opportunities.len(), "Opportunities detected");

        let mut started = 0;
        for opportunity in opportunities {
            match self.risk.approve(&opportunity) {
                Ok(permit) => {
                    log_opportunity(&opportunity);
                    let executor = self.executor.clone();
                    let results = results.clone();
                    tasks.spawn(async move {
                        let result = executor.execute(opportunity, permit).await;
                        // Receiver gone means we are shutting down; the tracker already has it
                        let _ = results.send(result);
                    });
                    started += 1;
                }
                Err(reason) => debug!(
                    pair = %opportunity.pair.id,
                    direction = %opportunity.direction,
                    %reason,
                    "Opportunity rejected"
                ),
            }
        }
        started
    }

    /// Run until `shutdown` flips to true. Returns the final statistics.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ExecutionStatistics {
        info!(
            pairs = self.registry.len(),
            venues = ?self.registry.venues(),
            min_profit_pct = self.config.arbitrage.min_profit_pct,
            "Starting arbitrage bot"
        );
        self.log_balances().await;

        let feeds = self.spawn_feeds(&shutdown);
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        let mut detection = time::interval(self.config.arbitrage.detection_interval());
        detection.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let report_every = Duration::from_secs(self.config.monitoring.exposure_report_interval_secs.max(1));
        let mut report = time::interval_at(time::Instant::now() + report_every, report_every);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = detection.tick() => {
                    self.dispatch(&mut tasks, &results_tx);
                }
                Some(result) = results_rx.recv() => {
                    self.handle_result(result);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Execution task failed");
                    }
                }
                _ = report.tick() => {
                    self.report_exposure().await;
                }
            }
        }

        info!("🛑 Shutdown requested, detection stopped");
        self.shutdown(tasks, results_tx, results_rx).await;

        for (feed, applied) in join_all(feeds).await.into_iter().enumerate() {
            match applied {
                Ok(applied) => debug!(feed, applied, "Feed joined"),
                Err(e) => warn!(feed, error = %e, "Feed task failed"),
            }
        }

        self.report_exposure().await;
        self.tracker.lock().await.get_statistics()
    }

    async fn shutdown(
        &self,
        mut tasks: JoinSet<()>,
        results_tx: mpsc::UnboundedSender<ExecutionResult>,
        mut results_rx: mpsc::UnboundedReceiver<ExecutionResult>,
    ) {
        drop(results_tx);

        let cancelled = self.executor.cancel_all_open().await;
        if cancelled > 0 {
            info!(cancelled, "Open orders cancelled");
        }

        let grace = self.config.execution.shutdown_grace();
        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, grace_ms = grace.as_millis() as u64, "Waiting for in-flight executions");
        }

        let drained = time::timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Execution task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            error!(remaining = tasks.len(), "In-flight executions did not finish, aborting");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            // Aborted legs may have left orders resting
            self.executor.cancel_all_open().await;
        }

        while let Ok(result) = results_rx.try_recv() {
            self.handle_result(result);
        }
    }

    fn handle_result(&self, result: ExecutionResult) {
        debug!(execution = %result.id, status = ?result.status, trace = ?result.trace, "Execution finished");

        if let Some(notifier) = &self.notifier {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                notifier.notify_execution(&result).await;
            });
        }
    }

    async fn report_exposure(&self) {
        let open = self.risk.open_exposures();
        for (key, size) in &open {
            let pairs: Vec<&str> = self.registry.pairs_with(key).iter().map(|p| p.id.as_str()).collect();
            warn!(instrument = %key, size, pairs = ?pairs, "⚠️ Unhedged exposure");
        }

        let stats = self.tracker.lock().await.get_statistics();
        info!(
            executions = stats.executions,
            both_filled = stats.both_filled,
            partial = stats.partial_filled,
            failed = stats.both_failed,
            open_positions = stats.open_positions,
            "📊 Statistics - Realized P&L: ${:.4}, Unhedged: {:.2} ({} instruments)",
            stats.realized_pnl,
            stats.open_unhedged_size,
            open.len()
        );
    }

    async fn log_balances(&self) {
        let balances = self.clients.values().map(|client| async move {
            (client.venue(), client.get_balance().await)
        });
        for (venue, balance) in join_all(balances).await {
            match balance {
                Ok(balance) => info!(%venue, asset = %balance.asset, "💰 Balance: {:.2}", balance.available),
                Err(e) => warn!(%venue, error = %e, "Could not fetch balance"),
            }
        }
    }
}

fn log_opportunity(opportunity: &ArbitrageOpportunity) {
    info!(
        pair = %opportunity.pair.id,
        direction = %opportunity.direction,
        price_a = opportunity.venue_a_price,
        price_b = opportunity.venue_b_price,
        size = opportunity.size,
        "🚨 Arbitrage Opportunity: {} - Cost: {:.4}, Profit: {:.2}%",
        opportunity.pair.name,
        opportunity.total_cost,
        opportunity.profit_pct * 100.0
    );
}
