//! Feeds, detection, risk and execution wired together through the bot.

mod support;

use polymarket_predictfun_arbitrage_bot::bot::ArbitrageBot;
use polymarket_predictfun_arbitrage_bot::config::Config;
use polymarket_predictfun_arbitrage_bot::market::{OrderKind, Venue};
use polymarket_predictfun_arbitrage_bot::market_registry::MarketRegistry;
use polymarket_predictfun_arbitrage_bot::orderbook_cache::OrderbookCache;
use polymarket_predictfun_arbitrage_bot::paper::PaperVenue;
use polymarket_predictfun_arbitrage_bot::venue::{VenueClient, VenueClients};
use std::sync::Arc;
use std::time::Duration;
use support::{clients, FakeVenue, Fill};
use tokio::sync::watch;

const CONFIG: &str = r#"
arbitrage:
  min_profit_pct: 0.02
  max_position_size: 100
  min_position_size: 1
  detection_interval_ms: 100
execution:
  leg_a_timeout_ms: 1000
  leg_b_timeout_ms: 60000
  fill_poll_interval_ms: 100
  cancel_timeout_ms: 500
  shutdown_grace_ms: 2000
risk:
  default_exposure_limit: 100
venues:
  polymarket:
    poll_interval_ms: 100
    max_age_ms: 60000
  predict_fun:
    poll_interval_ms: 100
    max_age_ms: 60000
monitoring:
  exposure_report_interval_secs: 1
markets:
  - id: btc-100k
    gas_estimate: 0.01
    venue_a:
      venue: polymarket
      market_id: btc-100k-pm
      yes_token_id: btc-100k-pm-yes
      no_token_id: btc-100k-pm-no
    venue_b:
      venue: predict_fun
      market_id: btc-100k-pf
      yes_token_id: btc-100k-pf-yes
      no_token_id: btc-100k-pf-no
      fee: 0.01
"#;

/// Quotes where only YES on Polymarket plus NO on Predict.fun is profitable.
fn venues() -> (Arc<FakeVenue>, Arc<FakeVenue>) {
    let pm = FakeVenue::polymarket();
    pm.quote("btc-100k-pm-yes", 0.47, 0.48, 10.0);
    pm.quote("btc-100k-pm-no", 0.53, 0.54, 10.0);
    let pf = FakeVenue::predict_fun();
    pf.quote("btc-100k-pf-yes", 0.52, 0.53, 10.0);
    pf.quote("btc-100k-pf-no", 0.46, 0.47, 10.0);
    (pm, pf)
}

fn bot(clients: VenueClients, cache: Arc<OrderbookCache>) -> Arc<ArbitrageBot> {
    let config = Config::from_yaml(CONFIG).unwrap();
    assert!(config.validate().is_empty());
    let registry = MarketRegistry::from_config(&config, &clients).unwrap();
    Arc::new(ArbitrageBot::new(config, registry, clients, cache))
}

#[tokio::test(start_paused = true)]
async fn test_detects_and_executes_from_live_feeds() {
    let (pm, pf) = venues();
    let bot = bot(clients(&pm, &pf), Arc::new(OrderbookCache::new()));
    let (tx, rx) = watch::channel(false);

    let runner = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.run(rx).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    tx.send(true).unwrap();
    let stats = runner.await.unwrap();

    assert!(stats.executions >= 1);
    assert_eq!(stats.both_filled, stats.executions);
    assert!(stats.realized_pnl > 0.0);
    assert_eq!(bot.cache().len(), 4);

    let legs_a = pm.submitted();
    assert!(legs_a.iter().all(|o| o.kind == OrderKind::Fok && o.instrument.token_id == "btc-100k-pm-yes"));
    let legs_b = pf.submitted();
    assert!(legs_b.iter().all(|o| o.instrument.token_id == "btc-100k-pf-no"));

    assert_eq!(bot.risk().total_exposure(), 0.0);
    assert_eq!(bot.risk().in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_resting_hedge() {
    let (pm, pf) = venues();
    pf.push(Fill::Rest(0.0));
    let bot = bot(clients(&pm, &pf), Arc::new(OrderbookCache::new()));
    let (tx, rx) = watch::channel(false);

    let runner = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.run(rx).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    // The pair stays in flight while the hedge rests
    assert_eq!(bot.risk().in_flight_count(), 1);
    assert_eq!(bot.executor().open_orders().len(), 1);

    tx.send(true).unwrap();
    let stats = runner.await.unwrap();

    assert_eq!(stats.executions, 1);
    assert_eq!(stats.partial_filled, 1);
    assert_eq!(stats.open_positions, 1);
    assert_eq!(pf.cancels().len(), 1);
    assert!(bot.executor().open_orders().is_empty());

    let exposures = bot.risk().open_exposures();
    assert_eq!(exposures.len(), 1);
    assert_eq!(exposures[0].0.venue, Venue::Polymarket);
    assert_eq!(exposures[0].1, 10.0);
}

#[tokio::test(start_paused = true)]
async fn test_hedge_placed_during_grace_is_cancelled_after_abort() {
    let (pm, pf) = venues();
    pm.set_latency(Duration::from_millis(500));
    pf.push(Fill::Rest(0.0));
    let bot = bot(clients(&pm, &pf), Arc::new(OrderbookCache::new()));
    let (tx, rx) = watch::channel(false);

    let runner = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.run(rx).await })
    };
    while pm.submitted().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Leg A still in flight, nothing resting yet for the first sweep
    assert!(pf.submitted().is_empty());
    assert!(bot.executor().open_orders().is_empty());

    tx.send(true).unwrap();
    runner.await.unwrap();

    // The hedge went out during the grace period and outlived it
    assert_eq!(pf.submitted().len(), 1);
    assert_eq!(pf.cancels(), vec!["predict_fun-1".to_string()]);
    assert!(bot.executor().open_orders().is_empty());
    assert_eq!(bot.risk().in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_never_reaches_venues() {
    let (pm, pf) = venues();
    let cache = Arc::new(OrderbookCache::new());
    let mut paper = VenueClients::new();
    paper.insert(
        Venue::Polymarket,
        Arc::new(PaperVenue::new(pm.clone(), cache.clone(), 1_000.0)) as Arc<dyn VenueClient>,
    );
    paper.insert(
        Venue::PredictFun,
        Arc::new(PaperVenue::new(pf.clone(), cache.clone(), 1_000.0)) as Arc<dyn VenueClient>,
    );
    let bot = bot(paper, cache);
    let (tx, rx) = watch::channel(false);

    let runner = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.run(rx).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    tx.send(true).unwrap();
    let stats = runner.await.unwrap();

    assert!(stats.both_filled >= 1);
    assert!(pm.submitted().is_empty());
    assert!(pf.submitted().is_empty());
    assert_eq!(bot.risk().total_exposure(), 0.0);
}

#[tokio::test]
async fn test_pair_without_client_is_rejected() {
    let (pm, _) = venues();
    let mut only_pm = VenueClients::new();
    only_pm.insert(Venue::Polymarket, pm as Arc<dyn VenueClient>);
    let config = Config::from_yaml(CONFIG).unwrap();

    let errors = MarketRegistry::from_config(&config, &only_pm).unwrap_err();
    assert_eq!(errors.len(), 1);
}
