use anyhow::{bail, Context, Result};
use clap::Parser;
use polymarket_predictfun_arbitrage_bot::{
    bot::ArbitrageBot,
    clients::{PolymarketClient, PredictFunClient},
    config::{
        Config, MonitoringConfig, PolymarketCredentials, PredictFunCredentials, TelegramCredentials,
    },
    market::Venue,
    market_registry::MarketRegistry,
    notifier::TelegramNotifier,
    orderbook_cache::OrderbookCache,
    paper::PaperVenue,
    shutdown::{self, ShutdownSignals},
    venue::{VenueClient, VenueClients},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "arb-bot", about = "Polymarket / Predict.fun arbitrage bot")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Simulate fills against live orderbooks instead of placing orders
    #[arg(long)]
    dry_run: bool,

    /// Starting balance reported by each simulated venue
    #[arg(long, default_value_t = 1_000.0)]
    paper_balance: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    init_logging(&config.monitoring);
    let signals = ShutdownSignals::install().context("Failed to install signal handlers")?;

    info!(config = %args.config.display(), dry_run = args.dry_run, "Starting Polymarket-Predict.fun Arbitrage Bot");

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("❌ {}", e);
        }
        bail!("{} configuration error(s)", errors.len());
    }

    let cache = Arc::new(OrderbookCache::new());
    let clients = connect_venues(&config, &cache, &args).await;

    // A venue that failed to come up takes its pairs with it
    config.markets.retain(|market| {
        let reachable = [market.venue_a.venue, market.venue_b.venue]
            .iter()
            .all(|venue| clients.contains_key(venue));
        if market.enabled && !reachable {
            warn!(pair = %market.id, "⚠️ Skipping pair: venue unavailable");
        }
        reachable
    });

    let registry = match MarketRegistry::from_config(&config, &clients) {
        Ok(registry) => registry,
        Err(errors) => {
            for e in &errors {
                error!("❌ {}", e);
            }
            bail!("{} market configuration error(s)", errors.len());
        }
    };

    let mut bot = ArbitrageBot::new(config.clone(), registry, clients, cache);
    if config.notifications.telegram {
        match TelegramCredentials::from_env() {
            Ok(credentials) => bot = bot.with_notifier(TelegramNotifier::new(credentials)),
            Err(e) => warn!(error = %e, "⚠️ Telegram notifications disabled"),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown::forward(signals.recv(), shutdown_tx);

    let stats = bot.run(shutdown_rx).await;
    info!(
        executions = stats.executions,
        both_filled = stats.both_filled,
        partial = stats.partial_filled,
        failed = stats.both_failed,
        open_positions = stats.open_positions,
        "Stopped. Realized P&L: ${:.4}, unhedged: {:.2}",
        stats.realized_pnl,
        stats.open_unhedged_size
    );

    Ok(())
}

fn init_logging(monitoring: &MonitoringConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&monitoring.log_level));
    if monitoring.log_json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

/// Build and connect every enabled venue. A venue that cannot be built or
/// connected is left out; the others keep running.
async fn connect_venues(config: &Config, cache: &Arc<OrderbookCache>, args: &Args) -> VenueClients {
    let mut clients = VenueClients::new();

    for venue in [Venue::Polymarket, Venue::PredictFun] {
        let client = match build_client(venue, config) {
            Ok(Some(client)) => client,
            Ok(None) => continue,
            Err(e) => {
                error!(%venue, error = %format!("{:#}", e), "❌ Could not create venue client");
                continue;
            }
        };

        match tokio::time::timeout(CONNECT_TIMEOUT, client.connect()).await {
            Ok(Ok(())) => info!(%venue, "✅ Connected"),
            Ok(Err(e)) => {
                error!(%venue, error = %e, "❌ Could not connect, venue disabled");
                continue;
            }
            Err(_) => {
                error!(%venue, "❌ Connection timed out, venue disabled");
                continue;
            }
        }

        let client = if args.dry_run {
            warn!(%venue, "📝 DRY RUN: orders are simulated");
            Arc::new(PaperVenue::new(client, cache.clone(), args.paper_balance)) as Arc<dyn VenueClient>
        } else {
            client
        };
        clients.insert(venue, client);
    }

    clients
}

fn build_client(venue: Venue, config: &Config) -> Result<Option<Arc<dyn VenueClient>>> {
    match venue {
        Venue::Polymarket => {
            if !config.venues.polymarket.enabled {
                return Ok(None);
            }
            let credentials = PolymarketCredentials::from_env()?;
            let neg_risk_tokens = config
                .enabled_markets()
                .flat_map(|m| [&m.venue_a, &m.venue_b])
                .filter(|side| side.venue == Venue::Polymarket && side.neg_risk)
                .flat_map(|side| [side.yes_token_id.clone(), side.no_token_id.clone()]);
            let client = PolymarketClient::new(config.venues.polymarket.clone(), &credentials)?
                .with_neg_risk_tokens(neg_risk_tokens);
            Ok(Some(Arc::new(client)))
        }
        Venue::PredictFun => {
            if !config.venues.predict_fun.enabled {
                return Ok(None);
            }
            let credentials = PredictFunCredentials::from_env()?;
            let client = PredictFunClient::new(config.venues.predict_fun.clone(), &credentials)?;
            Ok(Some(Arc::new(client)))
        }
    }
}
