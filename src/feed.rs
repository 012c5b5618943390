//! Orderbook feeds: venue polling into the shared cache.

use crate::market::{Instrument, OrderbookSnapshot};
use crate::orderbook_cache::OrderbookCache;
use crate::venue::VenueClient;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll every instrument each `interval`, forever.
///
/// Failed fetches are logged and skipped; the stream never ends on its own.
pub fn poll_snapshots(
    client: Arc<dyn VenueClient>,
    instruments: Vec<Instrument>,
    interval: Duration,
) -> BoxStream<'static, OrderbookSnapshot> {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let fetch_timeout = interval.max(MIN_FETCH_TIMEOUT);
    let instruments = Arc::new(instruments);

    stream::unfold((client, instruments, ticker), move |(client, instruments, mut ticker)| async move {
        ticker.tick().await;

        let fetches = instruments.iter().map(|instrument| {
            let client = client.clone();
            async move {
                match time::timeout(fetch_timeout, client.get_orderbook(instrument)).await {
                    Ok(Ok(snapshot)) => Some(snapshot),
                    Ok(Err(e)) => {
                        warn!(venue = %client.venue(), %instrument, error = %e, "Orderbook fetch failed");
                        None
                    }
                    Err(_) => {
                        warn!(venue = %client.venue(), %instrument, "Orderbook fetch timed out");
                        None
                    }
                }
            }
        });
        let snapshots: Vec<_> = futures::future::join_all(fetches).await.into_iter().flatten().collect();

        Some((stream::iter(snapshots), (client, instruments, ticker)))
    })
    .flatten()
    .boxed()
}

/// Drain `snapshots` into `cache` until the stream ends or shutdown is
/// signalled. Returns how many snapshots were applied.
pub async fn pump(
    mut snapshots: BoxStream<'static, OrderbookSnapshot>,
    cache: Arc<OrderbookCache>,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut applied = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = snapshots.next() => match next {
                Some(snapshot) => {
                    if cache.update(snapshot) {
                        applied += 1;
                    }
                }
                None => break,
            },
        }
    }
    debug!(applied, "Feed stopped");
    applied
}

/// Spawn a polling feed for one venue.
pub fn spawn_feed(
    client: Arc<dyn VenueClient>,
    instruments: Vec<Instrument>,
    interval: Duration,
    cache: Arc<OrderbookCache>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<usize> {
    info!(
        venue = %client.venue(),
        instruments = instruments.len(),
        interval_ms = interval.as_millis() as u64,
        "Starting orderbook feed"
    );
    let snapshots = poll_snapshots(client, instruments, interval);
    tokio::spawn(pump(snapshots, cache, shutdown))
}
