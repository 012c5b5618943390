//! Latest top-of-book snapshot per instrument.

use crate::market::{Instrument, InstrumentKey, OrderbookSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Thread-safe snapshot store.
///
/// Entries are replaced wholesale behind an `Arc`, so a reader never sees a
/// half-written snapshot. Only venue feeds write here.
#[derive(Default)]
pub struct OrderbookCache {
    books: RwLock<HashMap<InstrumentKey, Arc<OrderbookSnapshot>>>,
}

impl OrderbookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` if it is strictly newer than the one held.
    ///
    /// Returns whether the snapshot was applied. Stale and replayed updates
    /// are dropped without error.
    pub fn update(&self, snapshot: OrderbookSnapshot) -> bool {
        let key = snapshot.instrument.key();
        let mut books = self.books.write();
        if let Some(current) = books.get(&key) {
            if current.observed_at >= snapshot.observed_at {
                return false;
            }
        }
        books.insert(key, Arc::new(snapshot));
        true
    }

    pub fn get(&self, instrument: &Instrument) -> Option<Arc<OrderbookSnapshot>> {
        self.get_key(&instrument.key())
    }

    pub fn get_key(&self, key: &InstrumentKey) -> Option<Arc<OrderbookSnapshot>> {
        self.books.read().get(key).cloned()
    }

    /// Snapshots of several instruments taken under one read lock.
    pub fn get_many(&self, instruments: &[&Instrument]) -> Vec<Option<Arc<OrderbookSnapshot>>> {
        let books = self.books.read();
        instruments
            .iter()
            .map(|instrument| books.get(&instrument.key()).cloned())
            .collect()
    }

    pub fn is_fresh(&self, instrument: &Instrument, max_age: Duration) -> bool {
        self.is_fresh_at(instrument, max_age, Utc::now())
    }

    pub fn is_fresh_at(&self, instrument: &Instrument, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.get(instrument)
            .map(|snapshot| is_snapshot_fresh(&snapshot, max_age, now))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Snapshots stamped slightly in the future (clock skew) count as age zero.
pub fn is_snapshot_fresh(snapshot: &OrderbookSnapshot, max_age: Duration, now: DateTime<Utc>) -> bool {
    let age = now
        .signed_duration_since(snapshot.observed_at)
        .to_std()
        .unwrap_or_default();
    age <= max_age
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Outcome, Venue};
    use chrono::Duration as ChronoDuration;

    fn instrument() -> Instrument {
        Instrument::new(Venue::Polymarket, "m1", Outcome::Yes, "tok-1")
    }

    fn snapshot(ask: f64, observed_at: DateTime<Utc>) -> OrderbookSnapshot {
        OrderbookSnapshot::new(instrument(), ask - 0.01, ask, 100.0, 100.0, observed_at)
    }

    #[test]
    fn test_update_and_get() {
        let cache = OrderbookCache::new();
        let now = Utc::now();

        assert!(cache.update(snapshot(0.48, now)));

        let stored = cache.get(&instrument()).unwrap();
        assert_eq!(stored.best_ask, 0.48);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_older_snapshot_is_ignored() {
        let cache = OrderbookCache::new();
        let now = Utc::now();

        assert!(cache.update(snapshot(0.48, now)));
        assert!(!cache.update(snapshot(0.30, now - ChronoDuration::seconds(1))));

        assert_eq!(cache.get(&instrument()).unwrap().best_ask, 0.48);
    }

    #[test]
    fn test_replay_of_same_snapshot_is_noop() {
        let cache = OrderbookCache::new();
        let now = Utc::now();

        assert!(cache.update(snapshot(0.48, now)));
        assert!(!cache.update(snapshot(0.40, now)));

        assert_eq!(cache.get(&instrument()).unwrap().best_ask, 0.48);
    }

    #[test]
    fn test_freshness() {
        let cache = OrderbookCache::new();
        let now = Utc::now();
        let max_age = Duration::from_secs(5);

        assert!(!cache.is_fresh_at(&instrument(), max_age, now));

        cache.update(snapshot(0.48, now - ChronoDuration::seconds(3)));
        assert!(cache.is_fresh_at(&instrument(), max_age, now));
        assert!(cache.is_fresh_at(&instrument(), max_age, now + ChronoDuration::seconds(2)));
        assert!(!cache.is_fresh_at(&instrument(), max_age, now + ChronoDuration::seconds(3)));
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let cache = OrderbookCache::new();
        let now = Utc::now();
        cache.update(snapshot(0.48, now + ChronoDuration::seconds(1)));

        assert!(cache.is_fresh_at(&instrument(), Duration::from_millis(1), now));
    }

    #[test]
    fn test_concurrent_writers_keep_newest() {
        let cache = Arc::new(OrderbookCache::new());
        let base = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let at = base + ChronoDuration::milliseconds(i * 100 + j);
                        cache.update(snapshot(0.40 + (i as f64) / 100.0, at));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = cache.get(&instrument()).unwrap();
        assert_eq!(stored.observed_at, base + ChronoDuration::milliseconds(799));
    }
}
