//! Latest-reading store shared between the notification stream and readers.
//!
//! The store is split by role: one [`ReadingUpdater`] owned by the
//! notification handler, and any number of [`ReadingStore`] readers. Both
//! sides sit on a [`tokio::sync::watch`] channel, so every update replaces
//! the whole value at once and readers never observe a partial reading.
//!
//! ```
//! use airbox_core::store::reading_store;
//! use airbox_types::SensorReading;
//!
//! let (updater, store) = reading_store();
//! assert_eq!(store.snapshot(), SensorReading::default());
//!
//! let reading = SensorReading { temperature: 21.5, co2: 600, tvoc: 0.02, hcho: 0.01 };
//! updater.update(reading);
//! assert_eq!(store.snapshot(), reading);
//! ```

use time::OffsetDateTime;
use tokio::sync::watch;

use airbox_types::SensorReading;

/// The current reading plus bookkeeping about when it arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatestReading {
    pub reading: SensorReading,
    /// When the reading was stored; `None` before the first update.
    pub updated_at: Option<OffsetDateTime>,
    /// Number of updates since the store was created.
    pub updates: u64,
}

impl Default for LatestReading {
    fn default() -> Self {
        Self {
            reading: SensorReading::default(),
            updated_at: None,
            updates: 0,
        }
    }
}

/// Create a store, returning its single writer and a reader.
pub fn reading_store() -> (ReadingUpdater, ReadingStore) {
    let (tx, rx) = watch::channel(LatestReading::default());
    (ReadingUpdater { tx }, ReadingStore { rx })
}

/// Write side of the store. Not `Clone`: there is exactly one writer.
#[derive(Debug)]
pub struct ReadingUpdater {
    tx: watch::Sender<LatestReading>,
}

impl ReadingUpdater {
    /// Replace the stored reading.
    pub fn update(&self, reading: SensorReading) {
        let now = OffsetDateTime::now_utc();
        self.tx.send_modify(|latest| {
            latest.reading = reading;
            latest.updated_at = Some(now);
            latest.updates += 1;
        });
    }

    /// A new reader for this store.
    pub fn store(&self) -> ReadingStore {
        ReadingStore {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of the store.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    rx: watch::Receiver<LatestReading>,
}

impl ReadingStore {
    /// The most recent reading, or the zero reading before the first update.
    pub fn snapshot(&self) -> SensorReading {
        self.rx.borrow().reading
    }

    /// The most recent reading with its update time and count.
    pub fn latest(&self) -> LatestReading {
        *self.rx.borrow()
    }

    /// Wait for the next update and return it.
    ///
    /// Returns `None` once the updater has been dropped.
    pub async fn changed(&mut self) -> Option<LatestReading> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn reading(n: i32) -> SensorReading {
        SensorReading {
            temperature: n as f32,
            co2: n,
            tvoc: n as f32,
            hcho: n as f32,
        }
    }

    #[test]
    fn test_snapshot_before_update_is_zero() {
        let (_updater, store) = reading_store();
        assert_eq!(store.snapshot(), SensorReading::default());

        let latest = store.latest();
        assert_eq!(latest.updates, 0);
        assert!(latest.updated_at.is_none());
    }

    #[test]
    fn test_update_then_snapshot() {
        let (updater, store) = reading_store();
        updater.update(reading(7));
        assert_eq!(store.snapshot(), reading(7));

        updater.update(reading(8));
        assert_eq!(store.snapshot(), reading(8));
        assert_eq!(store.latest().updates, 2);
        assert!(store.latest().updated_at.is_some());
    }

    #[test]
    fn test_store_from_updater_sees_updates() {
        let (updater, _) = reading_store();
        let store = updater.store();
        updater.update(reading(3));
        assert_eq!(store.snapshot(), reading(3));
    }

    #[test]
    fn test_snapshot_survives_updater_drop() {
        let (updater, store) = reading_store();
        updater.update(reading(5));
        drop(updater);
        assert_eq!(store.snapshot(), reading(5));
    }

    #[tokio::test]
    async fn test_changed_yields_next_update() {
        let (updater, mut store) = reading_store();

        let waiter = tokio::spawn(async move { store.changed().await });
        tokio::task::yield_now().await;
        updater.update(reading(42));

        let latest = waiter.await.unwrap().unwrap();
        assert_eq!(latest.reading, reading(42));
        assert_eq!(latest.updates, 1);
    }

    #[tokio::test]
    async fn test_changed_ends_when_updater_dropped() {
        let (updater, mut store) = reading_store();
        drop(updater);
        assert!(store.changed().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_snapshots_are_never_torn() {
        let (updater, store) = reading_store();
        let done = Arc::new(AtomicBool::new(false));

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let done = Arc::clone(&done);
            readers.push(tokio::spawn(async move {
                let mut seen = 0u32;
                while !done.load(Ordering::Relaxed) {
                    let r = store.snapshot();
                    // Every field of a written reading carries the same n.
                    assert_eq!(r.temperature, r.co2 as f32);
                    assert_eq!(r.tvoc, r.co2 as f32);
                    assert_eq!(r.hcho, r.co2 as f32);
                    seen += 1;
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        let writer = tokio::spawn(async move {
            for n in 1..=2000 {
                updater.update(reading(n));
                if n % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            updater
        });

        let updater = writer.await.unwrap();
        done.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.await.unwrap();
        }

        assert_eq!(store.snapshot(), reading(2000));
        assert_eq!(store.latest().updates, 2000);
        drop(updater);
    }
}
