//! Ranked snapshot rows and the single shared "current snapshot" slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::indicators::Regime;

/// One successfully processed symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    /// Display form, market suffix stripped.
    pub symbol: String,
    pub price: f64,
    pub rsi: f64,
    pub regime: Regime,
}

/// A complete refresh result, rows sorted by RSI descending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub window: usize,
    pub rows: Vec<Row>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self, regime: Regime) -> usize {
        self.rows.iter().filter(|r| r.regime == regime).count()
    }
}

/// Identifies one refresh cycle. Only the newest ticket may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTicket(u64);

impl CycleTicket {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

/// Holds the snapshot shown to consumers.
///
/// Writers publish a whole `Arc<Snapshot>` in one swap, so readers always get
/// either the previous or the new snapshot, never a mix. Starting a cycle
/// bumps the generation; a cycle that was overtaken by a newer one is
/// refused at publish time.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Option<Arc<Snapshot>>>,
    generation: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_cycle(&self) -> CycleTicket {
        CycleTicket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: CycleTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }

    /// Publish `snapshot` if `ticket` still belongs to the newest cycle.
    /// Returns `false` when the snapshot was discarded.
    pub fn publish(&self, ticket: CycleTicket, snapshot: Snapshot) -> bool {
        let mut slot = self.current.write();
        // Checked under the write lock so a newer cycle that already
        // published cannot be overwritten by an older one.
        if !self.is_current(ticket) {
            return false;
        }
        *slot = Some(Arc::new(snapshot));
        true
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(window: usize, symbols: &[&str]) -> Snapshot {
        Snapshot {
            generated_at: Utc::now(),
            window,
            rows: symbols
                .iter()
                .map(|s| Row {
                    symbol: s.to_string(),
                    price: 100.0,
                    rsi: 50.0,
                    regime: Regime::Neutral,
                })
                .collect(),
        }
    }

    #[test]
    fn empty_store_has_no_snapshot() {
        assert!(SnapshotStore::new().current().is_none());
    }

    #[test]
    fn current_cycle_publishes() {
        let store = SnapshotStore::new();
        let ticket = store.begin_cycle();
        assert!(store.publish(ticket, snapshot(14, &["TCS"])));
        let current = store.current().unwrap();
        assert_eq!(current.window, 14);
        assert_eq!(current.rows.len(), 1);
    }

    #[test]
    fn superseded_cycle_is_discarded() {
        let store = SnapshotStore::new();
        let old = store.begin_cycle();
        let new = store.begin_cycle();
        assert!(!store.is_current(old));

        assert!(store.publish(new, snapshot(21, &["INFY"])));
        assert!(!store.publish(old, snapshot(14, &["TCS", "ITC"])));

        let current = store.current().unwrap();
        assert_eq!(current.window, 21);
        assert_eq!(current.rows[0].symbol, "INFY");
    }

    #[test]
    fn superseded_cycle_leaves_previous_snapshot_visible() {
        let store = SnapshotStore::new();
        let first = store.begin_cycle();
        store.publish(first, snapshot(14, &["TCS"]));

        let stale = store.begin_cycle();
        let _newer = store.begin_cycle();
        assert!(!store.publish(stale, snapshot(7, &[])));

        assert_eq!(store.current().unwrap().window, 14);
    }

    #[test]
    fn readers_keep_their_arc_after_replacement() {
        let store = SnapshotStore::new();
        let t1 = store.begin_cycle();
        store.publish(t1, snapshot(14, &["TCS"]));
        let held = store.current().unwrap();

        let t2 = store.begin_cycle();
        store.publish(t2, snapshot(28, &["ITC", "LT"]));

        assert_eq!(held.window, 14);
        assert_eq!(held.rows.len(), 1);
        assert_eq!(store.current().unwrap().rows.len(), 2);
    }

    #[test]
    fn counts_by_regime() {
        let mut snap = snapshot(14, &["A", "B", "C"]);
        snap.rows[0].regime = Regime::Overbought;
        assert_eq!(snap.count(Regime::Overbought), 1);
        assert_eq!(snap.count(Regime::Neutral), 2);
        assert_eq!(snap.count(Regime::Oversold), 0);
    }
}
