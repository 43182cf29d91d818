//! In-memory store of deal snapshots
//!
//! Provides a `DealCache` mapping deal ids to their last snapshot, plus the
//! time of the last completed full refresh. Entries are only ever inserted or
//! overwritten; nothing is pruned and nothing survives a restart.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::data::DealSnapshot;

/// Snapshots keyed by deal id, listed in first-insertion order
#[derive(Debug, Clone, Default)]
pub struct DealCache {
    /// Latest snapshot per deal id
    entries: HashMap<String, DealSnapshot>,
    /// Deal ids in the order they were first inserted
    order: Vec<String>,
    /// When the last full refresh cycle completed
    refreshed_at: Option<DateTime<Utc>>,
}

impl DealCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the snapshot for `id`, if one has been recorded
    pub fn get(&self, id: &str) -> Option<&DealSnapshot> {
        self.entries.get(id)
    }

    /// Stores a snapshot, replacing any previous one for the same deal
    ///
    /// A replaced entry keeps its original list position.
    pub fn insert(&mut self, snapshot: DealSnapshot) {
        if !self.entries.contains_key(&snapshot.id) {
            self.order.push(snapshot.id.clone());
        }
        self.entries.insert(snapshot.id.clone(), snapshot);
    }

    /// All snapshots in insertion order
    pub fn snapshots(&self) -> Vec<DealSnapshot> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// When the last full refresh completed, if ever
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Records the completion of a full refresh cycle
    pub fn mark_refreshed(&mut self, at: DateTime<Utc>) {
        self.refreshed_at = Some(at);
    }

    /// Forgets the last refresh time so the next read triggers a full refresh
    ///
    /// Snapshots are kept and remain available as a stale fallback.
    pub fn invalidate(&mut self) {
        self.refreshed_at = None;
    }

    /// Time elapsed since the last full refresh
    ///
    /// Returns `None` if the cache has never been fully refreshed. A refresh
    /// time ahead of `now` counts as zero age.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.refreshed_at
            .map(|at| (now - at).max(Duration::zero()))
    }

    /// Whether the last full refresh is younger than `window`
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.age(now).is_some_and(|age| age < window)
    }
}
