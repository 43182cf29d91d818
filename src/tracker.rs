//! Deal cache and refresh orchestration
//!
//! `DealTracker` decides per request whether cached snapshots are fresh enough
//! to serve or whether the rewards site has to be queried again. Refreshes walk
//! the catalog one deal at a time with a pause after each page, and at most one
//! refresh is in flight at any moment.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::DealCache;
use crate::data::{CatalogError, DealCatalog, DealDefinition, DealSnapshot, QuantitySource};

/// Default maximum cache age before a read triggers a full refresh
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(300);

/// Default pause after each page fetch during a full refresh
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);

/// Errors returned by tracker operations
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The requested id is not in the catalog
    #[error("Deal not found: {0}")]
    DealNotFound(String),

    /// A refresh failed and there is nothing cached to fall back to
    #[error("Failed to fetch deals and no cache available: {0}")]
    NoDataAvailable(String),

    /// The deal catalog could not be loaded
    #[error("Deal catalog unavailable: {0}")]
    Catalog(#[from] CatalogError),
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(start),
        }
    }

    /// Moves the clock forward by `by`
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Timing configuration for the tracker
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum cache age served without refreshing
    pub freshness_window: Duration,
    /// Pause after each deal during a full refresh
    pub request_delay: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }
}

/// Result of listing every deal
#[derive(Debug, Clone)]
pub struct DealListing {
    /// Snapshots in catalog order
    pub deals: Vec<DealSnapshot>,
    /// Whether a full refresh ran to produce this listing
    pub refreshed: bool,
    /// Age of the cache when served from it
    pub age: Option<chrono::Duration>,
    /// Why fresh data could not be fetched, when serving stale data
    pub error: Option<String>,
}

impl DealListing {
    fn fresh(deals: Vec<DealSnapshot>) -> Self {
        Self {
            deals,
            refreshed: true,
            age: None,
            error: None,
        }
    }
}

/// Result of looking up a single deal
#[derive(Debug, Clone)]
pub struct DealLookup {
    pub deal: DealSnapshot,
    /// Whether the deal page was fetched to produce this snapshot
    pub refreshed: bool,
}

/// Cache state for health reporting
#[derive(Debug, Clone, Copy)]
pub struct TrackerStatus {
    /// Time since the last full refresh, if any
    pub age: Option<chrono::Duration>,
    /// Number of cached snapshots
    pub cached_count: usize,
}

/// Owns the deal cache and serializes all refreshes
pub struct DealTracker {
    catalog: Arc<dyn DealCatalog>,
    source: Arc<dyn QuantitySource>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    cache: RwLock<DealCache>,
    /// Held for the duration of any outbound fetching
    fetch_slot: Mutex<()>,
}

impl DealTracker {
    /// Creates a tracker using the wall clock
    pub fn new(
        catalog: Arc<dyn DealCatalog>,
        source: Arc<dyn QuantitySource>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            catalog,
            source,
            clock: Arc::new(SystemClock),
            config,
            cache: RwLock::new(DealCache::new()),
            fetch_slot: Mutex::new(()),
        }
    }

    /// Replaces the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn catalog(&self) -> &dyn DealCatalog {
        self.catalog.as_ref()
    }

    /// Lists every deal, refreshing all of them if the cache is stale
    ///
    /// If the refresh fails outright, stale snapshots are served with the
    /// failure attached. With nothing cached the call fails with
    /// `TrackerError::NoDataAvailable`.
    pub async fn list_all(&self) -> Result<DealListing, TrackerError> {
        if let Some(listing) = self.cached_listing().await {
            return Ok(listing);
        }

        let _slot = self.fetch_slot.lock().await;
        // A refresh may have completed while waiting for the slot
        if let Some(listing) = self.cached_listing().await {
            return Ok(listing);
        }

        info!("Fetching fresh data from the rewards site");
        let outcome = self.run_cycle().await.map(DealListing::fresh);

        let cache = self.cache.read().await;
        outcome.or_else(|err| self.stale_listing(&cache, err))
    }

    /// Returns one deal, fetching its page if the cache is stale or lacks it
    ///
    /// A single-deal fetch updates only that deal's snapshot; the full refresh
    /// time and other deals are untouched. A fresh cached snapshot is served
    /// without consulting the catalog.
    pub async fn get_one(&self, id: &str) -> Result<DealLookup, TrackerError> {
        if let Some(deal) = self.fresh_entry(id).await {
            return Ok(DealLookup {
                deal,
                refreshed: false,
            });
        }

        let definition = match self.catalog.find(id) {
            Ok(Some(definition)) => definition,
            Ok(None) => return Err(TrackerError::DealNotFound(id.to_string())),
            Err(err) => return self.stale_entry(id, err).await,
        };

        let _slot = self.fetch_slot.lock().await;
        if let Some(deal) = self.fresh_entry(id).await {
            return Ok(DealLookup {
                deal,
                refreshed: false,
            });
        }

        let deal = self.observe(&definition).await;
        self.cache.write().await.insert(deal.clone());
        Ok(DealLookup {
            deal,
            refreshed: true,
        })
    }

    /// Runs a full refresh regardless of cache freshness
    pub async fn force_refresh(&self) -> Result<DealListing, TrackerError> {
        let _slot = self.fetch_slot.lock().await;
        self.cache.write().await.invalidate();
        info!("Forced refresh of all deals");
        self.run_cycle().await.map(DealListing::fresh)
    }

    /// Reports cache age and size without fetching anything
    pub async fn status(&self) -> TrackerStatus {
        let cache = self.cache.read().await;
        TrackerStatus {
            age: cache.age(self.clock.now()),
            cached_count: cache.len(),
        }
    }

    /// Cached listing, if the last full refresh is within the freshness window
    async fn cached_listing(&self) -> Option<DealListing> {
        let cache = self.cache.read().await;
        let now = self.clock.now();
        if !cache.is_fresh(now, self.window()) {
            return None;
        }
        let age = cache.age(now);
        debug!(age_secs = age.map(|a| a.num_seconds()), "Returning cached data");
        Some(DealListing {
            deals: cache.snapshots(),
            refreshed: false,
            age,
            error: None,
        })
    }

    /// Cached snapshot for `id`, if present and the cache is fresh
    async fn fresh_entry(&self, id: &str) -> Option<DealSnapshot> {
        let cache = self.cache.read().await;
        if !cache.is_fresh(self.clock.now(), self.window()) {
            return None;
        }
        cache.get(id).cloned()
    }

    /// Any cached snapshot for `id` when the catalog cannot be consulted
    async fn stale_entry(&self, id: &str, err: CatalogError) -> Result<DealLookup, TrackerError> {
        warn!(deal_id = id, error = %err, "Catalog unavailable, serving cached deal");
        match self.cache.read().await.get(id) {
            Some(deal) => Ok(DealLookup {
                deal: deal.clone(),
                refreshed: false,
            }),
            None => Err(err.into()),
        }
    }

    fn stale_listing(
        &self,
        cache: &DealCache,
        err: TrackerError,
    ) -> Result<DealListing, TrackerError> {
        error!(error = %err, "Error fetching deals");
        if cache.is_empty() {
            return Err(TrackerError::NoDataAvailable(err.to_string()));
        }
        Ok(DealListing {
            deals: cache.snapshots(),
            refreshed: false,
            age: cache.age(self.clock.now()),
            error: Some(err.to_string()),
        })
    }

    /// Fetches every catalog deal in order, pausing after each one
    ///
    /// Callers must hold `fetch_slot`. Individual fetch failures are recorded
    /// as zero quantities and never stop the cycle.
    async fn run_cycle(&self) -> Result<Vec<DealSnapshot>, TrackerError> {
        let definitions = self.catalog.deals()?;
        let mut deals = Vec::with_capacity(definitions.len());

        for definition in &definitions {
            let deal = self.observe(definition).await;
            self.cache.write().await.insert(deal.clone());
            deals.push(deal);
            tokio::time::sleep(self.config.request_delay).await;
        }

        self.cache.write().await.mark_refreshed(self.clock.now());
        info!(count = deals.len(), "Refresh cycle complete");
        Ok(deals)
    }

    async fn observe(&self, definition: &DealDefinition) -> DealSnapshot {
        let quantity = self.source.quantity(definition).await;
        DealSnapshot::observed(definition, quantity, self.clock.now())
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.freshness_window).unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StaticCatalog;
    use futures::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Quantity source with canned answers that records every call
    #[derive(Default)]
    struct FakeSource {
        quantities: HashMap<String, u64>,
        calls: StdMutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Duration,
    }

    impl FakeSource {
        fn with(quantities: &[(&str, u64)]) -> Self {
            Self {
                quantities: quantities
                    .iter()
                    .map(|(url, q)| (url.to_string(), *q))
                    .collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl QuantitySource for FakeSource {
        fn quantity<'a>(&'a self, deal: &'a DealDefinition) -> BoxFuture<'a, Option<u64>> {
            Box::pin(async move {
                let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(current, Ordering::SeqCst);
                self.calls.lock().unwrap().push(deal.url.clone());
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.quantities.get(&deal.url).copied()
            })
        }
    }

    /// Catalog that can be switched into a failing state
    struct FlakyCatalog {
        inner: StaticCatalog,
        broken: std::sync::atomic::AtomicBool,
    }

    impl DealCatalog for FlakyCatalog {
        fn deals(&self) -> Result<Vec<DealDefinition>, CatalogError> {
            if self.broken.load(Ordering::SeqCst) {
                Err(CatalogError::Empty)
            } else {
                self.inner.deals()
            }
        }
    }

    fn deal(id: &str, url: &str) -> DealDefinition {
        DealDefinition {
            id: id.to_string(),
            title: format!("Deal {}", id),
            url: url.to_string(),
            points_label: "1000 KP".to_string(),
        }
    }

    fn test_config() -> TrackerConfig {
        TrackerConfig {
            freshness_window: Duration::from_secs(300),
            request_delay: Duration::ZERO,
        }
    }

    fn tracker_with(
        deals: Vec<DealDefinition>,
        source: Arc<FakeSource>,
    ) -> (DealTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let catalog = Arc::new(StaticCatalog::new(deals).unwrap());
        let tracker = DealTracker::new(catalog, source, test_config()).with_clock(clock.clone());
        (tracker, clock)
    }

    fn three_deals() -> Vec<DealDefinition> {
        vec![deal("A", "u1"), deal("B", "u2"), deal("C", "u3")]
    }

    #[tokio::test]
    async fn test_first_list_refreshes_from_source() {
        let source = Arc::new(FakeSource::with(&[("u1", 42)]));
        let (tracker, _clock) = tracker_with(vec![deal("A", "u1")], source.clone());

        let listing = tracker.list_all().await.unwrap();

        assert!(listing.refreshed);
        assert!(listing.age.is_none());
        assert!(listing.error.is_none());
        assert_eq!(listing.deals.len(), 1);
        assert_eq!(listing.deals[0].id, "A");
        assert_eq!(listing.deals[0].quantity, 42);
        assert_eq!(source.calls(), vec!["u1"]);
    }

    #[tokio::test]
    async fn test_list_within_window_serves_cache() {
        let source = Arc::new(FakeSource::with(&[("u1", 42), ("u2", 7), ("u3", 1)]));
        let (tracker, clock) = tracker_with(three_deals(), source.clone());

        let first = tracker.list_all().await.unwrap();
        clock.advance(chrono::Duration::seconds(10));
        let second = tracker.list_all().await.unwrap();
        clock.advance(chrono::Duration::seconds(280));
        let third = tracker.list_all().await.unwrap();

        assert!(!second.refreshed);
        assert!(!third.refreshed);
        assert_eq!(second.deals, first.deals);
        assert_eq!(second.age, Some(chrono::Duration::seconds(10)));
        assert_eq!(third.age, Some(chrono::Duration::seconds(290)));
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_list_after_window_refreshes_again() {
        let source = Arc::new(FakeSource::with(&[("u1", 42)]));
        let (tracker, clock) = tracker_with(vec![deal("A", "u1")], source.clone());

        tracker.list_all().await.unwrap();
        clock.advance(chrono::Duration::seconds(300));
        let listing = tracker.list_all().await.unwrap();

        assert!(listing.refreshed);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_produces_one_zero_snapshot_per_deal_when_all_fail() {
        let source = Arc::new(FakeSource::default());
        let (tracker, _clock) = tracker_with(three_deals(), source.clone());

        let listing = tracker.list_all().await.unwrap();

        let ids: Vec<&str> = listing.deals.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert!(listing.deals.iter().all(|d| d.quantity == 0));
        assert!(tracker.status().await.age.is_some());
    }

    #[tokio::test]
    async fn test_failed_entry_does_not_abort_cycle() {
        // u2 has no answer, as if its fetch timed out
        let source = Arc::new(FakeSource::with(&[("u1", 5), ("u3", 9)]));
        let (tracker, _clock) = tracker_with(three_deals(), source.clone());

        let listing = tracker.list_all().await.unwrap();

        assert_eq!(source.calls(), vec!["u1", "u2", "u3"]);
        let quantities: Vec<u64> = listing.deals.iter().map(|d| d.quantity).collect();
        assert_eq!(quantities, vec![5, 0, 9]);
        let status = tracker.status().await;
        assert_eq!(status.age, Some(chrono::Duration::zero()));
        assert_eq!(status.cached_count, 3);
    }

    #[tokio::test]
    async fn test_get_one_unknown_id_does_not_fetch() {
        let source = Arc::new(FakeSource::with(&[("u1", 42)]));
        let (tracker, _clock) = tracker_with(vec![deal("A", "u1")], source.clone());

        let result = tracker.get_one("missing").await;

        assert!(matches!(result, Err(TrackerError::DealNotFound(id)) if id == "missing"));
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_get_one_serves_fresh_cache() {
        let source = Arc::new(FakeSource::with(&[("u1", 42), ("u2", 3)]));
        let (tracker, clock) = tracker_with(vec![deal("A", "u1"), deal("B", "u2")], source.clone());

        tracker.list_all().await.unwrap();
        clock.advance(chrono::Duration::seconds(60));
        let lookup = tracker.get_one("B").await.unwrap();

        assert!(!lookup.refreshed);
        assert_eq!(lookup.deal.quantity, 3);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_get_one_before_any_refresh_fetches_single_deal() {
        let source = Arc::new(FakeSource::with(&[("u1", 42), ("u2", 3)]));
        let deals = vec![deal("A", "u1"), deal("B", "u2")];
        let (tracker, _clock) = tracker_with(deals, source.clone());

        let lookup = tracker.get_one("B").await.unwrap();

        assert!(lookup.refreshed);
        assert_eq!(lookup.deal.quantity, 3);
        assert_eq!(source.calls(), vec!["u2"]);
        let status = tracker.status().await;
        assert!(status.age.is_none());
        assert_eq!(status.cached_count, 1);
    }

    #[tokio::test]
    async fn test_get_one_refresh_leaves_epoch_and_other_entries_alone() {
        let source = Arc::new(FakeSource::with(&[("u1", 42), ("u2", 3)]));
        let (tracker, clock) = tracker_with(vec![deal("A", "u1"), deal("B", "u2")], source.clone());

        let initial = tracker.list_all().await.unwrap();
        let refreshed_at = tracker.cache.read().await.refreshed_at();
        clock.advance(chrono::Duration::seconds(400));

        let lookup = tracker.get_one("A").await.unwrap();

        assert!(lookup.refreshed);
        assert_eq!(tracker.cache.read().await.refreshed_at(), refreshed_at);
        let cache = tracker.cache.read().await;
        assert_eq!(cache.get("B").unwrap().last_updated, initial.deals[1].last_updated);
        assert_eq!(
            cache.get("A").unwrap().last_updated,
            initial.deals[0].last_updated + chrono::Duration::seconds(400)
        );
    }

    #[tokio::test]
    async fn test_force_refresh_always_runs_full_cycle() {
        let source = Arc::new(FakeSource::with(&[("u1", 1), ("u2", 2), ("u3", 3)]));
        let (tracker, _clock) = tracker_with(three_deals(), source.clone());

        tracker.list_all().await.unwrap();
        let first = tracker.force_refresh().await.unwrap();
        let second = tracker.force_refresh().await.unwrap();

        assert!(first.refreshed);
        assert!(second.refreshed);
        assert_eq!(second.deals.len(), 3);
        assert_eq!(source.calls().len(), 9);
    }

    #[tokio::test]
    async fn test_status_never_fetches() {
        let source = Arc::new(FakeSource::with(&[("u1", 1)]));
        let (tracker, _clock) = tracker_with(vec![deal("A", "u1")], source.clone());

        let status = tracker.status().await;

        assert!(status.age.is_none());
        assert_eq!(status.cached_count, 0);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_failure_serves_stale_cache() {
        let source = Arc::new(FakeSource::with(&[("u1", 42)]));
        let catalog = Arc::new(FlakyCatalog {
            inner: StaticCatalog::new(vec![deal("A", "u1")]).unwrap(),
            broken: Default::default(),
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = DealTracker::new(catalog.clone(), source.clone(), test_config())
            .with_clock(clock.clone());

        tracker.list_all().await.unwrap();
        catalog.broken.store(true, Ordering::SeqCst);
        clock.advance(chrono::Duration::seconds(600));
        let listing = tracker.list_all().await.unwrap();

        assert!(!listing.refreshed);
        assert_eq!(listing.deals.len(), 1);
        assert_eq!(listing.deals[0].quantity, 42);
        assert_eq!(listing.age, Some(chrono::Duration::seconds(600)));
        assert!(listing.error.unwrap().contains("catalog"));
    }

    #[tokio::test]
    async fn test_get_one_serves_cache_while_catalog_is_broken() {
        let source = Arc::new(FakeSource::with(&[("u1", 42)]));
        let catalog = Arc::new(FlakyCatalog {
            inner: StaticCatalog::new(vec![deal("A", "u1")]).unwrap(),
            broken: Default::default(),
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = DealTracker::new(catalog.clone(), source.clone(), test_config())
            .with_clock(clock.clone());

        tracker.list_all().await.unwrap();
        catalog.broken.store(true, Ordering::SeqCst);

        let fresh = tracker.get_one("A").await.unwrap();
        clock.advance(chrono::Duration::seconds(600));
        let stale = tracker.get_one("A").await.unwrap();

        assert!(!fresh.refreshed);
        assert_eq!(fresh.deal.quantity, 42);
        assert!(!stale.refreshed);
        assert_eq!(stale.deal.quantity, 42);
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_failure_with_empty_cache_is_error() {
        let source = Arc::new(FakeSource::default());
        let catalog = Arc::new(FlakyCatalog {
            inner: StaticCatalog::new(vec![deal("A", "u1")]).unwrap(),
            broken: std::sync::atomic::AtomicBool::new(true),
        });
        let tracker = DealTracker::new(catalog, source.clone(), test_config());

        let list = tracker.list_all().await;
        let forced = tracker.force_refresh().await;

        assert!(matches!(list, Err(TrackerError::NoDataAvailable(_))));
        assert!(matches!(forced, Err(TrackerError::Catalog(_))));
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_lists_share_one_cycle() {
        let source = Arc::new(FakeSource {
            latency: Duration::from_millis(20),
            ..FakeSource::with(&[("u1", 1), ("u2", 2), ("u3", 3)])
        });
        let (tracker, _clock) = tracker_with(three_deals(), source.clone());

        let (a, b) = tokio::join!(tracker.list_all(), tracker.list_all());

        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(source.calls().len(), 3);
        assert!(a.refreshed != b.refreshed);
        assert_eq!(a.deals, b.deals);
    }

    #[tokio::test]
    async fn test_refreshes_never_overlap() {
        let source = Arc::new(FakeSource {
            latency: Duration::from_millis(10),
            ..FakeSource::with(&[("u1", 1), ("u2", 2), ("u3", 3)])
        });
        let (tracker, _clock) = tracker_with(three_deals(), source.clone());

        let (a, b, c) = tokio::join!(
            tracker.force_refresh(),
            tracker.force_refresh(),
            tracker.get_one("B")
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cycle_pauses_after_every_deal() {
        let source = Arc::new(FakeSource::with(&[("u1", 1), ("u2", 2)]));
        let catalog = Arc::new(StaticCatalog::new(vec![deal("A", "u1"), deal("B", "u2")]).unwrap());
        let tracker = DealTracker::new(
            catalog,
            source,
            TrackerConfig {
                freshness_window: Duration::from_secs(300),
                request_delay: Duration::from_millis(50),
            },
        );

        let started = std::time::Instant::now();
        tracker.force_refresh().await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
