//! Cache module for deal snapshots
//!
//! Holds the last observed snapshot of every deal in memory together with the
//! time of the last full refresh, which drives the freshness window. The cache
//! keeps stale entries around so callers can fall back to them when the
//! rewards site is unavailable.

mod store;

pub use store::DealCache;
