//! KFH Rewards tracker library
//!
//! Tracks remaining voucher counts for a catalog of KFH Rewards deals, keeps
//! them in a time-windowed in-memory cache, and exposes them over a small JSON
//! API.

pub mod cache;
pub mod cli;
pub mod data;
pub mod refresh;
pub mod server;
pub mod tracker;
