//! Core data models for the KFH Rewards tracker
//!
//! This module contains the deal definitions that make up the tracked catalog,
//! the snapshots recorded every time a deal's remaining quantity is observed,
//! and the clients that produce those observations.

pub mod catalog;
pub mod quantity;

pub use catalog::{
    all_deals, default_catalog_path, CatalogError, DealCatalog, FileCatalog, StaticCatalog,
};
pub use quantity::{
    DocumentFetcher, FetchError, FetcherConfig, HttpFetcher, QuantityExtractor, QuantitySource,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A redeemable deal on the rewards site
///
/// Definitions are loaded once (built-in or from a catalog file) and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealDefinition {
    /// Unique identifier, as used in the rewards site URL
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Deal detail page
    pub url: String,
    /// Points cost label (e.g. "3000 KP")
    #[serde(rename = "points")]
    pub points_label: String,
}

/// Last observed state of a deal
///
/// A `quantity` of 0 means either "sold out" or "the page could not be read";
/// the two cases are indistinguishable from the snapshot alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSnapshot {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "points")]
    pub points_label: String,
    /// Remaining vouchers, 0 when extraction failed
    pub quantity: u64,
    /// When this observation was made
    pub last_updated: DateTime<Utc>,
}

impl DealSnapshot {
    /// Builds a snapshot for `definition` from an extractor result
    ///
    /// A missing quantity is recorded as 0.
    pub fn observed(
        definition: &DealDefinition,
        quantity: Option<u64>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: definition.id.clone(),
            title: definition.title.clone(),
            url: definition.url.clone(),
            points_label: definition.points_label.clone(),
            quantity: quantity.unwrap_or(0),
            last_updated: at,
        }
    }
}
