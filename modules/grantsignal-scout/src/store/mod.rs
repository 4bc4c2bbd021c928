//! Persistence gateway seam.
//!
//! The pipeline calls `upsert` once per final, scored grant. Implementations
//! must run the same three-tier identity check as the within-run dedup, but
//! against stored history, and must field-merge duplicates instead of
//! inserting twins. The in-memory store backs tests and local runs; database
//! backends live behind the same trait.

mod memory;

use anyhow::Result;
use async_trait::async_trait;

use grantsignal_common::types::EnrichedGrant;

pub use memory::MemoryGrantStore;

#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Upsert by grant identity. Returns the canonical stored form, or
    /// `None` when the input lacks a valid absolute URL — the second layer
    /// of the URL gate, after the parser.
    async fn upsert(&self, grant: &EnrichedGrant) -> Result<Option<EnrichedGrant>>;

    /// All stored grants, in insertion order.
    async fn all(&self) -> Result<Vec<EnrichedGrant>>;
}
