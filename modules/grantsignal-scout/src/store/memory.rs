//! In-memory grant store with the gateway's dedup-and-merge semantics.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use grantsignal_common::types::{is_absolute_http_url, EnrichedGrant};

use crate::dedup::{
    normalize_title, normalize_url, title_similarity, FUZZY_MIN_TITLE_LEN,
    FUZZY_SIMILARITY_THRESHOLD,
};

use super::GrantStore;

/// Three-tier identity check between a stored grant and an incoming one.
/// Mirrors the within-run candidate dedup, over validated records.
fn same_grant(existing: &EnrichedGrant, incoming: &EnrichedGrant) -> bool {
    if normalize_url(&existing.source_url) == normalize_url(&incoming.source_url) {
        return true;
    }

    if let (Some(da), Some(db)) = (&existing.deadline, &incoming.deadline) {
        if normalize_title(&existing.title) == normalize_title(&incoming.title)
            && da.trim() == db.trim()
        {
            return true;
        }
    }

    existing.title.len() >= FUZZY_MIN_TITLE_LEN
        && incoming.title.len() >= FUZZY_MIN_TITLE_LEN
        && title_similarity(&existing.title, &incoming.title) >= FUZZY_SIMILARITY_THRESHOLD
}

/// Overwrite a required text field only when the new value is non-empty and
/// strictly longer — "more complete" wins, ties keep the original.
fn merge_text(existing: &mut String, incoming: &str) {
    if !incoming.is_empty() && incoming.len() > existing.len() {
        *existing = incoming.to_string();
    }
}

fn merge_opt_text(existing: &mut Option<String>, incoming: &Option<String>) {
    if let Some(new) = incoming {
        let longer = existing.as_deref().map(str::len).unwrap_or(0) < new.len();
        if !new.is_empty() && longer {
            *existing = Some(new.clone());
        }
    }
}

fn merge_opt<T: Clone>(existing: &mut Option<T>, incoming: &Option<T>) {
    if existing.is_none() {
        existing.clone_from(incoming);
    }
}

/// Field-merge an incoming duplicate into the stored record.
fn merge_into(existing: &mut EnrichedGrant, incoming: &EnrichedGrant) {
    merge_text(&mut existing.title, &incoming.title);
    merge_text(&mut existing.description, &incoming.description);
    merge_opt_text(&mut existing.funder_name, &incoming.funder_name);
    merge_opt_text(&mut existing.funding_amount_display, &incoming.funding_amount_display);
    merge_opt_text(&mut existing.deadline, &incoming.deadline);
    merge_opt_text(&mut existing.eligibility, &incoming.eligibility);
    merge_opt(&mut existing.funding_amount_min, &incoming.funding_amount_min);
    merge_opt(&mut existing.funding_amount_max, &incoming.funding_amount_max);
    merge_opt(&mut existing.funding_amount_exact, &incoming.funding_amount_exact);
    merge_opt(&mut existing.sector, &incoming.sector);
    merge_opt(&mut existing.sub_sector, &incoming.sub_sector);
    merge_opt(&mut existing.geographic_scope, &incoming.geographic_scope);
    merge_opt(&mut existing.external_id, &incoming.external_id);

    for keyword in &incoming.keywords {
        if !existing.keywords.contains(keyword) {
            existing.keywords.push(keyword.clone());
        }
    }

    // Score fields are additive across runs: fill, never overwrite.
    merge_opt(
        &mut existing.research_scores.sector_relevance,
        &incoming.research_scores.sector_relevance,
    );
    merge_opt(
        &mut existing.research_scores.geographic_relevance,
        &incoming.research_scores.geographic_relevance,
    );
    merge_opt(
        &mut existing.research_scores.operational_alignment,
        &incoming.research_scores.operational_alignment,
    );
    merge_opt(
        &mut existing.compliance_scores.business_logic_alignment,
        &incoming.compliance_scores.business_logic_alignment,
    );
    merge_opt(
        &mut existing.compliance_scores.feasibility_score,
        &incoming.compliance_scores.feasibility_score,
    );
    merge_opt(
        &mut existing.compliance_scores.strategic_synergy,
        &incoming.compliance_scores.strategic_synergy,
    );
    merge_opt(
        &mut existing.compliance_scores.final_weighted_score,
        &incoming.compliance_scores.final_weighted_score,
    );
    merge_opt(&mut existing.composite_score, &incoming.composite_score);

    existing
        .enrichment_log
        .extend(incoming.enrichment_log.iter().cloned());
    existing.updated_at = Utc::now();
}

#[derive(Default)]
pub struct MemoryGrantStore {
    grants: RwLock<Vec<EnrichedGrant>>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn upsert(&self, grant: &EnrichedGrant) -> Result<Option<EnrichedGrant>> {
        if !is_absolute_http_url(&grant.source_url) {
            return Ok(None);
        }

        let mut grants = self.grants.write().await;
        if let Some(existing) = grants.iter_mut().find(|g| same_grant(g, grant)) {
            debug!(title = grant.title.as_str(), "Duplicate of stored grant, merging");
            merge_into(existing, grant);
            let mut merged = existing.clone();
            merged.log_stage("persistence: merged into stored record");
            *existing = merged.clone();
            return Ok(Some(merged));
        }

        let mut stored = grant.clone();
        stored.log_stage("persistence: stored as new record");
        grants.push(stored.clone());
        Ok(Some(stored))
    }

    async fn all(&self) -> Result<Vec<EnrichedGrant>> {
        Ok(self.grants.read().await.clone())
    }
}
