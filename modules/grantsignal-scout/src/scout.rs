//! Pipeline orchestrator: plan → query → parse → dedup → score → persist.
//!
//! `run` never propagates partial failures — failed chunks, rejected
//! candidates, and persistence errors are counted and logged, and the run
//! returns whatever survived. Only construction can fail, on bad
//! configuration.

use std::sync::Arc;

use tracing::{info, warn};

use ai_client::ChatModel;
use grantsignal_common::rules::RuleConfig;
use grantsignal_common::types::{EnrichedGrant, SearchIntent};
use grantsignal_common::GrantSignalError;

use crate::dedup::dedup_candidates;
use crate::executor::{RateLimitedExecutor, RunStatus};
use crate::planner::ChunkPlanner;
use crate::scoring::{ComplianceScorer, RelevanceScorer};
use crate::store::GrantStore;

/// Counters for one discovery run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScoutStats {
    pub chunks_planned: u32,
    pub chunks_dispatched: u32,
    pub chunks_failed: u32,
    /// Chunks never dispatched because the day quota ran out.
    pub chunks_skipped: u32,
    pub candidates_parsed: u32,
    pub duplicates_collapsed: u32,
    pub grants_scored: u32,
    pub grants_stored: u32,
    /// Candidates rejected at conversion or persistence.
    pub grants_skipped: u32,
}

impl std::fmt::Display for ScoutStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Discovery: {}/{} chunks dispatched ({} failed, {} skipped), \
             {} candidates, {} duplicates collapsed, {} scored, {} stored, {} skipped",
            self.chunks_dispatched,
            self.chunks_planned,
            self.chunks_failed,
            self.chunks_skipped,
            self.candidates_parsed,
            self.duplicates_collapsed,
            self.grants_scored,
            self.grants_stored,
            self.grants_skipped,
        )
    }
}

/// What a run hands back: the stored grants in dispatch order, the counters,
/// and how the run ended.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub grants: Vec<EnrichedGrant>,
    pub stats: ScoutStats,
    pub status: RunStatus,
}

pub struct GrantScout {
    rules: RuleConfig,
    executor: RateLimitedExecutor,
    relevance: RelevanceScorer,
    compliance: ComplianceScorer,
    store: Arc<dyn GrantStore>,
}

impl GrantScout {
    /// Construction is the only fallible step of the pipeline; it requires a
    /// validated rule config (see `RuleConfig::load`).
    pub fn new(
        rules: RuleConfig,
        model: Arc<dyn ChatModel>,
        store: Arc<dyn GrantStore>,
    ) -> Result<Self, GrantSignalError> {
        let weight_sum =
            rules.weights.business_logic + rules.weights.feasibility + rules.weights.synergy;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(GrantSignalError::Config(format!(
                "composite weights must sum to 1.0, got {weight_sum}"
            )));
        }

        let executor = RateLimitedExecutor::new(model, rules.executor.clone());
        let relevance = RelevanceScorer::new(rules.relevance.clone());
        let compliance = ComplianceScorer::new(
            rules.compliance.clone(),
            rules.weights.clone(),
            rules.profile.clone(),
        );
        Ok(Self {
            rules,
            executor,
            relevance,
            compliance,
            store,
        })
    }

    /// One full discovery run. Always returns an outcome; an empty plan or a
    /// fully-failed run yields empty grants, not an error.
    pub async fn run(&self, intent: &SearchIntent) -> DiscoveryOutcome {
        let mut stats = ScoutStats::default();

        let mut chunks = ChunkPlanner::new(&self.rules).plan(intent);
        if let Some(cap) = intent.max_chunks {
            chunks.truncate(cap);
        }
        stats.chunks_planned = chunks.len() as u32;
        info!(chunks = chunks.len(), "Search plan ready");

        if chunks.is_empty() {
            return DiscoveryOutcome {
                grants: Vec::new(),
                stats,
                status: RunStatus::Completed,
            };
        }

        let (results, status) = self.executor.execute(&chunks, intent).await;
        stats.chunks_dispatched = results.len() as u32;
        stats.chunks_skipped = stats.chunks_planned - stats.chunks_dispatched;
        stats.chunks_failed = results
            .iter()
            .filter(|r| r.search_metadata.failed)
            .count() as u32;

        let candidates: Vec<_> = results.into_iter().flat_map(|r| r.grants).collect();
        stats.candidates_parsed = candidates.len() as u32;

        let unique = dedup_candidates(candidates);
        stats.duplicates_collapsed = stats.candidates_parsed - unique.len() as u32;

        let mut grants = Vec::with_capacity(unique.len());
        for candidate in unique {
            let mut grant = match EnrichedGrant::from_candidate(candidate) {
                Ok(grant) => grant,
                Err(e) => {
                    // Missing URL or title: filtered by design, not an error.
                    tracing::debug!(reason = %e, "Candidate rejected at conversion");
                    stats.grants_skipped += 1;
                    continue;
                }
            };
            grant.keywords = self.chunk_keywords(&grant);

            self.relevance.score(&mut grant);
            self.compliance.score(&mut grant);
            ComplianceScorer::default_composite(&mut grant);
            stats.grants_scored += 1;

            match self.store.upsert(&grant).await {
                Ok(Some(stored)) => {
                    stats.grants_stored += 1;
                    grants.push(stored);
                }
                Ok(None) => {
                    // The gateway's own URL gate — second layer of the same rule.
                    warn!(title = grant.title.as_str(), "Gateway rejected grant without valid URL");
                    stats.grants_skipped += 1;
                }
                Err(e) => {
                    warn!(title = grant.title.as_str(), error = %e, "Persistence failed, skipping grant");
                    stats.grants_skipped += 1;
                }
            }
        }

        info!(%stats, "Discovery run finished");
        DiscoveryOutcome {
            grants,
            stats,
            status,
        }
    }

    /// Keywords the grant inherits from its originating chunk's focus area.
    fn chunk_keywords(&self, grant: &EnrichedGrant) -> Vec<String> {
        grant
            .sector
            .as_deref()
            .and_then(|sector| self.rules.focus_areas.get(sector))
            .cloned()
            .unwrap_or_default()
    }
}
