//! Chunk planning: fan a broad search intent out into bounded sub-queries.
//!
//! Each chunk pairs one focus area with one geographic tier and carries at
//! most three effective keywords. Local-tier chunks sort first so the most
//! actionable searches dispatch ahead of federal sweeps.

use grantsignal_common::rules::{GeoTierTable, RuleConfig};
use grantsignal_common::types::{SearchChunk, SearchIntent};

/// Cap on effective keywords per chunk. Topic keywords fill first, then one
/// geo keyword, then caller-supplied base keywords take any remaining slots.
const MAX_KEYWORDS_PER_CHUNK: usize = 3;

pub struct ChunkPlanner<'a> {
    focus_areas: &'a std::collections::BTreeMap<String, Vec<String>>,
    geo_tiers: &'a GeoTierTable,
}

impl<'a> ChunkPlanner<'a> {
    pub fn new(rules: &'a RuleConfig) -> Self {
        Self {
            focus_areas: &rules.focus_areas,
            geo_tiers: &rules.geographic_tiers,
        }
    }

    /// Cartesian product of focus areas × active geographic tiers, sorted
    /// ascending by tier priority. Empty tables yield an empty plan — the
    /// pipeline then does nothing, which is not an error.
    pub fn plan(&self, intent: &SearchIntent) -> Vec<SearchChunk> {
        let mut chunks = Vec::new();

        for tier in self.geo_tiers.active_tiers() {
            let geo_keywords = self.geo_tiers.keywords(tier);
            for (sector, topic_keywords) in self.focus_areas {
                let mut keywords: Vec<String> = Vec::with_capacity(MAX_KEYWORDS_PER_CHUNK);

                // Topic keywords first, leaving one slot for the geo keyword.
                let topic_budget = if geo_keywords.is_empty() {
                    MAX_KEYWORDS_PER_CHUNK
                } else {
                    MAX_KEYWORDS_PER_CHUNK - 1
                };
                keywords.extend(topic_keywords.iter().take(topic_budget).cloned());

                if let Some(geo_keyword) = geo_keywords.first() {
                    keywords.push(geo_keyword.clone());
                }

                for base in &intent.base_keywords {
                    if keywords.len() >= MAX_KEYWORDS_PER_CHUNK {
                        break;
                    }
                    if !keywords.contains(base) {
                        keywords.push(base.clone());
                    }
                }

                chunks.push(SearchChunk {
                    chunk_id: format!("{sector}-{tier}"),
                    keywords,
                    geographic_focus: tier,
                    sector_focus: sector.clone(),
                    priority: tier.priority(),
                });
            }
        }

        chunks.sort_by_key(|c| c.priority);
        chunks
    }
}
