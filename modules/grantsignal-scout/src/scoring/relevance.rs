//! Research-context scoring: sector, geographic, and operational alignment.
//!
//! Each sub-score starts from its configured default and is credited per
//! keyword match — priority keywords count more than secondary ones. Any
//! exclusion keyword forces the sub-score back to its floor. Scoring is
//! additive across stages: an already-filled sub-score is left alone.

use tracing::warn;

use grantsignal_common::rules::{RelevanceRuleSet, RelevanceRules};
use grantsignal_common::types::EnrichedGrant;

use super::rules::{clamp_score, contains_any, weighted_hits};

/// Scope words that earn the geographic sub-score its fixed national bonus.
const NATIONAL_SCOPE_TERMS: &[&str] = &["national", "nationwide"];

pub struct RelevanceScorer {
    rules: RelevanceRules,
}

impl RelevanceScorer {
    pub fn new(rules: RelevanceRules) -> Self {
        Self { rules }
    }

    fn score_rule_set(&self, blob: &str, name: &str, set: &RelevanceRuleSet) -> f64 {
        if set.is_empty() {
            warn!(rule = name, "Relevance keyword table is empty, using default score");
            return clamp_score(set.default_score);
        }

        if contains_any(blob, &set.exclusion_keywords) {
            return clamp_score(set.default_score);
        }

        let score = set.default_score
            + weighted_hits(blob, &set.priority_keywords, set.priority_weight)
            + weighted_hits(blob, &set.secondary_keywords, set.secondary_weight);
        clamp_score(score)
    }

    /// Fill the research-context sub-scores. Only currently-empty fields are
    /// written; later stages never destroy earlier ones.
    pub fn score(&self, grant: &mut EnrichedGrant) {
        let blob = grant.text_blob();

        if grant.research_scores.sector_relevance.is_none() {
            grant.research_scores.sector_relevance =
                Some(self.score_rule_set(&blob, "sector", &self.rules.sector));
        }

        if grant.research_scores.geographic_relevance.is_none() {
            let mut geo = self.score_rule_set(&blob, "geographic", &self.rules.geographic);
            if NATIONAL_SCOPE_TERMS.iter().any(|t| blob.contains(t)) {
                geo = clamp_score(geo + self.rules.national_bonus);
            }
            grant.research_scores.geographic_relevance = Some(geo);
        }

        if grant.research_scores.operational_alignment.is_none() {
            grant.research_scores.operational_alignment =
                Some(self.score_rule_set(&blob, "operational", &self.rules.operational));
        }

        grant.log_stage(format!(
            "relevance: sector={:.2} geographic={:.2} operational={:.2}",
            grant.research_scores.sector_relevance.unwrap_or(0.0),
            grant.research_scores.geographic_relevance.unwrap_or(0.0),
            grant.research_scores.operational_alignment.unwrap_or(0.0),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grantsignal_common::types::RawGrantCandidate;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn rule_set(priority: &[&str], secondary: &[&str], exclusion: &[&str]) -> RelevanceRuleSet {
        RelevanceRuleSet {
            priority_keywords: kw(priority),
            secondary_keywords: kw(secondary),
            exclusion_keywords: kw(exclusion),
            priority_weight: 0.3,
            secondary_weight: 0.15,
            default_score: 0.2,
        }
    }

    fn rules() -> RelevanceRules {
        RelevanceRules {
            sector: rule_set(&["broadband", "connectivity"], &["digital"], &["cosmetics"]),
            geographic: rule_set(&["rural", "county"], &[], &[]),
            operational: rule_set(&["deployment"], &[], &[]),
            national_bonus: 0.2,
        }
    }

    fn grant(description: &str) -> EnrichedGrant {
        EnrichedGrant::from_candidate(RawGrantCandidate {
            title: Some("Test Grant".to_string()),
            source_url: Some("https://example.org/apply".to_string()),
            description: Some(description.to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn priority_keywords_outweigh_secondary() {
        let scorer = RelevanceScorer::new(rules());

        let mut priority = grant("broadband program");
        scorer.score(&mut priority);
        let mut secondary = grant("digital program");
        scorer.score(&mut secondary);

        assert_eq!(priority.research_scores.sector_relevance, Some(0.5));
        assert_eq!(secondary.research_scores.sector_relevance, Some(0.35));
    }

    #[test]
    fn exclusion_keyword_forces_floor() {
        let scorer = RelevanceScorer::new(rules());
        let mut g = grant("broadband connectivity for cosmetics retailers");
        scorer.score(&mut g);
        assert_eq!(g.research_scores.sector_relevance, Some(0.2));
    }

    #[test]
    fn national_scope_earns_geographic_bonus() {
        let scorer = RelevanceScorer::new(rules());
        let mut g = grant("a nationwide rural initiative");
        scorer.score(&mut g);
        // default 0.2 + rural 0.3 + national bonus 0.2
        assert_eq!(g.research_scores.geographic_relevance, Some(0.7));
    }

    #[test]
    fn scores_are_clamped_to_unit_interval() {
        let scorer = RelevanceScorer::new(rules());
        let mut g = grant(
            "broadband connectivity digital rural county deployment broadband \
             connectivity rural county nationwide",
        );
        scorer.score(&mut g);
        for score in [
            g.research_scores.sector_relevance,
            g.research_scores.geographic_relevance,
            g.research_scores.operational_alignment,
        ] {
            let s = score.unwrap();
            assert!((0.0..=1.0).contains(&s), "score {s} out of range");
        }
    }

    #[test]
    fn existing_scores_are_not_overwritten() {
        let scorer = RelevanceScorer::new(rules());
        let mut g = grant("broadband");
        g.research_scores.sector_relevance = Some(0.9);
        scorer.score(&mut g);
        assert_eq!(g.research_scores.sector_relevance, Some(0.9));
    }

    #[test]
    fn scoring_appends_to_enrichment_log() {
        let scorer = RelevanceScorer::new(rules());
        let mut g = grant("broadband");
        let before = g.enrichment_log.len();
        scorer.score(&mut g);
        assert_eq!(g.enrichment_log.len(), before + 1);
        assert!(g.enrichment_log.last().unwrap().starts_with("relevance:"));
    }

    #[test]
    fn empty_rule_table_degrades_to_default() {
        let mut r = rules();
        r.operational.priority_keywords.clear();
        let scorer = RelevanceScorer::new(r);
        let mut g = grant("deployment everywhere");
        scorer.score(&mut g);
        assert_eq!(g.research_scores.operational_alignment, Some(0.2));
    }
}
