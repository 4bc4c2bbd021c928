//! Compliance scoring and composite fusion.
//!
//! Business-logic alignment and feasibility start at 1.0 and are debited for
//! red flags; strategic synergy starts at 0.0 and is credited for alignment.
//! Business-logic stops scanning prohibited keywords after the first hit,
//! while synergy scans every misaligned keyword and applies every penalty —
//! the asymmetry is deliberate (see DESIGN.md).

use tracing::{debug, warn};

use grantsignal_common::rules::{ComplianceRules, CompositeWeights};
use grantsignal_common::types::{BusinessProfile, EnrichedGrant, ReportingCadence};

use super::rules::{clamp_score, contains_any, count_hits, first_hit};

pub struct ComplianceScorer {
    rules: ComplianceRules,
    weights: CompositeWeights,
    profile: BusinessProfile,
}

/// Reporting cadence implied by grant text, if any. No cadence language means
/// no evidence against feasibility.
fn implied_cadence(blob: &str) -> Option<ReportingCadence> {
    if blob.contains("monthly") {
        Some(ReportingCadence::Monthly)
    } else if blob.contains("quarterly") {
        Some(ReportingCadence::Quarterly)
    } else if blob.contains("annual") {
        Some(ReportingCadence::Annual)
    } else {
        None
    }
}

impl ComplianceScorer {
    pub fn new(rules: ComplianceRules, weights: CompositeWeights, profile: BusinessProfile) -> Self {
        Self {
            rules,
            weights,
            profile,
        }
    }

    fn business_logic_alignment(&self, blob: &str) -> f64 {
        let mut score = 1.0;

        // First prohibited hit only; remaining prohibited keywords are not
        // scanned.
        if let Some(hit) = first_hit(blob, &self.rules.prohibited_keywords) {
            debug!(keyword = hit, "Prohibited keyword hit");
            score -= self.rules.prohibited_penalty;
        }

        let mismatch = self.rules.org_requirements.iter().find(|req| {
            contains_any(blob, &req.keywords)
                && !self.profile.organization_types.contains(&req.organization_type)
        });
        if let Some(req) = mismatch {
            debug!(required = req.organization_type.as_str(), "Organization-type mismatch");
            score -= self.rules.org_mismatch_penalty;
        }

        if contains_any(blob, &self.rules.ethical_flag_keywords) {
            score -= self.rules.ethical_penalty;
        }

        clamp_score(score)
    }

    fn feasibility(&self, blob: &str) -> f64 {
        let mut score = 1.0;
        if let Some(cadence) = implied_cadence(blob) {
            if cadence > self.profile.reporting_capacity {
                debug!(
                    implied = ?cadence,
                    capacity = ?self.profile.reporting_capacity,
                    "Reporting cadence exceeds capacity"
                );
                score -= self.rules.infeasible_cadence_penalty;
            }
        }
        clamp_score(score)
    }

    fn strategic_synergy(&self, blob: &str) -> f64 {
        let mut score = 0.0;
        score += count_hits(blob, &self.profile.primary_objectives) as f64
            * self.rules.objective_credit;
        score += count_hits(blob, &self.profile.target_sectors) as f64 * self.rules.sector_credit;
        score +=
            count_hits(blob, &self.rules.synergistic_keywords) as f64 * self.rules.synergy_credit;
        // Unlike prohibited keywords, every misaligned keyword is scanned and
        // every penalty applied.
        score -= count_hits(blob, &self.rules.misaligned_keywords) as f64
            * self.rules.misaligned_penalty;
        clamp_score(score)
    }

    /// Fill the compliance sub-scores and derive the composite. Only empty
    /// sub-score fields are written; the composite is recomputed from
    /// whatever sub-scores are present, missing ones counting as 0.0.
    pub fn score(&self, grant: &mut EnrichedGrant) {
        let blob = grant.text_blob();

        if grant.compliance_scores.business_logic_alignment.is_none() {
            grant.compliance_scores.business_logic_alignment =
                Some(self.business_logic_alignment(&blob));
        }
        if grant.compliance_scores.feasibility_score.is_none() {
            grant.compliance_scores.feasibility_score = Some(self.feasibility(&blob));
        }
        if grant.compliance_scores.strategic_synergy.is_none() {
            grant.compliance_scores.strategic_synergy = Some(self.strategic_synergy(&blob));
        }

        let composite = grant.compliance_scores.fuse(
            self.weights.business_logic,
            self.weights.feasibility,
            self.weights.synergy,
        );
        grant.composite_score = Some(composite);

        grant.log_stage(format!(
            "compliance: business={:.2} feasibility={:.2} synergy={:.2} composite={composite:.4}",
            grant.compliance_scores.business_logic_alignment.unwrap_or(0.0),
            grant.compliance_scores.feasibility_score.unwrap_or(0.0),
            grant.compliance_scores.strategic_synergy.unwrap_or(0.0),
        ));
    }

    /// Composite fallback for a grant neither scorer touched: 0.0, with a
    /// diagnostic — never an error.
    pub fn default_composite(grant: &mut EnrichedGrant) {
        if grant.research_scores.is_unscored() && grant.compliance_scores.is_unscored() {
            warn!(
                grant = grant.title.as_str(),
                "No scorer ran for grant, composite defaults to 0.0"
            );
            grant.composite_score = Some(0.0);
            grant.log_stage("scoring: no scorer ran, composite defaulted to 0.0");
        }
    }
}
