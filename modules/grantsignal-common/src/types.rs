use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::GrantSignalError;

// ---------------------------------------------------------------------------
// Search planning types
// ---------------------------------------------------------------------------

/// Geographic tier of a sub-query. Priority order is fixed: local chunks
/// dispatch first, federal last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeographicFocus {
    Local,
    State,
    Regional,
    Federal,
}

impl GeographicFocus {
    pub fn priority(&self) -> u8 {
        match self {
            GeographicFocus::Local => 1,
            GeographicFocus::State => 2,
            GeographicFocus::Regional => 3,
            GeographicFocus::Federal => 4,
        }
    }

    pub fn all() -> [GeographicFocus; 4] {
        [
            GeographicFocus::Local,
            GeographicFocus::State,
            GeographicFocus::Regional,
            GeographicFocus::Federal,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeographicFocus::Local => "local",
            GeographicFocus::State => "state",
            GeographicFocus::Regional => "regional",
            GeographicFocus::Federal => "federal",
        }
    }
}

impl std::fmt::Display for GeographicFocus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bounded sub-query: a handful of keywords, one geographic tier, one
/// sector focus. Immutable once planned; lives for a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchChunk {
    pub chunk_id: String,
    pub keywords: Vec<String>,
    pub geographic_focus: GeographicFocus,
    pub sector_focus: String,
    pub priority: u8,
}

/// Caller-supplied broad search intent, fanned out by the planner.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct SearchIntent {
    #[builder(default)]
    pub base_keywords: Vec<String>,
    #[builder(default)]
    pub funding_min: Option<f64>,
    #[builder(default)]
    pub funding_max: Option<f64>,
    /// Cap on how many chunks a run may dispatch. `None` = the full plan.
    #[builder(default)]
    pub max_chunks: Option<usize>,
}

// ---------------------------------------------------------------------------
// Executor output types
// ---------------------------------------------------------------------------

/// Per-chunk execution trace, carried alongside the parsed candidates.
#[derive(Debug, Clone, Default)]
pub struct SearchMetadata {
    pub query: String,
    pub model: String,
    pub attempts: u32,
    pub duration_ms: u64,
    pub refined: bool,
    pub failed: bool,
}

/// What one chunk produced. A failed chunk yields an empty `grants` list with
/// `search_metadata.failed` set; it never poisons sibling chunks.
#[derive(Debug, Clone)]
pub struct ChunkedSearchResult {
    pub grants: Vec<RawGrantCandidate>,
    pub search_metadata: SearchMetadata,
    pub chunk_info: SearchChunk,
}

impl ChunkedSearchResult {
    pub fn empty(chunk: SearchChunk, metadata: SearchMetadata) -> Self {
        Self {
            grants: Vec::new(),
            search_metadata: metadata,
            chunk_info: chunk,
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate records — unvalidated phase
// ---------------------------------------------------------------------------

/// Field values the parser treats as absent when counting record richness.
const PLACEHOLDER_VALUES: &[&str] = &["n/a", "na", "unknown", "tbd", "not specified", "none"];

fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || PLACEHOLDER_VALUES.contains(&v.to_lowercase().as_str())
}

/// Loosely-typed candidate extracted from model free text. Exists only until
/// converted to an [`EnrichedGrant`] or discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGrantCandidate {
    pub title: Option<String>,
    pub funding_amount: Option<f64>,
    pub funding_amount_display: Option<String>,
    pub deadline: Option<String>,
    pub source_url: Option<String>,
    pub funder_name: Option<String>,
    pub description: Option<String>,
    pub eligibility: Option<String>,
    // Chunk provenance
    pub search_chunk_id: Option<String>,
    pub geographic_focus: Option<GeographicFocus>,
    pub sector_focus: Option<String>,
}

impl RawGrantCandidate {
    /// Count of non-empty, non-placeholder descriptive fields. Used to pick
    /// the richer record when two candidates collide during dedup.
    pub fn filled_field_count(&self) -> usize {
        let text_fields = [
            &self.title,
            &self.funding_amount_display,
            &self.deadline,
            &self.source_url,
            &self.funder_name,
            &self.description,
            &self.eligibility,
        ];
        let mut count = text_fields
            .iter()
            .filter(|f| f.as_deref().is_some_and(|v| !is_placeholder(v)))
            .count();
        if self.funding_amount.is_some() {
            count += 1;
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Score objects
// ---------------------------------------------------------------------------

/// Research-context sub-scores. Default-absent until the relevance scorer
/// runs; every value is clamped to [0,1] at write time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchContextScores {
    pub sector_relevance: Option<f64>,
    pub geographic_relevance: Option<f64>,
    pub operational_alignment: Option<f64>,
}

impl ResearchContextScores {
    pub fn is_unscored(&self) -> bool {
        self.sector_relevance.is_none()
            && self.geographic_relevance.is_none()
            && self.operational_alignment.is_none()
    }
}

/// Compliance sub-scores. `final_weighted_score` is derived by
/// [`ComplianceScores::fuse`], never set directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplianceScores {
    pub business_logic_alignment: Option<f64>,
    pub feasibility_score: Option<f64>,
    pub strategic_synergy: Option<f64>,
    pub final_weighted_score: Option<f64>,
}

impl ComplianceScores {
    pub fn is_unscored(&self) -> bool {
        self.business_logic_alignment.is_none()
            && self.feasibility_score.is_none()
            && self.strategic_synergy.is_none()
    }

    /// Weighted fusion of the three sub-scores, rounded to 4 decimal places.
    /// A missing sub-score counts as 0.0 for the sum — the term is never
    /// skipped.
    pub fn fuse(&mut self, w_business: f64, w_feasibility: f64, w_synergy: f64) -> f64 {
        let composite = self.business_logic_alignment.unwrap_or(0.0) * w_business
            + self.feasibility_score.unwrap_or(0.0) * w_feasibility
            + self.strategic_synergy.unwrap_or(0.0) * w_synergy;
        let rounded = round4(composite);
        self.final_weighted_score = Some(rounded);
        rounded
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ---------------------------------------------------------------------------
// Reporting cadence — feasibility ordering
// ---------------------------------------------------------------------------

/// Reporting cadence demand, ordered by burden: monthly > quarterly > annual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportingCadence {
    Annual,
    Quarterly,
    Monthly,
}

/// The applicant organization's profile, supplied via the rule config and
/// consumed by the compliance scorer.
#[derive(Debug, Clone, Deserialize)]
pub struct BusinessProfile {
    pub organization_types: Vec<String>,
    pub reporting_capacity: ReportingCadence,
    #[serde(default)]
    pub primary_objectives: Vec<String>,
    #[serde(default)]
    pub target_sectors: Vec<String>,
}

// ---------------------------------------------------------------------------
// EnrichedGrant — validated phase
// ---------------------------------------------------------------------------

pub fn is_absolute_http_url(url: &str) -> bool {
    let url = url.trim();
    (url.starts_with("http://") || url.starts_with("https://"))
        && !url.chars().any(char::is_whitespace)
        && url.len() > "https://".len()
}

/// The canonical unit of value. A record carries a non-empty absolute
/// http(s) source URL or it is never constructed — the constructor is the
/// enforcement point, not a downstream filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedGrant {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub title: String,
    pub description: String,
    pub funder_name: Option<String>,
    pub funding_amount_min: Option<f64>,
    pub funding_amount_max: Option<f64>,
    pub funding_amount_exact: Option<f64>,
    pub funding_amount_display: Option<String>,
    pub deadline: Option<String>,
    pub eligibility: Option<String>,
    pub keywords: Vec<String>,
    pub sector: Option<String>,
    pub sub_sector: Option<String>,
    pub geographic_scope: Option<GeographicFocus>,
    pub source_url: String,
    pub research_scores: ResearchContextScores,
    pub compliance_scores: ComplianceScores,
    pub composite_score: Option<f64>,
    /// Append-only trace of which stages touched this record.
    pub enrichment_log: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrichedGrant {
    /// The single fallible raw→enriched conversion. Rejects candidates
    /// without a title or without an absolute http(s) URL; rejection is the
    /// expected filter for junk blocks, not an anomaly.
    pub fn from_candidate(candidate: RawGrantCandidate) -> Result<Self, GrantSignalError> {
        let title = candidate
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GrantSignalError::Validation("candidate has no title".into()))?
            .to_string();

        let source_url = candidate
            .source_url
            .as_deref()
            .map(str::trim)
            .filter(|u| is_absolute_http_url(u))
            .ok_or_else(|| {
                GrantSignalError::Validation(format!(
                    "candidate '{title}' has no absolute http(s) source URL"
                ))
            })?
            .to_string();

        let now = Utc::now();
        let mut grant = Self {
            id: Uuid::new_v4(),
            external_id: None,
            title,
            description: candidate.description.clone().unwrap_or_default(),
            funder_name: candidate.funder_name.clone(),
            funding_amount_min: None,
            funding_amount_max: None,
            funding_amount_exact: candidate.funding_amount,
            funding_amount_display: candidate.funding_amount_display.clone(),
            deadline: candidate.deadline.clone(),
            eligibility: candidate.eligibility.clone(),
            keywords: Vec::new(),
            sector: candidate.sector_focus.clone(),
            sub_sector: None,
            geographic_scope: candidate.geographic_focus,
            source_url,
            research_scores: ResearchContextScores::default(),
            compliance_scores: ComplianceScores::default(),
            composite_score: None,
            enrichment_log: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        grant.log_stage(format!(
            "discovery: extracted via chunk {} ({}/{})",
            candidate.search_chunk_id.as_deref().unwrap_or("unknown"),
            candidate.sector_focus.as_deref().unwrap_or("unknown"),
            candidate
                .geographic_focus
                .map(|g| g.as_str())
                .unwrap_or("unknown"),
        ));
        Ok(grant)
    }

    pub fn log_stage(&mut self, entry: impl Into<String>) {
        self.enrichment_log.push(entry.into());
    }

    /// Combined text blob the keyword scorers match against.
    pub fn text_blob(&self) -> String {
        let mut blob = String::with_capacity(
            self.title.len() + self.description.len() + 64,
        );
        blob.push_str(&self.title);
        blob.push(' ');
        blob.push_str(&self.description);
        if let Some(ref eligibility) = self.eligibility {
            blob.push(' ');
            blob.push_str(eligibility);
        }
        blob.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(title: &str, url: &str) -> RawGrantCandidate {
        RawGrantCandidate {
            title: Some(title.to_string()),
            source_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn geographic_priority_order() {
        assert_eq!(GeographicFocus::Local.priority(), 1);
        assert_eq!(GeographicFocus::Federal.priority(), 4);
    }

    #[test]
    fn cadence_ordering_monthly_most_demanding() {
        assert!(ReportingCadence::Monthly > ReportingCadence::Quarterly);
        assert!(ReportingCadence::Quarterly > ReportingCadence::Annual);
    }

    #[test]
    fn from_candidate_requires_absolute_url() {
        let result = EnrichedGrant::from_candidate(candidate("Rural Broadband Fund", "grants.gov/123"));
        assert!(result.is_err());

        let result = EnrichedGrant::from_candidate(candidate("Rural Broadband Fund", "ftp://grants.gov/123"));
        assert!(result.is_err());

        let result =
            EnrichedGrant::from_candidate(candidate("Rural Broadband Fund", "https://grants.gov/123"));
        assert!(result.is_ok());
    }

    #[test]
    fn from_candidate_rejects_url_with_whitespace() {
        let result =
            EnrichedGrant::from_candidate(candidate("Some Grant", "https://grants.gov/a b"));
        assert!(result.is_err());
    }

    #[test]
    fn from_candidate_requires_title() {
        let mut c = candidate("", "https://grants.gov/123");
        c.title = None;
        assert!(EnrichedGrant::from_candidate(c).is_err());
    }

    #[test]
    fn from_candidate_seeds_enrichment_log() {
        let grant =
            EnrichedGrant::from_candidate(candidate("Some Grant", "https://grants.gov/123")).unwrap();
        assert_eq!(grant.enrichment_log.len(), 1);
        assert!(grant.enrichment_log[0].starts_with("discovery:"));
    }

    #[test]
    fn filled_field_count_ignores_placeholders() {
        let mut c = candidate("Some Grant", "https://grants.gov/123");
        assert_eq!(c.filled_field_count(), 2);
        c.deadline = Some("N/A".to_string());
        assert_eq!(c.filled_field_count(), 2);
        c.deadline = Some("2026-12-31".to_string());
        assert_eq!(c.filled_field_count(), 3);
        c.funding_amount = Some(50_000.0);
        assert_eq!(c.filled_field_count(), 4);
    }

    #[test]
    fn fuse_counts_missing_subscore_as_zero() {
        let mut scores = ComplianceScores {
            business_logic_alignment: Some(1.0),
            feasibility_score: None,
            strategic_synergy: Some(1.0),
            final_weighted_score: None,
        };
        let composite = scores.fuse(0.3, 0.4, 0.3);
        assert_eq!(composite, 0.6);
        assert_eq!(scores.final_weighted_score, Some(0.6));
    }

    #[test]
    fn fuse_rounds_to_four_decimals() {
        let mut scores = ComplianceScores {
            business_logic_alignment: Some(0.333_333),
            feasibility_score: Some(0.333_333),
            strategic_synergy: Some(0.333_333),
            final_weighted_score: None,
        };
        let composite = scores.fuse(0.3, 0.4, 0.3);
        assert_eq!(composite, 0.3333);
    }

    #[test]
    fn fuse_extremes() {
        let mut ones = ComplianceScores {
            business_logic_alignment: Some(1.0),
            feasibility_score: Some(1.0),
            strategic_synergy: Some(1.0),
            final_weighted_score: None,
        };
        assert_eq!(ones.fuse(0.3, 0.4, 0.3), 1.0);

        let mut zeros = ComplianceScores {
            business_logic_alignment: Some(0.0),
            feasibility_score: Some(0.0),
            strategic_synergy: Some(0.0),
            final_weighted_score: None,
        };
        assert_eq!(zeros.fuse(0.3, 0.4, 0.3), 0.0);
    }
}
