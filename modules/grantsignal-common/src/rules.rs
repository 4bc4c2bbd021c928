use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::types::{BusinessProfile, GeographicFocus};

/// TOML-backed rule tables loaded once per pipeline construction.
/// Secrets (API keys) stay as env vars — see `config`.
/// Malformed or absent tables are fatal at load time; the pipeline must not
/// start without its rule tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub profile: BusinessProfile,
    /// Sector key → topic keywords. Iteration order is the planner's chunk
    /// order within a tier, so the map is kept sorted.
    pub focus_areas: BTreeMap<String, Vec<String>>,
    pub geographic_tiers: GeoTierTable,
    pub relevance: RelevanceRules,
    pub compliance: ComplianceRules,
    #[serde(default)]
    pub weights: CompositeWeights,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl RuleConfig {
    /// Load and validate a TOML rule file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule config: {}", path.display()))?;
        let config: RuleConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse rule config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RuleConfig =
            toml::from_str(content).context("Failed to parse rule config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let sum = self.weights.business_logic + self.weights.feasibility + self.weights.synergy;
        if (sum - 1.0).abs() > 1e-6 {
            bail!("composite weights must sum to 1.0, got {sum}");
        }
        if self.executor.batch_size == 0 {
            bail!("executor.batch_size must be at least 1");
        }
        if self.executor.max_attempts == 0 {
            bail!("executor.max_attempts must be at least 1");
        }
        if self.executor.requests_per_minute == 0 || self.executor.requests_per_day == 0 {
            bail!("executor request limits must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Geographic tiers
// ---------------------------------------------------------------------------

/// Tier → tier-specific search keywords. A tier with no keywords is absent
/// from the plan; an entirely empty table yields an empty plan, not an error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoTierTable {
    #[serde(default)]
    pub local: Vec<String>,
    #[serde(default)]
    pub state: Vec<String>,
    #[serde(default)]
    pub regional: Vec<String>,
    #[serde(default)]
    pub federal: Vec<String>,
}

impl GeoTierTable {
    pub fn keywords(&self, tier: GeographicFocus) -> &[String] {
        match tier {
            GeographicFocus::Local => &self.local,
            GeographicFocus::State => &self.state,
            GeographicFocus::Regional => &self.regional,
            GeographicFocus::Federal => &self.federal,
        }
    }

    /// Tiers that have keywords, in fixed priority order (local first).
    pub fn active_tiers(&self) -> Vec<GeographicFocus> {
        GeographicFocus::all()
            .into_iter()
            .filter(|t| !self.keywords(*t).is_empty())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Relevance rules (research-context scorer)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelevanceRules {
    pub sector: RelevanceRuleSet,
    pub geographic: RelevanceRuleSet,
    pub operational: RelevanceRuleSet,
    /// Fixed geographic bonus when the text signals national scope.
    #[serde(default = "default_national_bonus")]
    pub national_bonus: f64,
}

/// One keyword-weighted rule set: the sub-score starts at `default_score`
/// and is credited per match; any exclusion keyword forces it back to the
/// default floor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelevanceRuleSet {
    #[serde(default)]
    pub priority_keywords: Vec<String>,
    #[serde(default)]
    pub secondary_keywords: Vec<String>,
    #[serde(default)]
    pub exclusion_keywords: Vec<String>,
    #[serde(default = "default_priority_weight")]
    pub priority_weight: f64,
    #[serde(default = "default_secondary_weight")]
    pub secondary_weight: f64,
    #[serde(default = "default_floor_score")]
    pub default_score: f64,
}

impl RelevanceRuleSet {
    /// A rule set with no keywords at all — scoring degrades to the default
    /// score with a warning rather than failing the run.
    pub fn is_empty(&self) -> bool {
        self.priority_keywords.is_empty() && self.secondary_keywords.is_empty()
    }
}

fn default_priority_weight() -> f64 {
    0.3
}

fn default_secondary_weight() -> f64 {
    0.15
}

fn default_floor_score() -> f64 {
    0.2
}

fn default_national_bonus() -> f64 {
    0.2
}

// ---------------------------------------------------------------------------
// Compliance rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComplianceRules {
    #[serde(default)]
    pub prohibited_keywords: Vec<String>,
    #[serde(default = "default_prohibited_penalty")]
    pub prohibited_penalty: f64,
    #[serde(default)]
    pub ethical_flag_keywords: Vec<String>,
    #[serde(default = "default_ethical_penalty")]
    pub ethical_penalty: f64,
    /// Organization-type requirements implied by grant text, e.g. the
    /// keyword "501(c)(3)" requires the "nonprofit" organization type.
    #[serde(default)]
    pub org_requirements: Vec<OrgRequirementRule>,
    #[serde(default = "default_org_mismatch_penalty")]
    pub org_mismatch_penalty: f64,
    #[serde(default = "default_cadence_penalty")]
    pub infeasible_cadence_penalty: f64,
    #[serde(default)]
    pub synergistic_keywords: Vec<String>,
    #[serde(default)]
    pub misaligned_keywords: Vec<String>,
    #[serde(default = "default_objective_credit")]
    pub objective_credit: f64,
    #[serde(default = "default_sector_credit")]
    pub sector_credit: f64,
    #[serde(default = "default_synergy_credit")]
    pub synergy_credit: f64,
    #[serde(default = "default_misaligned_penalty")]
    pub misaligned_penalty: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrgRequirementRule {
    pub keywords: Vec<String>,
    pub organization_type: String,
}

fn default_prohibited_penalty() -> f64 {
    0.5
}

fn default_ethical_penalty() -> f64 {
    0.4
}

fn default_org_mismatch_penalty() -> f64 {
    0.3
}

fn default_cadence_penalty() -> f64 {
    0.4
}

fn default_objective_credit() -> f64 {
    0.25
}

fn default_sector_credit() -> f64 {
    0.25
}

fn default_synergy_credit() -> f64 {
    0.15
}

fn default_misaligned_penalty() -> f64 {
    0.3
}

// ---------------------------------------------------------------------------
// Composite weights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeWeights {
    pub business_logic: f64,
    pub feasibility: f64,
    pub synergy: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            business_logic: 0.3,
            feasibility: 0.4,
            synergy: 0.3,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Pre-dispatch stagger is this delay times the chunk's priority.
    #[serde(default = "default_stagger_ms")]
    pub base_stagger_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_requests_per_day")]
    pub requests_per_day: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_ceiling_ms")]
    pub backoff_ceiling_ms: u64,
    /// First-pass candidate count at which the refinement pass kicks in.
    #[serde(default = "default_refinement_threshold")]
    pub refinement_threshold: usize,
    /// How many of a chunk's candidates the refinement pass re-queries.
    #[serde(default = "default_refinement_cap")]
    pub refinement_cap: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_stagger_ms: default_stagger_ms(),
            batch_size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
            requests_per_minute: default_requests_per_minute(),
            requests_per_day: default_requests_per_day(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_ceiling_ms: default_backoff_ceiling_ms(),
            refinement_threshold: default_refinement_threshold(),
            refinement_cap: default_refinement_cap(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_stagger_ms() -> u64 {
    200
}

fn default_batch_size() -> usize {
    5
}

fn default_inter_batch_delay_ms() -> u64 {
    2_000
}

fn default_requests_per_minute() -> u32 {
    20
}

fn default_requests_per_day() -> u32 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_ceiling_ms() -> u64 {
    30_000
}

fn default_refinement_threshold() -> usize {
    3
}

fn default_refinement_cap() -> usize {
    3
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2_048
}
