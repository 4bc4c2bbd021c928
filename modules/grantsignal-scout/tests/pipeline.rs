//! Full-pipeline runs against a scripted model and the in-memory store:
//! no network, no provider keys.

use std::sync::Arc;

use grantsignal_common::rules::RuleConfig;
use grantsignal_common::types::SearchIntent;
use grantsignal_scout::scout::GrantScout;
use grantsignal_scout::store::{GrantStore, MemoryGrantStore};
use grantsignal_scout::testing::MockModel;
use grantsignal_scout::RunStatus;

const RULES: &str = r#"
    [profile]
    organization_types = ["small-business"]
    reporting_capacity = "quarterly"
    primary_objectives = ["broadband access"]
    target_sectors = ["technology"]

    [focus_areas]
    education = ["adult literacy", "workforce development"]
    technology = ["broadband infrastructure", "digital equity"]

    [geographic_tiers]
    local = ["city grant program"]

    [relevance.sector]
    priority_keywords = ["broadband", "connectivity"]
    secondary_keywords = ["technology"]

    [relevance.geographic]
    priority_keywords = ["rural", "county"]

    [relevance.operational]
    priority_keywords = ["deployment"]

    [compliance]
    prohibited_keywords = ["gambling"]
    synergistic_keywords = ["partnership"]
    misaligned_keywords = ["luxury"]

    [executor]
    base_stagger_ms = 0
    inter_batch_delay_ms = 0
    backoff_base_ms = 1
    backoff_ceiling_ms = 4
    requests_per_minute = 1000
    requests_per_day = 1000
    refinement_threshold = 100
"#;

const TECHNOLOGY_REPLY: &str = "\
Title: Rural Broadband Infrastructure Expansion Grant
Funder: Example Communications Foundation
Amount: $250,000
Deadline: 2026-09-30
URL: https://grants.example.org/broadband/apply
Eligibility: Small businesses deploying rural connectivity
Description: Supports last-mile broadband deployment in rural counties.

Title: Phantom Opportunity With No Link
Funder: Vague Agency
Amount: $1,000,000";

const EDUCATION_REPLY: &str = "\
Title: Rural Broadband Infrastructure Expansion Grant
Funder: Example Communications Foundation
URL: https://GRANTS.example.org/broadband/apply/
Description: Duplicate sighting from a differently-worded query.

Title: Adult Literacy Advancement Program
Funder: Example Education Trust
Amount: $75,000
Deadline: 2026-04-15
URL: https://edu.example.org/literacy/apply
Eligibility: Community programs; requires monthly progress reports
Description: Funds adult literacy cohorts in partnership with libraries.";

fn scout_with(model: MockModel, store: Arc<MemoryGrantStore>) -> GrantScout {
    let rules = RuleConfig::from_toml(RULES).unwrap();
    GrantScout::new(rules, Arc::new(model), store).unwrap()
}

fn scripted_model() -> MockModel {
    MockModel::always("")
        .reply_when("Sector focus (technology)", TECHNOLOGY_REPLY)
        .reply_when("Sector focus (education)", EDUCATION_REPLY)
}

#[tokio::test]
async fn full_run_parses_dedups_scores_and_stores() {
    let store = Arc::new(MemoryGrantStore::new());
    let scout = scout_with(scripted_model(), store.clone());

    let outcome = scout.run(&SearchIntent::default()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.chunks_planned, 2);
    assert_eq!(outcome.stats.chunks_dispatched, 2);
    assert_eq!(outcome.stats.chunks_failed, 0);

    // 3 candidates with URLs survive parsing; the phantom without a URL
    // never becomes a candidate; the cross-chunk duplicate collapses.
    assert_eq!(outcome.stats.candidates_parsed, 3);
    assert_eq!(outcome.stats.duplicates_collapsed, 1);
    assert_eq!(outcome.grants.len(), 2);

    for grant in &outcome.grants {
        assert!(grant.source_url.starts_with("https://"));
        assert!(!grant.enrichment_log.is_empty());
        assert!(grant.composite_score.is_some());

        for score in [
            grant.research_scores.sector_relevance,
            grant.research_scores.geographic_relevance,
            grant.research_scores.operational_alignment,
            grant.compliance_scores.business_logic_alignment,
            grant.compliance_scores.feasibility_score,
            grant.compliance_scores.strategic_synergy,
        ] {
            let s = score.expect("all sub-scores set after a full run");
            assert!((0.0..=1.0).contains(&s), "score {s} out of range");
        }
    }

    assert!(outcome
        .grants
        .iter()
        .all(|g| !g.title.contains("Phantom")));
    assert_eq!(store.all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn monthly_reporting_grant_scores_lower_feasibility() {
    let store = Arc::new(MemoryGrantStore::new());
    let scout = scout_with(scripted_model(), store);

    let outcome = scout.run(&SearchIntent::default()).await;

    let literacy = outcome
        .grants
        .iter()
        .find(|g| g.title.contains("Literacy"))
        .unwrap();
    let broadband = outcome
        .grants
        .iter()
        .find(|g| g.title.contains("Broadband"))
        .unwrap();

    // "monthly progress reports" exceeds the quarterly capacity.
    assert!(
        literacy.compliance_scores.feasibility_score.unwrap()
            < broadband.compliance_scores.feasibility_score.unwrap()
    );
}

#[tokio::test]
async fn failing_chunk_leaves_sibling_results_intact() {
    let store = Arc::new(MemoryGrantStore::new());
    let model = scripted_model().fail_when("Sector focus (education)", "503 upstream error");
    let scout = scout_with(model, store);

    let outcome = scout.run(&SearchIntent::default()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stats.chunks_failed, 1);
    assert!(outcome
        .grants
        .iter()
        .any(|g| g.title.contains("Broadband")));
}

#[tokio::test]
async fn day_quota_exhaustion_surfaces_distinct_status() {
    let store = Arc::new(MemoryGrantStore::new());
    let rules = RuleConfig::from_toml(&RULES.replace(
        "requests_per_day = 1000",
        "requests_per_day = 1\nbatch_size = 1",
    ))
    .unwrap();
    let scout = GrantScout::new(rules, Arc::new(scripted_model()), store).unwrap();

    let outcome = scout.run(&SearchIntent::default()).await;

    assert_eq!(outcome.status, RunStatus::QuotaExhausted);
    assert_eq!(outcome.stats.chunks_skipped, 1);
}

#[tokio::test]
async fn second_run_merges_into_stored_history() {
    let store = Arc::new(MemoryGrantStore::new());

    let first = scout_with(scripted_model(), store.clone());
    let outcome = first.run(&SearchIntent::default()).await;
    assert_eq!(outcome.stats.grants_stored, 2);

    let second = scout_with(scripted_model(), store.clone());
    let outcome = second.run(&SearchIntent::default()).await;

    // Same grants again: the gateway merges rather than duplicating.
    assert_eq!(outcome.stats.grants_stored, 2);
    assert_eq!(store.all().await.unwrap().len(), 2);
    let stored = store.all().await.unwrap();
    assert!(stored
        .iter()
        .all(|g| g.enrichment_log.iter().any(|e| e.contains("merged"))));
}

#[tokio::test]
async fn empty_plan_is_a_no_op_not_an_error() {
    let rules = RuleConfig::from_toml(&RULES.replace(
        "local = [\"city grant program\"]",
        "local = []",
    ))
    .unwrap();
    let store = Arc::new(MemoryGrantStore::new());
    let scout = GrantScout::new(rules, Arc::new(MockModel::always("")), store).unwrap();

    let outcome = scout.run(&SearchIntent::default()).await;
    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.grants.is_empty());
    assert_eq!(outcome.stats.chunks_planned, 0);
}

#[tokio::test]
async fn bad_weights_fail_construction() {
    let rules_toml = RULES.to_string()
        + "\n[weights]\nbusiness_logic = 0.9\nfeasibility = 0.9\nsynergy = 0.9\n";
    assert!(RuleConfig::from_toml(&rules_toml).is_err());
}
