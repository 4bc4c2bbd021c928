//! Hierarchical candidate identity and within-run deduplication.
//!
//! Identity precedence, first match wins:
//! 1. exact normalized source URL,
//! 2. exact (normalized title, deadline) pair,
//! 3. fuzzy title similarity ≥ 0.85 when both titles exceed 30 chars.
//!
//! On collision the richer record is kept outright — field-by-field union
//! belongs to the persistence gateway, not this layer. The same tiers run a
//! second time inside the gateway against stored history.

use std::collections::HashMap;

use tracing::debug;
use url::Url;

use grantsignal_common::types::RawGrantCandidate;

/// Minimum title length for the fuzzy tier; shorter titles produce too many
/// false positives.
pub const FUZZY_MIN_TITLE_LEN: usize = 31;

/// Similarity ratio at or above which two long titles are the same grant.
pub const FUZZY_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Which identity tier matched two candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityTier {
    Url,
    TitleDeadline,
    FuzzyTitle,
}

/// Normalize a URL for identity comparison: scheme and host case-folded,
/// trailing slash removed. Unparseable input falls back to a lowercased trim.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(parsed) => parsed.to_string().trim_end_matches('/').to_string(),
        Err(_) => trimmed.to_lowercase().trim_end_matches('/').to_string(),
    }
}

/// Normalize a title for dedup comparison: lowercase and trim.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Case-insensitive sequence-similarity ratio in [0,1].
pub fn title_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_title(a), &normalize_title(b))
}

/// Pure decision function: do these two candidates denote the same grant,
/// and via which tier?
pub fn identity_match(a: &RawGrantCandidate, b: &RawGrantCandidate) -> Option<IdentityTier> {
    if let (Some(url_a), Some(url_b)) = (&a.source_url, &b.source_url) {
        if normalize_url(url_a) == normalize_url(url_b) {
            return Some(IdentityTier::Url);
        }
    }

    let titles = match (&a.title, &b.title) {
        (Some(ta), Some(tb)) => Some((ta, tb)),
        _ => None,
    };

    if let (Some((ta, tb)), Some(da), Some(db)) = (titles, &a.deadline, &b.deadline) {
        if normalize_title(ta) == normalize_title(tb) && da.trim() == db.trim() {
            return Some(IdentityTier::TitleDeadline);
        }
    }

    if let Some((ta, tb)) = titles {
        if ta.len() >= FUZZY_MIN_TITLE_LEN
            && tb.len() >= FUZZY_MIN_TITLE_LEN
            && title_similarity(ta, tb) >= FUZZY_SIMILARITY_THRESHOLD
        {
            return Some(IdentityTier::FuzzyTitle);
        }
    }

    None
}

/// Collapse candidates from different chunks into a unique set. When two
/// collide, the one with more non-empty, non-placeholder fields survives;
/// the other is discarded without merging. Idempotent.
pub fn dedup_candidates(candidates: Vec<RawGrantCandidate>) -> Vec<RawGrantCandidate> {
    let mut kept: Vec<RawGrantCandidate> = Vec::with_capacity(candidates.len());
    let mut by_url: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        // Tier 1 lookup is indexed; the lower tiers scan the kept set.
        let slot = candidate
            .source_url
            .as_deref()
            .and_then(|u| by_url.get(&normalize_url(u)).copied())
            .or_else(|| {
                kept.iter()
                    .position(|existing| identity_match(existing, &candidate).is_some())
            });

        match slot {
            Some(i) => {
                if candidate.filled_field_count() > kept[i].filled_field_count() {
                    debug!(
                        title = candidate.title.as_deref().unwrap_or(""),
                        "Duplicate collision, keeping richer record"
                    );
                    if let Some(url) = candidate.source_url.as_deref() {
                        by_url.insert(normalize_url(url), i);
                    }
                    kept[i] = candidate;
                }
            }
            None => {
                if let Some(url) = candidate.source_url.as_deref() {
                    by_url.insert(normalize_url(url), kept.len());
                }
                kept.push(candidate);
            }
        }
    }

    kept
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

    // --- normalize_url ---

    #[test]
    fn normalize_url_folds_scheme_and_host() {
        assert_eq!(
            normalize_url("HTTPS://Example.ORG/Grants"),
            "https://example.org/Grants"
        );
    }

    #[test]
    fn normalize_url_strips_trailing_slash() {
        assert_eq!(
            normalize_url("https://example.org/grants/"),
            "https://example.org/grants"
        );
    }

    // --- identity_match tiers ---

    #[test]
    fn identical_normalized_urls_match() {
        let a = candidate("A Grant", "https://Example.org/apply/");
        let b = candidate("Completely Different Title", "https://example.org/apply");
        assert_eq!(identity_match(&a, &b), Some(IdentityTier::Url));
    }

    #[test]
    fn title_and_deadline_match() {
        let mut a = candidate("Community Fund", "https://one.org/apply");
        let mut b = candidate("community fund", "https://two.org/apply");
        a.deadline = Some("2026-06-30".to_string());
        b.deadline = Some("2026-06-30".to_string());
        assert_eq!(identity_match(&a, &b), Some(IdentityTier::TitleDeadline));
    }

    #[test]
    fn title_match_without_deadline_does_not_use_tier_two() {
        let a = candidate("Community Fund", "https://one.org/apply");
        let b = candidate("community fund", "https://two.org/apply");
        assert_eq!(identity_match(&a, &b), None);
    }

    #[test]
    fn long_similar_titles_fuzzy_match() {
        let a = candidate(
            "Rural Broadband Infrastructure Expansion Grant",
            "https://one.org/apply",
        );
        let b = candidate(
            "Rural Broadband Infrastructure Expansion Grants",
            "https://two.org/apply",
        );
        assert_eq!(identity_match(&a, &b), Some(IdentityTier::FuzzyTitle));
    }

    #[test]
    fn short_titles_never_fuzzy_match() {
        let a = candidate("Broadband Grant", "https://one.org/apply");
        let b = candidate("Broadband Grants", "https://two.org/apply");
        assert_eq!(identity_match(&a, &b), None);
    }

    #[test]
    fn similarity_just_below_threshold_does_not_match() {
        // 40-char titles differing in the last 7 chars: ratio ≈ 0.825.
        let a = candidate("Community Development Block Grant AAAAAAA", "https://one.org/a");
        let b = candidate("Community Development Block Grant BBBBBBB", "https://two.org/b");
        let sim = title_similarity(
            a.title.as_deref().unwrap(),
            b.title.as_deref().unwrap(),
        );
        assert!(sim < FUZZY_SIMILARITY_THRESHOLD, "similarity was {sim}");
        assert_eq!(identity_match(&a, &b), None);
    }

    // --- dedup_candidates ---

    #[test]
    fn url_duplicates_collapse_keeping_richer() {
        let poor = candidate("Some Grant", "https://example.org/apply");
        let mut rich = candidate("Some Grant", "https://example.org/apply/");
        rich.deadline = Some("2026-01-01".to_string());
        rich.funder_name = Some("Example Foundation".to_string());

        let out = dedup_candidates(vec![poor, rich.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].funder_name, rich.funder_name);
    }

    #[test]
    fn richer_first_record_survives_collision() {
        let mut rich = candidate("Some Grant", "https://example.org/apply");
        rich.deadline = Some("2026-01-01".to_string());
        let poor = candidate("Some Grant", "https://example.org/apply");

        let out = dedup_candidates(vec![rich.clone(), poor]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].deadline, rich.deadline);
    }

    #[test]
    fn distinct_candidates_all_survive() {
        let out = dedup_candidates(vec![
            candidate("Grant One", "https://one.org/apply"),
            candidate("Grant Two", "https://two.org/apply"),
            candidate("Grant Three", "https://three.org/apply"),
        ]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn dedup_is_idempotent() {
        let mixed = vec![
            candidate("Rural Broadband Infrastructure Expansion Grant", "https://one.org/a"),
            candidate("Rural Broadband Infrastructure Expansion Grants", "https://two.org/b"),
            candidate("Grant Two", "https://two.org/apply"),
            candidate("Grant Two", "https://TWO.org/apply"),
        ];
        let once = dedup_candidates(mixed);
        let twice = dedup_candidates(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(dedup_candidates(Vec::new()).is_empty());
    }
}
