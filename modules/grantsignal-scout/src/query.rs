//! Prompt construction for chunk queries and refinement follow-ups.
//!
//! Pure functions: chunk in, prompt string out. The prompts instruct the
//! model to reason in fixed steps and to report labeled fields the parser
//! can extract. Anything without a direct application URL is told to stay
//! out of the reply — the parser enforces the same rule on the way back in.

use grantsignal_common::types::{GeographicFocus, RawGrantCandidate, SearchChunk, SearchIntent};

pub const SYSTEM_PROMPT: &str = "\
You are a grants research analyst. You locate currently-open funding \
opportunities and report them precisely, one per paragraph, using labeled \
fields. You never invent opportunities and you never report an opportunity \
without its direct application URL.";

const REASONING_STEPS: &str = "\
Work through this step by step:\n\
1. Search your knowledge for funding programs directly matching the keywords.\n\
2. Expand to synonyms and adjacent program names for the same keywords.\n\
3. Cross-reference each candidate against the geographic scope and any \
funding bounds; discard mismatches.\n\
4. Validate that each remaining candidate's award amount and deadline are \
plausible for that funder before including it.";

const OUTPUT_FORMAT: &str = "\
For each opportunity, output one paragraph with these labeled lines:\n\
Title: <program name>\n\
Funder: <funding organization>\n\
Amount: <award amount or range, USD>\n\
Deadline: <application deadline>\n\
URL: <direct application URL>\n\
Eligibility: <who may apply>\n\
Description: <one or two sentences>\n\n\
Hard requirement: omit any opportunity for which you cannot provide a \
direct application URL. Do not substitute a homepage or a search page.";

/// Geographic-scope instruction for a chunk's tier.
fn scope_instruction(tier: GeographicFocus) -> &'static str {
    match tier {
        GeographicFocus::Local => {
            "Restrict the search to city- and county-level programs: municipal \
             grant funds, community foundations, and local economic development offices."
        }
        GeographicFocus::State => {
            "Restrict the search to state-level programs: state agencies, \
             state-chartered foundations, and statewide initiatives."
        }
        GeographicFocus::Regional => {
            "Restrict the search to multi-state regional programs: regional \
             commissions, interstate compacts, and regional foundations."
        }
        GeographicFocus::Federal => {
            "Restrict the search to federal programs: national agencies, \
             federal grant portals, and nationwide foundation initiatives."
        }
    }
}

/// Canned sector reasoning strategy. Keys match the focus-area table; unknown
/// sectors get the generic strategy.
fn sector_strategy(sector: &str) -> &'static str {
    match sector {
        "technology" => {
            "Prioritize innovation, digital infrastructure, and R&D programs; \
             SBIR/STTR-style phased awards often hide under agency-specific names."
        }
        "healthcare" => {
            "Prioritize public health, care access, and workforce programs; \
             check both health agencies and hospital-system community funds."
        }
        "education" => {
            "Prioritize workforce development, literacy, and STEM programs; \
             education grants often route through intermediary foundations."
        }
        "environment" => {
            "Prioritize conservation, resilience, and clean-energy programs; \
             utility and land-trust co-funding is common and worth surfacing."
        }
        "agriculture" => {
            "Prioritize rural development, food-system, and conservation \
             programs; USDA sub-agencies each run separate competitions."
        }
        _ => {
            "Prioritize programs whose stated purpose matches the keywords \
             directly, then widen to adjacent program areas."
        }
    }
}

/// Render a chunk into its search prompt. Pure; no side effects.
pub fn build_search_prompt(chunk: &SearchChunk, intent: &SearchIntent) -> String {
    let mut prompt = format!(
        "Find currently-open funding opportunities for these keywords: {}.\n\n{}\n\nSector focus ({}): {}\n\n",
        chunk.keywords.join(", "),
        scope_instruction(chunk.geographic_focus),
        chunk.sector_focus,
        sector_strategy(&chunk.sector_focus),
    );

    match (intent.funding_min, intent.funding_max) {
        (Some(min), Some(max)) => {
            prompt.push_str(&format!(
                "Only include awards between ${min:.0} and ${max:.0}.\n\n"
            ));
        }
        (Some(min), None) => {
            prompt.push_str(&format!("Only include awards of at least ${min:.0}.\n\n"));
        }
        (None, Some(max)) => {
            prompt.push_str(&format!("Only include awards of at most ${max:.0}.\n\n"));
        }
        (None, None) => {}
    }

    prompt.push_str(REASONING_STEPS);
    prompt.push_str("\n\n");
    prompt.push_str(OUTPUT_FORMAT);
    prompt
}

/// Render the refinement follow-up for one candidate. The reply is merged
/// into the candidate as free-text context, not re-parsed into fields.
pub fn build_refinement_prompt(candidate: &RawGrantCandidate) -> String {
    format!(
        "Provide additional detail on this funding opportunity:\n\
         Title: {}\n\
         Funder: {}\n\
         URL: {}\n\n\
         Cover, in a short paragraph each: typical award size and match \
         requirements, eligibility nuances, application effort and timeline, \
         and reporting obligations. If you are not confident about a detail, \
         say so rather than guessing.",
        candidate.title.as_deref().unwrap_or("unknown"),
        candidate.funder_name.as_deref().unwrap_or("unknown"),
        candidate.source_url.as_deref().unwrap_or("unknown"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> SearchChunk {
        SearchChunk {
            chunk_id: "technology-local".to_string(),
            keywords: vec!["broadband".to_string(), "rural".to_string()],
            geographic_focus: GeographicFocus::Local,
            sector_focus: "technology".to_string(),
            priority: 1,
        }
    }

    #[test]
    fn prompt_embeds_keywords_and_scope() {
        let prompt = build_search_prompt(&chunk(), &SearchIntent::default());
        assert!(prompt.contains("broadband, rural"));
        assert!(prompt.contains("city- and county-level"));
        assert!(prompt.contains("step by step"));
    }

    #[test]
    fn prompt_embeds_sector_strategy() {
        let prompt = build_search_prompt(&chunk(), &SearchIntent::default());
        assert!(prompt.contains("digital infrastructure"));

        let mut other = chunk();
        other.sector_focus = "basket-weaving".to_string();
        let prompt = build_search_prompt(&other, &SearchIntent::default());
        assert!(prompt.contains("stated purpose matches the keywords"));
    }

    #[test]
    fn prompt_demands_application_url() {
        let prompt = build_search_prompt(&chunk(), &SearchIntent::default());
        assert!(prompt.contains("omit any opportunity"));
        assert!(prompt.contains("direct application URL"));
    }

    #[test]
    fn prompt_includes_funding_bounds_when_set() {
        let intent = SearchIntent::builder()
            .funding_min(Some(10_000.0))
            .funding_max(Some(250_000.0))
            .build();
        let prompt = build_search_prompt(&chunk(), &intent);
        assert!(prompt.contains("$10000"));
        assert!(prompt.contains("$250000"));
    }

    #[test]
    fn refinement_prompt_names_the_candidate() {
        let candidate = RawGrantCandidate {
            title: Some("Rural Connect Fund".to_string()),
            source_url: Some("https://example.org/apply".to_string()),
            ..Default::default()
        };
        let prompt = build_refinement_prompt(&candidate);
        assert!(prompt.contains("Rural Connect Fund"));
        assert!(prompt.contains("https://example.org/apply"));
    }
}
