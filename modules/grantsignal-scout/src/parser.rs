//! Labeled-field extraction from model free text.
//!
//! Replies are split into paragraph blocks; each block yields at most one
//! candidate via case-insensitive `Label: value` matching. A block without
//! both a title and an absolute URL is dropped silently — the missing-URL
//! case is the expected filter, not an anomaly.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use grantsignal_common::types::{RawGrantCandidate, SearchChunk};

fn field_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:[-*•]\s*)?(?:\*\*)?([a-z][a-z ._/]*?)(?:\*\*)?\s*:\s*(.+?)\s*$")
            .expect("field line regex must compile")
    })
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s<>()\[\]]+").expect("url regex must compile"))
}

/// Split a reply into paragraph-like blocks (runs of non-empty lines).
fn split_blocks(reply: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in reply.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Strip `$`, commas, and trailing range/qualifier text; parse the first
/// number found. "Up to $50,000" → 50000.0.
fn parse_amount(raw: &str) -> Option<f64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let number_re = RE.get_or_init(|| {
        Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("amount regex must compile")
    });
    let m = number_re.find(raw)?;
    m.as_str().replace(',', "").parse().ok()
}

/// Pull the first absolute URL out of a field value, rejecting anything with
/// embedded whitespace. Markdown link syntax and angle brackets are stripped
/// by the match itself.
fn extract_url(raw: &str) -> Option<String> {
    let url = url_re().find(raw)?.as_str();
    // Trailing punctuation from prose ("...apply at https://x.org/grants.")
    let url = url.trim_end_matches(['.', ',', ';']);
    Some(url.to_string())
}

/// Extract zero or more candidates from one model reply, stamping chunk
/// provenance on each.
pub fn parse_response(reply: &str, chunk: &SearchChunk) -> Vec<RawGrantCandidate> {
    let mut candidates = Vec::new();

    for block in split_blocks(reply) {
        let mut candidate = RawGrantCandidate::default();

        for line in &block {
            let Some(caps) = field_line_re().captures(line) else {
                continue;
            };
            let label = caps[1].trim().to_lowercase();
            let value = caps[2].trim().to_string();
            if value.is_empty() {
                continue;
            }

            match label.as_str() {
                "title" | "grant title" | "name" | "program" | "program name" => {
                    candidate.title.get_or_insert(value);
                }
                "amount" | "funding amount" | "funding" | "award" | "award amount" => {
                    if candidate.funding_amount.is_none() {
                        candidate.funding_amount = parse_amount(&value);
                        candidate.funding_amount_display = Some(value);
                    }
                }
                "deadline" | "due date" | "application deadline" | "closes" => {
                    candidate.deadline.get_or_insert(value);
                }
                "url" | "link" | "application url" | "source" | "website" | "apply" => {
                    if candidate.source_url.is_none() {
                        candidate.source_url = extract_url(&value);
                    }
                }
                "funder" | "funder name" | "agency" | "organization" | "sponsor" => {
                    candidate.funder_name.get_or_insert(value);
                }
                "description" | "summary" | "details" => {
                    candidate.description.get_or_insert(value);
                }
                "eligibility" | "eligible" | "who may apply" => {
                    candidate.eligibility.get_or_insert(value);
                }
                _ => {}
            }
        }

        // Title + URL or the block never happened.
        if candidate.title.is_none() || candidate.source_url.is_none() {
            debug!(
                has_title = candidate.title.is_some(),
                has_url = candidate.source_url.is_some(),
                "Dropping block without title and URL"
            );
            continue;
        }

        candidate.search_chunk_id = Some(chunk.chunk_id.clone());
        candidate.geographic_focus = Some(chunk.geographic_focus);
        candidate.sector_focus = Some(chunk.sector_focus.clone());
        candidates.push(candidate);
    }

    candidates
}
