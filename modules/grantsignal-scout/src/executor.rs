//! Rate-limited, batched dispatch of chunk queries.
//!
//! Chunks go out in batches of bounded concurrency with a fixed delay
//! between batches. Within a batch each chunk staggers its dispatch by
//! priority, then queries the model through the shared rate limiter and
//! retry policy. A failing chunk yields an empty result and never poisons
//! its siblings; day-quota exhaustion is terminal for the run and surfaced
//! as a distinct status.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use ai_client::{ChatModel, Message};
use grantsignal_common::rules::ExecutorConfig;
use grantsignal_common::types::{
    ChunkedSearchResult, RawGrantCandidate, SearchChunk, SearchIntent, SearchMetadata,
};
use grantsignal_common::GrantSignalError;

use crate::dedup::normalize_url;
use crate::limiter::{AttemptOutcome, Permit, RateLimiter, RetryPolicy};
use crate::parser::parse_response;
use crate::query::{build_refinement_prompt, build_search_prompt, SYSTEM_PROMPT};

/// How a run ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// The daily request budget ran out mid-run; undispatched chunks were
    /// dropped. The caller decides whether to reschedule.
    QuotaExhausted,
}

pub struct RateLimitedExecutor {
    model: Arc<dyn ChatModel>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    config: ExecutorConfig,
}

impl RateLimitedExecutor {
    pub fn new(model: Arc<dyn ChatModel>, config: ExecutorConfig) -> Self {
        let limiter = RateLimiter::new(
            config.requests_per_minute,
            config.requests_per_day,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_ceiling_ms),
        );
        let retry = RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_ceiling_ms),
        );
        Self {
            model,
            limiter,
            retry,
            config,
        }
    }

    /// Dispatch all chunks. Returns one result per dispatched chunk —
    /// completion order within a batch is unordered, so callers must merge
    /// by identity, never by sequence. Chunks never dispatched because the
    /// day quota ran out get no result.
    pub async fn execute(
        &self,
        chunks: &[SearchChunk],
        intent: &SearchIntent,
    ) -> (Vec<ChunkedSearchResult>, RunStatus) {
        let seen_urls: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let mut results = Vec::with_capacity(chunks.len());

        let batches: Vec<&[SearchChunk]> = chunks.chunks(self.config.batch_size).collect();
        let batch_count = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            if self.limiter.is_exhausted() {
                warn!(
                    dispatched = results.len(),
                    remaining = chunks.len() - results.len(),
                    "Day quota exhausted, abandoning remaining chunks"
                );
                return (results, RunStatus::QuotaExhausted);
            }

            info!(batch = i + 1, of = batch_count, chunks = batch.len(), "Dispatching batch");

            let batch_results: Vec<ChunkedSearchResult> =
                stream::iter(batch.iter().map(|chunk| self.run_chunk(chunk, intent, &seen_urls)))
                    .buffer_unordered(self.config.batch_size)
                    .collect()
                    .await;
            results.extend(batch_results);

            if i + 1 < batch_count {
                tokio::time::sleep(Duration::from_millis(self.config.inter_batch_delay_ms)).await;
            }
        }

        let status = if self.limiter.is_exhausted() {
            RunStatus::QuotaExhausted
        } else {
            RunStatus::Completed
        };
        (results, status)
    }

    /// Run one chunk end to end: stagger, query, parse, optionally refine.
    /// Every failure is absorbed into an empty result.
    async fn run_chunk(
        &self,
        chunk: &SearchChunk,
        intent: &SearchIntent,
        seen_urls: &Mutex<HashSet<String>>,
    ) -> ChunkedSearchResult {
        // Higher-priority (lower-numbered) chunks wait least.
        let stagger = Duration::from_millis(
            self.config.base_stagger_ms * u64::from(chunk.priority),
        );
        tokio::time::sleep(stagger).await;

        let started = Instant::now();
        let prompt = build_search_prompt(chunk, intent);
        let mut metadata = SearchMetadata {
            query: prompt.clone(),
            model: self.model.model_name().to_string(),
            ..Default::default()
        };

        let reply = match self.query(&prompt, &mut metadata.attempts).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(chunk_id = chunk.chunk_id.as_str(), error = %e, "Chunk query failed");
                metadata.failed = true;
                metadata.duration_ms = started.elapsed().as_millis() as u64;
                return ChunkedSearchResult::empty(chunk.clone(), metadata);
            }
        };

        let mut candidates = parse_response(&reply, chunk);

        // Count candidates whose URL the run has not seen yet, then mark
        // them seen. The refinement pass only triggers on genuinely new
        // material.
        let new_count = {
            let mut seen = seen_urls.lock().expect("seen-url mutex poisoned");
            candidates
                .iter()
                .filter_map(|c| c.source_url.as_deref())
                .map(normalize_url)
                .filter(|u| seen.insert(u.clone()))
                .count()
        };

        if new_count >= self.config.refinement_threshold {
            self.refine(chunk, &mut candidates, &mut metadata).await;
        }

        metadata.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            chunk_id = chunk.chunk_id.as_str(),
            candidates = candidates.len(),
            new = new_count,
            refined = metadata.refined,
            "Chunk complete"
        );

        ChunkedSearchResult {
            grants: candidates,
            search_metadata: metadata,
            chunk_info: chunk.clone(),
        }
    }

    /// Bounded refinement pass: re-query the top few candidates individually
    /// and merge the detailed reply into the candidate as free-text context.
    /// Structured fields are not re-parsed.
    async fn refine(
        &self,
        chunk: &SearchChunk,
        candidates: &mut [RawGrantCandidate],
        metadata: &mut SearchMetadata,
    ) {
        for candidate in candidates.iter_mut().take(self.config.refinement_cap) {
            let prompt = build_refinement_prompt(candidate);
            let mut attempts = 0;
            match self.query(&prompt, &mut attempts).await {
                Ok(detail) if !detail.trim().is_empty() => {
                    let detail = detail.trim();
                    candidate.description = Some(match candidate.description.take() {
                        Some(existing) => format!("{existing}\n\nAdditional context: {detail}"),
                        None => format!("Additional context: {detail}"),
                    });
                    metadata.refined = true;
                }
                Ok(_) => {}
                Err(GrantSignalError::QuotaExceeded) => {
                    debug!(chunk_id = chunk.chunk_id.as_str(), "Quota exhausted during refinement");
                    return;
                }
                Err(e) => {
                    warn!(
                        chunk_id = chunk.chunk_id.as_str(),
                        title = candidate.title.as_deref().unwrap_or(""),
                        error = %e,
                        "Refinement query failed"
                    );
                }
            }
        }
    }

    /// One rate-limited, retried model call. Minute-window saturation waits
    /// (never errors); transient provider errors retry with backoff up to the
    /// attempt cap; quota exhaustion propagates as its own error.
    async fn query(&self, prompt: &str, attempts: &mut u32) -> Result<String, GrantSignalError> {
        let messages = [Message::system(SYSTEM_PROMPT), Message::user(prompt)];

        loop {
            loop {
                match self.limiter.try_acquire() {
                    Permit::Granted => break,
                    Permit::Backoff(wait) => tokio::time::sleep(wait).await,
                    Permit::Exhausted => return Err(GrantSignalError::QuotaExceeded),
                }
            }

            *attempts += 1;
            match self
                .model
                .chat(&messages, self.config.temperature, self.config.max_tokens)
                .await
            {
                Ok(reply) => {
                    self.limiter.record(AttemptOutcome::Success);
                    return Ok(reply);
                }
                Err(e) => {
                    let outcome = classify_error(&e);
                    if let Some(outcome) = outcome {
                        self.limiter.record(outcome);
                        if outcome == AttemptOutcome::QuotaExceeded {
                            return Err(GrantSignalError::QuotaExceeded);
                        }
                    }
                    if *attempts >= self.retry.max_attempts {
                        return Err(GrantSignalError::Provider(e.to_string()));
                    }
                    let delay = self.retry.delay_for(*attempts - 1);
                    debug!(error = %e, delay_ms = delay.as_millis() as u64, "Transient provider error, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Map a provider error message onto the limiter's vocabulary. Plain
/// transient failures (timeouts, 5xx) get `None` — retried, but they do not
/// touch the backoff state.
fn classify_error(error: &anyhow::Error) -> Option<AttemptOutcome> {
    let message = error.to_string().to_lowercase();
    if message.contains("daily quota") || message.contains("quota exceeded") {
        Some(AttemptOutcome::QuotaExceeded)
    } else if message.contains("429")
        || message.contains("rate limit")
        || message.contains("too many requests")
    {
        Some(AttemptOutcome::Throttled)
    } else {
        None
    }
}
