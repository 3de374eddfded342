//! Historical router: decides once per query whether past conversations
//! already answer it, help with it, or are irrelevant.

use crate::prompts;
use cortex_config::RouterConfig;
use cortex_core::memory::ScoredRecord;
use cortex_core::outcome::FINAL_MARKER;
use cortex_core::provider::{Provider, TextRequest};
use cortex_core::routing::RoutingDecision;
use cortex_memory::SemanticMemory;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const HAS_CONTEXT: &str = "HAS_CONTEXT:";

/// Phrases in a HAS_CONTEXT summary that mean the judge actually found
/// nothing useful.
const NEGATIVE_INDICATORS: &[&str] = &[
    "do not provide",
    "does not provide",
    "does not contain",
    "not provide",
    "not contain",
    "no information",
    "no relevant",
    "completely unrelated",
    "unrelated",
    "not relevant",
];

pub struct HistoricalRouter {
    memory: Arc<SemanticMemory>,
    provider: Arc<dyn Provider>,
    config: RouterConfig,
    judge_timeout: Duration,
}

/// Render records as `Previous Q:` / `Previous A:` pairs.
pub fn format_history(records: &[ScoredRecord]) -> String {
    records
        .iter()
        .map(|r| format!("Previous Q: {}\nPrevious A: {}", r.record.query, r.record.final_answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Map the judge's reply to a decision.
///
/// A complete answer is only trusted when the best match is at least
/// `threshold` similar; below that it is used as context instead.
pub fn classify_judgment(reply: &str, best_similarity: f32, threshold: f32, history: &str) -> RoutingDecision {
    let reply = reply.trim().trim_start_matches('*').trim_start();

    if let Some(answer) = reply.strip_prefix(FINAL_MARKER) {
        let answer = answer.trim();
        if answer.is_empty() {
            return RoutingDecision::FreshApproach;
        }
        if best_similarity >= threshold {
            return RoutingDecision::DirectAnswer { answer: answer.to_string() };
        }
        return RoutingDecision::ContextAware { context_text: history.to_string() };
    }

    if let Some(summary) = reply.strip_prefix(HAS_CONTEXT) {
        let summary = summary.to_lowercase();
        if NEGATIVE_INDICATORS.iter().any(|n| summary.contains(n)) {
            return RoutingDecision::FreshApproach;
        }
        return RoutingDecision::ContextAware { context_text: history.to_string() };
    }

    RoutingDecision::FreshApproach
}

impl HistoricalRouter {
    pub fn new(memory: Arc<SemanticMemory>, provider: Arc<dyn Provider>, config: RouterConfig) -> Self {
        Self {
            memory,
            provider,
            config,
            judge_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.judge_timeout = timeout;
        self
    }

    pub async fn route(&self, query: &str) -> RoutingDecision {
        self.route_with_stats(query).await.0
    }

    /// Route `query`, also returning how many history records were usable.
    pub async fn route_with_stats(&self, query: &str) -> (RoutingDecision, usize) {
        if !self.config.enabled {
            return (RoutingDecision::FreshApproach, 0);
        }

        let candidates: Vec<ScoredRecord> = self
            .memory
            .query_similar(query, self.config.top_k)
            .await
            .into_iter()
            .filter(|r| !r.record.partial)
            .filter(|r| r.similarity >= self.config.min_similarity)
            .filter(|r| !r.record.final_answer.trim().is_empty())
            .collect();

        if candidates.is_empty() {
            debug!("No usable history, taking a fresh approach");
            return (RoutingDecision::FreshApproach, 0);
        }

        let best = candidates.iter().map(|r| r.similarity).fold(f32::MIN, f32::max);
        let history = format_history(&candidates);
        let request = TextRequest::new(prompts::stage::ROUTER, prompts::judge(query, &history)).with_temperature(0.0);

        let reply = match tokio::time::timeout(self.judge_timeout, self.provider.generate(request)).await {
            Ok(Ok(response)) => response.text,
            Ok(Err(e)) => {
                warn!(error = %e, "Routing judgment failed, taking a fresh approach");
                return (RoutingDecision::FreshApproach, candidates.len());
            }
            Err(_) => {
                warn!(timeout_secs = self.judge_timeout.as_secs(), "Routing judgment timed out");
                return (RoutingDecision::FreshApproach, candidates.len());
            }
        };

        let decision = classify_judgment(&reply, best, self.config.acceptance_threshold, &history);
        info!(route = %decision.kind(), candidates = candidates.len(), best_similarity = best, "Route selected");
        (decision, candidates.len())
    }
}
