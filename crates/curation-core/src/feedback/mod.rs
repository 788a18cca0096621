//! Decision Feedback Store. Embeds and upserts finalized decisions,
//! retrieves nearest historical decisions for RAG context, and computes
//! per-user preference profiles on demand.

mod error;
mod model;
mod repository;

pub use error::FeedbackError;
pub use model::{DecisionEvent, DecisionEventType, DecisionRecord, PreferenceProfile, RetrievedDecision};
pub use repository::DecisionRepository;

use std::collections::BTreeMap;

use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::lmm_gateway::{GenerateRequest, LmmGateway, ModelName};

/// Façade over the decision table and the embedding/retrieval logic built
/// on top of it, the same shape as [`crate::job_store::JobStore`].
#[derive(Clone)]
pub struct FeedbackStore {
    decisions: std::sync::Arc<DecisionRepository>,
}

impl FeedbackStore {
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            decisions: std::sync::Arc::new(DecisionRepository::new(pool)),
        }
    }

    #[must_use]
    pub fn decisions(&self) -> &DecisionRepository {
        &self.decisions
    }

    /// Embeds and upserts a finalized decision.
    #[instrument(skip(self, lmm, event), fields(session_id = %event.session_id, media_key = %event.media_key), err)]
    pub async fn record_decision<G: LmmGateway>(
        &self,
        lmm: &G,
        event: DecisionEvent,
    ) -> Result<(), FeedbackError> {
        let embedding = lmm.embed(&event.embedding_input()).await?;
        self.decisions.upsert(&event, embedding).await?;
        info!(
            session_id = %event.session_id,
            media_key = %event.media_key,
            "upserted decision event"
        );
        Ok(())
    }

    /// Top-k nearest historical decisions for `user_id` by cosine
    /// similarity to a query embedding derived from the new job's context.
    #[instrument(skip(self, lmm), err)]
    pub async fn retrieve_similar<G: LmmGateway>(
        &self,
        lmm: &G,
        user_id: &str,
        query_context: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedDecision>, FeedbackError> {
        let query_embedding = lmm.embed(query_context).await?;
        let all = self.decisions.list_for_user(user_id).await?;

        let mut scored: Vec<RetrievedDecision> = all
            .into_iter()
            .map(|record| {
                let similarity = cosine_similarity(&query_embedding, &record.embedding);
                RetrievedDecision { record, similarity }
            })
            .collect();

        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Formats retrieved decisions into a prompt preamble to prepend before
    /// the operation's own prompt.
    #[must_use]
    pub fn format_rag_preamble(retrieved: &[RetrievedDecision]) -> String {
        if retrieved.is_empty() {
            return String::new();
        }
        let mut preamble = String::from(
            "Prior decisions by this user, most similar first (for context, not binding):\n",
        );
        for item in retrieved {
            preamble.push_str(&format!(
                "- {}: {} (reason: {})\n",
                item.record.media_key,
                item.record.event.user_verdict,
                item.record.event.reason.as_deref().unwrap_or("none given"),
            ));
        }
        preamble
    }

    /// Batch aggregation over a user's decisions: counts, rates, recent
    /// overrides, media-type breakdown. Not on the hot path.
    #[instrument(skip(self, lmm), err)]
    pub async fn compute_profile<G: LmmGateway>(
        &self,
        lmm: &G,
        user_id: &str,
    ) -> Result<PreferenceProfile, FeedbackError> {
        let records = self.decisions.list_for_user(user_id).await?;
        if records.is_empty() {
            return Ok(PreferenceProfile {
                user_id: user_id.to_string(),
                ..PreferenceProfile::default()
            });
        }

        let total = records.len() as f64;
        let kept = records
            .iter()
            .filter(|r| r.event.user_verdict.eq_ignore_ascii_case("keep") || r.event.user_verdict.eq_ignore_ascii_case("saveable"))
            .count() as f64;
        let overridden = records.iter().filter(|r| r.event.is_override).count() as f64;

        let mut reason_histogram: BTreeMap<String, u32> = BTreeMap::new();
        let mut media_type_breakdown: BTreeMap<String, u32> = BTreeMap::new();
        for record in &records {
            if let Some(reason) = &record.event.reason {
                *reason_histogram.entry(reason.clone()).or_insert(0) += 1;
            }
            let media_type = record
                .event
                .metadata
                .get("mediaType")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            *media_type_breakdown.entry(media_type).or_insert(0) += 1;
        }

        let recent_overrides: Vec<DecisionEvent> = records
            .iter()
            .filter(|r| r.event.is_override)
            .take(10)
            .map(|r| r.event.clone())
            .collect();

        let summary = summarize_profile(lmm, &recent_overrides, kept / total, overridden / total).await;

        Ok(PreferenceProfile {
            user_id: user_id.to_string(),
            keep_rate: kept / total,
            override_rate: overridden / total,
            reason_histogram,
            recent_overrides,
            media_type_breakdown,
            summary,
        })
    }
}

/// Best-effort LMM-generated text summary of the profile; a failure here
/// leaves `summary = None` rather than failing profile computation, since
/// the numeric fields are already useful on their own.
async fn summarize_profile<G: LmmGateway>(
    lmm: &G,
    recent_overrides: &[DecisionEvent],
    keep_rate: f64,
    override_rate: f64,
) -> Option<String> {
    let reasons: Vec<&str> = recent_overrides
        .iter()
        .filter_map(|e| e.reason.as_deref())
        .collect();
    let prompt = format!(
        "Summarize this user's media curation preferences in two sentences. \
         Keep rate: {keep_rate:.2}. Override rate: {override_rate:.2}. \
         Recent override reasons: {}.",
        reasons.join("; ")
    );
    let request = GenerateRequest {
        system_instruction: "You summarize user preference data concisely, no markdown.".to_string(),
        reference_image: None,
        media: Vec::new(),
        prompt,
        cache_id: None,
    };
    lmm.generate(ModelName::FastMultimodal, request).await.ok()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
