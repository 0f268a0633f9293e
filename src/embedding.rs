//! Embedding service: per-job cache with transition-based eviction
//!
//! The cache here is the only intentional cross-request mutable state in the
//! process. Its invariant: whenever the incoming job id differs from the
//! last processed one, the entire per-job cache is evicted before anything
//! else happens. A bounded ring of recent embeddings backs the
//! duplicate-embedding guard: a fresh embedding that is near-identical to a
//! recent one for a different job is an isolation failure, not a result.

use crate::errors::ShortlistError;
use crate::ml::TextEmbedder;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Cosine similarity above this between different jobs' embeddings is
/// treated as state leakage
const DUPLICATE_SIMILARITY_THRESHOLD: f64 = 0.999;

/// How many recent per-job embeddings the collision guard remembers
const RECENT_RING_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingSource {
    Fresh,
    Cached,
}

impl EmbeddingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingSource::Fresh => "fresh",
            EmbeddingSource::Cached => "cached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fresh" => Some(EmbeddingSource::Fresh),
            "cached" => Some(EmbeddingSource::Cached),
            _ => None,
        }
    }
}

struct RecentEmbedding {
    job_id: String,
    embedding: Vec<f32>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

struct CacheState {
    last_processed_job_id: Option<String>,
    job_embeddings: HashMap<String, Vec<f32>>,
    recent: VecDeque<RecentEmbedding>,
}

/// Process-wide embedding service
///
/// The transition check, possible eviction, and read-or-fill run as one
/// critical section: the state lock is held across the worker call, which
/// serializes embedding work and keeps the cache coherent under concurrent
/// requests.
pub struct EmbeddingService {
    embedder: Box<dyn TextEmbedder>,
    cache_disabled: bool,
    state: Mutex<CacheState>,
}

impl EmbeddingService {
    pub fn new(embedder: Box<dyn TextEmbedder>, cache_disabled: bool) -> Self {
        Self {
            embedder,
            cache_disabled,
            state: Mutex::new(CacheState {
                last_processed_job_id: None,
                job_embeddings: HashMap::new(),
                recent: VecDeque::new(),
            }),
        }
    }

    /// Produce the embedding for one job's canonical JD text
    pub async fn embed_job(
        &self,
        job_id: &str,
        jd_text: &str,
    ) -> Result<(Vec<f32>, EmbeddingSource), ShortlistError> {
        let mut state = self.state.lock().await;

        // Transition check: a different job id evicts the whole per-job
        // cache before anything is read from it.
        let transition = match state.last_processed_job_id.as_deref() {
            Some(last) if last != job_id => Some(last.to_string()),
            _ => None,
        };
        if let Some(last) = transition {
            let evicted = state.job_embeddings.len();
            state.job_embeddings.clear();
            log::info!(
                "[JobEmbedding] Job transition {} -> {}: evicted {} cached embeddings",
                last,
                job_id,
                evicted
            );
        }
        state.last_processed_job_id = Some(job_id.to_string());

        if !self.cache_disabled {
            if let Some(cached) = state.job_embeddings.get(job_id) {
                log::debug!("[JobEmbedding] Cache hit for job {}", job_id);
                return Ok((cached.clone(), EmbeddingSource::Cached));
            }
        }

        let embedding = self.embedder.embed(jd_text).await?;

        // Collision guard over the recent ring: an embedding this close to a
        // different job's is a leakage symptom and must not be returned.
        for recent in state.recent.iter() {
            if recent.job_id == job_id {
                continue;
            }
            let similarity = cosine_similarity(&embedding, &recent.embedding);
            if similarity > DUPLICATE_SIMILARITY_THRESHOLD {
                log::error!(
                    "[JobEmbedding] Embedding for job {} is {:.6}-similar to recent job {} (computed at {})",
                    job_id,
                    similarity,
                    recent.job_id,
                    recent.timestamp.to_rfc3339()
                );
                return Err(ShortlistError::DuplicateEmbeddingDetected {
                    current_job_id: job_id.to_string(),
                    colliding_job_id: recent.job_id.clone(),
                });
            }
        }

        state
            .job_embeddings
            .insert(job_id.to_string(), embedding.clone());

        // Ring keeps one entry per distinct job id, newest last
        state.recent.retain(|r| r.job_id != job_id);
        state.recent.push_back(RecentEmbedding {
            job_id: job_id.to_string(),
            embedding: embedding.clone(),
            timestamp: chrono::Utc::now(),
        });
        while state.recent.len() > RECENT_RING_CAPACITY {
            state.recent.pop_front();
        }

        log::debug!("[JobEmbedding] Computed fresh embedding for job {}", job_id);
        Ok((embedding, EmbeddingSource::Fresh))
    }

    /// Embed a candidate's space-joined skill names; never cached across
    /// users or requests
    pub async fn embed_skill_text(&self, skill_text: &str) -> Result<Vec<f32>, ShortlistError> {
        self.embedder.embed(skill_text).await
    }

    /// (last processed job id, cached embedding count) — observability and
    /// isolation tests
    pub async fn cache_stats(&self) -> (Option<String>, usize) {
        let state = self.state.lock().await;
        (
            state.last_processed_job_id.clone(),
            state.job_embeddings.len(),
        )
    }
}

/// Cosine similarity over f32 vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Job-match score: cosine similarity clamped to [0,1]; non-finite values
/// collapse to 0 with a warning. No heuristic boosts.
pub fn job_match_score(user_embedding: &[f32], job_embedding: &[f32]) -> f64 {
    let similarity = cosine_similarity(user_embedding, job_embedding);
    if !similarity.is_finite() {
        log::warn!("[JobEmbedding] Non-finite similarity collapsed to 0");
        return 0.0;
    }
    similarity.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::mock::MockEmbedder;

    fn service() -> EmbeddingService {
        EmbeddingService::new(Box::new(MockEmbedder), false)
    }

    #[tokio::test]
    async fn test_same_job_caches() {
        let svc = service();
        let (first, source_a) = svc.embed_job("j1", "python developer").await.unwrap();
        let (second, source_b) = svc.embed_job("j1", "python developer").await.unwrap();
        assert_eq!(source_a, EmbeddingSource::Fresh);
        assert_eq!(source_b, EmbeddingSource::Cached);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_job_transition_evicts_cache() {
        let svc = service();
        svc.embed_job("j1", "python developer").await.unwrap();
        let (_, source) = svc.embed_job("j2", "java developer").await.unwrap();
        assert_eq!(source, EmbeddingSource::Fresh);

        let (last, cached) = svc.cache_stats().await;
        assert_eq!(last.as_deref(), Some("j2"));
        // j1's entry was evicted on the transition
        assert_eq!(cached, 1);

        // Returning to j1 is a fresh computation again
        let (_, source) = svc.embed_job("j1", "python developer").await.unwrap();
        assert_eq!(source, EmbeddingSource::Fresh);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_fresh() {
        let svc = EmbeddingService::new(Box::new(MockEmbedder), true);
        let (_, a) = svc.embed_job("j1", "python developer").await.unwrap();
        let (_, b) = svc.embed_job("j1", "python developer").await.unwrap();
        assert_eq!(a, EmbeddingSource::Fresh);
        assert_eq!(b, EmbeddingSource::Fresh);
    }

    #[tokio::test]
    async fn test_identical_text_across_jobs_is_duplicate() {
        let svc = service();
        svc.embed_job("j1", "exactly the same text").await.unwrap();
        let err = svc
            .embed_job("j2", "exactly the same text")
            .await
            .unwrap_err();
        match err {
            ShortlistError::DuplicateEmbeddingDetected {
                current_job_id,
                colliding_job_id,
            } => {
                assert_eq!(current_job_id, "j2");
                assert_eq!(colliding_job_id, "j1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_distinct_texts_do_not_collide() {
        let svc = service();
        svc.embed_job("j1", "senior python backend engineer with django")
            .await
            .unwrap();
        svc.embed_job("j2", "react frontend developer css html")
            .await
            .unwrap();
        svc.embed_job("j3", "data scientist tensorflow pytorch statistics")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recent_ring_is_bounded() {
        let svc = service();
        for i in 0..15 {
            svc.embed_job(&format!("j{}", i), &format!("job description number {}", i))
                .await
                .unwrap();
        }
        let state = svc.state.lock().await;
        assert!(state.recent.len() <= RECENT_RING_CAPACITY);
    }

    #[tokio::test]
    async fn test_skill_text_not_cached() {
        let svc = service();
        let a = svc.embed_skill_text("python sql").await.unwrap();
        let b = svc.embed_skill_text("python sql").await.unwrap();
        // Deterministic embedder means equal values, but nothing was stored
        assert_eq!(a, b);
        let (_, cached) = svc.cache_stats().await;
        assert_eq!(cached, 0);
    }

    #[test]
    fn test_cosine_similarity_basics() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_job_match_score_clamps() {
        let a = vec![1.0f32, 0.0];
        let negated = vec![-1.0f32, 0.0];
        assert_eq!(job_match_score(&a, &negated), 0.0);
        assert!((job_match_score(&a, &a) - 1.0).abs() < 1e-9);
    }
}
