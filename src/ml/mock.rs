//! Deterministic in-process stand-ins for the ML workers
//!
//! Always compiled (not test-gated) so integration tests and local
//! development without worker processes exercise the full pipeline. Both
//! mocks are pure functions of their input: the embedder hashes each token
//! into a fixed direction and sums them, so texts sharing tokens land close
//! together and disjoint texts land nearly orthogonal; the strength model is
//! a bounded monotonic combination of the classifier-facing features.

use crate::errors::ShortlistError;
use crate::ml::{l2_normalize, StrengthModel, TextEmbedder, EMBEDDING_DIM};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Token-additive deterministic embedder
pub struct MockEmbedder;

impl MockEmbedder {
    fn token_vector(token: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(EMBEDDING_DIM);
        let mut counter: u32 = 0;
        while vector.len() < EMBEDDING_DIM {
            let mut hasher = Sha256::new();
            hasher.update(token.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest {
                if vector.len() == EMBEDDING_DIM {
                    break;
                }
                vector.push((byte as f32 - 127.5) / 127.5);
            }
            counter += 1;
        }
        vector
    }
}

#[async_trait]
impl TextEmbedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ShortlistError> {
        let mut sum = vec![0.0f32; EMBEDDING_DIM];
        let mut token_count = 0usize;

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let tv = Self::token_vector(token);
            for (acc, v) in sum.iter_mut().zip(tv.iter()) {
                *acc += v;
            }
            token_count += 1;
        }

        if token_count == 0 {
            // Empty text still yields a valid unit vector
            sum = Self::token_vector("");
        }

        l2_normalize(&mut sum);
        Ok(sum)
    }
}

/// Monotonic bounded strength score over the 13-feature slice
pub struct MockStrengthModel;

#[async_trait]
impl StrengthModel for MockStrengthModel {
    async fn candidate_strength(&self, features: &[f64]) -> Result<f64, ShortlistError> {
        if features.len() != crate::features::CLASSIFIER_FEATURE_COUNT {
            return Err(ShortlistError::ClassifierInvariantFailed(format!(
                "expected {} features, got {}",
                crate::features::CLASSIFIER_FEATURE_COUNT,
                features.len()
            )));
        }

        let skill_count = features[0];
        let advanced = features[1];
        let diversity = features[4];
        let months = features[5];
        let relevant = features[8];
        let education = features[10];
        let cgpa = features[12];

        let strength = 0.25 * (skill_count / 10.0).min(1.0)
            + 0.15 * (advanced / 5.0).min(1.0)
            + 0.05 * diversity.clamp(0.0, 1.0)
            + 0.25 * (months / 24.0).min(1.0)
            + 0.05 * relevant.clamp(0.0, 1.0)
            + 0.15 * (education / 3.0).clamp(0.0, 1.0)
            + 0.10 * cgpa.clamp(0.0, 1.0);

        Ok(strength.clamp(0.0, 1.0))
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;
    use crate::features::CLASSIFIER_FEATURE_COUNT;

    #[tokio::test]
    async fn test_embedding_is_deterministic_and_normalized() {
        let embedder = MockEmbedder;
        let a = embedder.embed("python machine learning").await.unwrap();
        let b = embedder.embed("python machine learning").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_distinct_texts_produce_distinct_embeddings() {
        let embedder = MockEmbedder;
        let a = embedder.embed("python tensorflow").await.unwrap();
        let b = embedder.embed("java spring kubernetes").await.unwrap();
        assert_ne!(a, b);
        // Disjoint token sets land nearly orthogonal
        assert!(cosine_similarity(&a, &b).abs() < 0.3);
    }

    #[tokio::test]
    async fn test_shared_tokens_raise_similarity() {
        let embedder = MockEmbedder;
        let job = embedder
            .embed("python machine learning tensorflow")
            .await
            .unwrap();
        let close = embedder.embed("python machine learning").await.unwrap();
        let far = embedder.embed("photoshop illustrator").await.unwrap();
        assert!(cosine_similarity(&job, &close) > cosine_similarity(&job, &far));
    }

    #[tokio::test]
    async fn test_strength_is_monotonic_in_skills() {
        let model = MockStrengthModel;
        let mut weak = vec![0.0; CLASSIFIER_FEATURE_COUNT];
        weak[0] = 2.0;
        let mut strong = weak.clone();
        strong[0] = 8.0;
        strong[1] = 4.0;

        let weak_score = model.candidate_strength(&weak).await.unwrap();
        let strong_score = model.candidate_strength(&strong).await.unwrap();
        assert!(strong_score > weak_score);
        assert!((0.0..=1.0).contains(&weak_score));
        assert!((0.0..=1.0).contains(&strong_score));
    }
}
