//! Bridges to the out-of-process ML workers
//!
//! The trained classifier and the sentence-embedding model live in separate
//! worker processes speaking line-delimited JSON over stdin/stdout. All
//! engine code goes through the two traits here, so tests and degraded
//! deployments can swap in the deterministic mocks.

pub mod classifier;
pub mod embedder;
pub mod mock;
pub mod parser;

use crate::errors::ShortlistError;
use async_trait::async_trait;

/// Dimensionality of the sentence-embedding model's output
pub const EMBEDDING_DIM: usize = 384;

/// The candidate-strength classifier seam
#[async_trait]
pub trait StrengthModel: Send + Sync {
    /// Score one 13-element feature slice; returns strength in [0,1]
    async fn candidate_strength(&self, features: &[f64]) -> Result<f64, ShortlistError>;

    /// Whether the backing artifact is configured and present
    fn is_available(&self) -> bool;
}

/// The text-embedding seam: any string to a deterministic 384-float
/// mean-pooled vector with L2 norm 1
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ShortlistError>;
}

/// Renormalize a worker-produced vector to unit length; zero vectors are
/// left alone for the caller's NaN handling.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0f32; 4];
        l2_normalize(&mut zero);
        assert!(zero.iter().all(|v| *v == 0.0));
    }
}
