//! The embedding model is an external collaborator: the engine depends on
//! the `Embedder` trait, never on a concrete model loader. Production
//! wiring (ONNX inference, model download/cache) is out of scope here; the
//! `FakeEmbedder` below gives tests and the default CLI build a
//! deterministic, reproducible stand-in.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimension(&self) -> usize;
}

/// Deterministic, content-addressed embedder: hashes the input text into
/// `dim` buckets via SHA-256 and spreads the digest across them. Same text
/// always produces the same vector; no model weights, no I/O, so it never
/// returns `DegradedModel` on its own.
pub struct FakeEmbedder {
    dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        FakeEmbedder { dim }
    }
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        FakeEmbedder::new(384)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(EngineError::InvalidInput("cannot embed empty text".into()));
        }
        let mut out = vec![0f32; self.dim];
        let mut counter: u32 = 0;
        let mut filled = 0usize;
        while filled < self.dim {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest.iter() {
                if filled >= self.dim {
                    break;
                }
                // Map byte -> [-1, 1] so the vector isn't all-positive,
                // which would otherwise make every pair look similar.
                out[filled] = (*byte as f32 / 127.5) - 1.0;
                filled += 1;
            }
            counter += 1;
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_produces_same_vector() {
        let embedder = FakeEmbedder::new(16);
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_text_produces_different_vectors() {
        let embedder = FakeEmbedder::new(16);
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("goodbye world").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let embedder = FakeEmbedder::new(16);
        assert!(embedder.embed("").await.is_err());
    }
}
