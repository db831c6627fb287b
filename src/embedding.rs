//! Embedding collaborator trait.
//!
//! The store never computes embeddings; it only stores and compares
//! them. Concrete backends (remote APIs, local models) live in the host
//! application and are passed in behind [`Embedder`].

use async_trait::async_trait;

use crate::error::Result;

/// A computed embedding: the vector plus the token count the backend
/// reported for the input text.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vec: Vec<f32>,
    pub tokens: usize,
}

/// Trait for embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality produced by this backend.
    fn dims(&self) -> usize;
    /// Embed one text into a fixed-length float vector.
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Deterministic stand-in backend: hashes characters into a small
    /// fixed-dimension vector. Good enough to exercise storage and
    /// similarity plumbing.
    pub struct StubEmbedder {
        pub dims: usize,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn model_name(&self) -> &str {
            "stub"
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            let mut vec = vec![0.0f32; self.dims];
            for (i, b) in text.bytes().enumerate() {
                vec[i % self.dims] += f32::from(b) / 255.0;
            }
            Ok(Embedding {
                vec,
                tokens: text.split_whitespace().count(),
            })
        }
    }

    #[tokio::test]
    async fn test_stub_embedder_is_deterministic() {
        let embedder = StubEmbedder { dims: 4 };
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.vec.len(), 4);
        assert_eq!(a.tokens, 2);
    }
}
