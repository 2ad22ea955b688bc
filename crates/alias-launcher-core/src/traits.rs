//! Trait seams between crates.

/// Text-to-vector encoder consumed by the matching engine.
//
// The matching engine only needs "give me one L2-normalized vector per
// input"; keeping the seam here lets the engine be tested against a
// deterministic mock while the real implementation lives in the embeddings
// crate.
pub trait AliasEncoder {
    /// Encoder failures, surfaced untouched to the caller.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Encode a batch of texts into one L2-normalized vector each.
    ///
    /// Rows are returned in input order and must all share one dimension.
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, Self::Error>;
}

impl<T: AliasEncoder + ?Sized> AliasEncoder for &T {
    type Error = T::Error;

    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, Self::Error> {
        (**self).encode(texts)
    }
}
