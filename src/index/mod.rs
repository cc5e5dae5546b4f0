//! In-memory vector index
//!
//! An HNSW graph over (entry id, embedding) pairs with pluggable distance
//! metrics and optional vector quantization. The storage engine keeps this
//! index in lockstep with entry writes; it is never persisted itself and
//! is rebuilt from the embedding blobs on startup.

mod hnsw;
mod metric;
mod quantizer;

pub use hnsw::{HnswConfig, HnswIndex, IndexStats, Neighbor};
pub use metric::Metric;
pub use quantizer::{Quantization, Quantizer, StoredVector};
