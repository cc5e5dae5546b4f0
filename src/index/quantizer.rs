//! Vector quantization for the index
//!
//! Compressed representations trade recall for memory. Distances computed
//! on compressed forms approximate the raw metric; exact-zero identities
//! only hold for the `None` quantizer.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::metric::Metric;

/// Centroids per product-quantization group
const PQ_CODEBOOK_SIZE: usize = 256;

/// Quantization mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum Quantization {
    #[default]
    None,
    /// 1-bit sign per dimension
    Binary,
    /// n-bit uniform levels, one byte stored per dimension
    Scalar {
        #[serde(default = "default_scalar_bits")]
        bits: u8,
    },
    /// Contiguous subvector groups, one byte code per group
    Product {
        #[serde(default = "default_subvectors")]
        subvectors: usize,
    },
}

fn default_scalar_bits() -> u8 {
    8
}

fn default_subvectors() -> usize {
    8
}

/// A vector as stored by the index
#[derive(Debug, Clone)]
pub enum StoredVector {
    Raw(Vec<f32>),
    Binary { signs: Vec<u64>, dims: usize },
    Scalar { codes: Vec<u8>, min: f32, step: f32 },
    Product { codes: Vec<u8> },
}

impl StoredVector {
    /// Bytes used by the stored form
    pub fn stored_bytes(&self) -> usize {
        match self {
            StoredVector::Raw(v) => v.len() * 4,
            StoredVector::Binary { signs, .. } => signs.len() * 8,
            StoredVector::Scalar { codes, .. } => codes.len() + 8,
            StoredVector::Product { codes } => codes.len(),
        }
    }
}

/// Encodes vectors for storage and scores queries against stored forms
pub struct Quantizer {
    mode: Quantization,
    dims: usize,
    /// Per-group centroid tables, populated online from inserted vectors
    codebooks: RwLock<Vec<Vec<Vec<f32>>>>,
}

impl Quantizer {
    pub fn new(mode: Quantization, dims: usize) -> Self {
        let groups = match mode {
            Quantization::Product { subvectors } => subvectors.clamp(1, dims.max(1)),
            _ => 0,
        };
        Self {
            mode,
            dims,
            codebooks: RwLock::new(vec![Vec::new(); groups]),
        }
    }

    pub fn mode(&self) -> Quantization {
        self.mode
    }

    /// Ratio of uncompressed bits to stored bits
    pub fn compression_ratio(&self) -> f32 {
        match self.mode {
            Quantization::None => 1.0,
            Quantization::Binary => 32.0,
            Quantization::Scalar { .. } => 4.0,
            Quantization::Product { subvectors } => {
                let groups = subvectors.clamp(1, self.dims.max(1));
                (self.dims as f32 * 32.0) / (groups as f32 * 8.0)
            }
        }
    }

    /// Encode a raw vector into its stored form.
    ///
    /// Product mode grows the per-group codebooks until they are full,
    /// then snaps to the nearest existing centroid.
    pub fn encode(&self, vector: &[f32]) -> StoredVector {
        match self.mode {
            Quantization::None => StoredVector::Raw(vector.to_vec()),
            Quantization::Binary => {
                let mut signs = vec![0u64; vector.len().div_ceil(64)];
                for (i, &x) in vector.iter().enumerate() {
                    if x >= 0.0 {
                        signs[i / 64] |= 1 << (i % 64);
                    }
                }
                StoredVector::Binary {
                    signs,
                    dims: vector.len(),
                }
            }
            Quantization::Scalar { bits } => {
                let levels = (1u32 << bits.clamp(1, 8)) - 1;
                let min = vector.iter().copied().fold(f32::INFINITY, f32::min);
                let max = vector.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let range = max - min;
                let step = if range > 0.0 { range / levels as f32 } else { 0.0 };
                let codes = vector
                    .iter()
                    .map(|&x| {
                        if step == 0.0 {
                            0
                        } else {
                            (((x - min) / step).round() as u32).min(levels) as u8
                        }
                    })
                    .collect();
                StoredVector::Scalar { codes, min, step }
            }
            Quantization::Product { subvectors } => {
                let groups = subvectors.clamp(1, vector.len().max(1));
                let mut codebooks = self.codebooks.write();
                if codebooks.len() != groups {
                    codebooks.resize(groups, Vec::new());
                }
                let mut codes = Vec::with_capacity(groups);
                for (g, sub) in split_groups(vector, groups).enumerate() {
                    let book = &mut codebooks[g];
                    let code = match nearest_centroid(book, sub) {
                        Some((idx, dist)) if dist < 1e-9 || book.len() >= PQ_CODEBOOK_SIZE => idx,
                        _ => {
                            book.push(sub.to_vec());
                            book.len() - 1
                        }
                    };
                    codes.push(code as u8);
                }
                StoredVector::Product { codes }
            }
        }
    }

    /// Reconstruct an approximate raw vector from the stored form
    pub fn decode(&self, stored: &StoredVector) -> Vec<f32> {
        match stored {
            StoredVector::Raw(v) => v.clone(),
            StoredVector::Binary { signs, dims } => (0..*dims)
                .map(|i| {
                    if signs[i / 64] >> (i % 64) & 1 == 1 {
                        1.0
                    } else {
                        -1.0
                    }
                })
                .collect(),
            StoredVector::Scalar { codes, min, step } => codes
                .iter()
                .map(|&c| min + c as f32 * step)
                .collect(),
            StoredVector::Product { codes } => {
                let codebooks = self.codebooks.read();
                let mut out = Vec::with_capacity(self.dims);
                for (g, &code) in codes.iter().enumerate() {
                    match codebooks.get(g).and_then(|book| book.get(code as usize)) {
                        Some(centroid) => out.extend_from_slice(centroid),
                        // A missing centroid can only mean the codebooks
                        // were cleared; yield a wrong-length vector so the
                        // metric reports worst-case instead of garbage.
                        None => return Vec::new(),
                    }
                }
                out
            }
        }
    }

    /// Distance between a raw query and a stored vector under `metric`.
    ///
    /// Approximate for every mode but `None`. Dimension mismatches yield
    /// `f32::MAX` via the metric.
    pub fn distance(&self, metric: Metric, query: &[f32], stored: &StoredVector) -> f32 {
        match stored {
            StoredVector::Raw(v) => metric.distance(query, v),
            _ => metric.distance(query, &self.decode(stored)),
        }
    }

    /// Drop learned codebooks (product mode); other modes are stateless
    pub fn reset(&self) {
        let mut codebooks = self.codebooks.write();
        for book in codebooks.iter_mut() {
            book.clear();
        }
    }
}

fn split_groups(vector: &[f32], groups: usize) -> impl Iterator<Item = &[f32]> + '_ {
    let base = vector.len() / groups;
    let remainder = vector.len() % groups;
    let mut offset = 0;
    (0..groups).map(move |g| {
        let len = base + usize::from(g < remainder);
        let sub = &vector[offset..offset + len];
        offset += len;
        sub
    })
}

fn nearest_centroid(book: &[Vec<f32>], sub: &[f32]) -> Option<(usize, f32)> {
    book.iter()
        .enumerate()
        .map(|(i, c)| {
            let d: f32 = c
                .iter()
                .zip(sub.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum();
            (i, d)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trips_exactly() {
        let q = Quantizer::new(Quantization::None, 4);
        let v = vec![0.1, -0.2, 0.3, 0.9];
        let stored = q.encode(&v);
        assert_eq!(q.decode(&stored), v);
        assert_eq!(q.compression_ratio(), 1.0);
    }

    #[test]
    fn binary_preserves_signs() {
        let q = Quantizer::new(Quantization::Binary, 4);
        let stored = q.encode(&[0.5, -0.5, 0.1, -2.0]);
        assert_eq!(q.decode(&stored), vec![1.0, -1.0, 1.0, -1.0]);
        assert_eq!(q.compression_ratio(), 32.0);
    }

    #[test]
    fn scalar_stays_within_step() {
        let q = Quantizer::new(Quantization::Scalar { bits: 8 }, 4);
        let v = vec![0.0, 0.25, 0.5, 1.0];
        let stored = q.encode(&v);
        let decoded = q.decode(&stored);
        for (a, b) in v.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1.0 / 255.0 + 1e-6);
        }
    }

    #[test]
    fn scalar_constant_vector() {
        let q = Quantizer::new(Quantization::Scalar { bits: 8 }, 3);
        let stored = q.encode(&[0.7, 0.7, 0.7]);
        let decoded = q.decode(&stored);
        for x in decoded {
            assert!((x - 0.7).abs() < 1e-6);
        }
    }

    #[test]
    fn product_exact_for_early_vectors() {
        let q = Quantizer::new(Quantization::Product { subvectors: 2 }, 4);
        let v = vec![1.0, 2.0, 3.0, 4.0];
        let stored = q.encode(&v);
        assert_eq!(q.decode(&stored), v);
    }

    #[test]
    fn product_compression_ratio() {
        let q = Quantizer::new(Quantization::Product { subvectors: 8 }, 64);
        // 64 dims * 32 bits vs 8 bytes of codes
        assert!((q.compression_ratio() - 32.0).abs() < 1e-6);
    }

    #[test]
    fn quantized_distance_close_to_raw() {
        let q = Quantizer::new(Quantization::Scalar { bits: 8 }, 4);
        let a = vec![0.1, 0.9, 0.4, 0.6];
        let b = vec![0.2, 0.8, 0.5, 0.5];
        let stored = q.encode(&b);
        let raw = Metric::Euclidean.distance(&a, &b);
        let approx = q.distance(Metric::Euclidean, &a, &stored);
        assert!((raw - approx).abs() < 0.05);
    }

    #[test]
    fn mismatched_stored_dims_worst_case() {
        let q = Quantizer::new(Quantization::None, 4);
        let stored = q.encode(&[1.0, 2.0, 3.0]);
        assert_eq!(q.distance(Metric::Cosine, &[1.0, 2.0, 3.0, 4.0], &stored), f32::MAX);
    }
}
