//! Distance metrics for the vector index
//!
//! All metrics return "smaller = closer" so the graph search can treat
//! them uniformly. `similarity` maps a distance back onto the score scale
//! used by threshold filtering.

use serde::{Deserialize, Serialize};

/// Distance metric over raw f32 vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Dot,
    Manhattan,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dot => "dot",
            Metric::Manhattan => "manhattan",
        }
    }

    /// Distance between two vectors of equal length.
    ///
    /// Mismatched lengths yield `f32::MAX` (worst possible) rather than
    /// panicking; stored vectors of a stale dimension must never abort a
    /// search.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return f32::MAX;
        }
        match self {
            Metric::Cosine => cosine_distance(a, b),
            Metric::Euclidean => euclidean_distance(a, b),
            Metric::Dot => -dot(a, b),
            Metric::Manhattan => manhattan_distance(a, b),
        }
    }

    /// Map a distance onto the similarity scale:
    /// `1 - d` for cosine, `-d` for dot, `1 / (1 + d)` for the norms.
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            Metric::Cosine => 1.0 - distance,
            Metric::Dot => -distance,
            Metric::Euclidean | Metric::Manhattan => 1.0 / (1.0 + distance),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "dot" | "inner" => Ok(Metric::Dot),
            "manhattan" | "l1" => Ok(Metric::Manhattan),
            _ => Err(format!("Unknown metric: {}", s)),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        // A zero vector has no direction; treat as maximally distant.
        return 2.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}
