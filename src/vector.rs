//! Vector math shared by the ranker and the embedding providers.
//!
//! Accumulation happens in `f64` regardless of the input element type so that
//! a few hundred dimensions of `f32` products don't drift.

use thiserror::Error;

/// Two vectors of different length were compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("vector length mismatch: {left} vs {right}")]
pub struct DimensionMismatch {
    pub left: usize,
    pub right: usize,
}

/// Cosine similarity between two equal-length vectors.
///
/// Returns `0.0` when either vector has zero L2 norm or a non-finite
/// component, and
/// [`DimensionMismatch`] when the lengths differ. The result is clamped to
/// `[-1, 1]` to absorb rounding on near-parallel inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    // clamp() passes NaN through
    if !(dot.is_finite() && norm_a.is_finite() && norm_b.is_finite()) {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.iter().map(|&x| (f64::from(x) / norm) as f32).collect()
    } else {
        v.to_vec()
    }
}
