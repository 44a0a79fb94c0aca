//! Small vector-math helpers shared by the embedding and recall paths.

/// Magnitudes below this are treated as zero (degenerate vector).
pub const ZERO_NORM_EPSILON: f32 = 1e-6;

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize `v` to unit length in place. Returns `false` (leaving the slice
/// untouched) when the magnitude is effectively zero, so callers can
/// substitute a degenerate pattern instead of dividing by zero.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if norm < ZERO_NORM_EPSILON {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Cosine similarity, clamped to [-1, 1]. Mismatched lengths and degenerate
/// vectors score 0.0 rather than producing NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norms = l2_norm(a) * l2_norm(b);
    if norms < ZERO_NORM_EPSILON {
        return 0.0;
    }
    (dot / norms).clamp(-1.0, 1.0)
}
