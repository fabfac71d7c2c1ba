//! Vector similarity helpers shared by the local scan and the native index.

/// Cosine similarity of two vectors, in [-1, 1].
///
/// Returns 0.0 when the dimensions differ, either vector is empty, or either has zero
/// magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Clamps a raw similarity into the [0, 1] range used for match decisions.
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Match score between two embeddings.
pub fn match_score(a: &[f32], b: &[f32]) -> f32 {
    clamp_score(cosine_similarity(a, b))
}

/// Converts a cosine distance reported by the vector index into a match score.
pub fn distance_to_score(distance: f32) -> f32 {
    clamp_score(1.0 - distance)
}
