//! Shared embedding-distance helpers used by the chain walker and the MMR
//! reranker.

/// `arccos(cosine_similarity) / pi`, in `[0, 1]`. Degenerates to 1.0 (fully
/// dissimilar) when either vector is zero-length.
pub fn angular_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    let cosine = (dot / (na * nb)).clamp(-1.0, 1.0) as f64;
    cosine.acos() / std::f64::consts::PI
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_zero_angular_distance() {
        assert!(angular_distance(&[1.0, 0.0], &[1.0, 0.0]) < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_have_distance_one_half() {
        assert!((angular_distance(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-9);
    }
}
