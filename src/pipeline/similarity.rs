use rayon::prelude::*;

/// Vectors are compared with cosine metrics throughout the pipeline.
/// Zero-norm or mismatched inputs yield the neutral value instead of
/// panicking; callers gate inputs through `is_valid_embedding` first.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Zero-norm and mismatched inputs land at distance 1.0, the neutral
/// "unrelated" point for every threshold in this pipeline.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// Similarity of one query against every candidate in a single call.
/// Candidate order is preserved so index-based tie-breaking stays stable.
pub fn cosine_similarity_batch(query: &[f32], candidates: &[Vec<f32>]) -> Vec<f32> {
    if candidates.len() < 64 {
        candidates.iter().map(|c| cosine_similarity(query, c)).collect()
    } else {
        candidates.par_iter().map(|c| cosine_similarity(query, c)).collect()
    }
}

/// Rejects empty vectors and anything carrying NaN/Inf. Invalid embeddings
/// are skipped by every consumer, never zeroed or coerced.
pub fn is_valid_embedding(v: &[f32]) -> bool {
    !v.is_empty() && v.iter().all(|x| x.is_finite())
}

/// Mean of a set of same-length vectors; None when nothing valid remains.
pub fn mean_embedding(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let mut iter = vectors.iter().filter(|v| is_valid_embedding(v));
    let first = iter.next()?;
    let dim = first.len();

    let mut acc = vec![0f32; dim];
    let mut used = 0usize;
    for v in std::iter::once(first).chain(iter) {
        if v.len() != dim {
            continue;
        }
        for (slot, value) in acc.iter_mut().zip(v.iter()) {
            *slot += value;
        }
        used += 1;
    }

    let inv = 1.0f32 / used as f32;
    for value in acc.iter_mut() {
        *value *= inv;
    }
    Some(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - (-1.0)).abs() < 0.0001);
    }

    #[test]
    fn self_similarity_is_one() {
        let v = vec![0.1, 0.2, 0.3, -0.4, 0.05];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_norm_is_neutral() {
        let zero = vec![0.0, 0.0, 0.0];
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_distance(&zero, &v), 1.0);
    }

    #[test]
    fn length_mismatch_is_neutral() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(euclidean_distance(&[1.0], &[1.0, 2.0]), f32::INFINITY);
    }

    #[test]
    fn test_euclidean_distance() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn validity_rejects_nan_inf_empty() {
        assert!(!is_valid_embedding(&[]));
        assert!(!is_valid_embedding(&[0.1, f32::NAN]));
        assert!(!is_valid_embedding(&[f32::INFINITY, 0.2]));
        assert!(!is_valid_embedding(&[0.3, f32::NEG_INFINITY]));
        assert!(is_valid_embedding(&[0.1, -0.2, 0.0]));
    }

    #[test]
    fn batch_matches_scalar() {
        let query = vec![0.4, 0.1, -0.3];
        let candidates = vec![
            vec![0.4, 0.1, -0.3],
            vec![-0.4, -0.1, 0.3],
            vec![0.0, 1.0, 0.0],
        ];
        let batch = cosine_similarity_batch(&query, &candidates);
        for (got, candidate) in batch.iter().zip(candidates.iter()) {
            assert!((got - cosine_similarity(&query, candidate)).abs() < 1e-6);
        }
    }

    #[test]
    fn mean_embedding_skips_invalid() {
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![f32::NAN, 1.0],
        ];
        let mean = mean_embedding(&vectors).unwrap();
        assert!((mean[0] - 0.5).abs() < 1e-6);
        assert!((mean[1] - 0.5).abs() < 1e-6);
        assert!(mean_embedding(&[]).is_none());
    }
}
