//! Vector similarity utilities.
//!
//! Pure-Rust cosine similarity and top-k ranking. Both storage backends load
//! the candidate vectors for an agent and rank them here; there is no vector
//! index.

use memtier_core::memory::Scored;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank items by cosine similarity of their embedding to `query`.
///
/// Returns at most `limit` items, highest similarity first. Equal scores
/// keep their input order.
pub fn top_k<T, F>(items: Vec<T>, query: &[f32], limit: usize, embedding_of: F) -> Vec<Scored<T>>
where
    F: Fn(&T) -> &[f32],
{
    let mut scored: Vec<Scored<T>> = items
        .into_iter()
        .map(|item| {
            let similarity = cosine_similarity(embedding_of(&item), query);
            Scored { item, similarity }
        })
        .collect();

    // Stable sort: ties stay in creation order.
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

/// Serialize an embedding vector to little-endian bytes.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`embedding_to_blob`].
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn cosine_known_value() {
        // [1,1] · [1,0] = 1, |[1,1]| = sqrt(2), |[1,0]| = 1
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((sim - 0.7071).abs() < 0.001);
    }

    #[test]
    fn top_k_ranks_by_similarity() {
        let query = vec![1.0, 0.0, 0.0];
        let items = vec![
            ("a", vec![0.0, 1.0, 0.0]), // orthogonal = 0
            ("b", vec![1.0, 0.0, 0.0]), // identical = 1
            ("c", vec![0.5, 0.5, 0.0]), // partial = ~0.707
        ];

        let results = top_k(items, &query, 10, |(_, e)| e.as_slice());
        let order: Vec<&str> = results.iter().map(|s| s.item.0).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn top_k_respects_limit() {
        let query = vec![1.0, 0.0];
        let items: Vec<_> = (0..10).map(|i| (i, vec![1.0, i as f32 * 0.1])).collect();
        let results = top_k(items, &query, 3, |(_, e)| e.as_slice());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].item.0, 0);
    }

    #[test]
    fn top_k_keeps_input_order_on_ties() {
        let query = vec![1.0, 0.0];
        let items = vec![("first", vec![2.0, 0.0]), ("second", vec![1.0, 0.0])];
        let results = top_k(items, &query, 10, |(_, e)| e.as_slice());
        assert_eq!(results[0].item.0, "first");
        assert_eq!(results[1].item.0, "second");
    }

    #[test]
    fn blob_round_trip() {
        let v = vec![0.1, -0.2, 3.5];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&v)), v);
    }
}
