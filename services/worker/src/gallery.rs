//! Cross-camera identity gallery.
//!
//! The gallery is the one identity space shared by every camera and every
//! tracking session: an append-only sequence of (identity, representative
//! embedding) pairs. Identities are minted in strictly increasing order
//! starting at 0 and are never reused, evicted or updated after insertion.
//!
//! `match_or_insert` is the only mutating path. The interior mutex gives it
//! single-writer semantics, so a scan can never race an in-progress insert;
//! concurrent consumers simply serialize on the matching call.

use parking_lot::Mutex;
use tracing::debug;

/// Process-wide identity assigned by the matching engine
pub type IdentityId = u64;

/// A known identity and the embedding that first produced it
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity_id: IdentityId,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Default)]
struct GalleryState {
    entries: Vec<GalleryEntry>,
    next_identity: IdentityId,
}

/// Shared identity gallery with single-writer matching
#[derive(Debug, Default)]
pub struct IdentityGallery {
    state: Mutex<GalleryState>,
}

impl IdentityGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known identities. Snapshot read for diagnostics; never
    /// observes a half-finished insert.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assign an identity to `embedding`.
    ///
    /// The nearest gallery entry wins when its Euclidean distance is
    /// strictly below `threshold`; a distance equal to the threshold does
    /// not match. Ties go to the earliest-inserted entry. When nothing
    /// matches (or the gallery is empty) a fresh identity is minted and the
    /// embedding becomes its representative, never to be updated again.
    pub fn match_or_insert(&self, embedding: &[f32], threshold: f32) -> IdentityId {
        let mut state = self.state.lock();

        let mut best: Option<(IdentityId, f32)> = None;
        for entry in &state.entries {
            let distance = euclidean_distance(embedding, &entry.embedding);
            if best.map_or(true, |(_, best_distance)| distance < best_distance) {
                best = Some((entry.identity_id, distance));
            }
        }

        if let Some((identity_id, distance)) = best {
            if distance < threshold {
                debug!(identity_id, distance, "Matched existing identity");
                return identity_id;
            }
        }

        let identity_id = state.next_identity;
        // An out-of-step counter means two writers raced past the lock;
        // aborting beats silently corrupting the identity space.
        assert_eq!(
            identity_id,
            state.entries.len() as IdentityId,
            "identity counter out of step with gallery"
        );

        state.entries.push(GalleryEntry {
            identity_id,
            embedding: embedding.to_vec(),
        });
        state.next_identity += 1;

        debug!(
            identity_id,
            gallery_size = state.entries.len(),
            "Inserted new identity"
        );
        identity_id
    }
}

/// Euclidean distance between two embeddings. Vectors of different lengths
/// can never match.
fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn empty_gallery_mints_identity_zero() {
        let gallery = IdentityGallery::new();
        assert_eq!(gallery.match_or_insert(&[0.0, 0.0], 0.6), 0);
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn nearby_embedding_matches_distant_embedding_does_not() {
        let gallery = IdentityGallery::new();
        assert_eq!(gallery.match_or_insert(&[0.0, 0.0], 0.6), 0);
        // Distance ~0.14, well inside the threshold
        assert_eq!(gallery.match_or_insert(&[0.1, 0.1], 0.6), 0);
        // Distance ~7.07, far outside it
        assert_eq!(gallery.match_or_insert(&[5.0, 5.0], 0.6), 1);
        assert_eq!(gallery.len(), 2);
    }

    #[test]
    fn distance_equal_to_threshold_is_not_a_match() {
        let gallery = IdentityGallery::new();
        gallery.match_or_insert(&[0.0, 0.0], 5.0);
        // 3-4-5 triangle: distance is exactly 5.0
        assert_eq!(gallery.match_or_insert(&[3.0, 4.0], 5.0), 1);
        // Strictly inside the threshold of entry 0 (and far from entry 1)
        assert_eq!(gallery.match_or_insert(&[-3.0, -3.9], 5.0), 0);
    }

    #[test]
    fn ties_go_to_the_earliest_identity() {
        let gallery = IdentityGallery::new();
        gallery.match_or_insert(&[0.0, 0.0], 0.1);
        gallery.match_or_insert(&[2.0, 0.0], 0.1);
        // Equidistant from both entries
        assert_eq!(gallery.match_or_insert(&[1.0, 0.0], 2.0), 0);
    }

    #[test]
    fn identities_are_monotonic_without_gaps() {
        let gallery = IdentityGallery::new();
        let assigned: Vec<IdentityId> = (0..10)
            .map(|i| gallery.match_or_insert(&[i as f32 * 100.0], 0.6))
            .collect();
        assert_eq!(assigned, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn replaying_a_sequence_reproduces_the_assignments() {
        let sequence: Vec<Vec<f32>> = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.1],
            vec![5.0, 5.0],
            vec![5.1, 4.9],
            vec![0.2, 0.0],
            vec![-3.0, 7.5],
        ];

        let run = || {
            let gallery = IdentityGallery::new();
            sequence
                .iter()
                .map(|e| gallery.match_or_insert(e, 0.6))
                .collect::<Vec<_>>()
        };

        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert_eq!(first, vec![0, 0, 1, 1, 0, 2]);
    }

    #[test]
    fn mismatched_embedding_lengths_never_match() {
        let gallery = IdentityGallery::new();
        gallery.match_or_insert(&[0.0, 0.0], 0.6);
        assert_eq!(gallery.match_or_insert(&[0.0, 0.0, 0.0], 0.6), 1);
    }

    #[test]
    fn concurrent_inserts_stay_unique_and_gap_free() {
        let gallery = Arc::new(IdentityGallery::new());
        let mut handles = Vec::new();

        for worker in 0..4 {
            let gallery = gallery.clone();
            handles.push(std::thread::spawn(move || {
                (0..25)
                    .map(|i| {
                        // Spread embeddings far apart so every call inserts
                        let value = (worker * 1000 + i * 10) as f32;
                        gallery.match_or_insert(&[value, -value], 0.5)
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<IdentityId> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("worker thread"))
            .collect();
        all.sort_unstable();
        all.dedup();

        assert_eq!(all.len(), 100);
        assert_eq!(all, (0..100).collect::<Vec<_>>());
        assert_eq!(gallery.len(), 100);
    }
}
