//! PageRank over fingerprint similarity graphs
//!
//! Markov-indexed stores can contain large groups of records that share a
//! key. Within a group, records are ordered by representativeness: a
//! weighted PageRank over the pairwise cosine-similarity graph, so records
//! that resemble many of their neighbors rank above outliers.

use crate::mix::{cosine, FINGERPRINT_DIM};

/// PageRank damping factor.
pub const DAMPING: f64 = 0.8;

/// Convergence tolerance on the L1 delta between iterations.
pub const TOLERANCE: f64 = 1e-6;

/// Iteration cap; convergence normally arrives far earlier.
pub const MAX_ITERATIONS: usize = 200;

/// Largest similarity block ranked as one graph. Groups beyond this size
/// are chunked so the pairwise matrix stays bounded.
pub const BLOCK_SIZE: usize = 8192;

/// Weighted PageRank over a dense similarity matrix.
///
/// `similarity[i][j]` is the edge weight from node `i` to node `j`;
/// the diagonal is ignored. Nodes with no outgoing weight distribute
/// their rank uniformly.
pub fn pagerank(similarity: &[Vec<f64>]) -> Vec<f64> {
    let n = similarity.len();
    if n == 0 {
        return Vec::new();
    }
    let uniform = 1.0 / n as f64;
    let out_weight: Vec<f64> = similarity
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, &w)| w.max(0.0))
                .sum()
        })
        .collect();

    let mut ranks = vec![uniform; n];
    let mut next = vec![0.0; n];
    for _ in 0..MAX_ITERATIONS {
        let mut dangling = 0.0;
        for i in 0..n {
            if out_weight[i] <= 0.0 {
                dangling += ranks[i];
            }
        }
        let base = (1.0 - DAMPING) * uniform + DAMPING * dangling * uniform;
        next.fill(base);
        for (i, row) in similarity.iter().enumerate() {
            if out_weight[i] <= 0.0 {
                continue;
            }
            let share = DAMPING * ranks[i] / out_weight[i];
            for (j, &w) in row.iter().enumerate() {
                if j != i && w > 0.0 {
                    next[j] += share * w;
                }
            }
        }
        let delta: f64 = ranks
            .iter()
            .zip(&next)
            .map(|(a, b)| (a - b).abs())
            .sum();
        std::mem::swap(&mut ranks, &mut next);
        if delta < TOLERANCE {
            break;
        }
    }
    ranks
}

/// Rank one block of fingerprints by similarity-graph centrality.
///
/// The caller chunks groups into blocks of at most [`BLOCK_SIZE`].
pub fn rank_block(fingerprints: &[[f64; FINGERPRINT_DIM]]) -> Vec<f64> {
    let n = fingerprints.len();
    let mut similarity = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let s = cosine(&fingerprints[i], &fingerprints[j]).max(0.0);
            similarity[i][j] = s;
            similarity[j][i] = s;
        }
    }
    pagerank(&similarity)
}
