//! Split hyperplanes for locality-sensitive bucketing
//!
//! 64 separating hyperplanes project a 256-dim fingerprint into a 64-bit
//! locality code: one bit per hyperplane, set when the fingerprint's cosine
//! similarity against that hyperplane exceeds a calibration threshold. The
//! hyperplanes are either drawn from a seeded distribution or trained by a
//! small per-plane Adam loop that regresses the similarity toward a fixed
//! target, biasing each plane toward a consistent separation behavior.
//!
//! The threshold is the average similarity over the whole training corpus;
//! it is computed once at build time and persisted in the manifest, never
//! hard-coded.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::error::{StoreError, StoreResult};
use crate::mix::{cosine, FINGERPRINT_DIM};

/// Number of split hyperplanes; also the locality-code width in bits.
pub const SPLIT_COUNT: usize = 64;

/// Hyperplane training parameters.
///
/// The similarity target and the Adam decay rates are empirically chosen
/// values carried over as configurable defaults.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Learning rate.
    pub eta: f64,
    /// Exponential decay of the first-moment estimates.
    pub beta1: f64,
    /// Exponential decay of the second-moment estimates.
    pub beta2: f64,
    /// Denominator fuzz.
    pub epsilon: f64,
    /// Similarity-regression target.
    pub target: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            eta: 0.01,
            beta1: 0.8,
            beta2: 0.89,
            epsilon: 1e-8,
            target: 0.33,
        }
    }
}

/// `x^(step+1)`, treated as 0 when it over- or underflows to non-finite.
fn decay_power(x: f64, step: usize) -> f64 {
    let y = x.powi(step as i32 + 1);
    if y.is_finite() {
        y
    } else {
        0.0
    }
}

/// Loss and gradient of `(cosine(|w|, x) - target)^2` with respect to `w`.
fn similarity_loss(
    weights: &[f64; FINGERPRINT_DIM],
    input: &[f64; FINGERPRINT_DIM],
    target: f64,
) -> (f64, [f64; FINGERPRINT_DIM]) {
    let mut grad = [0.0; FINGERPRINT_DIM];
    let (mut aa, mut bb, mut ab) = (0.0, 0.0, 0.0);
    for (&w, &x) in weights.iter().zip(input) {
        let a = w.abs();
        aa += a * a;
        bb += x * x;
        ab += a * x;
    }
    let denom = aa.sqrt() * bb.sqrt();
    if denom == 0.0 {
        // Degenerate input or all-zero weights: flat loss, nothing to move.
        return (target * target, grad);
    }
    let sim = ab / denom;
    let residual = sim - target;
    for (g, (&w, &x)) in grad.iter_mut().zip(weights.iter().zip(input)) {
        let a = w.abs();
        let dsim = x / denom - sim * a / aa;
        *g = 2.0 * residual * dsim * w.signum();
    }
    (residual * residual, grad)
}

/// 64 separating hyperplanes plus their serialization.
///
/// Constructed once by the store builder and passed by reference into both
/// the builder and the query engine — there is no process-wide table.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitHyperplanes {
    planes: Vec<[f64; FINGERPRINT_DIM]>,
}

impl SplitHyperplanes {
    /// Draw all coefficients from a seeded normal distribution.
    ///
    /// Coefficients are stored as absolute values so projections against
    /// non-negative fingerprints behave like the trained variant.
    pub fn random(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0 / (FINGERPRINT_DIM as f64).sqrt())
            .expect("constant stddev is finite");
        let planes = (0..SPLIT_COUNT)
            .map(|_| {
                let mut plane = [0.0; FINGERPRINT_DIM];
                for v in plane.iter_mut() {
                    *v = normal.sample(&mut rng).abs();
                }
                plane
            })
            .collect();
        Self { planes }
    }

    /// Train each hyperplane independently against the corpus fingerprints.
    ///
    /// One Adam step per fingerprint: bias-corrected moment estimates with
    /// NaN/Inf-guarded decay powers, and the gradient clipped to unit norm
    /// when it exceeds it. A non-finite cost aborts that plane's remaining
    /// training and keeps its last valid weights.
    pub fn trained(
        fingerprints: &[[f64; FINGERPRINT_DIM]],
        config: &TrainConfig,
        seed: u64,
        verbose: bool,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0 / (FINGERPRINT_DIM as f64).sqrt())
            .expect("constant stddev is finite");
        let mut planes = Vec::with_capacity(SPLIT_COUNT);
        for plane_index in 0..SPLIT_COUNT {
            let mut weights = [0.0; FINGERPRINT_DIM];
            for w in weights.iter_mut() {
                *w = normal.sample(&mut rng);
            }
            let mut mean = [0.0; FINGERPRINT_DIM];
            let mut variance = [0.0; FINGERPRINT_DIM];
            for (step, input) in fingerprints.iter().enumerate() {
                let (cost, grad) = similarity_loss(&weights, input, config.target);
                if !cost.is_finite() {
                    eprintln!(
                        "split {}: non-finite cost at step {}, keeping last valid weights",
                        plane_index, step
                    );
                    break;
                }
                let norm: f64 = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
                let scaling = if norm > 1.0 { 1.0 / norm } else { 1.0 };
                let b1 = decay_power(config.beta1, step);
                let b2 = decay_power(config.beta2, step);
                for l in 0..FINGERPRINT_DIM {
                    let g = grad[l] * scaling;
                    let m = config.beta1 * mean[l] + (1.0 - config.beta1) * g;
                    let v = config.beta2 * variance[l] + (1.0 - config.beta2) * g * g;
                    mean[l] = m;
                    variance[l] = v;
                    let mhat = m / (1.0 - b1);
                    let vhat = (v / (1.0 - b2)).max(0.0);
                    weights[l] -= config.eta * mhat / (vhat.sqrt() + config.epsilon);
                }
            }
            for w in weights.iter_mut() {
                *w = w.abs();
            }
            if verbose {
                eprintln!("trained split {}/{}", plane_index + 1, SPLIT_COUNT);
            }
            planes.push(weights);
        }
        Self { planes }
    }

    pub fn plane(&self, k: usize) -> &[f64; FINGERPRINT_DIM] {
        &self.planes[k]
    }

    /// Mean cosine similarity of every fingerprint against every plane.
    ///
    /// This is the calibration threshold for locality codes; the builder
    /// computes it once over the whole corpus and persists it.
    pub fn average_similarity(&self, fingerprints: &[[f64; FINGERPRINT_DIM]]) -> f64 {
        if fingerprints.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0;
        for fp in fingerprints {
            for plane in &self.planes {
                sum += cosine(fp, plane);
            }
        }
        sum / (fingerprints.len() * SPLIT_COUNT) as f64
    }

    /// Project a fingerprint into its 64-bit locality code.
    ///
    /// For each plane in order, the running code shifts left and its low bit
    /// is set iff the cosine similarity exceeds `average`. Plane `k` thus
    /// lands on bit `63 - k`.
    pub fn project(&self, fingerprint: &[f64; FINGERPRINT_DIM], average: f64) -> u64 {
        let mut code = 0u64;
        for plane in &self.planes {
            code <<= 1;
            if cosine(fingerprint, plane) > average {
                code |= 1;
            }
        }
        code
    }

    /// Write as 64 x 256 big-endian f64 values, row-major, no header.
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for plane in &self.planes {
            for v in plane {
                out.write_all(&v.to_be_bytes())?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Load a split file written by [`SplitHyperplanes::save`].
    pub fn load(path: &Path) -> StoreResult<Self> {
        let expected = SPLIT_COUNT * FINGERPRINT_DIM * 8;
        let actual = std::fs::metadata(path)?.len();
        if actual != expected as u64 {
            return Err(StoreError::MalformedSplits {
                path: path.to_path_buf(),
                reason: format!("expected {} bytes, found {}", expected, actual),
            });
        }
        let mut reader = BufReader::new(File::open(path)?);
        let mut buf = [0u8; 8];
        let mut planes = Vec::with_capacity(SPLIT_COUNT);
        for _ in 0..SPLIT_COUNT {
            let mut plane = [0.0; FINGERPRINT_DIM];
            for v in plane.iter_mut() {
                reader.read_exact(&mut buf)?;
                *v = f64::from_be_bytes(buf);
            }
            planes.push(plane);
        }
        Ok(Self { planes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_fingerprints(count: usize) -> Vec<[f64; FINGERPRINT_DIM]> {
        (0..count)
            .map(|i| {
                let mut fp = [0.0; FINGERPRINT_DIM];
                for (j, v) in fp.iter_mut().enumerate() {
                    *v = ((i * 31 + j * 7) % 97) as f64 / 96.0;
                }
                fp
            })
            .collect()
    }

    #[test]
    fn random_splits_are_seeded_and_nonnegative() {
        let a = SplitHyperplanes::random(1);
        let b = SplitHyperplanes::random(1);
        let c = SplitHyperplanes::random(2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        for k in 0..SPLIT_COUNT {
            assert!(a.plane(k).iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn decay_power_guards_overflow() {
        assert_eq!(decay_power(0.8, 0), 0.8);
        assert!((decay_power(0.8, 1) - 0.64).abs() < 1e-12);
        // Huge exponents underflow to 0.0, which is finite and kept.
        assert_eq!(decay_power(0.8, 1 << 20), 0.0);
        // Non-finite results collapse to 0.
        assert_eq!(decay_power(f64::INFINITY, 1), 0.0);
    }

    #[test]
    fn training_reduces_loss_on_constant_input() {
        let mut fp = [0.0; FINGERPRINT_DIM];
        for (j, v) in fp.iter_mut().enumerate() {
            *v = ((j % 13) + 1) as f64 / 13.0;
        }
        let config = TrainConfig::default();
        let mut rng_weights = [0.0; FINGERPRINT_DIM];
        {
            let mut rng = StdRng::seed_from_u64(7);
            let normal = Normal::new(0.0, 1.0 / (FINGERPRINT_DIM as f64).sqrt()).unwrap();
            for w in rng_weights.iter_mut() {
                *w = normal.sample(&mut rng);
            }
        }
        let (initial, _) = similarity_loss(&rng_weights, &fp, config.target);

        let inputs = vec![fp; 300];
        let splits = SplitHyperplanes::trained(&inputs, &config, 7, false);
        // Plane 0 was initialized from the same seed position, so compare
        // its final loss against the same starting point.
        let (final_cost, _) = similarity_loss(splits.plane(0), &fp, config.target);
        assert!(final_cost.is_finite());
        assert!(
            final_cost < initial,
            "training did not improve: {} -> {}",
            initial,
            final_cost
        );
    }

    #[test]
    fn trained_splits_are_finite_and_nonnegative() {
        let fingerprints = synthetic_fingerprints(50);
        let splits = SplitHyperplanes::trained(&fingerprints, &TrainConfig::default(), 1, false);
        for k in 0..SPLIT_COUNT {
            assert!(splits.plane(k).iter().all(|v| v.is_finite() && *v >= 0.0));
        }
    }

    #[test]
    fn trained_splits_are_deterministic() {
        let fingerprints = synthetic_fingerprints(20);
        let a = SplitHyperplanes::trained(&fingerprints, &TrainConfig::default(), 3, false);
        let b = SplitHyperplanes::trained(&fingerprints, &TrainConfig::default(), 3, false);
        assert_eq!(a, b);
    }

    #[test]
    fn project_thresholds_each_plane() {
        let splits = SplitHyperplanes::random(5);
        let fingerprints = synthetic_fingerprints(10);
        let average = splits.average_similarity(&fingerprints);
        for fp in &fingerprints {
            let code = splits.project(fp, average);
            for k in 0..SPLIT_COUNT {
                let expected = cosine(fp, splits.plane(k)) > average;
                let bit = (code >> (SPLIT_COUNT - 1 - k)) & 1 == 1;
                assert_eq!(bit, expected, "plane {} disagrees with code bit", k);
            }
        }
    }

    #[test]
    fn split_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splits.bin");
        let splits = SplitHyperplanes::random(11);
        splits.save(&path).unwrap();
        let back = SplitHyperplanes::load(&path).unwrap();
        assert_eq!(splits, back);
    }

    #[test]
    fn truncated_split_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splits.bin");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        match SplitHyperplanes::load(&path) {
            Err(StoreError::MalformedSplits { .. }) => {}
            other => panic!("expected MalformedSplits, got {:?}", other.map(|_| ())),
        }
    }
}
