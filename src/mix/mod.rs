//! Context-mixing fingerprint extraction
//!
//! Turns a running byte stream into 256-dim fingerprints: eight windowed
//! symbol histograms (windows 1 through 128) are normalized into probability
//! rows and reduced to one vector by a self-attention pass.

pub mod attention;
pub mod histogram;

pub use attention::{self_attention, softmax, Matrix, STABILIZER};
pub use histogram::{Histogram, Mixer, FINGERPRINT_DIM, HISTOGRAM_COUNT, WINDOW_SIZES};

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either magnitude is zero (a degenerate histogram is a
/// legitimate non-match, not an error), so search can proceed with other
/// candidates.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let (mut aa, mut bb, mut ab) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        aa += x * x;
        bb += y * y;
        ab += x * y;
    }
    let denom = aa.sqrt() * bb.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    ab / denom
}
