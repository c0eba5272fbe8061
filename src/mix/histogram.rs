//! Windowed symbol histograms and the context mixer
//!
//! A [`Histogram`] counts symbol frequency over the last `capacity` symbols
//! it was fed, using a ring buffer for O(1) eviction. A [`Mixer`] holds
//! eight histograms with geometrically increasing windows and reduces them
//! into a single 256-dim fingerprint through self-attention.

use super::attention::{self_attention, Matrix};

/// Fingerprint dimensionality; also the symbol alphabet size.
pub const FINGERPRINT_DIM: usize = 256;

/// Number of histograms in a mixer.
pub const HISTOGRAM_COUNT: usize = 8;

/// Histogram window sizes, smallest to largest.
pub const WINDOW_SIZES: [usize; HISTOGRAM_COUNT] = [1, 2, 4, 8, 16, 32, 64, 128];

/// A fixed-capacity ring-buffered symbol histogram.
///
/// Once the ring is full, the counts always sum to `capacity`: each `add`
/// evicts the oldest buffered symbol before counting the new one.
#[derive(Clone, Debug)]
pub struct Histogram {
    counts: [u32; FINGERPRINT_DIM],
    ring: Vec<u8>,
    cursor: usize,
}

impl Histogram {
    /// Create a histogram covering the last `capacity` additions.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "histogram capacity must be nonzero");
        Self {
            counts: [0; FINGERPRINT_DIM],
            ring: vec![0; capacity],
            cursor: 0,
        }
    }

    /// Add a symbol, evicting the oldest ring entry.
    pub fn add(&mut self, symbol: u8) {
        let index = (self.cursor + 1) % self.ring.len();
        let evicted = self.ring[index];
        if self.counts[evicted as usize] > 0 {
            self.counts[evicted as usize] -= 1;
        }
        self.ring[index] = symbol;
        self.counts[symbol as usize] += 1;
        self.cursor = index;
    }

    pub fn counts(&self) -> &[u32; FINGERPRINT_DIM] {
        &self.counts
    }

    /// Counts normalized to a probability row.
    ///
    /// A histogram that never received a symbol yields an all-zero row
    /// rather than dividing by zero.
    fn normalized(&self) -> [f64; FINGERPRINT_DIM] {
        let mut row = [0.0; FINGERPRINT_DIM];
        let sum: u32 = self.counts.iter().sum();
        if sum == 0 {
            return row;
        }
        let sum = f64::from(sum);
        for (r, &c) in row.iter_mut().zip(&self.counts) {
            *r = f64::from(c) / sum;
        }
        row
    }
}

/// Multi-resolution context state: eight histograms plus the Markov pair.
///
/// The mixer is the unit of context. It is mutated only by [`Mixer::add`];
/// fingerprint extraction is read-only. `Clone` produces a fully independent
/// deep copy (owned ring buffers), which speculative continuations rely on.
#[derive(Clone, Debug)]
pub struct Mixer {
    histograms: Vec<Histogram>,
    last_two: (u8, u8),
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            histograms: WINDOW_SIZES.iter().map(|&n| Histogram::new(n)).collect(),
            last_two: (0, 0),
        }
    }

    /// Feed one symbol into every histogram and shift the Markov pair.
    pub fn add(&mut self, symbol: u8) {
        for h in &mut self.histograms {
            h.add(symbol);
        }
        self.last_two = (self.last_two.1, symbol);
    }

    /// The two most recent symbols, oldest first.
    pub fn markov_key(&self) -> (u8, u8) {
        self.last_two
    }

    /// Attention-reduced, sum-normalized combination of the histogram rows.
    fn attended(&self) -> [f64; FINGERPRINT_DIM] {
        let mut x = Matrix::with_shape(FINGERPRINT_DIM, HISTOGRAM_COUNT);
        for h in &self.histograms {
            x.push_row(&h.normalized());
        }
        let reduced = self_attention(&x, &x, &x).sum_rows();
        let sum: f64 = reduced.iter().sum();
        let mut mix = [0.0; FINGERPRINT_DIM];
        if sum > 0.0 {
            for (m, v) in mix.iter_mut().zip(&reduced) {
                *m = v / sum;
            }
        }
        mix
    }

    /// Full-precision fingerprint. Components are in [0, 1] and sum to 1
    /// once at least one symbol has been added.
    ///
    /// Used as the live query vector so comparisons against stored
    /// byte-quantized fingerprints suffer only one quantization error.
    pub fn mix_floats(&self) -> [f64; FINGERPRINT_DIM] {
        self.attended()
    }

    /// Byte-quantized fingerprint for compact on-disk storage.
    pub fn mix_bytes(&self) -> [u8; FINGERPRINT_DIM] {
        let floats = self.attended();
        let mut mix = [0u8; FINGERPRINT_DIM];
        for (m, v) in mix.iter_mut().zip(&floats) {
            *m = (255.0 * v) as u8;
        }
        mix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_counts_cap_at_capacity() {
        let mut h = Histogram::new(4);
        for s in 0..16u8 {
            h.add(s);
        }
        let total: u32 = h.counts().iter().sum();
        assert_eq!(total, 4);
        // Only the last four symbols remain counted.
        for s in 12..16 {
            assert_eq!(h.counts()[s], 1);
        }
    }

    #[test]
    fn histogram_eviction_never_underflows() {
        let mut h = Histogram::new(2);
        h.add(7);
        h.add(7);
        h.add(7);
        assert_eq!(h.counts()[7], 2);
        // Symbol 0 occupies the ring initially but was never counted;
        // evicting it must not wrap the zero count.
        assert_eq!(h.counts()[0], 0);
    }

    #[test]
    fn single_slot_histogram_tracks_latest() {
        let mut h = Histogram::new(1);
        h.add(b'a');
        h.add(b'b');
        assert_eq!(h.counts()[b'a' as usize], 0);
        assert_eq!(h.counts()[b'b' as usize], 1);
    }

    #[test]
    fn mixer_markov_key_shifts() {
        let mut m = Mixer::new();
        m.add(b'x');
        m.add(b'y');
        m.add(b'z');
        assert_eq!(m.markov_key(), (b'y', b'z'));
    }

    #[test]
    fn mix_floats_is_a_distribution() {
        let mut m = Mixer::new();
        for &s in b"the quick brown fox" {
            m.add(s);
        }
        let mix = m.mix_floats();
        assert_eq!(mix.len(), FINGERPRINT_DIM);
        let sum: f64 = mix.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(mix.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn empty_mixer_mixes_to_zero() {
        let m = Mixer::new();
        assert!(m.mix_floats().iter().all(|&v| v == 0.0));
        assert!(m.mix_bytes().iter().all(|&v| v == 0));
    }

    #[test]
    fn mix_is_deterministic() {
        let mut a = Mixer::new();
        let mut b = Mixer::new();
        for &s in b"determinism" {
            a.add(s);
            b.add(s);
        }
        assert_eq!(a.mix_bytes(), b.mix_bytes());
        assert_eq!(a.mix_floats(), b.mix_floats());
    }

    #[test]
    fn clone_is_independent() {
        let mut original = Mixer::new();
        for &s in b"abcabc" {
            original.add(s);
        }
        let mut copy = original.clone();
        copy.add(b'z');
        copy.add(b'z');
        assert_ne!(original.mix_bytes(), copy.mix_bytes());
        assert_eq!(original.markov_key(), (b'b', b'c'));
        assert_eq!(copy.markov_key(), (b'z', b'z'));
    }
}
