//! Query engine
//!
//! Owns a running [`Mixer`] over the query context and searches a built
//! store for the best-matching next symbol. Three paths: Markov-indexed
//! binary search with a bounded neighborhood scan, LSH-indexed lookup with
//! Hamming-distance-1 bucket probing, and a brute-force linear scan used as
//! the correctness oracle. Selected symbols are fed back into the mixer for
//! autoregressive continuation.

use std::path::Path;

use crate::mix::{Mixer, FINGERPRINT_DIM};
use crate::store::{
    pack_markov, IndexKind, Manifest, SplitHyperplanes, StoreError, StoreReader, StoreResult,
};

/// Candidate window scanned after a Markov binary search.
pub const SCAN_WINDOW: u64 = 2048;

/// Search discipline for one prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Use the store's index (Markov or LSH binary search).
    Indexed,
    /// Linear scan of the whole store. O(store size) per symbol; the
    /// correctness oracle for the indexed paths.
    Brute,
}

/// One query run over a built store.
///
/// Each run owns its mixer; the store and split files are opened read-only
/// and treated as an immutable snapshot.
pub struct QueryEngine {
    reader: StoreReader,
    manifest: Manifest,
    splits: Option<SplitHyperplanes>,
    mixer: Mixer,
}

impl QueryEngine {
    /// Open a store for querying.
    ///
    /// `splits_path` is required for LSH stores and ignored for Markov
    /// stores. The manifest must agree with the store file on record count.
    pub fn open(
        store_path: &Path,
        splits_path: Option<&Path>,
        manifest_path: &Path,
    ) -> StoreResult<Self> {
        let manifest = Manifest::load(manifest_path)?;
        let reader = StoreReader::open(store_path, manifest.variant)?;
        if reader.len() != manifest.record_count {
            return Err(StoreError::ManifestMismatch {
                reason: format!(
                    "manifest says {} records, store holds {}",
                    manifest.record_count,
                    reader.len()
                ),
            });
        }
        let splits = match manifest.variant.index {
            IndexKind::Lsh => {
                let path = splits_path.ok_or_else(|| StoreError::ManifestMismatch {
                    reason: "LSH store requires a split file".into(),
                })?;
                if manifest.split_average.is_none() {
                    return Err(StoreError::ManifestMismatch {
                        reason: "LSH manifest is missing the split average".into(),
                    });
                }
                Some(SplitHyperplanes::load(path)?)
            }
            IndexKind::Markov => None,
        };
        Ok(Self {
            reader,
            manifest,
            splits,
            mixer: Mixer::new(),
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Feed the query context into the mixer.
    pub fn seed(&mut self, context: &[u8]) {
        for &s in context {
            self.mixer.add(s);
        }
    }

    /// Feed one symbol back into the mixer.
    pub fn push(&mut self, symbol: u8) {
        self.mixer.add(symbol);
    }

    /// Predict the next symbol without feeding it back.
    ///
    /// Returns `None` when no candidate matched (empty store or empty scan
    /// window) — a legitimate empty result, distinct from store errors.
    pub fn predict(&mut self, mode: SearchMode) -> StoreResult<Option<u8>> {
        if self.reader.is_empty() {
            return Ok(None);
        }
        let query = self.mixer.mix_floats();
        let best = match mode {
            SearchMode::Brute => self.best_brute(&query)?,
            SearchMode::Indexed => match self.manifest.variant.index {
                IndexKind::Markov => self.best_markov(&query)?,
                IndexKind::Lsh => self.best_lsh(&query)?,
            },
        };
        Ok(best.map(|(_, symbol)| symbol))
    }

    /// Autoregressive generation: predict, emit, feed back, repeat.
    ///
    /// Stops early if a prediction comes back empty.
    pub fn generate(&mut self, count: usize, mode: SearchMode) -> StoreResult<Vec<u8>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            match self.predict(mode)? {
                Some(symbol) => {
                    out.push(symbol);
                    self.push(symbol);
                }
                None => break,
            }
        }
        Ok(out)
    }

    fn best_brute(&mut self, query: &[f64; FINGERPRINT_DIM]) -> StoreResult<Option<(f64, u8)>> {
        let mut best: Option<(f64, u8)> = None;
        for i in 0..self.reader.len() {
            let record = self.reader.read_at(i)?;
            let score = record.cosine(query);
            if best.map_or(true, |(max, _)| score > max) {
                best = Some((score, record.symbol));
            }
        }
        Ok(best)
    }

    /// Binary-search the first record with Markov key >= the query's pair,
    /// then scan up to [`SCAN_WINDOW`] records or until the key changes.
    fn best_markov(&mut self, query: &[f64; FINGERPRINT_DIM]) -> StoreResult<Option<(f64, u8)>> {
        let target = pack_markov(self.mixer.markov_key());
        let start = self
            .reader
            .lower_bound(target, |r| r.markov_sort_key())?;
        if start == self.reader.len() {
            return Ok(None);
        }
        let mut best: Option<(f64, u8)> = None;
        let mut run_key = None;
        let end = (start + SCAN_WINDOW).min(self.reader.len());
        for i in start..end {
            let record = self.reader.read_at(i)?;
            let key = record.markov_sort_key();
            match run_key {
                None => run_key = Some(key),
                Some(k) if k != key => break,
                _ => {}
            }
            let score = record.cosine(query);
            if best.map_or(true, |(max, _)| score > max) {
                best = Some((score, record.symbol));
            }
        }
        Ok(best)
    }

    /// Compute the query's locality code exactly as at build time, scan the
    /// run of equal codes at the binary-search position, then probe all 64
    /// single-bit-flipped neighbor codes to widen recall.
    fn best_lsh(&mut self, query: &[f64; FINGERPRINT_DIM]) -> StoreResult<Option<(f64, u8)>> {
        let (splits, average) = match (&self.splits, self.manifest.split_average) {
            (Some(splits), Some(average)) => (splits, average),
            _ => {
                return Err(StoreError::ManifestMismatch {
                    reason: "LSH store opened without splits or split average".into(),
                })
            }
        };
        let code = splits.project(query, average);

        let mut best: Option<(f64, u8)> = None;
        self.scan_code_run(code, query, &mut best)?;
        for k in 0..64 {
            self.scan_code_run(code ^ (1 << k), query, &mut best)?;
        }
        Ok(best)
    }

    /// Score the run of records whose locality code equals `target`, if the
    /// code is present in the store at all.
    fn scan_code_run(
        &mut self,
        target: u64,
        query: &[f64; FINGERPRINT_DIM],
        best: &mut Option<(f64, u8)>,
    ) -> StoreResult<()> {
        let start = self.reader.lower_bound(target, |r| r.key)?;
        for i in start..self.reader.len() {
            let record = self.reader.read_at(i)?;
            if record.key != target {
                break;
            }
            let score = record.cosine(query);
            if best.map_or(true, |(max, _)| score > max) {
                *best = Some((score, record.symbol));
            }
        }
        Ok(())
    }
}
