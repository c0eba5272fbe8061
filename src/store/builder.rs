//! Store builder
//!
//! Scans a training corpus, extracts one fingerprint record per position
//! (except the last byte), orders the records by the variant's indexing
//! discipline, and serializes them to a flat binary store file plus a JSON
//! manifest. Builds are deterministic: the same corpus and seed produce
//! byte-identical store and split files.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{StoreError, StoreResult};
use super::pagerank::{rank_block, BLOCK_SIZE};
use super::record::{FingerprintData, IndexKind, Precision, Record, StoreVariant, StoreWriter};
use super::splits::{SplitHyperplanes, TrainConfig};
use crate::mix::{Mixer, FINGERPRINT_DIM};

/// How split hyperplanes are produced for LSH stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitKind {
    Random,
    Trained,
}

/// Build-time configuration.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    pub variant: StoreVariant,
    pub split_kind: SplitKind,
    pub seed: u64,
    pub train: TrainConfig,
    pub verbose: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            variant: StoreVariant {
                precision: Precision::Byte,
                index: IndexKind::Lsh,
                rank_tiebreak: false,
            },
            split_kind: SplitKind::Random,
            seed: 1,
            train: TrainConfig::default(),
            verbose: false,
        }
    }
}

/// JSON sidecar describing a built store.
///
/// Carries everything the query engine needs that is not in the record
/// file itself — in particular the split-similarity average, which is
/// computed once over the whole corpus at build time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub variant: StoreVariant,
    pub record_len: usize,
    pub record_count: u64,
    /// Present for LSH stores only.
    pub split_kind: Option<SplitKind>,
    pub split_seed: Option<u64>,
    pub split_average: Option<f64>,
    /// Hex SHA-256 of the training corpus.
    pub corpus_digest: String,
}

impl Manifest {
    pub const VERSION: u32 = 1;

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).map_err(|e| {
            StoreError::ManifestMismatch {
                reason: format!("cannot encode manifest: {}", e),
            }
        })
    }

    pub fn load(path: &Path) -> StoreResult<Self> {
        let file = File::open(path)?;
        let manifest: Manifest =
            serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| {
                StoreError::ManifestMismatch {
                    reason: format!("cannot decode manifest: {}", e),
                }
            })?;
        if manifest.version != Self::VERSION {
            return Err(StoreError::ManifestMismatch {
                reason: format!(
                    "unsupported manifest version {} (expected {})",
                    manifest.version,
                    Self::VERSION
                ),
            });
        }
        Ok(manifest)
    }
}

fn hex_digest(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    let mut out = String::with_capacity(hash.len() * 2);
    for b in hash {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Builds fingerprint stores from a corpus.
pub struct StoreBuilder {
    config: BuildConfig,
}

impl StoreBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Build the store, split file (LSH variants), and manifest.
    ///
    /// Returns the manifest that was written.
    pub fn build(
        &self,
        corpus: &[u8],
        store_path: &Path,
        splits_path: &Path,
        manifest_path: &Path,
    ) -> StoreResult<Manifest> {
        if corpus.len() < 2 {
            return Err(StoreError::CorpusTooShort {
                len: corpus.len(),
                min: 2,
            });
        }
        let variant = self.config.variant;

        let (mut records, floats) = self.extract(corpus);

        let mut split_average = None;
        match variant.index {
            IndexKind::Lsh => {
                let splits = match self.config.split_kind {
                    SplitKind::Random => SplitHyperplanes::random(self.config.seed),
                    SplitKind::Trained => SplitHyperplanes::trained(
                        &floats,
                        &self.config.train,
                        self.config.seed,
                        self.config.verbose,
                    ),
                };
                let average = splits.average_similarity(&floats);
                if self.config.verbose {
                    eprintln!("split similarity average: {}", average);
                }
                for (record, fp) in records.iter_mut().zip(&floats) {
                    record.key = splits.project(fp, average);
                }
                // Stable: equal codes keep corpus order.
                records.sort_by_key(|r| r.key);
                splits.save(splits_path)?;
                split_average = Some(average);
            }
            IndexKind::Markov => {
                self.order_markov(&mut records, &floats);
            }
        }

        let mut writer = StoreWriter::new(BufWriter::new(File::create(store_path)?), variant);
        for record in &records {
            writer.write(record)?;
        }
        let record_count = writer.finish()?;

        let manifest = Manifest {
            version: Manifest::VERSION,
            variant,
            record_len: variant.record_len(),
            record_count,
            split_kind: match variant.index {
                IndexKind::Lsh => Some(self.config.split_kind),
                IndexKind::Markov => None,
            },
            split_seed: match variant.index {
                IndexKind::Lsh => Some(self.config.seed),
                IndexKind::Markov => None,
            },
            split_average,
            corpus_digest: hex_digest(corpus),
        };
        manifest.save(manifest_path)?;
        Ok(manifest)
    }

    /// One record per corpus position except the last; record `i`'s symbol
    /// is the byte that followed the context producing its fingerprint.
    fn extract(&self, corpus: &[u8]) -> (Vec<Record>, Vec<[f64; FINGERPRINT_DIM]>) {
        let variant = self.config.variant;
        let count = corpus.len() - 1;
        let mut records = Vec::with_capacity(count);
        let mut floats = Vec::with_capacity(count);
        let mut mixer = Mixer::new();
        for (i, window) in corpus.windows(2).enumerate() {
            mixer.add(window[0]);
            let fp = mixer.mix_floats();
            let fingerprint = match variant.precision {
                Precision::Byte => {
                    let mut bytes = [0u8; FINGERPRINT_DIM];
                    for (b, &v) in bytes.iter_mut().zip(&fp) {
                        *b = (255.0 * v) as u8;
                    }
                    FingerprintData::Bytes(bytes)
                }
                Precision::Float => FingerprintData::Floats(Box::new(fp)),
            };
            let markov = match variant.index {
                IndexKind::Markov => Some(mixer.markov_key()),
                IndexKind::Lsh => None,
            };
            records.push(Record {
                fingerprint,
                markov,
                symbol: window[1],
                key: i as u64,
            });
            floats.push(fp);
            if self.config.verbose && (i + 1) % 4096 == 0 {
                eprintln!("extracted {}/{} fingerprints", i + 1, count);
            }
        }
        (records, floats)
    }

    /// Sort by Markov pair; within each key group, order by descending
    /// PageRank over the similarity graph (chunked so the pairwise matrix
    /// stays bounded). Equal ranks keep corpus order.
    fn order_markov(&self, records: &mut Vec<Record>, floats: &[[f64; FINGERPRINT_DIM]]) {
        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by_key(|&i| records[i].markov_sort_key());

        if self.config.variant.rank_tiebreak {
            let mut start = 0;
            while start < order.len() {
                let key = records[order[start]].markov_sort_key();
                let mut end = start + 1;
                while end < order.len() && records[order[end]].markov_sort_key() == key {
                    end += 1;
                }
                for chunk in order[start..end].chunks_mut(BLOCK_SIZE) {
                    let block: Vec<[f64; FINGERPRINT_DIM]> =
                        chunk.iter().map(|&i| floats[i]).collect();
                    let ranks = rank_block(&block);
                    let mut ranked: Vec<(usize, f64)> = chunk
                        .iter()
                        .copied()
                        .zip(ranks)
                        .collect();
                    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                    for (slot, (index, _)) in chunk.iter_mut().zip(ranked) {
                        *slot = index;
                    }
                }
                start = end;
            }
        }

        let mut reordered = Vec::with_capacity(records.len());
        for &i in &order {
            reordered.push(records[i].clone());
        }
        *records = reordered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markov_variant() -> StoreVariant {
        StoreVariant {
            precision: Precision::Byte,
            index: IndexKind::Markov,
            rank_tiebreak: true,
        }
    }

    #[test]
    fn extract_produces_one_record_per_position() {
        let builder = StoreBuilder::new(BuildConfig::default());
        let corpus = b"hello world";
        let (records, floats) = builder.extract(corpus);
        assert_eq!(records.len(), corpus.len() - 1);
        assert_eq!(floats.len(), corpus.len() - 1);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.symbol, corpus[i + 1]);
            assert_eq!(record.key, i as u64);
        }
    }

    #[test]
    fn markov_records_carry_the_context_pair() {
        let config = BuildConfig {
            variant: markov_variant(),
            ..BuildConfig::default()
        };
        let builder = StoreBuilder::new(config);
        let (records, _) = builder.extract(b"abcd");
        assert_eq!(records[0].markov, Some((0, b'a')));
        assert_eq!(records[1].markov, Some((b'a', b'b')));
        assert_eq!(records[2].markov, Some((b'b', b'c')));
    }

    #[test]
    fn markov_order_is_sorted_by_pair() {
        let config = BuildConfig {
            variant: markov_variant(),
            ..BuildConfig::default()
        };
        let builder = StoreBuilder::new(config);
        let (mut records, floats) = builder.extract(b"the cat sat on the mat");
        builder.order_markov(&mut records, &floats);
        for pair in records.windows(2) {
            assert!(pair[0].markov_sort_key() <= pair[1].markov_sort_key());
        }
    }

    #[test]
    fn build_rejects_tiny_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StoreBuilder::new(BuildConfig::default());
        let result = builder.build(
            b"x",
            &dir.path().join("store.bin"),
            &dir.path().join("splits.bin"),
            &dir.path().join("manifest.json"),
        );
        match result {
            Err(StoreError::CorpusTooShort { len: 1, .. }) => {}
            other => panic!("expected CorpusTooShort, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn manifest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = Manifest {
            version: Manifest::VERSION,
            variant: markov_variant(),
            record_len: 267,
            record_count: 99,
            split_kind: None,
            split_seed: None,
            split_average: None,
            corpus_digest: "deadbeef".into(),
        };
        manifest.save(&path).unwrap();
        assert_eq!(Manifest::load(&path).unwrap(), manifest);
    }

    #[test]
    fn manifest_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = Manifest {
            version: Manifest::VERSION,
            variant: markov_variant(),
            record_len: 267,
            record_count: 0,
            split_kind: None,
            split_seed: None,
            split_average: None,
            corpus_digest: String::new(),
        };
        manifest.version = 999;
        manifest.save(&path).unwrap();
        assert!(matches!(
            Manifest::load(&path),
            Err(StoreError::ManifestMismatch { .. })
        ));
    }
}
