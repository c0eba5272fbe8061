//! Fingerprint records and their flat binary serialization
//!
//! A store file is a sequence of fixed-width records, sorted at build time.
//! All multi-byte fields are big-endian. The record width is constant per
//! store variant and is used verbatim for random-access seeking
//! (`offset = record_index * record_len`), so reader and writer must agree
//! on the variant exactly.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{StoreError, StoreResult};
use crate::mix::{cosine, FINGERPRINT_DIM};

/// On-disk fingerprint precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// One byte per component, quantized to 0..=255.
    Byte,
    /// Eight bytes per component, big-endian IEEE-754.
    Float,
}

impl Precision {
    /// Serialized fingerprint width in bytes.
    pub fn fingerprint_len(self) -> usize {
        match self {
            Precision::Byte => FINGERPRINT_DIM,
            Precision::Float => FINGERPRINT_DIM * 8,
        }
    }
}

/// Store indexing discipline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Records keyed and sorted by 64-bit locality code.
    Lsh,
    /// Records keyed by the 2-symbol Markov pair, sorted by
    /// `(first, second)` and optionally rank-ordered within key groups.
    Markov,
}

/// One store configuration: precision, indexing discipline, and whether
/// Markov key groups are rank-ordered by PageRank.
///
/// Every build/query code path is parameterized by this value instead of
/// being forked per variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreVariant {
    pub precision: Precision,
    pub index: IndexKind,
    pub rank_tiebreak: bool,
}

impl StoreVariant {
    /// Byte width of the serialized Markov field (0 or 2).
    pub fn markov_len(&self) -> usize {
        match self.index {
            IndexKind::Markov => 2,
            IndexKind::Lsh => 0,
        }
    }

    /// Total serialized record width for this variant.
    pub fn record_len(&self) -> usize {
        // fingerprint + markov + symbol + key
        self.precision.fingerprint_len() + self.markov_len() + 1 + 8
    }
}

/// Fingerprint payload in either stored precision.
#[derive(Clone, Debug, PartialEq)]
pub enum FingerprintData {
    Bytes([u8; FINGERPRINT_DIM]),
    Floats(Box<[f64; FINGERPRINT_DIM]>),
}

impl FingerprintData {
    /// Widen to f64 components for similarity scoring.
    pub fn to_floats(&self) -> [f64; FINGERPRINT_DIM] {
        match self {
            FingerprintData::Bytes(b) => {
                let mut out = [0.0; FINGERPRINT_DIM];
                for (o, &v) in out.iter_mut().zip(b.iter()) {
                    *o = f64::from(v);
                }
                out
            }
            FingerprintData::Floats(f) => **f,
        }
    }
}

/// Pack a Markov pair into its sort key: `(first << 8) | second`.
pub fn pack_markov(pair: (u8, u8)) -> u64 {
    (u64::from(pair.0) << 8) | u64::from(pair.1)
}

/// One (fingerprint, next-symbol) observation.
///
/// `key` holds the sequence index in Markov stores and the locality code in
/// LSH stores. Records are immutable once written; the only lifecycle is
/// creation at build time and storage.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub fingerprint: FingerprintData,
    pub markov: Option<(u8, u8)>,
    pub symbol: u8,
    pub key: u64,
}

impl Record {
    /// Cosine similarity between the stored fingerprint and a live query
    /// vector. Degenerate (zero-magnitude) fingerprints score 0.0.
    pub fn cosine(&self, query: &[f64; FINGERPRINT_DIM]) -> f64 {
        cosine(&self.fingerprint.to_floats(), query)
    }

    /// Sort key of the Markov pair, if present.
    pub fn markov_sort_key(&self) -> u64 {
        self.markov.map(pack_markov).unwrap_or(0)
    }

    /// Serialize into `buf`, which must be exactly `variant.record_len()`.
    pub fn encode(&self, variant: &StoreVariant, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), variant.record_len());
        let mut at = 0;
        match (&self.fingerprint, variant.precision) {
            (FingerprintData::Bytes(b), Precision::Byte) => {
                buf[..FINGERPRINT_DIM].copy_from_slice(b);
                at = FINGERPRINT_DIM;
            }
            (FingerprintData::Floats(f), Precision::Float) => {
                for v in f.iter() {
                    buf[at..at + 8].copy_from_slice(&v.to_be_bytes());
                    at += 8;
                }
            }
            _ => panic!("record precision does not match store variant"),
        }
        if variant.markov_len() == 2 {
            let (first, second) = self.markov.unwrap_or((0, 0));
            buf[at] = first;
            buf[at + 1] = second;
            at += 2;
        }
        buf[at] = self.symbol;
        at += 1;
        buf[at..at + 8].copy_from_slice(&self.key.to_be_bytes());
    }

    /// Deserialize from `buf`, which must be exactly `variant.record_len()`.
    pub fn decode(variant: &StoreVariant, buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), variant.record_len());
        let mut at = 0;
        let fingerprint = match variant.precision {
            Precision::Byte => {
                let mut b = [0u8; FINGERPRINT_DIM];
                b.copy_from_slice(&buf[..FINGERPRINT_DIM]);
                at = FINGERPRINT_DIM;
                FingerprintData::Bytes(b)
            }
            Precision::Float => {
                let mut f = Box::new([0.0; FINGERPRINT_DIM]);
                for v in f.iter_mut() {
                    *v = f64::from_be_bytes(buf[at..at + 8].try_into().unwrap());
                    at += 8;
                }
                FingerprintData::Floats(f)
            }
        };
        let markov = if variant.markov_len() == 2 {
            let pair = (buf[at], buf[at + 1]);
            at += 2;
            Some(pair)
        } else {
            None
        };
        let symbol = buf[at];
        at += 1;
        let key = u64::from_be_bytes(buf[at..at + 8].try_into().unwrap());
        Self {
            fingerprint,
            markov,
            symbol,
            key,
        }
    }
}

/// Sequential record writer over a store file.
pub struct StoreWriter<W: Write> {
    inner: W,
    variant: StoreVariant,
    buf: Vec<u8>,
    written: u64,
}

impl<W: Write> StoreWriter<W> {
    pub fn new(inner: W, variant: StoreVariant) -> Self {
        let buf = vec![0u8; variant.record_len()];
        Self {
            inner,
            variant,
            buf,
            written: 0,
        }
    }

    pub fn write(&mut self, record: &Record) -> StoreResult<()> {
        record.encode(&self.variant, &mut self.buf);
        self.inner.write_all(&self.buf)?;
        self.written += 1;
        Ok(())
    }

    /// Flush and return the number of records written.
    pub fn finish(mut self) -> StoreResult<u64> {
        self.inner.flush()?;
        Ok(self.written)
    }
}

/// Random-access record reader over a store file.
///
/// Opening validates that the file decomposes into whole records for the
/// given variant; a trailing partial record is a fatal malformed-store
/// error, never skipped.
pub struct StoreReader {
    file: File,
    path: PathBuf,
    variant: StoreVariant,
    record_len: usize,
    records: u64,
    buf: Vec<u8>,
}

impl StoreReader {
    pub fn open(path: &Path, variant: StoreVariant) -> StoreResult<Self> {
        let file = File::open(path)?;
        let bytes = file.metadata()?.len();
        let record_len = variant.record_len();
        if bytes % record_len as u64 != 0 {
            return Err(StoreError::MalformedStore {
                path: path.to_path_buf(),
                reason: format!(
                    "file length {} is not a multiple of record length {}",
                    bytes, record_len
                ),
            });
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            variant,
            record_len,
            records: bytes / record_len as u64,
            buf: vec![0u8; record_len],
        })
    }

    /// Number of records in the store.
    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn variant(&self) -> &StoreVariant {
        &self.variant
    }

    /// Read the record at `index` via a direct seek.
    pub fn read_at(&mut self, index: u64) -> StoreResult<Record> {
        debug_assert!(index < self.records);
        self.file
            .seek(SeekFrom::Start(index * self.record_len as u64))?;
        self.file.read_exact(&mut self.buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                StoreError::MalformedStore {
                    path: self.path.clone(),
                    reason: format!("truncated record at index {}", index),
                }
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(Record::decode(&self.variant, &self.buf))
    }

    /// Index of the first record whose extracted key is >= `target`, or
    /// `len()` if no such record exists. Requires the store to be sorted by
    /// the extracted key, which the builder guarantees.
    pub fn lower_bound<F>(&mut self, target: u64, key: F) -> StoreResult<u64>
    where
        F: Fn(&Record) -> u64,
    {
        let (mut lo, mut hi) = (0u64, self.records);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let record = self.read_at(mid)?;
            if key(&record) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_lsh() -> StoreVariant {
        StoreVariant {
            precision: Precision::Byte,
            index: IndexKind::Lsh,
            rank_tiebreak: false,
        }
    }

    fn byte_markov() -> StoreVariant {
        StoreVariant {
            precision: Precision::Byte,
            index: IndexKind::Markov,
            rank_tiebreak: true,
        }
    }

    fn float_lsh() -> StoreVariant {
        StoreVariant {
            precision: Precision::Float,
            index: IndexKind::Lsh,
            rank_tiebreak: false,
        }
    }

    #[test]
    fn record_lengths_match_layout() {
        assert_eq!(byte_lsh().record_len(), 256 + 1 + 8);
        assert_eq!(byte_markov().record_len(), 256 + 2 + 1 + 8);
        assert_eq!(float_lsh().record_len(), 2048 + 1 + 8);
    }

    #[test]
    fn byte_record_round_trips() {
        let variant = byte_lsh();
        let mut fp = [0u8; FINGERPRINT_DIM];
        for (i, v) in fp.iter_mut().enumerate() {
            *v = (i % 251) as u8;
        }
        let record = Record {
            fingerprint: FingerprintData::Bytes(fp),
            markov: None,
            symbol: b'q',
            key: 0xDEAD_BEEF_0123_4567,
        };
        let mut buf = vec![0u8; variant.record_len()];
        record.encode(&variant, &mut buf);
        assert_eq!(Record::decode(&variant, &buf), record);
    }

    #[test]
    fn markov_record_round_trips() {
        let variant = byte_markov();
        let record = Record {
            fingerprint: FingerprintData::Bytes([9; FINGERPRINT_DIM]),
            markov: Some((b'a', b'b')),
            symbol: 0,
            key: 42,
        };
        let mut buf = vec![0u8; variant.record_len()];
        record.encode(&variant, &mut buf);
        let back = Record::decode(&variant, &buf);
        assert_eq!(back.markov, Some((b'a', b'b')));
        assert_eq!(back, record);
    }

    #[test]
    fn float_record_round_trips_bit_exact() {
        let variant = float_lsh();
        let mut fp = Box::new([0.0; FINGERPRINT_DIM]);
        for (i, v) in fp.iter_mut().enumerate() {
            *v = (i as f64).sin() / 3.0;
        }
        let record = Record {
            fingerprint: FingerprintData::Floats(fp),
            markov: None,
            symbol: 255,
            key: u64::MAX,
        };
        let mut buf = vec![0u8; variant.record_len()];
        record.encode(&variant, &mut buf);
        assert_eq!(Record::decode(&variant, &buf), record);
    }

    #[test]
    fn key_is_big_endian_on_disk() {
        let variant = byte_lsh();
        let record = Record {
            fingerprint: FingerprintData::Bytes([0; FINGERPRINT_DIM]),
            markov: None,
            symbol: 0,
            key: 0x0102_0304_0506_0708,
        };
        let mut buf = vec![0u8; variant.record_len()];
        record.encode(&variant, &mut buf);
        assert_eq!(&buf[257..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn pack_markov_orders_pairs() {
        assert!(pack_markov((b'a', b'z')) < pack_markov((b'b', b'a')));
        assert_eq!(pack_markov((0, 0)), 0);
        assert_eq!(pack_markov((1, 2)), 0x0102);
    }
}
