//! # seqprint
//!
//! Context-fingerprint store for next-symbol prediction over byte streams.
//!
//! A training corpus is scanned into 256-dim fingerprints of recent symbol
//! history (windowed histograms reduced by self-attention), and every
//! (fingerprint, next-symbol) pair is serialized into a flat sorted binary
//! store. At query time the store is searched — by Markov key, by LSH
//! locality code, or brute force — for the stored fingerprint most similar
//! to the running context, and its symbol becomes the prediction.

pub mod mix;
pub mod query;
pub mod store;

pub use mix::{cosine, Mixer, FINGERPRINT_DIM};
pub use query::{QueryEngine, SearchMode};
pub use store::{
    BuildConfig, IndexKind, Manifest, Precision, SplitHyperplanes, SplitKind, StoreBuilder,
    StoreError, StoreReader, StoreResult, StoreVariant, TrainConfig,
};
