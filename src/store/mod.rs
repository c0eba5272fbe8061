//! On-disk fingerprint store
//!
//! Flat sorted binary record files plus the machinery that builds them:
//! fixed-width record serialization, split hyperplanes for LSH bucketing,
//! PageRank ordering of Markov key groups, and the build pipeline that ties
//! them together behind a single [`StoreVariant`] configuration.

pub mod builder;
pub mod error;
pub mod pagerank;
pub mod record;
pub mod splits;

pub use builder::{BuildConfig, Manifest, SplitKind, StoreBuilder};
pub use error::{StoreError, StoreResult};
pub use record::{
    pack_markov, FingerprintData, IndexKind, Precision, Record, StoreReader, StoreVariant,
    StoreWriter,
};
pub use splits::{SplitHyperplanes, TrainConfig, SPLIT_COUNT};
