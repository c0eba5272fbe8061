//! seqprint CLI
//!
//! Command-line interface for fingerprint-store operations.
//!
//! Provides commands for:
//! - Building a store from a training corpus
//! - Querying a store for autoregressive symbol prediction
//! - Showing manifest information
//! - Verifying store/manifest consistency

use clap::{Parser, Subcommand, ValueEnum};
use seqprint::{
    BuildConfig, IndexKind, Manifest, Precision, QueryEngine, SearchMode, SplitKind, StoreBuilder,
    StoreError, StoreReader, StoreVariant, TrainConfig,
};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "seqprint")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Context-fingerprint store for next-symbol prediction")]
#[command(long_about = "seqprint - Context-Fingerprint Store CLI\n\n\
    seqprint fingerprints recent symbol history with context-mixing histograms\n\
    and self-attention, stores every (fingerprint, next-symbol) observation in\n\
    a sorted binary file, and predicts continuations by nearest-fingerprint\n\
    lookup.\n\n\
    Examples:\n\
      seqprint build -c corpus.txt -s vectors.bin\n\
      seqprint query -q \"In the beginning\" -n 33\n\
      seqprint query -q \"abc\" --brute\n\
      seqprint info -m manifest.json")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VariantArg {
    /// Sort records by 64-bit locality code from split hyperplanes
    Lsh,
    /// Sort records by the 2-symbol Markov pair
    Markov,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PrecisionArg {
    /// 1 byte per fingerprint component (record length 265/267)
    Byte,
    /// 8 bytes per component, full precision (record length 2057/2059)
    Float,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a fingerprint store from a training corpus
    #[command(long_about = "Build a fingerprint store from a training corpus\n\n\
        Scans the corpus, extracts one fingerprint record per position, orders\n\
        the records by the chosen indexing discipline, and writes the store,\n\
        split, and manifest files. Builds are deterministic for a given corpus\n\
        and seed.\n\n\
        Example:\n\
          seqprint build -c corpus.txt -s vectors.bin -p splits.bin -m manifest.json\n\
          seqprint build -c corpus.txt --variant markov --no-rank")]
    Build {
        /// Training corpus (raw bytes)
        #[arg(short, long, value_name = "FILE", help_heading = "Required")]
        corpus: PathBuf,

        /// Output store file
        #[arg(short, long, default_value = "vectors.bin", value_name = "FILE")]
        store: PathBuf,

        /// Output split-hyperplane file (LSH variants)
        #[arg(short = 'p', long, default_value = "splits.bin", value_name = "FILE")]
        splits: PathBuf,

        /// Output manifest file
        #[arg(short, long, default_value = "manifest.json", value_name = "FILE")]
        manifest: PathBuf,

        /// Indexing discipline
        #[arg(long, value_enum, default_value = "lsh")]
        variant: VariantArg,

        /// On-disk fingerprint precision
        #[arg(long, value_enum, default_value = "byte")]
        precision: PrecisionArg,

        /// Gradient-train the split hyperplanes instead of sampling them
        #[arg(long)]
        trained_splits: bool,

        /// Disable PageRank ordering within Markov key groups
        #[arg(long)]
        no_rank: bool,

        /// RNG seed for split initialization
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Learning rate for trained splits
        #[arg(long, default_value_t = 0.01)]
        eta: f64,

        /// Similarity target for trained splits
        #[arg(long, default_value_t = 0.33)]
        target: f64,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Predict symbols from a query context
    #[command(long_about = "Predict a continuation for a query context\n\n\
        Feeds the query into the mixer, then repeatedly looks up the most\n\
        similar stored fingerprint and emits its symbol, feeding each\n\
        prediction back for autoregressive generation.\n\n\
        Example:\n\
          seqprint query -q \"In the beginning God created\" -n 33\n\
          seqprint query -q \"abc\" --brute")]
    Query {
        /// Store file
        #[arg(short, long, default_value = "vectors.bin", value_name = "FILE")]
        store: PathBuf,

        /// Split-hyperplane file (LSH stores)
        #[arg(short = 'p', long, default_value = "splits.bin", value_name = "FILE")]
        splits: PathBuf,

        /// Manifest file
        #[arg(short, long, default_value = "manifest.json", value_name = "FILE")]
        manifest: PathBuf,

        /// Query context
        #[arg(
            short,
            long,
            default_value = "In the beginning God created the heaven and the eart",
            value_name = "TEXT"
        )]
        query: String,

        /// Number of symbols to generate
        #[arg(short = 'n', long, default_value_t = 33)]
        count: usize,

        /// Brute-force linear scan instead of the index
        #[arg(long)]
        brute: bool,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show information about a built store
    Info {
        /// Manifest file
        #[arg(short, long, default_value = "manifest.json", value_name = "FILE")]
        manifest: PathBuf,
    },

    /// Verify store/manifest consistency
    #[command(long_about = "Verify that a store file matches its manifest\n\n\
        Checks that the file decomposes into whole records of the manifest's\n\
        record length and that the record count agrees. Reads every record to\n\
        confirm the file is seekable end to end.\n\n\
        Example:\n\
          seqprint verify -s vectors.bin -m manifest.json")]
    Verify {
        /// Store file
        #[arg(short, long, default_value = "vectors.bin", value_name = "FILE")]
        store: PathBuf,

        /// Manifest file
        #[arg(short, long, default_value = "manifest.json", value_name = "FILE")]
        manifest: PathBuf,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), StoreError> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            corpus,
            store,
            splits,
            manifest,
            variant,
            precision,
            trained_splits,
            no_rank,
            seed,
            eta,
            target,
            verbose,
        } => {
            let data = fs::read(&corpus)?;
            let config = BuildConfig {
                variant: StoreVariant {
                    precision: match precision {
                        PrecisionArg::Byte => Precision::Byte,
                        PrecisionArg::Float => Precision::Float,
                    },
                    index: match variant {
                        VariantArg::Lsh => IndexKind::Lsh,
                        VariantArg::Markov => IndexKind::Markov,
                    },
                    rank_tiebreak: matches!(variant, VariantArg::Markov) && !no_rank,
                },
                split_kind: if trained_splits {
                    SplitKind::Trained
                } else {
                    SplitKind::Random
                },
                seed,
                train: TrainConfig {
                    eta,
                    target,
                    ..TrainConfig::default()
                },
                verbose,
            };
            let built = StoreBuilder::new(config).build(&data, &store, &splits, &manifest)?;
            println!(
                "Built {} records ({} bytes each) from {} corpus bytes",
                built.record_count,
                built.record_len,
                data.len()
            );
            if let Some(average) = built.split_average {
                println!("Split similarity average: {}", average);
            }
            Ok(())
        }

        Commands::Query {
            store,
            splits,
            manifest,
            query,
            count,
            brute,
            verbose,
        } => {
            let manifest_data = Manifest::load(&manifest)?;
            let splits_arg = match manifest_data.variant.index {
                IndexKind::Lsh => Some(splits.as_path()),
                IndexKind::Markov => None,
            };
            let mut engine = QueryEngine::open(&store, splits_arg, &manifest)?;
            engine.seed(query.as_bytes());
            let mode = if brute {
                SearchMode::Brute
            } else {
                SearchMode::Indexed
            };
            let mut generated = Vec::with_capacity(count);
            for _ in 0..count {
                match engine.predict(mode)? {
                    Some(symbol) => {
                        if verbose {
                            println!("{} {:?}", symbol, symbol as char);
                        }
                        engine.push(symbol);
                        generated.push(symbol);
                    }
                    None => {
                        eprintln!("no candidate matched; stopping");
                        break;
                    }
                }
            }
            println!("{}", String::from_utf8_lossy(&generated));
            Ok(())
        }

        Commands::Info { manifest } => {
            let manifest = Manifest::load(&manifest)?;
            println!("Variant:        {:?}", manifest.variant.index);
            println!("Precision:      {:?}", manifest.variant.precision);
            println!("Rank tie-break: {}", manifest.variant.rank_tiebreak);
            println!("Record length:  {} bytes", manifest.record_len);
            println!("Record count:   {}", manifest.record_count);
            if let Some(kind) = manifest.split_kind {
                println!("Split kind:     {:?}", kind);
            }
            if let Some(seed) = manifest.split_seed {
                println!("Split seed:     {}", seed);
            }
            if let Some(average) = manifest.split_average {
                println!("Split average:  {}", average);
            }
            println!("Corpus digest:  {}", manifest.corpus_digest);
            Ok(())
        }

        Commands::Verify {
            store,
            manifest,
            verbose,
        } => {
            let manifest = Manifest::load(&manifest)?;
            let mut reader = StoreReader::open(&store, manifest.variant)?;
            if reader.len() != manifest.record_count {
                return Err(StoreError::ManifestMismatch {
                    reason: format!(
                        "manifest says {} records, store holds {}",
                        manifest.record_count,
                        reader.len()
                    ),
                });
            }
            for i in 0..reader.len() {
                reader.read_at(i)?;
                if verbose && (i + 1) % 65536 == 0 {
                    eprintln!("verified {}/{} records", i + 1, reader.len());
                }
            }
            println!(
                "OK: {} records of {} bytes",
                manifest.record_count, manifest.record_len
            );
            Ok(())
        }
    }
}
