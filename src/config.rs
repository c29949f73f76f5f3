//! Run configuration: the CLI-derived settings shared across a build or
//! query run.

use std::path::PathBuf;

/// Whether this run builds an index or answers queries against one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Index,
    Query,
}

impl std::str::FromStr for Mode {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_lowercase().as_str() {
            "index" => Ok(Mode::Index),
            "query" => Ok(Mode::Query),
            other => Err(crate::error::Error::UnknownMode(other.to_string())),
        }
    }
}

/// Everything a build or query run needs. Only `dataset_size`, `dimensions`,
/// `leaf_size` and `top_k` are persisted into the index file; the rest are
/// per-invocation and re-supplied on every run (see [`crate::persistence`]).
#[derive(Debug, Clone)]
pub struct Config {
    pub dataset: PathBuf,
    pub queries: Option<PathBuf>,
    pub index_path: PathBuf,
    pub dataset_size: usize,
    pub queries_size: usize,
    pub dimensions: usize,
    pub leaf_size: usize,
    pub top_k: usize,
    pub mode: Mode,
    /// Seeds every node's random-Fourier-feature draw deterministically via
    /// `seed ^ node_counter`. `None` means non-deterministic builds.
    pub seed: Option<u64>,
    /// Number of worker threads for a parallel build; `1` runs the
    /// single-threaded stack-based builder instead.
    pub threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dataset: PathBuf::new(),
            queries: None,
            index_path: PathBuf::new(),
            dataset_size: 0,
            queries_size: 0,
            dimensions: 0,
            leaf_size: 1,
            top_k: 5,
            mode: Mode::Index,
            seed: None,
            threads: 1,
        }
    }
}
