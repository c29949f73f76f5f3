//! Command-line flags for the `ktree` binary.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use crate::config::{Config, Mode};
use crate::error::{Error, Result};

#[derive(Debug, Parser)]
#[command(name = "ktree", about = "Disk-resident approximate nearest neighbor index")]
pub struct Cli {
    /// Path to the dataset file (build mode)
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Path to the queries file (query mode)
    #[arg(long)]
    pub queries: Option<PathBuf>,

    /// Path to the index directory
    #[arg(long)]
    pub index: PathBuf,

    /// Number of points to index from the dataset
    #[arg(long)]
    pub dataset_size: Option<usize>,

    /// Number of queries to run; 0 means "all queries in file"
    #[arg(long, default_value_t = 0)]
    pub queries_size: usize,

    /// Vector dimensionality
    #[arg(long)]
    pub dimensions: usize,

    /// Maximum points per leaf
    #[arg(long, default_value_t = 1)]
    pub leaf_size: usize,

    /// Feature-selection top-k
    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    /// "index" or "query"
    #[arg(long)]
    pub mode: String,

    /// Worker count for a parallel build; 0 means hardware parallelism
    #[arg(long, default_value_t = 1)]
    pub threads: usize,

    /// Optional deterministic RNG seed
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Cli {
    /// Validates the parsed flags against the run's `mode` and turns them
    /// into a [`Config`].
    pub fn into_config(self) -> Result<Config> {
        let mode = Mode::from_str(&self.mode)?;

        let dimensions = non_zero("dimensions", self.dimensions)?;
        let leaf_size = non_zero("leaf_size", self.leaf_size)?;
        let top_k = non_zero("top_k", self.top_k)?;

        let dataset = match mode {
            Mode::Index => self.dataset.ok_or_else(|| Error::InvalidArgument {
                name: "dataset",
                value: "missing (required in index mode)".to_string(),
            })?,
            Mode::Query => self.dataset.unwrap_or_default(),
        };

        let dataset_size = match mode {
            Mode::Index => non_zero(
                "dataset_size",
                self.dataset_size.ok_or_else(|| Error::InvalidArgument {
                    name: "dataset_size",
                    value: "missing (required in index mode)".to_string(),
                })?,
            )?,
            Mode::Query => self.dataset_size.unwrap_or(0),
        };

        let threads = if self.threads == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            self.threads
        };

        Ok(Config {
            dataset,
            queries: self.queries,
            index_path: self.index,
            dataset_size,
            queries_size: self.queries_size,
            dimensions,
            leaf_size,
            top_k,
            mode,
            seed: self.seed,
            threads,
        })
    }
}

fn non_zero(name: &'static str, value: usize) -> Result<usize> {
    if value == 0 {
        Err(Error::InvalidArgument { name, value: value.to_string() })
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn zero_dimensions_is_rejected() {
        let cli = Cli {
            dataset: Some(PathBuf::from("d.dat")),
            queries: None,
            index: PathBuf::from("idx"),
            dataset_size: Some(10),
            queries_size: 0,
            dimensions: 0,
            leaf_size: 1,
            top_k: 5,
            mode: "index".to_string(),
            threads: 1,
            seed: None,
        };
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let cli = Cli {
            dataset: Some(PathBuf::from("d.dat")),
            queries: None,
            index: PathBuf::from("idx"),
            dataset_size: Some(10),
            queries_size: 0,
            dimensions: 4,
            leaf_size: 1,
            top_k: 5,
            mode: "banana".to_string(),
            threads: 1,
            seed: None,
        };
        assert!(cli.into_config().is_err());
    }
}
