//! The build/save/load/search driver a CLI invocation runs once end to end.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::distance::SquaredEuclidean;
use crate::error::{Error, Result};
use crate::node::{Arena, NodeId};
use crate::persistence::{self, Decode, Encode};
use crate::search::{self, PruningStrategy};
use crate::tree;
use crate::vector::VectorContainer;

const INDEX_FILE_NAME: &str = "index.bin";

pub struct Index {
    config: Config,
    arena: Arena,
    root: Option<NodeId>,
}

impl Index {
    /// Builds a fresh index at `config.index_path` from `config.dataset`.
    /// The directory must not already exist.
    #[instrument(skip(config), fields(index_path = %config.index_path.display()))]
    pub fn build(config: Config) -> Result<Self> {
        info!("building index");
        if config.index_path.exists() {
            return Err(Error::IndexExists(config.index_path.clone()));
        }
        std::fs::create_dir_all(&config.index_path)
            .map_err(|_| Error::IndexCreateFailed(config.index_path.clone()))?;

        let start = Instant::now();
        let (arena, root) = if config.threads <= 1 {
            tree::build(&config.dataset, &config)?
        } else {
            crate::parallel::build(&config.dataset, &config)?
        };
        info!(elapsed = ?start.elapsed(), "index built");

        let (leaves, internal) = arena.count_kinds(root);
        debug!(leaves, internal, "node counts");

        Ok(Index { config, arena, root: Some(root) })
    }

    /// Writes `index.bin` (config subset + tree) into the index directory.
    #[instrument(skip(self), fields(index_path = %self.config.index_path.display()))]
    pub fn save(&self) -> Result<()> {
        let start = Instant::now();
        let path = self.config.index_path.join(INDEX_FILE_NAME);
        let mut writer = BufWriter::new(File::create(path)?);
        self.config.encode(&mut writer)?;
        persistence::encode_tree(&self.arena, self.root, &mut writer)?;
        writer.flush()?;
        info!(elapsed = ?start.elapsed(), "index saved");
        Ok(())
    }

    /// Loads a previously-saved index. `overlay` supplies the per-invocation
    /// fields that aren't persisted (`dataset`, `queries`, `index_path`,
    /// `mode`, `seed`, `threads`).
    #[instrument(skip(overlay), fields(index_path = %overlay.index_path.display()))]
    pub fn load(overlay: Config) -> Result<Self> {
        info!("loading index");
        let path = overlay.index_path.join(INDEX_FILE_NAME);
        let mut reader = BufReader::new(File::open(path)?);
        let persisted = Config::decode(&mut reader)?;
        let config = persisted_overlay(persisted, overlay);

        let (arena, root) = persistence::decode_tree(&mut reader, &config.index_path, config.dimensions)?;

        let (leaves, internal) = root.map(|r| arena.count_kinds(r)).unwrap_or((0, 0));
        info!(leaves, internal, "index loaded");

        Ok(Index { config, arena, root })
    }

    /// Runs every query in `config.queries`, writing the CSV result table
    /// to `out`.
    #[instrument(skip(self, out))]
    pub fn search<W: Write>(&self, out: &mut W) -> Result<()> {
        let Some(root) = self.root else {
            return Err(Error::CorruptIndex("index has no root to search".to_string()));
        };
        let queries_path = self.config.queries.as_ref().ok_or_else(|| Error::InvalidArgument {
            name: "queries",
            value: "missing (required in query mode)".to_string(),
        })?;

        let take_all = self.config.queries_size == 0;
        let queries = VectorContainer::load_from_file(
            queries_path,
            self.config.dimensions,
            take_all,
            self.config.queries_size,
        )?;

        writeln!(out, "Query ID, Query Time, Distance Computations, Visit Count")?;
        for (i, query) in queries.iter().enumerate() {
            let start = Instant::now();
            let outcome = search::search::<SquaredEuclidean>(
                &self.arena,
                &self.config.index_path,
                self.config.dimensions,
                root,
                query,
                1,
                PruningStrategy::Sibling,
            )?;
            let elapsed = start.elapsed();
            debug!(query = i, distance_computations = outcome.distance_computations, "query answered");
            writeln!(out, "{i}, {:?}, {}, {}", elapsed, outcome.distance_computations, outcome.visit_count)?;
        }
        Ok(())
    }
}

fn persisted_overlay(persisted: Config, overlay: Config) -> Config {
    Config {
        dataset: overlay.dataset,
        queries: overlay.queries,
        index_path: overlay.index_path,
        dataset_size: persisted.dataset_size,
        queries_size: overlay.queries_size,
        dimensions: persisted.dimensions,
        leaf_size: persisted.leaf_size,
        top_k: persisted.top_k,
        mode: overlay.mode,
        seed: overlay.seed,
        threads: overlay.threads,
    }
}
