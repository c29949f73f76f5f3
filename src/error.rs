use std::path::PathBuf;

/// Errors surfaced by every public operation in this crate.
///
/// Propagation policy: nothing here is caught internally. Every fallible
/// operation bubbles its error up to the driver (the `ktree` binary, or
/// whichever caller owns the top-level `?`), which is the only place that
/// prints a message and picks an exit code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {name} = {value}")]
    InvalidArgument { name: &'static str, value: String },

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("unknown mode {0:?}, expected \"index\" or \"query\"")]
    UnknownMode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("data file {path:?} is too short for {expected} points of {dimensions} dimensions")]
    SizeMismatch { path: PathBuf, expected: usize, dimensions: usize },

    #[error("index directory {0:?} already exists")]
    IndexExists(PathBuf),

    #[error("failed to create index directory {0:?}")]
    IndexCreateFailed(PathBuf),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("invalid segmentation: {0}")]
    InvalidSegmentation(String),

    #[error("a build worker panicked")]
    WorkerPanicked,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
