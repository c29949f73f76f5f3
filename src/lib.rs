//! Disk-resident approximate nearest neighbor index built on a kernel-PCA
//! partitioning tree.
//!
//! A dataset of fixed-dimensionality points is recursively split into two
//! halves by a per-node learned scalar projection (random Fourier features
//! followed by a rank-1 SVD), producing a binary tree whose leaves are
//! small files of raw points. Queries descend the tree and optionally
//! revisit pruned-away siblings to improve recall. See [`index::Index`] for
//! the build/save/load/search entry points.

pub mod cli;
pub mod config;
pub mod distance;
pub mod error;
pub mod index;
pub mod kernel;
pub mod node;
pub mod parallel;
pub mod persistence;
pub mod search;
pub mod segmentation;
pub mod summary;
pub mod tree;
pub mod vector;

pub use config::Config;
pub use error::{Error, Result};
pub use index::Index;
