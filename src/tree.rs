//! Single-threaded tree construction: `split` one node at a time from a
//! stack, exactly mirroring the non-parallel code path the source falls
//! back to when built without threading. [`crate::parallel`] runs the same
//! per-node split on a worker pool instead of this stack, using
//! [`snapshot_node`]/[`compute_split`]/[`apply_split`] directly so that the
//! expensive part (file I/O, the kernel SVD fit) runs without holding the
//! shared arena lock; only [`apply_split`]'s bookkeeping needs it.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::DMatrix;
use rand::Rng;

use crate::config::Config;
use crate::error::Result;
use crate::node::{Arena, InternalData, Node, NodeId, NodeKind};
use crate::segmentation::Segmentation;
use crate::summary::{self, Summary};
use crate::vector::VectorContainer;

/// `node_<id>_data_<n>.dat` file names need a source of uniqueness distinct
/// from the node identifier; the source uses a second runtime counter for
/// this ("data pointer"), incremented only on finalize. `NodeId` already
/// does the job `node_<addr>` did, so this plays the role of the source's
/// second, independently-incrementing counter.
static DATA_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn leaf_filename(node_id: NodeId) -> String {
    let data_id = DATA_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("node_{node_id}_data_{data_id}.dat")
}

fn disposable_filename(node_id: NodeId, side: u8) -> String {
    let random: u32 = rand::thread_rng().gen();
    format!("node_{node_id}_disposable_{random}_n_{side}.dat")
}

fn resolve_source_path(node: &Node, index_dir: &Path) -> PathBuf {
    if node.root_external {
        PathBuf::from(&node.filename)
    } else {
        index_dir.join(&node.filename)
    }
}

/// The handful of a leaf node's fields `compute_split` needs, read under a
/// short lock and then owned for the rest of the (unlocked) work.
pub(crate) struct NodeSnapshot {
    num_points: usize,
    has_parent: bool,
    source_path: PathBuf,
    segmentation: Segmentation,
    is_intermediate: bool,
}

pub(crate) fn snapshot_node(node: &Node, index_dir: &Path) -> NodeSnapshot {
    NodeSnapshot {
        num_points: node.num_points,
        has_parent: node.parent.is_some(),
        source_path: resolve_source_path(node, index_dir),
        segmentation: node.segmentation.clone(),
        is_intermediate: node.is_intermediate,
    }
}

/// A not-yet-allocated child: [`apply_split`] turns this into a real
/// `NodeId` once it has the arena in hand.
pub(crate) struct ChildSpec {
    filename: String,
    segmentation: Segmentation,
    num_points: usize,
}

/// The result of splitting one node, computed with no arena access at all
/// so it can be built outside any lock. [`apply_split`] writes it back.
pub(crate) enum SplitOutcome {
    RenamedLeaf {
        filename: String,
    },
    MaterializedLeaf {
        filename: String,
        segments_mins: Vec<f32>,
        segments_maxs: Vec<f32>,
        container: VectorContainer,
    },
    Internal {
        segments_mins: Vec<f32>,
        segments_maxs: Vec<f32>,
        median: f32,
        best_segment_index: usize,
        best_segment_dimensions: Vec<usize>,
        w: DMatrix<f32>,
        b: DMatrix<f32>,
        z: DMatrix<f32>,
        projected_data: DMatrix<f32>,
        components: DMatrix<f32>,
        left: Option<ChildSpec>,
        right: Option<ChildSpec>,
    },
}

/// Builds a whole tree from `dataset_path` by repeatedly popping a node off
/// a stack and splitting it, depth-first, until every leaf is finalized.
pub fn build(dataset_path: &Path, config: &Config) -> Result<(Arena, NodeId)> {
    let mut arena = Arena::new();
    let segmentation = Segmentation::whole(config.dimensions);
    let root = Node::new_root(dataset_path.display().to_string(), segmentation, config.dataset_size);
    let root_id = arena.push(root);

    let mut stack = vec![root_id];
    while let Some(id) = stack.pop() {
        split_node(&mut arena, id, config)?;
        let (left, right) = arena.get(id).children();
        stack.extend(left);
        stack.extend(right);
    }
    Ok((arena, root_id))
}

/// Splits node `node_id` in place: either finalizes it as a leaf, or turns
/// it into an internal node and pushes its two children into `arena`. A
/// thin wrapper around [`compute_split`]/[`apply_split`] for callers (the
/// single-threaded builder, tests) that don't need the lock split
/// [`crate::parallel`] does.
pub fn split_node(arena: &mut Arena, node_id: NodeId, config: &Config) -> Result<()> {
    if !arena.get(node_id).is_leaf() {
        return Ok(());
    }
    let snapshot = snapshot_node(arena.get(node_id), &config.index_path);
    let outcome = compute_split(node_id, snapshot, config)?;
    apply_split(arena, node_id, outcome);
    Ok(())
}

/// All of the actual work (file I/O, the kernel SVD fit, the partitioning
/// stream): everything `split_node` does except touching the arena. Takes
/// an owned [`NodeSnapshot`] rather than `&Arena` precisely so a caller can
/// drop the arena lock before calling this.
pub(crate) fn compute_split(node_id: NodeId, snapshot: NodeSnapshot, config: &Config) -> Result<SplitOutcome> {
    let NodeSnapshot { num_points, has_parent, source_path, segmentation, is_intermediate } = snapshot;

    // Already small enough: finalize without running the summarizer. The
    // root never takes this branch, matching the source's parent check --
    // otherwise a tiny dataset would finalize before learning a single split.
    if has_parent && num_points <= config.leaf_size {
        return finalize_leaf_by_rename(node_id, &source_path, config);
    }

    let summary = summary::summarize(
        &source_path,
        config.dimensions,
        num_points,
        &segmentation,
        config.top_k,
        config.seed,
        node_id as u64,
    )?;

    let best_segment_size = segmentation.segment(summary.best_segment_index)?.size();
    if best_segment_size <= 1 {
        // The chosen segment can't be split further: the summarizer ran but
        // produced nothing usable, so fall back to a leaf built from the
        // whole (materialized) point set rather than the segment slice.
        return finalize_leaf_by_materializing(node_id, &source_path, config, summary, is_intermediate);
    }

    finalize_internal(node_id, &source_path, config, segmentation, summary, num_points, is_intermediate)
}

/// Writes a [`SplitOutcome`] back into the arena: field assignment and, for
/// an internal split, allocating the two children. Cheap and lock-friendly
/// by construction -- no file I/O or computation happens here. Returns the
/// (possibly absent) child ids so a caller can queue them for further work.
pub(crate) fn apply_split(arena: &mut Arena, node_id: NodeId, outcome: SplitOutcome) -> (Option<NodeId>, Option<NodeId>) {
    match outcome {
        SplitOutcome::RenamedLeaf { filename } => {
            let node = arena.get_mut(node_id);
            node.filename = filename;
            node.root_external = false;
            node.is_intermediate = false;
            (None, None)
        }
        SplitOutcome::MaterializedLeaf { filename, segments_mins, segments_maxs, container } => {
            let node = arena.get_mut(node_id);
            node.filename = filename;
            node.root_external = false;
            node.is_intermediate = false;
            node.segments_mins = segments_mins;
            node.segments_maxs = segments_maxs;
            node.kind = NodeKind::Leaf { data: Some(container) };
            (None, None)
        }
        SplitOutcome::Internal {
            segments_mins,
            segments_maxs,
            median,
            best_segment_index,
            best_segment_dimensions,
            w,
            b,
            z,
            projected_data,
            components,
            left,
            right,
        } => {
            let left_id = left
                .map(|spec| arena.push(Node::new_child(spec.filename, spec.segmentation, spec.num_points, node_id, true)));
            let right_id = right
                .map(|spec| arena.push(Node::new_child(spec.filename, spec.segmentation, spec.num_points, node_id, true)));

            let node = arena.get_mut(node_id);
            node.segments_mins = segments_mins;
            node.segments_maxs = segments_maxs;
            node.kind = NodeKind::Internal(Box::new(InternalData {
                median,
                best_segment_index,
                best_segment_dimensions,
                w,
                b,
                z,
                projected_data,
                components,
                left: left_id,
                right: right_id,
            }));
            (left_id, right_id)
        }
    }
}

fn finalize_leaf_by_rename(node_id: NodeId, source_path: &Path, config: &Config) -> Result<SplitOutcome> {
    let new_name = leaf_filename(node_id);
    let new_path = config.index_path.join(&new_name);
    std::fs::rename(source_path, &new_path)?;
    Ok(SplitOutcome::RenamedLeaf { filename: new_name })
}

fn finalize_leaf_by_materializing(
    node_id: NodeId,
    source_path: &Path,
    config: &Config,
    summary: Summary,
    is_intermediate: bool,
) -> Result<SplitOutcome> {
    let container = VectorContainer::load_from_file(source_path, config.dimensions, true, 0)?;
    let new_name = leaf_filename(node_id);
    let new_path = config.index_path.join(&new_name);
    container.save_to_file(&new_path)?;

    if is_intermediate {
        std::fs::remove_file(source_path)?;
    }

    Ok(SplitOutcome::MaterializedLeaf {
        filename: new_name,
        segments_mins: summary.segments_mins,
        segments_maxs: summary.segments_maxs,
        container,
    })
}

#[allow(clippy::too_many_arguments)]
fn finalize_internal(
    node_id: NodeId,
    source_path: &Path,
    config: &Config,
    mut segmentation: Segmentation,
    summary: Summary,
    num_points: usize,
    is_intermediate: bool,
) -> Result<SplitOutcome> {
    segmentation.split_segment(summary.best_segment_index)?;

    let left_name = disposable_filename(node_id, 1);
    let right_name = disposable_filename(node_id, 2);
    let left_path = config.index_path.join(&left_name);
    let right_path = config.index_path.join(&right_name);

    let projected: Vec<f32> = summary.projection.projected_data.column(0).iter().copied().collect();
    let (num_left, num_right) = partition_points(
        source_path,
        &left_path,
        &right_path,
        config.dimensions,
        num_points,
        &projected,
        summary.median,
    )?;

    if is_intermediate {
        std::fs::remove_file(source_path)?;
    }

    let left =
        (num_left > 0).then(|| ChildSpec { filename: left_name, segmentation: segmentation.clone(), num_points: num_left });
    let right =
        (num_right > 0).then(|| ChildSpec { filename: right_name, segmentation, num_points: num_right });

    Ok(SplitOutcome::Internal {
        segments_mins: summary.segments_mins,
        segments_maxs: summary.segments_maxs,
        median: summary.median,
        best_segment_index: summary.best_segment_index,
        best_segment_dimensions: summary.best_segment_dimensions,
        w: summary.projection.w,
        b: summary.projection.b,
        z: summary.projection.z,
        projected_data: summary.projection.projected_data,
        components: summary.projection.components,
        left,
        right,
    })
}

/// Streams `source` once, routing each point by its pre-computed projection
/// against `median`: strictly less goes left, everything else (including
/// ties) goes right.
fn partition_points(
    source: &Path,
    left_path: &Path,
    right_path: &Path,
    dimensions: usize,
    num_points: usize,
    projected: &[f32],
    median: f32,
) -> Result<(usize, usize)> {
    let mut left_file = BufWriter::new(File::create(left_path)?);
    let mut right_file = BufWriter::new(File::create(right_path)?);
    let mut num_left = 0usize;
    let mut num_right = 0usize;
    let mut index = 0usize;

    summary::stream_batches(source, dimensions, num_points, |batch, to_read| {
        for j in 0..to_read {
            let point = &batch[j * dimensions..(j + 1) * dimensions];
            if projected[index] < median {
                left_file.write_all(bytemuck::cast_slice(point))?;
                num_left += 1;
            } else {
                right_file.write_all(bytemuck::cast_slice(point))?;
                num_right += 1;
            }
            index += 1;
        }
        Ok(())
    })?;

    left_file.flush()?;
    right_file.flush()?;
    Ok((num_left, num_right))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_dataset(dir: &Path, name: &str, rows: &[[f32; 4]]) -> PathBuf {
        let mut container = VectorContainer::new(4);
        for row in rows {
            container.append(row.to_vec());
        }
        let path = dir.join(name);
        container.save_to_file(&path).unwrap();
        path
    }

    fn base_config(dir: &Path) -> Config {
        Config {
            index_path: dir.to_path_buf(),
            dimensions: 4,
            leaf_size: 1,
            top_k: 2,
            seed: Some(42),
            ..Config::default()
        }
    }

    #[test]
    fn single_point_becomes_a_leaf_by_rename() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(dir.path(), "in.dat", &[[1.0, 2.0, 3.0, 4.0]]);
        let mut config = base_config(dir.path());
        config.dataset_size = 1;

        let (arena, root) = build(&dataset, &config).unwrap();
        let node = arena.get(root);
        assert!(node.is_leaf());
        assert_eq!(node.num_points, 1);
        assert!(dir.path().join(&node.filename).exists());
    }

    #[test]
    fn two_clusters_split_into_two_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(dir.path(), "in.dat", &[
            [0.0, 0.0, 0.0, 0.0],
            [0.1, 0.1, 0.1, 0.1],
            [10.0, 10.0, 10.0, 10.0],
            [10.1, 10.1, 10.1, 10.1],
        ]);
        let mut config = base_config(dir.path());
        config.dataset_size = 4;
        config.leaf_size = 1;

        let (arena, root) = build(&dataset, &config).unwrap();
        assert!(!arena.get(root).is_leaf());
        let (leaves, internal) = arena.count_kinds(root);
        assert_eq!(leaves + internal, arena.len());
        assert!(leaves >= 2);

        let total: usize = (0..arena.len())
            .filter_map(|id| {
                let n = arena.get(id);
                n.is_leaf().then_some(n.num_points)
            })
            .sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn intermediate_split_files_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = write_dataset(dir.path(), "in.dat", &[
            [0.0, 0.0, 0.0, 0.0],
            [0.1, 0.1, 0.1, 0.1],
            [10.0, 10.0, 10.0, 10.0],
            [10.1, 10.1, 10.1, 10.1],
        ]);
        let mut config = base_config(dir.path());
        config.dataset_size = 4;

        let (arena, root) = build(&dataset, &config).unwrap();
        for id in 0..arena.len() {
            let node = arena.get(id);
            if node.is_leaf() {
                assert!(!node.filename.contains("disposable"));
            }
        }
    }
}
