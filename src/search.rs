//! Query-time tree descent and k-best result collection.
//!
//! Phase 1 always walks straight down to one leaf. Phase 2 then either
//! re-visits siblings along that descent path (the default), or restarts a
//! from-root walk that at each step chooses the closer of two internal
//! children (the alternative). Selecting between them is a runtime
//! [`PruningStrategy`] value rather than a `#[cfg]` flag, so both ship in
//! the same binary and both are exercised by tests.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::path::Path;

use nalgebra::DMatrix;

use crate::distance::Distance;
use crate::error::Result;
use crate::kernel;
use crate::node::{Arena, InternalData, Node, NodeId, NodeKind};
use crate::vector::VectorContainer;

/// Which Phase 2 strategy a search runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruningStrategy {
    /// Re-visit siblings along the Phase 1 descent path, pruning by a
    /// per-segment bounding-box lower bound. The default.
    Sibling,
    /// Restart from the root, descending to whichever child has the
    /// smaller bounding-box lower bound, stopping as soon as either child
    /// is a leaf.
    TopDown,
}

impl Default for PruningStrategy {
    fn default() -> Self {
        PruningStrategy::Sibling
    }
}

/// A k-best collection, kept sorted ascending by distance to the query.
struct ResultContainer<D> {
    query: Vec<f32>,
    k: usize,
    results: Vec<(f32, Vec<f32>)>,
    distance_computations: usize,
    _metric: PhantomData<D>,
}

impl<D: Distance> ResultContainer<D> {
    fn new(query: Vec<f32>, k: usize) -> Self {
        ResultContainer { query, k: k.max(1), results: Vec::new(), distance_computations: 0, _metric: PhantomData }
    }

    fn insert(&mut self, point: &[f32]) {
        let distance = D::distance(point, &self.query);
        self.distance_computations += 1;
        let position = self.results.partition_point(|(d, _)| *d <= distance);
        self.results.insert(position, (distance, point.to_vec()));
        if self.results.len() > self.k {
            self.results.pop();
        }
    }

    fn worst_distance(&self) -> f32 {
        if self.results.len() >= self.k {
            self.results.last().map(|(d, _)| *d).unwrap_or(f32::INFINITY)
        } else {
            f32::INFINITY
        }
    }
}

/// Outcome of one query: the k-best points and the bookkeeping counters the
/// CLI's CSV output reports.
pub struct SearchOutcome {
    pub results: Vec<(f32, Vec<f32>)>,
    pub distance_computations: usize,
    pub visit_count: usize,
}

fn leaf_points<'a>(node: &'a Node, index_dir: &Path, dimensions: usize) -> Result<Cow<'a, VectorContainer>> {
    match node.leaf_data() {
        Some(container) => Ok(Cow::Borrowed(container)),
        None => {
            let path = index_dir.join(&node.filename);
            Ok(Cow::Owned(VectorContainer::load_from_file(&path, dimensions, true, 0)?))
        }
    }
}

fn project_query(query: &[f32], internal: &InternalData) -> f32 {
    let row: Vec<f32> = internal.best_segment_dimensions.iter().map(|&d| query[d]).collect();
    let x = DMatrix::from_row_slice(1, row.len(), &row);
    kernel::project(&x, &internal.w, &internal.b, &internal.components)
}

fn segment_lower_bound(query: &[f32], sibling: &Node) -> f32 {
    let mut bound = 0.0f32;
    for i in 0..sibling.segmentation.size() {
        let segment = sibling.segmentation.segment(i).expect("node segmentation index is always valid");
        let q_rep: f32 = segment.indices().map(|d| query[d]).sum::<f32>() / segment.size() as f32;
        let min = sibling.segments_mins[i];
        let max = sibling.segments_maxs[i];
        if q_rep > max {
            bound += q_rep - max;
        } else if q_rep < min {
            bound += min - q_rep;
        }
    }
    bound
}

/// Phase 1: walks straight down from `node_id` to a leaf, inserting every
/// point found there, pushing each visited node onto `stack` in descent
/// order.
fn descend<D: Distance>(
    arena: &Arena,
    index_dir: &Path,
    dimensions: usize,
    mut node_id: NodeId,
    query: &[f32],
    results: &mut ResultContainer<D>,
    visit_count: &mut usize,
    stack: &mut Vec<NodeId>,
) -> Result<()> {
    loop {
        stack.push(node_id);
        *visit_count += 1;
        let node = arena.get(node_id);
        match &node.kind {
            NodeKind::Leaf { .. } => {
                for point in leaf_points(node, index_dir, dimensions)?.iter() {
                    results.insert(point);
                }
                return Ok(());
            }
            NodeKind::Internal(internal) => {
                let projection = project_query(query, internal);
                let (primary, fallback) =
                    if projection <= internal.median { (internal.left, internal.right) } else { (internal.right, internal.left) };
                node_id = primary.or(fallback).expect("an internal node always has at least one child");
            }
        }
    }
}

/// Phase 2, sibling-pruning mode: pops the Phase 1 descent stack and
/// considers each popped node's sibling.
fn sibling_prune<D: Distance>(
    arena: &Arena,
    index_dir: &Path,
    dimensions: usize,
    query: &[f32],
    mut stack: Vec<NodeId>,
    results: &mut ResultContainer<D>,
    visit_count: &mut usize,
) -> Result<()> {
    while let Some(node_id) = stack.pop() {
        let node = arena.get(node_id);
        let Some(parent_id) = node.parent else { continue };
        let (left, right) = arena.get(parent_id).children();
        let sibling_id = if left == Some(node_id) { right } else { left };
        let Some(sibling_id) = sibling_id else { continue };

        let sibling = arena.get(sibling_id);
        if sibling.is_leaf() {
            *visit_count += 1;
            for point in leaf_points(sibling, index_dir, dimensions)?.iter() {
                results.insert(point);
            }
        } else {
            let bound = segment_lower_bound(query, sibling);
            if bound < results.worst_distance() {
                // A fresh, throwaway stack: a sibling's own descent path is
                // not re-queued for further Phase 2 pruning.
                descend(arena, index_dir, dimensions, sibling_id, query, results, visit_count, &mut Vec::new())?;
            }
        }
    }
    Ok(())
}

/// Phase 2, top-down mode: restarts from the root and always takes the
/// closer child, stopping as soon as either child is a leaf.
fn top_down_prune<D: Distance>(
    arena: &Arena,
    index_dir: &Path,
    dimensions: usize,
    query: &[f32],
    root: NodeId,
    results: &mut ResultContainer<D>,
    visit_count: &mut usize,
) -> Result<()> {
    let mut node_id = root;
    loop {
        *visit_count += 1;
        let node = arena.get(node_id);
        let internal = match &node.kind {
            NodeKind::Leaf { .. } => {
                for point in leaf_points(node, index_dir, dimensions)?.iter() {
                    results.insert(point);
                }
                return Ok(());
            }
            NodeKind::Internal(internal) => internal,
        };

        let left_is_leaf = internal.left.is_some_and(|id| arena.get(id).is_leaf());
        let right_is_leaf = internal.right.is_some_and(|id| arena.get(id).is_leaf());

        if left_is_leaf || right_is_leaf {
            for (id, is_leaf) in [(internal.left, left_is_leaf), (internal.right, right_is_leaf)] {
                if is_leaf {
                    let id = id.expect("is_leaf was computed from this same Option");
                    *visit_count += 1;
                    for point in leaf_points(arena.get(id), index_dir, dimensions)?.iter() {
                        results.insert(point);
                    }
                }
            }
            return Ok(());
        }

        node_id = match (internal.left, internal.right) {
            (Some(l), Some(r)) => {
                let bound_l = segment_lower_bound(query, arena.get(l));
                let bound_r = segment_lower_bound(query, arena.get(r));
                if bound_l <= bound_r { l } else { r }
            }
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (None, None) => unreachable!("an internal node always has at least one child"),
        };
    }
}

/// Runs one query against the tree rooted at `root`.
pub fn search<D: Distance>(
    arena: &Arena,
    index_dir: &Path,
    dimensions: usize,
    root: NodeId,
    query: &[f32],
    k: usize,
    strategy: PruningStrategy,
) -> Result<SearchOutcome> {
    let mut results = ResultContainer::<D>::new(query.to_vec(), k);
    let mut visit_count = 0usize;

    match strategy {
        PruningStrategy::Sibling => {
            let mut stack = Vec::new();
            descend(arena, index_dir, dimensions, root, query, &mut results, &mut visit_count, &mut stack)?;
            sibling_prune(arena, index_dir, dimensions, query, stack, &mut results, &mut visit_count)?;
        }
        PruningStrategy::TopDown => {
            top_down_prune(arena, index_dir, dimensions, query, root, &mut results, &mut visit_count)?;
        }
    }

    let distance_computations = results.distance_computations;
    Ok(SearchOutcome { results: results.results, distance_computations, visit_count })
}
