//! Worker-pool build: the same per-node split as the single-threaded
//! builder ([`crate::tree::split_node`]), fanned out over a fixed pool of OS
//! threads.
//!
//! Each worker holds the shared arena lock only twice per node, and only
//! for plain field writes: once to snapshot the node's inputs
//! ([`tree::snapshot_node`]), and once to write the split result back
//! ([`tree::apply_split`]). The expensive part -- file I/O, the kernel SVD
//! fit, the partitioning stream, all done by [`tree::compute_split`] --
//! runs with no lock held at all, so siblings are genuinely processed
//! concurrently rather than serialized behind one mutex.
//!
//! The task queue and completion detection mirror a condvar-guarded queue
//! plus a 100ms quiescence poll: rather than joining threads to know when
//! work is done, a watcher thread polls the active-task counter and, once
//! it and the queue are both empty, enqueues one `None` sentinel per worker
//! to unblock their final `pop` and let them return.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::node::{Arena, Node, NodeId};
use crate::segmentation::Segmentation;
use crate::tree;

const QUIESCENCE_POLL: Duration = Duration::from_millis(100);

struct Shared {
    arena: Mutex<Arena>,
    queue: Mutex<VecDeque<Option<NodeId>>>,
    cv: Condvar,
    active: AtomicUsize,
    error: Mutex<Option<Error>>,
}

fn worker(shared: &Shared, config: &Config) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            while queue.is_empty() {
                queue = shared.cv.wait(queue).unwrap();
            }
            queue.pop_front().unwrap()
        };
        let Some(node_id) = task else { break };

        let snapshot = {
            let arena = shared.arena.lock().unwrap();
            let node = arena.get(node_id);
            node.is_leaf().then(|| tree::snapshot_node(node, &config.index_path))
        };

        let outcome = snapshot.map(|snapshot| {
            // The summarizer / SVD fit / partitioning stream run here, with
            // no lock held; catch a panic instead of poisoning `error` or
            // leaving siblings permanently blocked on a held mutex.
            panic::catch_unwind(AssertUnwindSafe(|| tree::compute_split(node_id, snapshot, config)))
                .unwrap_or(Err(Error::WorkerPanicked))
        });

        match outcome {
            None => {}
            Some(Ok(outcome)) => {
                let (left, right) = {
                    let mut arena = shared.arena.lock().unwrap();
                    tree::apply_split(&mut arena, node_id, outcome)
                };
                let new_tasks: Vec<NodeId> = [left, right].into_iter().flatten().collect();
                if !new_tasks.is_empty() {
                    shared.active.fetch_add(new_tasks.len(), Ordering::SeqCst);
                    let mut queue = shared.queue.lock().unwrap();
                    queue.extend(new_tasks.into_iter().map(Some));
                    shared.cv.notify_all();
                }
            }
            Some(Err(err)) => {
                *shared.error.lock().unwrap() = Some(err);
            }
        }
        shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn watch_for_quiescence(shared: &Shared, num_threads: usize) {
    loop {
        std::thread::sleep(QUIESCENCE_POLL);
        let quiescent = shared.active.load(Ordering::SeqCst) == 0 && shared.queue.lock().unwrap().is_empty();
        if quiescent {
            let mut queue = shared.queue.lock().unwrap();
            queue.extend(std::iter::repeat(None).take(num_threads));
            shared.cv.notify_all();
            return;
        }
    }
}

/// Builds a whole tree from `dataset_path` using `config.threads` workers.
pub fn build(dataset_path: &Path, config: &Config) -> Result<(Arena, NodeId)> {
    let num_threads = config.threads.max(1);

    let mut arena = Arena::new();
    let segmentation = Segmentation::whole(config.dimensions);
    let root = Node::new_root(dataset_path.display().to_string(), segmentation, config.dataset_size);
    let root_id = arena.push(root);

    let shared = Shared {
        arena: Mutex::new(arena),
        queue: Mutex::new(VecDeque::from([Some(root_id)])),
        cv: Condvar::new(),
        active: AtomicUsize::new(1),
        error: Mutex::new(None),
    };

    std::thread::scope(|scope| {
        for _ in 0..num_threads {
            scope.spawn(|| worker(&shared, config));
        }
        scope.spawn(|| watch_for_quiescence(&shared, num_threads));
    });

    if let Some(err) = shared.error.into_inner().unwrap() {
        return Err(err);
    }
    Ok((shared.arena.into_inner().unwrap(), root_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorContainer;

    fn write_dataset(dir: &Path, name: &str, rows: &[[f32; 4]]) -> std::path::PathBuf {
        let mut container = VectorContainer::new(4);
        for row in rows {
            container.append(row.to_vec());
        }
        let path = dir.join(name);
        container.save_to_file(&path).unwrap();
        path
    }

    #[test]
    fn parallel_build_matches_single_threaded_point_count() {
        let dir = tempfile::tempdir().unwrap();
        let rows = [
            [0.0, 0.0, 0.0, 0.0],
            [0.1, 0.1, 0.1, 0.1],
            [5.0, 5.0, 5.0, 5.0],
            [10.0, 10.0, 10.0, 10.0],
            [10.1, 10.1, 10.1, 10.1],
        ];
        let dataset = write_dataset(dir.path(), "in.dat", &rows);

        let config = Config {
            index_path: dir.path().to_path_buf(),
            dimensions: 4,
            dataset_size: rows.len(),
            leaf_size: 1,
            top_k: 2,
            seed: Some(7),
            threads: 4,
            ..Config::default()
        };

        let (arena, root) = build(&dataset, &config).unwrap();
        let total: usize = (0..arena.len())
            .filter_map(|id| {
                let node = arena.get(id);
                node.is_leaf().then_some(node.num_points)
            })
            .sum();
        assert_eq!(total, rows.len());
        assert!(arena.len() >= 1);
        let _ = root;
    }
}
