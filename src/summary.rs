//! Per-node streaming summarization: variance-based feature selection,
//! best-segment choice, projection fitting, and the median split.

use std::fs::File;
use std::io::{BufReader, Read};
use std::mem::size_of;
use std::path::Path;

use nalgebra::DMatrix;

use crate::error::Result;
use crate::kernel::{self, Projection};
use crate::segmentation::Segmentation;

/// Points are streamed in batches of this size for every pass over a
/// node's input file.
const BATCH_SIZE: usize = 1000;

/// Everything `Node::split` needs after summarizing one candidate node.
pub struct Summary {
    pub segments_mins: Vec<f32>,
    pub segments_maxs: Vec<f32>,
    pub best_segment_index: usize,
    pub best_segment_dimensions: Vec<usize>,
    pub projection: Projection,
    pub median: f32,
}

struct MomentsPass {
    segments_mins: Vec<f32>,
    segments_maxs: Vec<f32>,
    means: Vec<f32>,
    means_square: Vec<f32>,
}

pub(crate) fn stream_batches<F: FnMut(&[f32], usize) -> Result<()>>(
    path: &Path,
    dimensions: usize,
    num_points: usize,
    mut on_batch: F,
) -> Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buffer = vec![0u8; BATCH_SIZE * dimensions * size_of::<f32>()];
    let mut read = 0;
    while read < num_points {
        let to_read = BATCH_SIZE.min(num_points - read);
        let byte_len = to_read * dimensions * size_of::<f32>();
        reader.read_exact(&mut buffer[..byte_len])?;
        let floats = bytemuck::cast_slice::<u8, f32>(&buffer[..byte_len]);
        on_batch(floats, to_read)?;
        read += to_read;
    }
    Ok(())
}

/// Stream pass A: per-dimension mean/sum-of-squares plus per-segment
/// running min/max of the mean-over-segment representation.
fn compute_moments(
    path: &Path,
    dimensions: usize,
    num_points: usize,
    segmentation: &Segmentation,
) -> Result<MomentsPass> {
    let num_segments = segmentation.size();
    let mut segments_mins = vec![f32::INFINITY; num_segments];
    let mut segments_maxs = vec![f32::NEG_INFINITY; num_segments];
    let mut means = vec![0.0f32; dimensions];
    let mut means_square = vec![0.0f32; dimensions];

    let segments: Vec<_> = (0..num_segments).map(|i| segmentation.segment(i).unwrap()).collect();

    stream_batches(path, dimensions, num_points, |batch, to_read| {
        for (s, segment) in segments.iter().enumerate() {
            for j in 0..to_read {
                let point = &batch[j * dimensions..(j + 1) * dimensions];
                let sum: f32 = segment.indices().map(|d| point[d]).sum();
                let avg = sum / segment.size() as f32;
                if avg < segments_mins[s] {
                    segments_mins[s] = avg;
                }
                if avg > segments_maxs[s] {
                    segments_maxs[s] = avg;
                }
            }
        }
        for j in 0..to_read {
            let point = &batch[j * dimensions..(j + 1) * dimensions];
            for (d, &v) in point.iter().enumerate() {
                means[d] += v;
                means_square[d] += v * v;
            }
        }
        Ok(())
    })?;

    for d in 0..dimensions {
        means[d] /= num_points as f32;
        means_square[d] /= num_points as f32;
    }

    Ok(MomentsPass { segments_mins, segments_maxs, means, means_square })
}

fn top_k_dimensions(means: &[f32], means_square: &[f32], top_k: usize) -> Vec<usize> {
    let variance: Vec<f32> = means
        .iter()
        .zip(means_square)
        .map(|(&mean, &mean_sq)| mean_sq - mean * mean)
        .collect();

    let mut order: Vec<usize> = (0..variance.len()).collect();
    order.sort_by(|&a, &b| variance[b].partial_cmp(&variance[a]).unwrap());
    order.truncate(top_k.min(order.len()));
    order
}

fn choose_best_segment(segmentation: &Segmentation, top_k: &[usize]) -> usize {
    let num_segments = segmentation.size();
    let mut counts = vec![0usize; num_segments];
    for &d in top_k {
        for s in 0..num_segments {
            if segmentation.segment(s).unwrap().contains(d) {
                counts[s] += 1;
            }
        }
    }

    let max = *counts.iter().max().unwrap();
    let tied: Vec<usize> = (0..num_segments).filter(|&s| counts[s] == max).collect();

    if tied.len() == 1 || top_k.is_empty() {
        return tied[0];
    }

    let top_dimension = top_k[0];
    (0..num_segments)
        .find(|&s| segmentation.segment(s).unwrap().contains(top_dimension))
        .unwrap_or(tied[0])
}

fn best_segment_dimensions(segmentation: &Segmentation, best_segment: usize, top_k: &[usize]) -> Vec<usize> {
    let segment = segmentation.segment(best_segment).unwrap();
    let mut dims: Vec<usize> = top_k.iter().copied().filter(|&d| segment.contains(d)).collect();
    if dims.is_empty() {
        dims = segment.indices().collect();
    }
    dims
}

fn median_of(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Runs the full per-node summarization pipeline on `path`.
pub fn summarize(
    path: &Path,
    dimensions: usize,
    num_points: usize,
    segmentation: &Segmentation,
    top_k: usize,
    seed: Option<u64>,
    node_counter: u64,
) -> Result<Summary> {
    let moments = compute_moments(path, dimensions, num_points, segmentation)?;
    let top_k_dims = top_k_dimensions(&moments.means, &moments.means_square, top_k);
    let best_segment_index = choose_best_segment(segmentation, &top_k_dims);
    let best_segment_dims = best_segment_dimensions(segmentation, best_segment_index, &top_k_dims);

    let d_prime = best_segment_dims.len();
    let mut rows: Vec<f32> = Vec::with_capacity(num_points * d_prime);
    stream_batches(path, dimensions, num_points, |batch, to_read| {
        for j in 0..to_read {
            let point = &batch[j * dimensions..(j + 1) * dimensions];
            rows.extend(best_segment_dims.iter().map(|&d| point[d]));
        }
        Ok(())
    })?;
    let data = DMatrix::from_row_slice(num_points, d_prime, &rows);

    let projection = kernel::fit(&data, seed, node_counter);
    let median = median_of(projection.projected_data.column(0).as_slice());

    Ok(Summary {
        segments_mins: moments.segments_mins,
        segments_maxs: moments.segments_maxs,
        best_segment_index,
        best_segment_dimensions: best_segment_dims,
        projection,
        median,
    })
}
