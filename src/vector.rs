//! In-memory batches of fixed-dimensionality points, with a bare
//! concatenated-floats on-disk layout (no header).

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::mem::size_of;
use std::path::Path;

use crate::error::{Error, Result};

/// An ordered, owned sequence of `dimensions`-wide `f32` vectors.
#[derive(Debug, Clone, Default)]
pub struct VectorContainer {
    dimensions: usize,
    points: Vec<Option<Vec<f32>>>,
}

impl VectorContainer {
    pub fn new(dimensions: usize) -> Self {
        VectorContainer { dimensions, points: Vec::new() }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn append(&mut self, point: Vec<f32>) {
        debug_assert_eq!(point.len(), self.dimensions);
        self.points.push(Some(point));
    }

    /// Number of live (non-removed) points.
    pub fn size(&self) -> usize {
        self.points.iter().filter(|p| p.is_some()).count()
    }

    /// Fetches point `index`; panics if it was removed, matching the
    /// source's unchecked array-style access.
    pub fn get(&self, index: usize) -> &[f32] {
        self.points[index].as_deref().expect("accessed a removed point")
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.points.iter().filter_map(|p| p.as_deref())
    }

    /// Removes the point at `index`, nulling the slot rather than shifting
    /// later entries so every other index stays stable.
    pub fn remove(&mut self, index: usize) -> Option<Vec<f32>> {
        self.points[index].take()
    }

    /// Dense row-major `(n, dimensions)` view of the live points.
    pub fn to_matrix(&self) -> nalgebra::DMatrix<f32> {
        let rows: Vec<&[f32]> = self.iter().collect();
        let n = rows.len();
        nalgebra::DMatrix::from_fn(n, self.dimensions, |i, j| rows[i][j])
    }

    /// Reads a raw point file. If `take_all`, the point count is derived
    /// from `file_size / (dimensions * 4)`; otherwise exactly `n` points
    /// are required to be present.
    pub fn load_from_file(path: &Path, dimensions: usize, take_all: bool, n: usize) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len() as usize;
        let point_bytes = dimensions * size_of::<f32>();

        let count = if take_all {
            file_size / point_bytes
        } else {
            if file_size < n * point_bytes {
                return Err(Error::SizeMismatch {
                    path: path.to_path_buf(),
                    expected: n,
                    dimensions,
                });
            }
            n
        };

        let mut reader = BufReader::new(file);
        let mut points = Vec::with_capacity(count);
        let mut buffer = vec![0u8; point_bytes];
        for _ in 0..count {
            reader.read_exact(&mut buffer)?;
            let point = bytemuck::cast_slice::<u8, f32>(&buffer).to_vec();
            points.push(Some(point));
        }

        Ok(VectorContainer { dimensions, points })
    }

    /// Writes the raw concatenation of the live points to `path`.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        let mut writer = BufWriter::new(file);
        for point in self.iter() {
            writer.write_all(bytemuck::cast_slice(point))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.dat");

        let mut container = VectorContainer::new(3);
        container.append(vec![1.0, 2.0, 3.0]);
        container.append(vec![4.0, 5.0, 6.0]);
        container.save_to_file(&path).unwrap();

        let loaded = VectorContainer::load_from_file(&path, 3, true, 0).unwrap();
        assert_eq!(loaded.size(), 2);
        assert_eq!(loaded.get(0), &[1.0, 2.0, 3.0]);
        assert_eq!(loaded.get(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn load_exact_count_checks_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.dat");
        let mut container = VectorContainer::new(2);
        container.append(vec![1.0, 2.0]);
        container.save_to_file(&path).unwrap();

        assert!(VectorContainer::load_from_file(&path, 2, false, 2).is_err());
        assert!(VectorContainer::load_from_file(&path, 2, false, 1).is_ok());
    }

    #[test]
    fn remove_nulls_the_slot_without_shifting() {
        let mut container = VectorContainer::new(1);
        container.append(vec![1.0]);
        container.append(vec![2.0]);
        container.append(vec![3.0]);
        container.remove(1);
        assert_eq!(container.size(), 2);
        let rest: Vec<_> = container.iter().collect();
        assert_eq!(rest, vec![&[1.0][..], &[3.0][..]]);
    }

    #[test]
    fn to_matrix_has_expected_shape() {
        let mut container = VectorContainer::new(2);
        container.append(vec![1.0, 2.0]);
        container.append(vec![3.0, 4.0]);
        let m = container.to_matrix();
        assert_eq!(m.shape(), (2, 2));
        assert_eq!(m[(1, 0)], 3.0);
    }
}
