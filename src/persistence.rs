//! Binary encode/decode for the tree and the persisted slice of
//! [`Config`]. Mirrors the teacher crate's `BytesEncode`/`BytesDecode` pair
//! in shape, but reads and writes a `Read`/`Write` stream instead of a
//! borrowed byte slice, since this crate persists to a plain file rather
//! than an mmap'd database.

use std::io::{Read, Write};
use std::path::Path;

use nalgebra::DMatrix;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::node::{Arena, InternalData, Node, NodeId, NodeKind};
use crate::segmentation::Segmentation;
use crate::vector::VectorContainer;

/// Encodes `Self` onto a byte stream.
pub trait Encode {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()>;
}

/// Decodes `Self` from a byte stream written by the matching [`Encode`].
pub trait Decode: Sized {
    fn decode<R: Read>(reader: &mut R) -> Result<Self>;
}

fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn write_usize<W: Write>(writer: &mut W, value: usize) -> Result<()> {
    write_u64(writer, value as u64)
}

fn read_usize<R: Read>(reader: &mut R) -> Result<usize> {
    Ok(read_u64(reader)? as usize)
}

fn write_f32<W: Write>(writer: &mut W, value: f32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn write_f32_seq<W: Write>(writer: &mut W, values: &[f32]) -> Result<()> {
    write_usize(writer, values.len())?;
    for &v in values {
        write_f32(writer, v)?;
    }
    Ok(())
}

fn read_f32_seq<R: Read>(reader: &mut R) -> Result<Vec<f32>> {
    let len = read_usize(reader)?;
    (0..len).map(|_| read_f32(reader)).collect()
}

fn write_usize_seq<W: Write>(writer: &mut W, values: &[usize]) -> Result<()> {
    write_usize(writer, values.len())?;
    for &v in values {
        write_usize(writer, v)?;
    }
    Ok(())
}

fn read_usize_seq<R: Read>(reader: &mut R) -> Result<Vec<usize>> {
    let len = read_usize(reader)?;
    (0..len).map(|_| read_usize(reader)).collect()
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    write_usize(writer, bytes.len())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_usize(reader)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| Error::CorruptIndex(e.to_string()))
}

fn write_matrix<W: Write>(writer: &mut W, matrix: &DMatrix<f32>) -> Result<()> {
    write_usize(writer, matrix.nrows())?;
    write_usize(writer, matrix.ncols())?;
    for row in 0..matrix.nrows() {
        for col in 0..matrix.ncols() {
            write_f32(writer, matrix[(row, col)])?;
        }
    }
    Ok(())
}

fn read_matrix<R: Read>(reader: &mut R) -> Result<DMatrix<f32>> {
    let rows = read_usize(reader)?;
    let cols = read_usize(reader)?;
    let mut data = Vec::with_capacity(rows * cols);
    for _ in 0..rows * cols {
        data.push(read_f32(reader)?);
    }
    Ok(DMatrix::from_row_slice(rows, cols, &data))
}

impl Encode for Segmentation {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_usize_seq(writer, self.right_indices())
    }
}

impl Decode for Segmentation {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Segmentation::new(read_usize_seq(reader)?))
    }
}

/// Only the four fields the source keeps as a build-time invariant:
/// `queries_size` is per-invocation and intentionally dropped.
impl Encode for Config {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_usize(writer, self.dataset_size)?;
        write_usize(writer, self.dimensions)?;
        write_usize(writer, self.leaf_size)?;
        write_usize(writer, self.top_k)?;
        Ok(())
    }
}

/// Fields not part of the persisted subset keep [`Config::default`]'s
/// values; callers overlay the current invocation's `dataset`/`queries`/
/// `index_path`/`mode`/`seed`/`threads` afterwards.
impl Decode for Config {
    fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let dataset_size = read_usize(reader)?;
        let dimensions = read_usize(reader)?;
        let leaf_size = read_usize(reader)?;
        let top_k = read_usize(reader)?;
        Ok(Config { dataset_size, dimensions, leaf_size, top_k, ..Config::default() })
    }
}

/// Encodes the node at `node_id`, pre-order: tag, own fields, then `Y`/`N`
/// plus a recursive call for each child.
fn encode_node<W: Write>(arena: &Arena, node_id: NodeId, writer: &mut W) -> Result<()> {
    let node = arena.get(node_id);
    writer.write_all(if node.is_leaf() { b"L" } else { b"I" })?;

    write_f32_seq(writer, &node.segments_mins)?;
    write_f32_seq(writer, &node.segments_maxs)?;
    node.segmentation.encode(writer)?;
    write_string(writer, &node.filename)?;

    match &node.kind {
        NodeKind::Leaf { .. } => {
            // A leaf carries none of these; write the empty/zero layout so
            // every node occupies the same field sequence on disk.
            write_f32(writer, 0.0)?;
            write_usize(writer, 0)?;
            write_usize_seq(writer, &[])?;
            for _ in 0..5 {
                write_matrix(writer, &DMatrix::zeros(0, 0))?;
            }
        }
        NodeKind::Internal(data) => {
            write_f32(writer, data.median)?;
            write_usize(writer, data.best_segment_index)?;
            write_usize_seq(writer, &data.best_segment_dimensions)?;
            write_matrix(writer, &data.w)?;
            write_matrix(writer, &data.b)?;
            write_matrix(writer, &data.z)?;
            write_matrix(writer, &data.projected_data)?;
            write_matrix(writer, &data.components)?;
        }
    }

    let (left, right) = node.children();
    match left {
        Some(id) => {
            writer.write_all(b"Y")?;
            encode_node(arena, id, writer)?;
        }
        None => writer.write_all(b"N")?,
    }
    match right {
        Some(id) => {
            writer.write_all(b"Y")?;
            encode_node(arena, id, writer)?;
        }
        None => writer.write_all(b"N")?,
    }
    Ok(())
}

fn read_tag<R: Read>(reader: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// Decodes one node (and, recursively, its subtree) into `arena`, returning
/// its `NodeId`. `index_dir` resolves leaf file paths and eagerly reloads
/// their data. `parent` is wired on the freshly-pushed node.
fn decode_node<R: Read>(
    arena: &mut Arena,
    reader: &mut R,
    index_dir: &Path,
    dimensions: usize,
    parent: Option<NodeId>,
) -> Result<NodeId> {
    let tag = read_tag(reader)?;
    let is_leaf = match tag {
        b'L' => true,
        b'I' => false,
        other => return Err(Error::CorruptIndex(format!("unknown node tag byte {other}"))),
    };

    let segments_mins = read_f32_seq(reader)?;
    let segments_maxs = read_f32_seq(reader)?;
    let segmentation = Segmentation::decode(reader)?;
    let filename = read_string(reader)?;

    let median = read_f32(reader)?;
    let best_segment_index = read_usize(reader)?;
    let best_segment_dimensions = read_usize_seq(reader)?;
    let w = read_matrix(reader)?;
    let b = read_matrix(reader)?;
    let z = read_matrix(reader)?;
    let projected_data = read_matrix(reader)?;
    let components = read_matrix(reader)?;

    let placeholder = Node {
        filename: filename.clone(),
        num_points: 0,
        segmentation,
        segments_mins,
        segments_maxs,
        parent,
        root_external: false,
        is_intermediate: false,
        kind: NodeKind::Leaf { data: None },
    };
    let node_id = arena.push(placeholder);

    let left_tag = read_tag(reader)?;
    let left = match left_tag {
        b'Y' => Some(decode_node(arena, reader, index_dir, dimensions, Some(node_id))?),
        b'N' => None,
        other => return Err(Error::CorruptIndex(format!("unknown child marker byte {other}"))),
    };
    let right_tag = read_tag(reader)?;
    let right = match right_tag {
        b'Y' => Some(decode_node(arena, reader, index_dir, dimensions, Some(node_id))?),
        b'N' => None,
        other => return Err(Error::CorruptIndex(format!("unknown child marker byte {other}"))),
    };

    let num_points = if is_leaf {
        let path = index_dir.join(&filename);
        let container = VectorContainer::load_from_file(&path, dimensions, true, 0)?;
        let size = container.size();
        let node = arena.get_mut(node_id);
        node.kind = NodeKind::Leaf { data: Some(container) };
        size
    } else {
        let left_points = left.map(|id| arena.get(id).num_points).unwrap_or(0);
        let right_points = right.map(|id| arena.get(id).num_points).unwrap_or(0);
        let node = arena.get_mut(node_id);
        node.kind = NodeKind::Internal(Box::new(InternalData {
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
        }));
        left_points + right_points
    };
    arena.get_mut(node_id).num_points = num_points;

    Ok(node_id)
}

/// Writes the `Y`/`N` root marker, then (if present) the whole tree.
pub fn encode_tree<W: Write>(arena: &Arena, root: Option<NodeId>, writer: &mut W) -> Result<()> {
    match root {
        Some(id) => {
            writer.write_all(b"Y")?;
            encode_node(arena, id, writer)
        }
        None => {
            writer.write_all(b"N")?;
            Ok(())
        }
    }
}

/// Reads the `Y`/`N` root marker and, if present, the whole tree into a
/// fresh [`Arena`].
pub fn decode_tree<R: Read>(reader: &mut R, index_dir: &Path, dimensions: usize) -> Result<(Arena, Option<NodeId>)> {
    let mut arena = Arena::new();
    let tag = read_tag(reader)?;
    match tag {
        b'Y' => {
            let root = decode_node(&mut arena, reader, index_dir, dimensions, None)?;
            Ok((arena, Some(root)))
        }
        b'N' => Ok((arena, None)),
        other => Err(Error::CorruptIndex(format!("unknown tree root marker byte {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree;

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
    fn config_round_trips_its_persisted_subset() {
        let config = Config { dataset_size: 100, dimensions: 8, leaf_size: 4, top_k: 3, ..Config::default() };
        let mut buf = Vec::new();
        config.encode(&mut buf).unwrap();
        let decoded = Config::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded.dataset_size, 100);
        assert_eq!(decoded.dimensions, 8);
        assert_eq!(decoded.leaf_size, 4);
        assert_eq!(decoded.top_k, 3);
    }

    #[test]
    fn segmentation_round_trips() {
        let mut seg = Segmentation::whole(16);
        seg.split_segment(0).unwrap();
        let mut buf = Vec::new();
        seg.encode(&mut buf).unwrap();
        let decoded = Segmentation::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded.right_indices(), seg.right_indices());
    }

    #[test]
    fn tree_round_trips_structure_and_point_counts() {
        let dir = tempfile::tempdir().unwrap();
        let rows =
            [[0.0, 0.0, 0.0, 0.0], [0.1, 0.1, 0.1, 0.1], [10.0, 10.0, 10.0, 10.0], [10.1, 10.1, 10.1, 10.1]];
        let dataset = write_dataset(dir.path(), "in.dat", &rows);
        let config = Config {
            index_path: dir.path().to_path_buf(),
            dimensions: 4,
            dataset_size: 4,
            leaf_size: 1,
            top_k: 2,
            seed: Some(3),
            ..Config::default()
        };

        let (arena, root) = tree::build(&dataset, &config).unwrap();
        let (before_leaves, before_internal) = arena.count_kinds(root);

        let mut buf = Vec::new();
        encode_tree(&arena, Some(root), &mut buf).unwrap();
        let (decoded_arena, decoded_root) = decode_tree(&mut &buf[..], &config.index_path, 4).unwrap();
        let decoded_root = decoded_root.unwrap();

        let (after_leaves, after_internal) = decoded_arena.count_kinds(decoded_root);
        assert_eq!(before_leaves, after_leaves);
        assert_eq!(before_internal, after_internal);
        assert_eq!(arena.get(root).num_points, decoded_arena.get(decoded_root).num_points);
    }

    #[test]
    fn empty_tree_round_trips() {
        let mut buf = Vec::new();
        encode_tree(&Arena::new(), None, &mut buf).unwrap();
        let (_, root) = decode_tree(&mut &buf[..], Path::new("."), 4).unwrap();
        assert!(root.is_none());
    }
}
