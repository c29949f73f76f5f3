//! Partition of the dimension axis `{0..D-1}` into contiguous segments.

use crate::error::{Error, Result};

/// A half-open range `[start, end)` over dimension indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    start: usize,
    end: usize,
}

impl Segment {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> {
        self.start..self.end
    }
}

/// Ordered partition of `[0, D)`, stored as the list of right endpoints.
///
/// `right_indices = [r_1, r_2, .., r_n]` is interpreted as the segments
/// `[0, r_1), [r_1, r_2), .., [r_{n-1}, r_n)`, with the invariant that the
/// list is strictly increasing and `r_n == D`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    right_indices: Vec<usize>,
}

impl Segmentation {
    /// Builds a segmentation from its right endpoints as-is.
    pub fn new(right_indices: Vec<usize>) -> Self {
        Segmentation { right_indices }
    }

    /// The single-segment `[0, dimensions)` segmentation a root node starts with.
    pub fn whole(dimensions: usize) -> Self {
        Segmentation { right_indices: vec![dimensions] }
    }

    pub fn right_indices(&self) -> &[usize] {
        &self.right_indices
    }

    pub fn size(&self) -> usize {
        self.right_indices.len()
    }

    pub fn segment(&self, index: usize) -> Result<Segment> {
        if index >= self.right_indices.len() {
            return Err(Error::InvalidSegmentation(format!(
                "segment index {index} out of range (size {})",
                self.right_indices.len()
            )));
        }
        let start = if index == 0 { 0 } else { self.right_indices[index - 1] };
        let end = self.right_indices[index];
        Ok(Segment { start, end })
    }

    /// Replaces segment `index` with two halves by inserting its midpoint
    /// as a new right endpoint. Fails if the segment has size <= 1.
    pub fn split_segment(&mut self, index: usize) -> Result<()> {
        let segment = self.segment(index)?;
        if segment.size() <= 1 {
            return Err(Error::InvalidSegmentation(format!(
                "cannot split segment {index} of size {}",
                segment.size()
            )));
        }
        let mid = segment.start + (segment.end - segment.start) / 2;
        self.right_indices.insert(index, mid);
        Ok(())
    }

    pub fn segments_sizes(&self, out: &mut Vec<usize>) {
        out.clear();
        out.extend((0..self.size()).map(|i| self.segment(i).unwrap().size()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_segmentation_is_one_segment() {
        let seg = Segmentation::whole(8);
        assert_eq!(seg.size(), 1);
        let s = seg.segment(0).unwrap();
        assert_eq!((s.start(), s.end()), (0, 8));
    }

    #[test]
    fn split_segment_inserts_midpoint() {
        let mut seg = Segmentation::whole(8);
        seg.split_segment(0).unwrap();
        assert_eq!(seg.right_indices(), &[4, 8]);
        let first = seg.segment(0).unwrap();
        let second = seg.segment(1).unwrap();
        assert_eq!((first.start(), first.end()), (0, 4));
        assert_eq!((second.start(), second.end()), (4, 8));
    }

    #[test]
    fn split_single_dimension_segment_fails() {
        let mut seg = Segmentation::new(vec![1, 8]);
        assert!(seg.split_segment(0).is_err());
    }

    #[test]
    fn segment_out_of_range_fails() {
        let seg = Segmentation::whole(4);
        assert!(seg.segment(1).is_err());
    }

    #[test]
    fn segments_sizes_reports_in_order() {
        let mut seg = Segmentation::whole(8);
        seg.split_segment(0).unwrap();
        let mut sizes = Vec::new();
        seg.segments_sizes(&mut sizes);
        assert_eq!(sizes, vec![4, 4]);
    }

    proptest::proptest! {
        #[test]
        fn repeated_splits_keep_invariants(splits in proptest::collection::vec(0usize..4, 0..6)) {
            let mut seg = Segmentation::whole(16);
            for raw in splits {
                let idx = raw % seg.size();
                // only attempt splits on segments that can still be split
                if seg.segment(idx).unwrap().size() > 1 {
                    seg.split_segment(idx).unwrap();
                }
                let rights = seg.right_indices();
                for w in rights.windows(2) {
                    proptest::prop_assert!(w[0] < w[1]);
                }
                proptest::prop_assert_eq!(*rights.last().unwrap(), 16);
            }
        }
    }
}
