//! Natural-block (chunk-aligned) iteration planning.
//!
//! A natural block is the native chunk of a chunked dataset, or the whole
//! dataset for compact and contiguous layouts. The iterators here only
//! compute block positions; reading the data belongs to the facades.

use crate::native::StorageLayout;

/// One block along the lead axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaturalBlock {
    pub index: u64,
    pub offset: u64,
    pub size: u64,
}

/// Cursor over the natural blocks of a 1-D extent.
///
/// Yields `ceil(total / chunk)` blocks at offsets `0, chunk, 2*chunk, ...`;
/// the last one is clipped to the extent. A fresh iterator starts again
/// from offset 0.
#[derive(Debug, Clone)]
pub struct NaturalBlockIndex {
    ordinal: u64,
    offset: u64,
    total: u64,
    chunk: u64,
}

impl NaturalBlockIndex {
    /// A `chunk` of 0 exposes the whole extent as a single block.
    pub fn new(total: u64, chunk: u64) -> Self {
        Self {
            ordinal: 0,
            offset: 0,
            total,
            chunk: if chunk == 0 { total } else { chunk },
        }
    }

    pub fn chunk(&self) -> u64 {
        self.chunk
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn block_count(&self) -> u64 {
        if self.chunk == 0 {
            0
        } else {
            self.total.div_ceil(self.chunk)
        }
    }
}

impl Iterator for NaturalBlockIndex {
    type Item = NaturalBlock;

    fn next(&mut self) -> Option<NaturalBlock> {
        if self.offset >= self.total {
            return None;
        }
        let size = self.chunk.min(self.total - self.offset);
        let block = NaturalBlock {
            index: self.ordinal,
            offset: self.offset,
            size,
        };
        self.ordinal += 1;
        self.offset += size;
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.block_count().saturating_sub(self.ordinal) as usize;
        (left, Some(left))
    }
}

/// One block of an N-D chunk grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridBlock {
    /// Block coordinates in the chunk grid.
    pub index: Vec<u64>,
    /// Element offset of the block.
    pub offset: Vec<u64>,
    /// Block extent, clipped at the dataset edge.
    pub size: Vec<u64>,
}

/// Row-major iteration over the chunk grid of an N-D extent.
#[derive(Debug, Clone)]
pub struct NaturalBlockGrid {
    dims: Vec<u64>,
    chunk: Vec<u64>,
    next: Option<Vec<u64>>,
}

impl NaturalBlockGrid {
    /// Zero chunk entries (or a missing chunk shape) mean a whole-axis block.
    pub fn new(dims: &[u64], chunk: &[u64]) -> Self {
        let chunk: Vec<u64> = dims
            .iter()
            .enumerate()
            .map(|(axis, &d)| match chunk.get(axis) {
                Some(&c) if c > 0 => c,
                _ => d,
            })
            .collect();
        let empty = dims.iter().any(|&d| d == 0);
        Self {
            dims: dims.to_vec(),
            next: (!empty).then(|| vec![0; dims.len()]),
            chunk,
        }
    }

    pub fn chunk(&self) -> &[u64] {
        &self.chunk
    }

    pub fn grid_dims(&self) -> Vec<u64> {
        self.dims
            .iter()
            .zip(&self.chunk)
            .map(|(&d, &c)| d.div_ceil(c.max(1)))
            .collect()
    }
}

impl Iterator for NaturalBlockGrid {
    type Item = GridBlock;

    fn next(&mut self) -> Option<GridBlock> {
        let index = self.next.take()?;
        let offset: Vec<u64> = index.iter().zip(&self.chunk).map(|(&i, &c)| i * c).collect();
        let size = offset
            .iter()
            .zip(&self.chunk)
            .zip(&self.dims)
            .map(|((&o, &c), &d)| c.min(d - o))
            .collect();

        let grid = self.grid_dims();
        let mut following = index.clone();
        let mut advanced = false;
        for axis in (0..following.len()).rev() {
            following[axis] += 1;
            if following[axis] < grid[axis] {
                advanced = true;
                break;
            }
            following[axis] = 0;
        }
        if advanced {
            self.next = Some(following);
        }
        Some(GridBlock { index, offset, size })
    }
}

/// Natural block shape for a dataset with the given layout and dimensions.
pub fn natural_block_dims(layout: &StorageLayout, dims: &[u64]) -> Vec<u64> {
    match layout.chunk_dims() {
        Some(chunk) if chunk.len() == dims.len() => chunk.to_vec(),
        _ => dims.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(10, 3)]
    #[case(9, 3)]
    #[case(1, 5)]
    #[case(100, 7)]
    #[case(64, 64)]
    fn blocks_cover_the_extent_exactly(#[case] total: u64, #[case] chunk: u64) {
        let blocks: Vec<_> = NaturalBlockIndex::new(total, chunk).collect();
        assert_eq!(blocks.len() as u64, total.div_ceil(chunk));
        for (i, b) in blocks.iter().enumerate() {
            assert_eq!(b.index, i as u64);
            assert_eq!(b.offset, i as u64 * chunk);
        }
        assert_eq!(blocks.iter().map(|b| b.size).sum::<u64>(), total);
        let last = blocks.last().unwrap();
        assert_eq!(last.size, total - (blocks.len() as u64 - 1) * chunk);
    }

    #[test]
    fn unchunked_extent_is_one_block() {
        let blocks: Vec<_> = NaturalBlockIndex::new(17, 0).collect();
        assert_eq!(
            blocks,
            vec![NaturalBlock {
                index: 0,
                offset: 0,
                size: 17
            }]
        );
    }

    #[test]
    fn empty_extent_has_no_blocks() {
        assert_eq!(NaturalBlockIndex::new(0, 4).count(), 0);
        assert_eq!(NaturalBlockIndex::new(0, 0).count(), 0);
        assert_eq!(NaturalBlockGrid::new(&[0, 3], &[2, 2]).count(), 0);
    }

    #[test]
    fn size_hint_counts_remaining_blocks() {
        let mut it = NaturalBlockIndex::new(10, 4);
        assert_eq!(it.size_hint(), (3, Some(3)));
        it.next();
        assert_eq!(it.size_hint(), (2, Some(2)));
    }

    #[test]
    fn grid_is_row_major_and_clipped() {
        let blocks: Vec<_> = NaturalBlockGrid::new(&[5, 3], &[2, 2]).collect();
        let indices: Vec<_> = blocks.iter().map(|b| b.index.clone()).collect();
        assert_eq!(
            indices,
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![1, 0],
                vec![1, 1],
                vec![2, 0],
                vec![2, 1]
            ]
        );
        assert_eq!(blocks[5].offset, vec![4, 2]);
        assert_eq!(blocks[5].size, vec![1, 1]);
        let covered: u64 = blocks.iter().map(|b| b.size.iter().product::<u64>()).sum();
        assert_eq!(covered, 15);
    }

    #[test]
    fn block_dims_follow_layout() {
        assert_eq!(
            natural_block_dims(&StorageLayout::Chunked(vec![4, 2]), &[10, 10]),
            vec![4, 2]
        );
        assert_eq!(natural_block_dims(&StorageLayout::Contiguous, &[10, 10]), vec![10, 10]);
    }
}
