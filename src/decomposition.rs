//! Row-band decomposition of the global grid

use crate::types::{Error, Rank, Result};

/// Index arithmetic of a halo-padded sub-array.
///
/// Owned cells have coordinates `0 <= x < x_size`, `0 <= y < y_size`. The
/// padded array has one extra row above and below and one extra column on
/// either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLayout {
    x_size: usize,
    y_size: usize,
}

impl RowLayout {
    /// Create new layout for an owned block of `x_size` columns and `y_size` rows
    pub fn new(x_size: usize, y_size: usize) -> Self {
        Self { x_size, y_size }
    }

    /// Number of owned columns
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    /// Number of owned rows
    pub fn y_size(&self) -> usize {
        self.y_size
    }

    /// Length of a padded row
    pub fn row_size(&self) -> usize {
        self.x_size + 2
    }

    /// Number of cells in the padded array
    pub fn padded_len(&self) -> usize {
        (self.x_size + 2) * (self.y_size + 2)
    }

    /// Index of the owned cell `(x, y)`
    pub fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.x_size && y < self.y_size);
        (y + 1) * self.row_size() + (x + 1)
    }

    /// Index of the cell at padded coordinates `(px, py)`
    pub fn padded_index(&self, px: usize, py: usize) -> usize {
        debug_assert!(px < self.row_size() && py < self.y_size + 2);
        py * self.row_size() + px
    }

    /// Index of the first owned column in the top halo row
    pub fn top_halo_start(&self) -> usize {
        1
    }

    /// Index of the first owned column in the bottom halo row
    pub fn bottom_halo_start(&self) -> usize {
        (self.y_size + 1) * self.row_size() + 1
    }
}

/// The part of the global grid owned by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdomainDescriptor {
    rank: Rank,
    size: usize,
    x_size: usize,
    y_size: usize,
    y_offset: usize,
    neighbor_write_offset: Option<usize>,
}

impl SubdomainDescriptor {
    /// Rank of the owning worker
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of workers in the decomposition
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of owned columns
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    /// Number of owned rows
    pub fn y_size(&self) -> usize {
        self.y_size
    }

    /// Global index of the first owned row
    pub fn y_offset(&self) -> usize {
        self.y_offset
    }

    /// Offset into the predecessor's padded array at which this worker writes its top row.
    ///
    /// This is the first owned column of the predecessor's bottom halo row. `None` for the
    /// topmost worker.
    pub fn neighbor_write_offset(&self) -> Option<usize> {
        self.neighbor_write_offset
    }

    /// Offset into the successor's padded array at which this worker writes its bottom row.
    ///
    /// `None` for the bottommost worker.
    pub fn successor_write_offset(&self) -> Option<usize> {
        self.successor().map(|_| self.layout().top_halo_start())
    }

    /// Rank of the worker owning the rows above
    pub fn predecessor(&self) -> Option<Rank> {
        self.rank.checked_sub(1)
    }

    /// Rank of the worker owning the rows below
    pub fn successor(&self) -> Option<Rank> {
        if self.rank + 1 < self.size {
            Some(self.rank + 1)
        } else {
            None
        }
    }

    /// Is this the worker holding the global top boundary?
    pub fn is_top(&self) -> bool {
        self.rank == 0
    }

    /// Is this the worker holding the global bottom boundary?
    pub fn is_bottom(&self) -> bool {
        self.rank + 1 == self.size
    }

    /// Index layout of this worker's padded array
    pub fn layout(&self) -> RowLayout {
        RowLayout::new(self.x_size, self.y_size)
    }
}

fn rows_of(ny: usize, size: usize, rank: Rank) -> usize {
    ny / size + usize::from(rank < ny % size)
}

/// Compute the sub-domain of `rank` when splitting an `ny` by `nx` grid into `size` row bands.
///
/// The first `ny % size` workers receive one extra row.
pub fn decompose(nx: usize, ny: usize, size: usize, rank: Rank) -> Result<SubdomainDescriptor> {
    if size == 0 || rank >= size || size > ny {
        return Err(Error::Decomposition { ny, size, rank });
    }
    let tail = ny % size;
    let base = ny / size;
    let y_size = rows_of(ny, size, rank);
    let y_offset = rank * base + rank.min(tail);

    // The predecessor's bottom halo row sits below its own (possibly extended) band.
    let neighbor_write_offset = rank
        .checked_sub(1)
        .map(|prev| RowLayout::new(nx, rows_of(ny, size, prev)).bottom_halo_start());

    Ok(SubdomainDescriptor {
        rank,
        size,
        x_size: nx,
        y_size,
        y_offset,
        neighbor_write_offset,
    })
}

/// Compute the sub-domains of all workers.
pub fn decompose_all(nx: usize, ny: usize, size: usize) -> Result<Vec<SubdomainDescriptor>> {
    (0..size.max(1))
        .map(|rank| decompose(nx, ny, size, rank))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_layout_index() {
        let layout = RowLayout::new(4, 3);
        assert_eq!(layout.row_size(), 6);
        assert_eq!(layout.padded_len(), 30);
        assert_eq!(layout.index(0, 0), 7);
        assert_eq!(layout.index(3, 2), 3 * 6 + 4);
        assert_eq!(layout.padded_index(1, 1), layout.index(0, 0));
        assert_eq!(layout.bottom_halo_start(), 4 * 6 + 1);
    }

    #[test]
    fn test_rows_sum_and_balance() {
        for ny in 1..40 {
            for size in 1..=ny {
                let subs = decompose_all(7, ny, size).unwrap();
                let total: usize = subs.iter().map(|s| s.y_size()).sum();
                assert_eq!(total, ny);
                let max = subs.iter().map(|s| s.y_size()).max().unwrap();
                let min = subs.iter().map(|s| s.y_size()).min().unwrap();
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn test_extra_rows_go_to_lowest_ranks() {
        let subs = decompose_all(8, 10, 4).unwrap();
        let rows = subs.iter().map(|s| s.y_size()).collect::<Vec<_>>();
        assert_eq!(rows, vec![3, 3, 2, 2]);
        let offsets = subs.iter().map(|s| s.y_offset()).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 3, 6, 8]);
    }

    #[test]
    fn test_neighbor_write_offset() {
        let subs = decompose_all(8, 10, 4).unwrap();
        assert_eq!(subs[0].neighbor_write_offset(), None);
        for pair in subs.windows(2) {
            let prev = &pair[0];
            let expected = prev.layout().padded_index(1, prev.y_size() + 1);
            assert_eq!(pair[1].neighbor_write_offset(), Some(expected));
        }
        // Rank 2 writes into rank 1, which holds an extra row.
        assert_eq!(subs[2].neighbor_write_offset(), Some(10 * 4 + 1));
        // Rank 3 writes into rank 2, which does not.
        assert_eq!(subs[3].neighbor_write_offset(), Some(10 * 3 + 1));
    }

    #[test]
    fn test_idempotent() {
        for rank in 0..5 {
            assert_eq!(
                decompose(16, 23, 5, rank).unwrap(),
                decompose(16, 23, 5, rank).unwrap()
            );
        }
    }

    #[test]
    fn test_neighbours() {
        let subs = decompose_all(4, 6, 3).unwrap();
        assert!(subs[0].is_top());
        assert_eq!(subs[0].predecessor(), None);
        assert_eq!(subs[0].successor(), Some(1));
        assert_eq!(subs[1].successor_write_offset(), Some(1));
        assert!(subs[2].is_bottom());
        assert_eq!(subs[2].successor(), None);
        assert_eq!(subs[2].successor_write_offset(), None);
    }

    #[test]
    fn test_degenerate() {
        assert!(decompose(4, 3, 4, 0).is_err());
        assert!(decompose(4, 3, 0, 0).is_err());
        assert!(decompose(4, 3, 2, 2).is_err());
    }
}
