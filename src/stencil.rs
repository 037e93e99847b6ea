//! Five-point Jacobi stencil

use crate::decomposition::RowLayout;
use crate::device::DeviceBuffer;
use std::ops::Range;

/// The columns computed by one lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneSpan {
    lane: usize,
    columns: Range<usize>,
}

impl LaneSpan {
    /// Split `x_size` columns evenly over `lanes` lanes and return the span of `lane`.
    ///
    /// `lanes` must divide `x_size`.
    pub fn new(x_size: usize, lanes: usize, lane: usize) -> Self {
        debug_assert!(lanes > 0 && x_size % lanes == 0 && lane < lanes);
        let width = x_size / lanes;
        Self {
            lane,
            columns: lane * width..(lane + 1) * width,
        }
    }

    /// Lane index
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Owned columns of this lane
    pub fn columns(&self) -> Range<usize> {
        self.columns.clone()
    }

    /// First owned column
    pub fn first(&self) -> usize {
        self.columns.start
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// Update the cell at padded index `idx`
#[inline]
fn update(src: &DeviceBuffer, dst: &DeviceBuffer, idx: usize, row: usize) {
    dst.store(
        idx,
        0.25 * (src.load(idx - 1) + src.load(idx + 1) + src.load(idx - row) + src.load(idx + row)),
    );
}

/// Apply the stencil to row `y` for the columns of `span`
pub fn update_row(
    layout: &RowLayout,
    src: &DeviceBuffer,
    dst: &DeviceBuffer,
    y: usize,
    span: &LaneSpan,
) {
    let row = layout.row_size();
    let start = layout.index(span.first(), y);
    for idx in start..start + span.width() {
        update(src, dst, idx, row);
    }
}

/// Rows that are sent to neighbours, computed before any interior row
pub fn border_rows(layout: &RowLayout) -> Range<usize> {
    // With a single owned row both borders coincide.
    0..layout.y_size().min(2)
}

/// Map the position in [`border_rows`] to an actual row
pub fn border_row(layout: &RowLayout, position: usize) -> usize {
    if position == 0 {
        0
    } else {
        layout.y_size() - 1
    }
}

/// Rows that depend only on this worker's own data
pub fn interior_rows(layout: &RowLayout) -> Range<usize> {
    1..layout.y_size().saturating_sub(1).max(1)
}

/// Compute the border rows of a lane
pub fn update_borders(
    layout: &RowLayout,
    src: &DeviceBuffer,
    dst: &DeviceBuffer,
    span: &LaneSpan,
) {
    for position in border_rows(layout) {
        update_row(layout, src, dst, border_row(layout, position), span);
    }
}

/// Compute the interior rows of a lane
pub fn update_interior(
    layout: &RowLayout,
    src: &DeviceBuffer,
    dst: &DeviceBuffer,
    span: &LaneSpan,
) {
    for y in interior_rows(layout) {
        update_row(layout, src, dst, y, span);
    }
}

/// Sum of squared differences between `a` and `b` over the owned cells of a lane
pub fn squared_difference(
    layout: &RowLayout,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    span: &LaneSpan,
) -> f64 {
    let mut sum = 0.0;
    for y in 0..layout.y_size() {
        let start = layout.index(span.first(), y);
        for idx in start..start + span.width() {
            let diff = b.load(idx) - a.load(idx);
            sum += diff * diff;
        }
    }
    sum
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn buffer_from(values: &[f64]) -> DeviceBuffer {
        let buffer = DeviceBuffer::zeroed(values.len()).unwrap();
        buffer.write_from(0, values).unwrap();
        buffer
    }

    #[test]
    fn test_lane_span() {
        let span = LaneSpan::new(12, 4, 2);
        assert_eq!(span.columns(), 6..9);
        assert_eq!(span.width(), 3);
        assert_eq!(span.lane(), 2);
    }

    fn borders(layout: &RowLayout) -> Vec<usize> {
        border_rows(layout).map(|p| border_row(layout, p)).collect()
    }

    #[test]
    fn test_row_ranges() {
        let one = RowLayout::new(4, 1);
        assert_eq!(borders(&one), vec![0]);
        assert!(interior_rows(&one).is_empty());

        let two = RowLayout::new(4, 2);
        assert_eq!(borders(&two), vec![0, 1]);
        assert!(interior_rows(&two).is_empty());

        let five = RowLayout::new(4, 5);
        assert_eq!(borders(&five), vec![0, 4]);
        assert_eq!(interior_rows(&five), 1..4);
    }

    #[test]
    fn test_update_single_cell() {
        let layout = RowLayout::new(1, 1);
        #[rustfmt::skip]
        let src = buffer_from(&[
            0.0, 1.0, 0.0,
            2.0, 9.0, 3.0,
            0.0, 4.0, 0.0,
        ]);
        let dst = DeviceBuffer::zeroed(9).unwrap();
        update_borders(&layout, &src, &dst, &LaneSpan::new(1, 1, 0));
        assert_relative_eq!(dst.load(4), 2.5);
        // Only the owned cell is written.
        assert_eq!(dst.to_vec().iter().filter(|v| **v != 0.0).count(), 1);
    }

    #[test]
    fn test_lanes_write_disjoint_columns() {
        let layout = RowLayout::new(4, 3);
        let src = buffer_from(&vec![1.0; layout.padded_len()]);
        let dst = DeviceBuffer::zeroed(layout.padded_len()).unwrap();
        let span = LaneSpan::new(4, 2, 1);
        update_borders(&layout, &src, &dst, &span);
        update_interior(&layout, &src, &dst, &span);
        for y in 0..3 {
            assert_eq!(dst.load(layout.index(0, y)), 0.0);
            assert_eq!(dst.load(layout.index(1, y)), 0.0);
            assert_eq!(dst.load(layout.index(2, y)), 1.0);
            assert_eq!(dst.load(layout.index(3, y)), 1.0);
        }
    }

    #[test]
    fn test_squared_difference() {
        let layout = RowLayout::new(2, 1);
        let a = DeviceBuffer::zeroed(layout.padded_len()).unwrap();
        let b = DeviceBuffer::zeroed(layout.padded_len()).unwrap();
        b.store(layout.index(0, 0), 3.0);
        b.store(layout.index(1, 0), 4.0);
        // Halo cells do not count.
        b.store(0, 100.0);
        let total: f64 = (0..2)
            .map(|lane| squared_difference(&layout, &a, &b, &LaneSpan::new(2, 2, lane)))
            .sum();
        assert_relative_eq!(total, 25.0);
    }
}
