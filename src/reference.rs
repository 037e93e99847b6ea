//! Serial reference solver
//!
//! Runs the same stencil on a single host array without any decomposition.
//! Used to check distributed results.

use crate::config::BoundaryValues;
use crate::decomposition::{decompose, RowLayout};
use crate::grid::initial_state;
use crate::types::Result;
use itertools::iproduct;

/// Jacobi iteration over the whole grid on the host.
#[derive(Debug, Clone)]
pub struct SerialJacobi {
    layout: RowLayout,
    current: Vec<f64>,
    next: Vec<f64>,
    iterations: usize,
}

impl SerialJacobi {
    /// Create new solver for an `nx` by `ny` grid
    pub fn new(nx: usize, ny: usize, boundary: &BoundaryValues) -> Result<Self> {
        let subdomain = decompose(nx, ny, 1, 0)?;
        let current = initial_state(&subdomain, boundary);
        let next = current.clone();
        Ok(Self {
            layout: subdomain.layout(),
            current,
            next,
            iterations: 0,
        })
    }

    /// Layout of the padded array
    pub fn layout(&self) -> RowLayout {
        self.layout
    }

    /// Number of iterations done
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// The padded array holding the latest iterate
    pub fn cells(&self) -> &[f64] {
        &self.current
    }

    /// Value of grid point `(x, y)`
    pub fn value(&self, x: usize, y: usize) -> f64 {
        self.current[self.layout.index(x, y)]
    }

    /// Do one iteration and return the sum of squared differences to the previous iterate
    pub fn step(&mut self) -> f64 {
        let row = self.layout.row_size();
        let mut sum = 0.0;
        for (y, x) in iproduct!(0..self.layout.y_size(), 0..self.layout.x_size()) {
            let idx = self.layout.index(x, y);
            let src = &self.current;
            let value = 0.25 * (src[idx - 1] + src[idx + 1] + src[idx - row] + src[idx + row]);
            let diff = value - src[idx];
            sum += diff * diff;
            self.next[idx] = value;
        }
        std::mem::swap(&mut self.current, &mut self.next);
        self.iterations += 1;
        sum
    }

    /// Do `iterations` iterations and return the squared difference of the last one
    pub fn run(&mut self, iterations: usize) -> f64 {
        let mut last = 0.0;
        for _ in 0..iterations {
            last = self.step();
        }
        last
    }
}

/// Solve on a single array and return the padded result
pub fn serial_jacobi(
    nx: usize,
    ny: usize,
    boundary: &BoundaryValues,
    iterations: usize,
) -> Result<Vec<f64>> {
    let mut solver = SerialJacobi::new(nx, ny, boundary)?;
    solver.run(iterations);
    Ok(solver.current)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_iteration() {
        let mut solver = SerialJacobi::new(3, 3, &BoundaryValues::default()).unwrap();
        solver.step();
        // Corners see two boundary values, edges one.
        assert_relative_eq!(solver.value(0, 0), 0.5);
        assert_relative_eq!(solver.value(1, 0), 0.25);
        assert_relative_eq!(solver.value(2, 0), 0.5);
        assert_relative_eq!(solver.value(0, 1), 0.25);
        assert_relative_eq!(solver.value(1, 1), 0.0);
        assert_relative_eq!(solver.value(0, 2), 2.75);
        assert_relative_eq!(solver.value(1, 2), 2.5);
    }

    #[test]
    fn test_boundaries_untouched() {
        let boundary = BoundaryValues::default();
        let mut solver = SerialJacobi::new(5, 4, &boundary).unwrap();
        solver.run(9);
        let layout = solver.layout();
        let cells = solver.cells();
        for x in 1..=5 {
            assert_eq!(cells[layout.padded_index(x, 0)], boundary.top);
            assert_eq!(cells[layout.padded_index(x, 5)], boundary.bottom);
        }
        for y in 1..=4 {
            assert_eq!(cells[layout.padded_index(0, y)], boundary.sides);
            assert_eq!(cells[layout.padded_index(6, y)], boundary.sides);
        }
    }

    #[test]
    fn test_update_shrinks() {
        let mut solver = SerialJacobi::new(6, 6, &BoundaryValues::default()).unwrap();
        let mut previous = solver.step();
        for _ in 0..20 {
            let current = solver.step();
            assert!(current <= previous);
            previous = current;
        }
    }

    #[test]
    fn test_zero_iterations() {
        let boundary = BoundaryValues::default();
        let cells = serial_jacobi(4, 4, &boundary, 0).unwrap();
        let subdomain = decompose(4, 4, 1, 0).unwrap();
        assert_eq!(cells, initial_state(&subdomain, &boundary));
    }
}
