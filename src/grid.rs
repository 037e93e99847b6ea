//! Double-buffered halo-padded grid storage

use crate::config::BoundaryValues;
use crate::decomposition::{RowLayout, SubdomainDescriptor};
use crate::device::{Device, DeviceBuffer};
use crate::types::Result;
use std::sync::Arc;

/// One of the two buffer generations of a ping-pong pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Read by even iterations, written by odd iterations
    Even,
    /// Read by odd iterations, written by even iterations
    Odd,
}

impl Generation {
    /// Both generations in index order
    pub const ALL: [Generation; 2] = [Generation::Even, Generation::Odd];

    /// The generation read by iteration `iteration`
    pub fn of_iteration(iteration: usize) -> Self {
        if iteration % 2 == 0 {
            Generation::Even
        } else {
            Generation::Odd
        }
    }

    /// The other generation
    pub fn other(self) -> Self {
        match self {
            Generation::Even => Generation::Odd,
            Generation::Odd => Generation::Even,
        }
    }

    /// Index of the generation (0 or 1)
    pub fn index(self) -> usize {
        match self {
            Generation::Even => 0,
            Generation::Odd => 1,
        }
    }
}

/// Build the initial padded array of a worker on the host.
///
/// The interior is zero. The top row holds `boundary.top` on the topmost worker, the bottom
/// row holds `boundary.bottom` on the bottommost worker and the outer columns of every
/// owned row hold `boundary.sides`. Halo rows facing a neighbour start at zero.
pub fn initial_state(subdomain: &SubdomainDescriptor, boundary: &BoundaryValues) -> Vec<f64> {
    let layout = subdomain.layout();
    let row = layout.row_size();
    let mut cells = vec![0.0; layout.padded_len()];

    if subdomain.is_top() {
        cells[1..=layout.x_size()].fill(boundary.top);
    }
    if subdomain.is_bottom() {
        let start = layout.bottom_halo_start();
        cells[start..start + layout.x_size()].fill(boundary.bottom);
    }
    for y in 1..=layout.y_size() {
        cells[y * row] = boundary.sides;
        cells[y * row + layout.x_size() + 1] = boundary.sides;
    }
    cells
}

/// The pair of device buffers owned by one worker.
pub struct HaloGrid {
    layout: RowLayout,
    buffers: [Arc<DeviceBuffer>; 2],
}

impl HaloGrid {
    /// Allocate both generations on `device` and initialise them with the boundary values
    pub fn new(
        device: &impl Device,
        subdomain: &SubdomainDescriptor,
        boundary: &BoundaryValues,
    ) -> Result<Self> {
        let layout = subdomain.layout();
        let staging = initial_state(subdomain, boundary);

        let even = device.allocate(layout.padded_len())?;
        let odd = device.allocate(layout.padded_len())?;
        device.copy_from_host(&staging, &even)?;
        device.copy_from_host(&staging, &odd)?;

        Ok(Self {
            layout,
            buffers: [Arc::new(even), Arc::new(odd)],
        })
    }

    /// Index layout of both buffers
    pub fn layout(&self) -> RowLayout {
        self.layout
    }

    /// The buffer of a generation
    pub fn buffer(&self, generation: Generation) -> &Arc<DeviceBuffer> {
        &self.buffers[generation.index()]
    }

    /// The buffer read by iteration `iteration`
    pub fn current(&self, iteration: usize) -> &DeviceBuffer {
        self.buffer(Generation::of_iteration(iteration))
    }

    /// The buffer written by iteration `iteration`
    pub fn next(&self, iteration: usize) -> &DeviceBuffer {
        self.buffer(Generation::of_iteration(iteration).other())
    }

    /// Copy one generation to host memory
    pub fn to_host(&self, device: &impl Device, generation: Generation) -> Result<Vec<f64>> {
        let mut host = vec![0.0; self.layout.padded_len()];
        device.copy_to_host(self.buffer(generation), &mut host)?;
        Ok(host)
    }
}

impl std::fmt::Debug for HaloGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HaloGrid of {}x{} owned cells",
            self.layout.x_size(),
            self.layout.y_size()
        )
    }
}
