//! Device execution backend
//!
//! The solver only needs five things from a device: allocating buffers,
//! copying between host and device, launching a kernel over a range of lanes,
//! a barrier between the phases of a kernel, and waiting for a kernel to finish.
mod buffer;
pub mod cpu;

pub use buffer::DeviceBuffer;
pub use cpu::CpuDevice;

use crate::types::Result;
use rayon::prelude::*;

/// The lanes of one kernel invocation.
///
/// Every call to [`LaneGroup::run`] executes one phase of the kernel on all lanes
/// and returns only after the last lane finished, which acts as a lane barrier.
#[derive(Debug, Clone, Copy)]
pub struct LaneGroup {
    lanes: usize,
}

impl LaneGroup {
    /// Create new lane group
    pub fn new(lanes: usize) -> Self {
        Self { lanes }
    }

    /// Number of lanes
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Run `phase` on every lane and collect the per-lane results in lane order
    pub fn run<R, F>(&self, phase: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        (0..self.lanes).into_par_iter().map(phase).collect()
    }
}

/// A device that executes stencil kernels.
pub trait Device: Sync {
    /// Device name
    fn name(&self) -> &str;

    /// Maximum number of lanes in one kernel invocation
    fn max_lanes(&self) -> usize;

    /// Allocate a zeroed buffer of `len` cells
    fn allocate(&self, len: usize) -> Result<DeviceBuffer>;

    /// Copy host data into a device buffer
    fn copy_from_host(&self, src: &[f64], dst: &DeviceBuffer) -> Result<()>;

    /// Copy a device buffer into host memory
    fn copy_to_host(&self, src: &DeviceBuffer, dst: &mut [f64]) -> Result<()>;

    /// Launch `kernel` over `lanes` lanes and wait for its completion
    fn launch<T, K>(&self, lanes: usize, kernel: K) -> Result<T>
    where
        T: Send,
        K: FnOnce(&LaneGroup) -> Result<T> + Send;
}
