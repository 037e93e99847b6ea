//! Device-resident cell storage

use crate::types::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// A dense buffer of `f64` cells in device memory.
///
/// Cells are stored as atomic bit patterns so that the lanes of a kernel and
/// one-sided writes from remote workers can update disjoint cells of the same
/// buffer without locking. Visibility of remote writes is established by the
/// notification counters of the transport, so all cell accesses are relaxed.
pub struct DeviceBuffer {
    cells: Box<[AtomicU64]>,
}

impl DeviceBuffer {
    /// Allocate a zero-initialised buffer of `len` cells
    pub fn zeroed(len: usize) -> Result<Self> {
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(len)
            .map_err(|_| Error::Allocation { len })?;
        cells.extend((0..len).map(|_| AtomicU64::new(0)));
        Ok(Self {
            cells: cells.into_boxed_slice(),
        })
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Is the buffer empty?
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Read a cell
    #[inline]
    pub fn load(&self, index: usize) -> f64 {
        f64::from_bits(self.cells[index].load(Ordering::Relaxed))
    }

    /// Write a cell
    #[inline]
    pub fn store(&self, index: usize, value: f64) {
        self.cells[index].store(value.to_bits(), Ordering::Relaxed);
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(Error::OutOfBounds {
                offset,
                len,
                capacity: self.len(),
            }),
        }
    }

    /// Copy `src` into the cells starting at `offset`
    pub fn write_from(&self, offset: usize, src: &[f64]) -> Result<()> {
        self.check_range(offset, src.len())?;
        for (cell, value) in self.cells[offset..offset + src.len()].iter().zip(src) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy the cells starting at `offset` into `dst`
    pub fn read_into(&self, offset: usize, dst: &mut [f64]) -> Result<()> {
        self.check_range(offset, dst.len())?;
        let end = offset + dst.len();
        for (value, cell) in dst.iter_mut().zip(&self.cells[offset..end]) {
            *value = f64::from_bits(cell.load(Ordering::Relaxed));
        }
        Ok(())
    }

    /// Copy `len` cells of `src` starting at `src_offset` into this buffer at `offset`
    pub fn copy_from(
        &self,
        offset: usize,
        src: &DeviceBuffer,
        src_offset: usize,
        len: usize,
    ) -> Result<()> {
        self.check_range(offset, len)?;
        src.check_range(src_offset, len)?;
        for i in 0..len {
            self.store(offset + i, src.load(src_offset + i));
        }
        Ok(())
    }

    /// Copy the whole buffer to host memory
    pub fn to_vec(&self) -> Vec<f64> {
        self.cells
            .iter()
            .map(|cell| f64::from_bits(cell.load(Ordering::Relaxed)))
            .collect()
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceBuffer with {} cells", self.len())
    }
}
