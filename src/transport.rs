//! One-sided transport
//!
//! A transport exposes memory regions of every worker for remote writes. A
//! write is paired with a notification: the counter attached to the target
//! region is incremented once the data has landed, so the receiver learns about
//! completed writes without posting a matching receive.
pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi;
pub mod poll;

pub use local::{LocalFabric, LocalTransport};
#[cfg(feature = "mpi")]
pub use mpi::MpiTransport;
pub use poll::{DeadlinePoll, PollStrategy, SpinPoll};

use crate::device::DeviceBuffer;
use crate::grid::Generation;
use crate::types::{Rank, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter of landed one-sided writes into one memory region.
///
/// Incrementing publishes the data written before it; reading with [`value`](Self::value)
/// makes that data visible to the reader.
#[derive(Debug, Default)]
pub struct NotificationCounter(AtomicU64);

impl NotificationCounter {
    /// Create new counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one landed write
    pub fn notify(&self) {
        self.0.fetch_add(1, Ordering::Release);
    }

    /// Number of landed writes since the last reset
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Start counting from zero
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// A memory region registered for remote access, with its notification counter.
#[derive(Debug)]
pub struct Window {
    buffer: Arc<DeviceBuffer>,
    notification: NotificationCounter,
}

impl Window {
    /// Register `buffer`
    pub fn new(buffer: Arc<DeviceBuffer>) -> Self {
        Self {
            buffer,
            notification: NotificationCounter::new(),
        }
    }

    /// The exposed memory
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    /// The notification counter
    pub fn notification(&self) -> &NotificationCounter {
        &self.notification
    }

    /// Write `data` at `offset` and notify
    pub fn put_notify(&self, offset: usize, data: &[f64]) -> Result<()> {
        self.buffer.write_from(offset, data)?;
        self.notification.notify();
        Ok(())
    }

    /// Copy `len` cells of `src` to `offset` and notify
    pub fn copy_notify(
        &self,
        offset: usize,
        src: &DeviceBuffer,
        src_offset: usize,
        len: usize,
    ) -> Result<()> {
        self.buffer.copy_from(offset, src, src_offset, len)?;
        self.notification.notify();
        Ok(())
    }
}

/// Communication between the workers of a distributed solve.
pub trait OneSidedTransport: Sync {
    /// Rank of this worker
    fn rank(&self) -> Rank;

    /// Number of workers
    fn size(&self) -> usize;

    /// Expose `buffer` for remote writes as the region of `generation`
    fn register(&self, generation: Generation, buffer: Arc<DeviceBuffer>) -> Result<()>;

    /// Start the access epoch. Collective; every worker must have registered both generations
    fn open_epoch(&self) -> Result<()>;

    /// End the access epoch and release the registered regions. Collective
    fn close_epoch(&self) -> Result<()>;

    /// Write `len` cells of `src` starting at `src_offset` into the region of `generation`
    /// on `target` at `target_offset`, then increment the target's notification counter
    fn put_notify(
        &self,
        src: &DeviceBuffer,
        src_offset: usize,
        len: usize,
        target: Rank,
        target_offset: usize,
        generation: Generation,
    ) -> Result<()>;

    /// Current value of the local notification counter of `generation`
    fn notification(&self, generation: Generation) -> Result<u64>;

    /// Set the local notification counter of `generation` to zero
    fn reset_notification(&self, generation: Generation) -> Result<()>;

    /// Block until every worker reached the barrier
    fn barrier(&self) -> Result<()>;

    /// Sum `value` over all workers. Only `root` receives the result
    fn reduce_sum(&self, value: f64, root: Rank) -> Result<Option<f64>>;

    /// Terminate the whole job
    fn abort(&self, code: i32);
}
