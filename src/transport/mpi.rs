//! MPI transport
//!
//! MPI windows do not carry notification counters, so a notified write is sent as a
//! buffered message tagged with the target generation. The message holds the target
//! offset followed by the data. The receiver applies pending messages to its registered
//! region whenever it reads the counter, which then counts the applied writes.

use super::{OneSidedTransport, Window};
use crate::device::DeviceBuffer;
use crate::grid::Generation;
use crate::types::{Error, Rank, Result};
use log::{debug, error};
use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::point_to_point::MatchedReceiveVec;
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator, CommunicatorCollectives, Destination, Root, Source};
use mpi::Threading;
use std::sync::{Arc, RwLock};

/// Tag of the messages written into the region of generation 0.
const TAG_BASE: i32 = 7100;

/// Upper bound for the bookkeeping MPI attaches to a buffered message, in bytes.
const MESSAGE_OVERHEAD: usize = 1024;

/// Initialise MPI with full multithreading support.
///
/// Lanes of a kernel issue writes concurrently, so any weaker threading level is an error.
pub fn initialize() -> Result<Universe> {
    let (universe, threading) = mpi::initialize_with_threading(Threading::Multiple).ok_or(
        Error::Transport {
            rank: 0,
            message: "MPI was already initialised".to_string(),
        },
    )?;
    if threading != Threading::Multiple {
        return Err(Error::Transport {
            rank: universe.world().rank() as Rank,
            message: format!("MPI provides thread level {threading:?}, need Multiple"),
        });
    }
    Ok(universe)
}

/// Size of the send buffer needed for a grid `nx` cells wide split into `lanes` lanes.
///
/// A worker runs at most one iteration ahead of its neighbours, so its writes of two
/// iterations can be in flight at the same time.
pub fn send_buffer_size(nx: usize, lanes: usize) -> usize {
    let per_message = (nx / lanes.max(1) + 1) * std::mem::size_of::<f64>() + MESSAGE_OVERHEAD;
    2 * 2 * lanes * per_message
}

/// Attach a send buffer large enough for the halo writes of one worker
pub fn attach_send_buffer(universe: &mut Universe, nx: usize, lanes: usize) {
    let size = send_buffer_size(nx, lanes);
    debug!("Attaching MPI send buffer of {size} bytes");
    universe.set_buffer_size(size);
}

/// One-sided transport over an MPI communicator.
pub struct MpiTransport {
    world: SimpleCommunicator,
    rank: Rank,
    size: usize,
    windows: [RwLock<Option<Arc<Window>>>; 2],
}

// SAFETY: MPI is initialised with `Threading::Multiple` by `initialize`, which makes
// concurrent calls on the communicator from several threads valid.
unsafe impl Send for MpiTransport {}
unsafe impl Sync for MpiTransport {}

impl MpiTransport {
    /// Create new transport over `world`
    pub fn new(world: SimpleCommunicator) -> Self {
        Self {
            rank: world.rank() as Rank,
            size: world.size() as usize,
            world,
            windows: [RwLock::new(None), RwLock::new(None)],
        }
    }

    fn tag(generation: Generation) -> i32 {
        TAG_BASE + generation.index() as i32
    }

    fn window(&self, generation: Generation) -> Result<Arc<Window>> {
        let slot = self.windows[generation.index()]
            .read()
            .map_err(|_| self.error("window lock poisoned"))?;
        slot.clone().ok_or(Error::RegionNotRegistered {
            rank: self.rank,
            generation: generation.index(),
        })
    }

    fn set_window(&self, generation: Generation, window: Option<Arc<Window>>) -> Result<()> {
        let mut slot = self.windows[generation.index()]
            .write()
            .map_err(|_| self.error("window lock poisoned"))?;
        *slot = window;
        Ok(())
    }

    fn error(&self, message: &str) -> Error {
        Error::Transport {
            rank: self.rank,
            message: message.to_string(),
        }
    }

    /// Apply all pending writes into `generation` to the local region
    fn drain(&self, window: &Window, generation: Generation) -> Result<()> {
        let tag = Self::tag(generation);
        while let Some(matched) = self
            .world
            .any_process()
            .immediate_matched_probe_with_tag(tag)
        {
            let (message, status) = matched.matched_receive_vec::<f64>();
            let Some((offset, data)) = message.split_first() else {
                return Err(self.error(&format!(
                    "empty halo message from rank {}",
                    status.source_rank()
                )));
            };
            window.put_notify(*offset as usize, data)?;
        }
        Ok(())
    }
}

impl OneSidedTransport for MpiTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn register(&self, generation: Generation, buffer: Arc<DeviceBuffer>) -> Result<()> {
        self.set_window(generation, Some(Arc::new(Window::new(buffer))))
    }

    fn open_epoch(&self) -> Result<()> {
        for generation in Generation::ALL {
            self.window(generation)?;
        }
        self.world.barrier();
        Ok(())
    }

    fn close_epoch(&self) -> Result<()> {
        self.world.barrier();
        for generation in Generation::ALL {
            self.set_window(generation, None)?;
        }
        Ok(())
    }

    fn put_notify(
        &self,
        src: &DeviceBuffer,
        src_offset: usize,
        len: usize,
        target: Rank,
        target_offset: usize,
        generation: Generation,
    ) -> Result<()> {
        if target >= self.size {
            return Err(Error::UnknownRank {
                rank: target,
                size: self.size,
            });
        }
        let mut message = vec![0.0; len + 1];
        message[0] = target_offset as f64;
        src.read_into(src_offset, &mut message[1..])?;
        self.world
            .process_at_rank(target as i32)
            .buffered_send_with_tag(&message[..], Self::tag(generation));
        Ok(())
    }

    fn notification(&self, generation: Generation) -> Result<u64> {
        let window = self.window(generation)?;
        self.drain(&window, generation)?;
        Ok(window.notification().value())
    }

    fn reset_notification(&self, generation: Generation) -> Result<()> {
        self.window(generation)?.notification().reset();
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.world.barrier();
        Ok(())
    }

    fn reduce_sum(&self, value: f64, root: Rank) -> Result<Option<f64>> {
        if root >= self.size {
            return Err(Error::UnknownRank {
                rank: root,
                size: self.size,
            });
        }
        let root_process = self.world.process_at_rank(root as i32);
        if self.rank == root {
            let mut sum = 0.0;
            root_process.reduce_into_root(&value, &mut sum, SystemOperation::sum());
            Ok(Some(sum))
        } else {
            root_process.reduce_into(&value, SystemOperation::sum());
            Ok(None)
        }
    }

    fn abort(&self, code: i32) {
        error!("Rank {} aborts the job with code {code}", self.rank);
        self.world.abort(code)
    }
}
