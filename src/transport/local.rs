//! In-process transport
//!
//! Runs every worker of a job as a thread of the current process. Remote
//! writes go straight into the target's registered buffer.

use super::{OneSidedTransport, Window};
use crate::device::DeviceBuffer;
use crate::grid::Generation;
use crate::types::{Error, Rank, Result};
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};

struct CollectiveState {
    arrived: usize,
    round: u64,
    contributions: Vec<f64>,
    result: f64,
    aborted: Option<i32>,
}

/// The shared state of all workers of one in-process job.
pub struct LocalFabric {
    size: usize,
    windows: Vec<[RwLock<Option<Arc<Window>>>; 2]>,
    collective: Mutex<CollectiveState>,
    round_done: Condvar,
    aborted: AtomicBool,
}

impl LocalFabric {
    /// Create new fabric for `size` workers
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            windows: (0..size)
                .map(|_| [RwLock::new(None), RwLock::new(None)])
                .collect(),
            collective: Mutex::new(CollectiveState {
                arrived: 0,
                round: 0,
                contributions: vec![0.0; size],
                result: 0.0,
                aborted: None,
            }),
            round_done: Condvar::new(),
            aborted: AtomicBool::new(false),
        })
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// The transport of worker `rank`
    pub fn endpoint(self: &Arc<Self>, rank: Rank) -> Result<LocalTransport> {
        if rank >= self.size {
            return Err(Error::UnknownRank {
                rank,
                size: self.size,
            });
        }
        Ok(LocalTransport {
            rank,
            fabric: Arc::clone(self),
        })
    }

    /// Run `worker` on one thread per rank and collect the results in rank order.
    ///
    /// A worker that fails or panics aborts the job, so that its peers stop waiting for it.
    pub fn run<T, F>(size: usize, worker: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(LocalTransport) -> Result<T> + Sync,
    {
        let fabric = Self::new(size);
        let fabric = &fabric;
        let worker = &worker;
        std::thread::scope(|scope| {
            let handles = (0..size)
                .map(|rank| {
                    std::thread::Builder::new()
                        .name(format!("jacobi-rank-{rank}"))
                        .spawn_scoped(scope, move || {
                            let _guard = AbortOnPanic(fabric);
                            let result = fabric.endpoint(rank).and_then(worker);
                            if let Err(e) = &result {
                                if !matches!(e, Error::Aborted { .. }) {
                                    error!("Rank {rank} failed: {e}");
                                    fabric.abort(1);
                                }
                            }
                            result
                        })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|_| {
                        Err(Error::Transport {
                            rank,
                            message: "worker panicked".to_string(),
                        })
                    }),
                    Err(e) => Err(Error::Transport {
                        rank,
                        message: format!("cannot spawn worker: {e}"),
                    }),
                })
                .collect()
        })
    }

    /// Has the job been aborted?
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Abort the job. Every pending and future collective or poll fails
    pub fn abort(&self, code: i32) {
        self.aborted.store(true, Ordering::Release);
        let mut state = self.lock_collective();
        state.aborted.get_or_insert(code);
        self.round_done.notify_all();
    }

    fn lock_collective(&self) -> MutexGuard<'_, CollectiveState> {
        // The state stays consistent even if a holder panicked.
        self.collective
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_aborted(&self) -> Result<()> {
        if self.is_aborted() {
            let code = self.lock_collective().aborted.unwrap_or(1);
            Err(Error::Aborted { code })
        } else {
            Ok(())
        }
    }

    /// Contribute `value` and wait until every worker contributed; returns the sum in rank order
    fn all_reduce(&self, rank: Rank, value: f64) -> Result<f64> {
        let mut state = self.lock_collective();
        if let Some(code) = state.aborted {
            return Err(Error::Aborted { code });
        }
        let round = state.round;
        state.contributions[rank] = value;
        state.arrived += 1;
        if state.arrived == self.size {
            state.result = state.contributions.iter().sum();
            state.arrived = 0;
            state.round += 1;
            self.round_done.notify_all();
            return Ok(state.result);
        }
        while state.round == round {
            if let Some(code) = state.aborted {
                return Err(Error::Aborted { code });
            }
            state = self
                .round_done
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Ok(state.result)
    }

    fn window(&self, rank: Rank, generation: Generation) -> Result<Arc<Window>> {
        let slot = &self.windows.get(rank).ok_or(Error::UnknownRank {
            rank,
            size: self.size,
        })?[generation.index()];
        let window = slot.read().map_err(|_| Error::Transport {
            rank,
            message: "window lock poisoned".to_string(),
        })?;
        window.clone().ok_or(Error::RegionNotRegistered {
            rank,
            generation: generation.index(),
        })
    }

    fn set_window(
        &self,
        rank: Rank,
        generation: Generation,
        window: Option<Arc<Window>>,
    ) -> Result<()> {
        let mut slot = self.windows[rank][generation.index()]
            .write()
            .map_err(|_| Error::Transport {
                rank,
                message: "window lock poisoned".to_string(),
            })?;
        *slot = window;
        Ok(())
    }
}

struct AbortOnPanic<'a>(&'a LocalFabric);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort(101);
        }
    }
}

/// The endpoint of one worker in a [`LocalFabric`].
#[derive(Clone)]
pub struct LocalTransport {
    rank: Rank,
    fabric: Arc<LocalFabric>,
}

impl LocalTransport {
    /// The fabric this endpoint belongs to
    pub fn fabric(&self) -> &Arc<LocalFabric> {
        &self.fabric
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalTransport rank {} of {}", self.rank, self.fabric.size)
    }
}

impl OneSidedTransport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.fabric.size
    }

    fn register(&self, generation: Generation, buffer: Arc<DeviceBuffer>) -> Result<()> {
        self.fabric
            .set_window(self.rank, generation, Some(Arc::new(Window::new(buffer))))
    }

    fn open_epoch(&self) -> Result<()> {
        for generation in Generation::ALL {
            self.fabric.window(self.rank, generation)?;
        }
        self.barrier()?;
        debug!("Rank {} opened access epoch", self.rank);
        Ok(())
    }

    fn close_epoch(&self) -> Result<()> {
        self.barrier()?;
        for generation in Generation::ALL {
            self.fabric.set_window(self.rank, generation, None)?;
        }
        debug!("Rank {} closed access epoch", self.rank);
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
        self.fabric.check_aborted()?;
        self.fabric
            .window(target, generation)?
            .copy_notify(target_offset, src, src_offset, len)
    }

    fn notification(&self, generation: Generation) -> Result<u64> {
        self.fabric.check_aborted()?;
        Ok(self
            .fabric
            .window(self.rank, generation)?
            .notification()
            .value())
    }

    fn reset_notification(&self, generation: Generation) -> Result<()> {
        self.fabric
            .window(self.rank, generation)?
            .notification()
            .reset();
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.fabric.all_reduce(self.rank, 0.0).map(|_| ())
    }

    fn reduce_sum(&self, value: f64, root: Rank) -> Result<Option<f64>> {
        if root >= self.fabric.size {
            return Err(Error::UnknownRank {
                rank: root,
                size: self.fabric.size,
            });
        }
        let sum = self.fabric.all_reduce(self.rank, value)?;
        Ok((self.rank == root).then_some(sum))
    }

    fn abort(&self, code: i32) {
        error!("Rank {} aborts the job with code {code}", self.rank);
        self.fabric.abort(code);
    }
}
