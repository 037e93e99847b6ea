//! General type definitions

/// Rank of a worker in the process grid.
pub type Rank = usize;

/// Generic error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The solver options cannot produce a valid run.
    #[error("Configuration error: {0}")]
    Config(String),
    /// The grid cannot be split across the requested workers.
    #[error("Cannot decompose {ny} rows across {size} workers (rank {rank})")]
    Decomposition {
        /// Global number of rows
        ny: usize,
        /// Number of workers
        size: usize,
        /// Requesting rank
        rank: Rank,
    },
    /// A device buffer could not be allocated.
    #[error("Failed to allocate device buffer of {len} cells")]
    Allocation {
        /// Requested number of cells
        len: usize,
    },
    /// The transport reported a hard failure.
    #[error("Transport error on rank {rank}: {message}")]
    Transport {
        /// Rank reporting the failure
        rank: Rank,
        /// Failure description
        message: String,
    },
    /// A rank outside the process grid was addressed.
    #[error("Rank {rank} is outside a process grid of size {size}")]
    UnknownRank {
        /// Addressed rank
        rank: Rank,
        /// Number of workers
        size: usize,
    },
    /// A one-sided operation targeted memory that was never registered.
    #[error("No memory region registered on rank {rank} for generation {generation}")]
    RegionNotRegistered {
        /// Target rank
        rank: Rank,
        /// Buffer generation
        generation: usize,
    },
    /// A copy or put would leave the bounds of a buffer.
    #[error("Access of {len} cells at offset {offset} exceeds buffer of {capacity} cells")]
    OutOfBounds {
        /// First cell
        offset: usize,
        /// Number of cells
        len: usize,
        /// Buffer length
        capacity: usize,
    },
    /// The poll strategy gave up waiting for halo notifications.
    #[error("Rank {rank} received {received} of {expected} notifications for generation {generation}")]
    NotificationTimeout {
        /// Waiting rank
        rank: Rank,
        /// Buffer generation
        generation: usize,
        /// Expected contributions
        expected: u64,
        /// Contributions seen before giving up
        received: u64,
    },
    /// Another worker aborted the job.
    #[error("Job aborted with code {code}")]
    Aborted {
        /// Abort code
        code: i32,
    },
}

/// Result Type
pub type Result<T> = std::result::Result<T, Error>;
