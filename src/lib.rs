//! Distributed Jacobi solver with notified one-sided halo exchange
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod config;
pub mod decomposition;
pub mod device;
pub mod exchange;
pub mod grid;
pub mod reference;
pub mod reporting;
pub mod solver;
pub mod stencil;
pub mod transport;
pub mod types;

pub use config::{BoundaryValues, SolverOptions};
pub use solver::JacobiSolver;
pub use types::{Error, Result};
