//! Solver options
//!
//! All values have defaults matching the reference problem. They can be
//! overridden with the setter methods or through environment variables
//! (prefixed `JACOBI_`).

use crate::types::{Error, Result};
use log::warn;

/// Dirichlet boundary values of the global grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryValues {
    /// Value of the row above the first grid row
    pub top: f64,
    /// Value of the row below the last grid row
    pub bottom: f64,
    /// Value of the columns left and right of the grid
    pub sides: f64,
}

impl Default for BoundaryValues {
    fn default() -> Self {
        Self {
            top: 1.0,
            bottom: 10.0,
            sides: 1.0,
        }
    }
}

/// Options for a distributed Jacobi solve
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    /// Number of grid columns
    nx: usize,
    /// Number of grid rows
    ny: usize,
    /// Total number of Jacobi iterations
    iterations: usize,
    /// Recompute the norm after this many iterations (0 disables the norm)
    norm_interval: usize,
    /// Report the average solve time over all workers
    report_time: bool,
    /// Lanes per kernel launch. `None` uses the device maximum
    lanes: Option<usize>,
    /// Boundary values
    boundary: BoundaryValues,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            nx: 16384,
            ny: 16384,
            iterations: 100,
            norm_interval: 0,
            report_time: true,
            lanes: None,
            boundary: BoundaryValues::default(),
        }
    }
}

/// Parse the environment variable `name`, warning about values that cannot be parsed
pub fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {name}={value}: cannot parse value");
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("Ignoring {name}={value}: expected a boolean");
            None
        }
    }
}

impl SolverOptions {
    /// Create options for an `nx` by `ny` grid with otherwise default values
    pub fn new(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            ..Default::default()
        }
    }

    /// Load options from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `JACOBI_NX`
    /// - `JACOBI_NY`
    /// - `JACOBI_ITERATIONS`
    /// - `JACOBI_NORM_INTERVAL`
    /// - `JACOBI_REPORT_TIME`
    /// - `JACOBI_LANES`
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(nx) = env_value("JACOBI_NX") {
            options.nx = nx;
        }
        if let Some(ny) = env_value("JACOBI_NY") {
            options.ny = ny;
        }
        if let Some(iterations) = env_value("JACOBI_ITERATIONS") {
            options.iterations = iterations;
        }
        if let Some(interval) = env_value("JACOBI_NORM_INTERVAL") {
            options.norm_interval = interval;
        }
        if let Some(report) = env_flag("JACOBI_REPORT_TIME") {
            options.report_time = report;
        }
        if let Some(lanes) = env_value("JACOBI_LANES") {
            options.lanes = Some(lanes);
        }
        options
    }

    /// Number of grid columns
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Number of grid rows
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Total number of iterations
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Norm interval (0 if disabled)
    pub fn norm_interval(&self) -> usize {
        self.norm_interval
    }

    /// Is the average solve time reported?
    pub fn report_time(&self) -> bool {
        self.report_time
    }

    /// Requested number of lanes
    pub fn lanes(&self) -> Option<usize> {
        self.lanes
    }

    /// Boundary values
    pub fn boundary(&self) -> &BoundaryValues {
        &self.boundary
    }

    /// Set the number of iterations
    pub fn set_iterations(&mut self, iterations: usize) {
        self.iterations = iterations;
    }

    /// Set the norm interval. 0 disables the norm computation
    pub fn set_norm_interval(&mut self, interval: usize) {
        self.norm_interval = interval;
    }

    /// Enable or disable the timing report
    pub fn set_report_time(&mut self, report: bool) {
        self.report_time = report;
    }

    /// Set the number of lanes per kernel launch
    pub fn set_lanes(&mut self, lanes: usize) {
        self.lanes = Some(lanes);
    }

    /// Set the boundary values
    pub fn set_boundary(&mut self, boundary: BoundaryValues) {
        self.boundary = boundary;
    }

    /// Number of iterations executed by one kernel launch
    pub fn iterations_batch(&self) -> usize {
        if self.norm_interval == 0 {
            self.iterations
        } else {
            self.norm_interval
        }
    }

    /// Number of lanes to launch on a device supporting at most `max_lanes`
    pub fn effective_lanes(&self, max_lanes: usize) -> usize {
        self.lanes.unwrap_or(max_lanes)
    }

    /// Check that the options can be run on a device supporting at most `max_lanes` lanes
    pub fn validate(&self, max_lanes: usize) -> Result<()> {
        if self.nx == 0 || self.ny == 0 {
            return Err(Error::Config(format!(
                "Grid must not be empty (nx={}, ny={})",
                self.nx, self.ny
            )));
        }
        let lanes = self.effective_lanes(max_lanes);
        if lanes == 0 || lanes > max_lanes {
            return Err(Error::Config(format!(
                "Lane count {lanes} is not supported by the device (maximum {max_lanes})"
            )));
        }
        if self.nx % lanes != 0 {
            return Err(Error::Config(format!(
                "Lane count {lanes} must divide the grid width nx={} (remainder {})",
                self.nx,
                self.nx % lanes
            )));
        }
        Ok(())
    }

    /// Check that the grid can be split across `workers` workers
    pub fn validate_workers(&self, workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(Error::Config("At least one worker is required".to_string()));
        }
        if workers > self.ny {
            return Err(Error::Config(format!(
                "Cannot split ny={} rows across {workers} workers",
                self.ny
            )));
        }
        Ok(())
    }
}
