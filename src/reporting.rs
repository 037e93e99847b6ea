//! Convergence and timing reports

use crate::transport::OneSidedTransport;
use crate::types::{Rank, Result};
use std::time::Duration;

/// Rank that receives the reduced norm and timing values.
pub const REPORTING_RANK: Rank = 0;

/// Global norm of the update after an iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormSample {
    /// Number of completed iterations
    pub iteration: usize,
    /// Square root of the global sum of squared differences between the last two iterates
    pub value: f64,
}

/// Outcome of a solve on one worker.
///
/// Global values are only available on [`REPORTING_RANK`].
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    rank: Rank,
    iterations: usize,
    norms: Vec<NormSample>,
    average_time: Option<Duration>,
}

impl SolveReport {
    /// Create new empty report
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            iterations: 0,
            norms: vec![],
            average_time: None,
        }
    }

    /// Rank of the worker
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Is this the report of the reporting rank?
    pub fn is_root(&self) -> bool {
        self.rank == REPORTING_RANK
    }

    /// Number of iterations executed by this solve
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Norms computed during this solve
    pub fn norms(&self) -> &[NormSample] {
        &self.norms
    }

    /// Solve time averaged over all workers
    pub fn average_time(&self) -> Option<Duration> {
        self.average_time
    }

    pub(crate) fn add_iterations(&mut self, count: usize) {
        self.iterations += count;
    }

    pub(crate) fn push_norm(&mut self, sample: NormSample) {
        self.norms.push(sample);
    }

    pub(crate) fn set_average_time(&mut self, time: Duration) {
        self.average_time = Some(time);
    }
}

/// One line per norm sample, then the average time if it was measured.
impl std::fmt::Display for SolveReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for sample in &self.norms {
            writeln!(
                f,
                "NORM value on iteration {}: {:.6}",
                sample.iteration, sample.value
            )?;
        }
        if let Some(time) = self.average_time {
            writeln!(f, "Average solver time: {:.6}(sec)", time.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Reduce the local sums of squared differences to the global norm on the reporting rank
pub fn global_norm<T: OneSidedTransport + ?Sized>(
    transport: &T,
    local_sum: f64,
) -> Result<Option<f64>> {
    Ok(transport
        .reduce_sum(local_sum, REPORTING_RANK)?
        .map(f64::sqrt))
}

/// Average the solve time of all workers on the reporting rank
pub fn average_time<T: OneSidedTransport + ?Sized>(
    transport: &T,
    elapsed: Duration,
) -> Result<Option<Duration>> {
    let size = transport.size() as f64;
    Ok(transport
        .reduce_sum(elapsed.as_secs_f64(), REPORTING_RANK)?
        .map(|total| Duration::from_secs_f64(total / size)))
}
