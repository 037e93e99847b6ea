//! Distributed Jacobi solver

use crate::config::SolverOptions;
use crate::decomposition::{decompose, SubdomainDescriptor};
use crate::device::Device;
use crate::exchange::HaloExchange;
use crate::grid::{Generation, HaloGrid};
use crate::reporting::{self, NormSample, SolveReport};
use crate::stencil::{self, LaneSpan};
use crate::transport::{OneSidedTransport, PollStrategy, SpinPoll};
use crate::types::Result;
use log::{debug, error, info};
use std::time::Instant;

/// The solver state of one worker.
///
/// Creating a solver allocates the grid, registers both buffer generations with the
/// transport and opens the access epoch; [`finish`](JacobiSolver::finish) closes it again.
pub struct JacobiSolver<'a, D: Device, T: OneSidedTransport> {
    device: &'a D,
    transport: &'a T,
    options: SolverOptions,
    subdomain: SubdomainDescriptor,
    grid: HaloGrid,
    lanes: usize,
    poll: Box<dyn PollStrategy>,
    completed: usize,
}

impl<'a, D: Device, T: OneSidedTransport> JacobiSolver<'a, D, T> {
    /// Create new solver for the worker behind `transport`
    pub fn new(device: &'a D, transport: &'a T, options: SolverOptions) -> Result<Self> {
        if let Err(e) = options.validate(device.max_lanes()) {
            if transport.rank() == reporting::REPORTING_RANK {
                error!("{e}");
            }
            return Err(e);
        }
        let lanes = options.effective_lanes(device.max_lanes());
        let subdomain = decompose(
            options.nx(),
            options.ny(),
            transport.size(),
            transport.rank(),
        )?;
        let grid = HaloGrid::new(device, &subdomain, options.boundary())?;
        for generation in Generation::ALL {
            transport.register(generation, grid.buffer(generation).clone())?;
        }
        transport.open_epoch()?;
        if transport.rank() == reporting::REPORTING_RANK {
            info!("Opened access epoch on {} workers", transport.size());
        }
        debug!(
            "Rank {} owns rows {}..{} on {} with {lanes} lanes",
            subdomain.rank(),
            subdomain.y_offset(),
            subdomain.y_offset() + subdomain.y_size(),
            device.name()
        );

        Ok(Self {
            device,
            transport,
            options,
            subdomain,
            grid,
            lanes,
            poll: Box::new(SpinPoll::default()),
            completed: 0,
        })
    }

    /// Replace the strategy used while waiting for halo notifications
    pub fn with_poll_strategy(mut self, poll: impl PollStrategy + 'static) -> Self {
        self.poll = Box::new(poll);
        self
    }

    /// The sub-domain owned by this worker
    pub fn subdomain(&self) -> &SubdomainDescriptor {
        &self.subdomain
    }

    /// The grid of this worker
    pub fn grid(&self) -> &HaloGrid {
        &self.grid
    }

    /// Number of lanes per kernel launch
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Number of iterations completed so far
    pub fn completed_iterations(&self) -> usize {
        self.completed
    }

    /// The generation holding the latest iterate
    pub fn latest_generation(&self) -> Generation {
        Generation::of_iteration(self.completed)
    }

    /// Copy the latest iterate, including halo and boundary cells, to host memory
    pub fn snapshot(&self) -> Result<Vec<f64>> {
        self.grid.to_host(self.device, self.latest_generation())
    }

    /// Run the configured number of iterations.
    ///
    /// Without a norm interval all iterations run in a single kernel launch. Otherwise every
    /// launch ends on the last iteration of an interval, counted from the first solve, and is
    /// followed by a global norm computation.
    pub fn solve(&mut self) -> Result<SolveReport> {
        let start = Instant::now();
        let mut report = SolveReport::new(self.subdomain.rank());
        let total = self.options.iterations();
        let batch = self.options.iterations_batch().max(1);
        let interval = self.options.norm_interval();

        let mut passed = 0;
        while passed < total {
            // Launches end on norm iterations, also when resuming an earlier solve.
            let count = if interval > 0 {
                interval - self.completed % interval
            } else {
                batch
            }
            .min(total - passed);
            self.run_batch(self.completed, count)?;
            self.completed += count;
            passed += count;
            report.add_iterations(count);

            let last = self.completed - 1;
            if interval > 0 && last % interval == interval - 1 {
                let local = self.local_norm(last)?;
                if let Some(value) = reporting::global_norm(self.transport, local)? {
                    info!("NORM value on iteration {}: {value:.6}", last + 1);
                    report.push_norm(NormSample {
                        iteration: last + 1,
                        value,
                    });
                }
            }
        }

        if self.options.report_time() {
            if let Some(time) = reporting::average_time(self.transport, start.elapsed())? {
                info!("Average solver time: {:.6}(sec)", time.as_secs_f64());
                report.set_average_time(time);
            }
        }
        Ok(report)
    }

    /// End the access epoch. Collective
    pub fn finish(self) -> Result<()> {
        self.transport.close_epoch()?;
        if self.transport.rank() == reporting::REPORTING_RANK {
            info!("Closed access epoch after {} iterations", self.completed);
        }
        Ok(())
    }

    /// Run iterations `first..first + count` in one kernel launch
    fn run_batch(&self, first: usize, count: usize) -> Result<()> {
        let layout = self.grid.layout();
        let grid = &self.grid;
        let exchange = HaloExchange::new(self.transport, &self.subdomain, self.poll.as_ref());

        debug!(
            "Rank {} runs iterations {first}..{}",
            self.subdomain.rank(),
            first + count
        );
        self.device.launch(self.lanes, |group| {
            for i in first..first + count {
                let src = grid.current(i);
                let dst = grid.next(i);
                let target = Generation::of_iteration(i).other();

                // Borders first so that the transfers overlap with the interior update.
                let expected = group
                    .run(|lane| {
                        let span = LaneSpan::new(layout.x_size(), group.lanes(), lane);
                        stencil::update_borders(&layout, src, dst, &span);
                        exchange.send_borders(dst, target, &span)
                    })
                    .into_iter()
                    .sum::<Result<u64>>()?;

                group.run(|lane| {
                    let span = LaneSpan::new(layout.x_size(), group.lanes(), lane);
                    stencil::update_interior(&layout, src, dst, &span);
                });

                exchange.await_halo(target, expected)?;
            }
            Ok(())
        })
    }

    /// Local sum of squared differences between the iterates before and after iteration `last`
    fn local_norm(&self, last: usize) -> Result<f64> {
        let layout = self.grid.layout();
        let before = self.grid.current(last);
        let after = self.grid.next(last);
        self.device.launch(self.lanes, |group| {
            Ok(group
                .run(|lane| {
                    let span = LaneSpan::new(layout.x_size(), group.lanes(), lane);
                    stencil::squared_difference(&layout, before, after, &span)
                })
                .into_iter()
                .sum())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::CpuDevice;
    use crate::reference::SerialJacobi;
    use crate::transport::{DeadlinePoll, LocalFabric};
    use crate::types::Error;
    use std::time::Duration;

    fn options(nx: usize, ny: usize, iterations: usize, lanes: usize) -> SolverOptions {
        let mut options = SolverOptions::new(nx, ny);
        options.set_iterations(iterations);
        options.set_lanes(lanes);
        options.set_report_time(false);
        options
    }

    #[test]
    fn test_single_worker_matches_reference() {
        let results = LocalFabric::run(1, |transport| {
            let device = CpuDevice::new(2)?;
            let mut solver = JacobiSolver::new(&device, &transport, options(8, 6, 7, 4))?;
            solver.solve()?;
            let snapshot = solver.snapshot()?;
            solver.finish()?;
            Ok(snapshot)
        });
        let mut reference = SerialJacobi::new(8, 6, &Default::default()).unwrap();
        reference.run(7);
        assert_eq!(results[0].as_ref().unwrap(), reference.cells());
    }

    #[test]
    fn test_lane_count_must_divide_width() {
        let results = LocalFabric::run(2, |transport| {
            let device = CpuDevice::new(1)?;
            JacobiSolver::new(&device, &transport, options(10, 4, 1, 4)).map(|_| ())
        });
        for result in results {
            assert!(matches!(
                result,
                Err(Error::Config(_)) | Err(Error::Aborted { .. })
            ));
        }
    }

    #[test]
    fn test_norm_samples_on_root_only() {
        let results = LocalFabric::run(2, |transport| {
            let device = CpuDevice::new(1)?;
            let mut opts = options(4, 8, 10, 2);
            opts.set_norm_interval(3);
            let mut solver = JacobiSolver::new(&device, &transport, opts)?;
            let report = solver.solve()?;
            solver.finish()?;
            Ok(report)
        });
        let root = results[0].as_ref().unwrap();
        assert_eq!(root.iterations(), 10);
        let iterations = root.norms().iter().map(|n| n.iteration).collect::<Vec<_>>();
        assert_eq!(iterations, vec![3, 6, 9]);
        assert!(results[1].as_ref().unwrap().norms().is_empty());
    }

    #[test]
    fn test_resumed_solve_keeps_norm_schedule() {
        let results = LocalFabric::run(2, |transport| {
            let device = CpuDevice::new(1)?;
            let mut opts = options(4, 8, 10, 2);
            opts.set_norm_interval(4);
            let mut solver = JacobiSolver::new(&device, &transport, opts)?;
            let first = solver.solve()?;
            let second = solver.solve()?;
            solver.finish()?;
            Ok((first, second))
        });
        let (first, second) = results[0].as_ref().unwrap();
        let at = |report: &SolveReport| {
            report
                .norms()
                .iter()
                .map(|n| n.iteration)
                .collect::<Vec<_>>()
        };
        assert_eq!(at(first), vec![4, 8]);
        assert_eq!(at(second), vec![12, 16, 20]);
        assert_eq!(second.iterations(), 10);
    }

    #[test]
    fn test_deadline_poll_strategy() {
        let results = LocalFabric::run(3, |transport| {
            let device = CpuDevice::new(1)?;
            let mut solver = JacobiSolver::new(&device, &transport, options(4, 9, 6, 2))?
                .with_poll_strategy(DeadlinePoll::new(Duration::from_secs(30)));
            solver.solve()?;
            let snapshot = solver.snapshot()?;
            let subdomain = solver.subdomain().clone();
            solver.finish()?;
            Ok((subdomain, snapshot))
        });
        let mut reference = SerialJacobi::new(4, 9, &Default::default()).unwrap();
        reference.run(6);
        for result in results {
            let (subdomain, cells) = result.unwrap();
            let layout = subdomain.layout();
            for y in 0..layout.y_size() {
                for x in 0..4 {
                    assert_eq!(
                        cells[layout.index(x, y)],
                        reference.value(x, y + subdomain.y_offset())
                    );
                }
            }
        }
    }

    #[test]
    fn test_idle_neighbour_times_out() {
        let results = LocalFabric::run(2, |transport| {
            let device = CpuDevice::new(1)?;
            let mut solver = JacobiSolver::new(&device, &transport, options(4, 4, 2, 1))?
                .with_poll_strategy(DeadlinePoll::new(Duration::from_millis(50)));
            if transport.rank() == 1 {
                // Keeps its windows registered but never iterates.
                return Ok(());
            }
            solver.solve().map(|_| ())
        });
        assert!(matches!(
            results[0],
            Err(Error::NotificationTimeout {
                rank: 0,
                expected: 1,
                received: 0,
                ..
            })
        ));
        assert!(results[1].is_ok());
    }

    #[test]
    fn test_solve_continues_from_last_iteration() {
        let results = LocalFabric::run(2, |transport| {
            let device = CpuDevice::new(1)?;
            let mut solver = JacobiSolver::new(&device, &transport, options(4, 6, 3, 2))?;
            solver.solve()?;
            solver.solve()?;
            let completed = solver.completed_iterations();
            solver.finish()?;
            Ok(completed)
        });
        for result in results {
            assert_eq!(result.unwrap(), 6);
        }
    }
}
