//! Run a distributed Jacobi solve
//!
//! Options are read from `JACOBI_*` environment variables. Without the `mpi`
//! feature all workers run as threads of this process; `JACOBI_WORKERS` sets
//! their number.
use jacobi_rma::config::env_value;
use jacobi_rma::device::CpuDevice;
use jacobi_rma::reporting::SolveReport;
use jacobi_rma::transport::OneSidedTransport;
use jacobi_rma::{JacobiSolver, Result, SolverOptions};

/// Solve on one worker and close the epoch
fn solve<T: OneSidedTransport>(
    device: &CpuDevice,
    transport: &T,
    options: &SolverOptions,
) -> Result<SolveReport> {
    let mut solver = JacobiSolver::new(device, transport, options.clone())?;
    let report = solver.solve()?;
    solver.finish()?;
    Ok(report)
}

/// Norm and time lines of the reporting rank, then the success line
fn print_root_report(report: &SolveReport) {
    print!("{report}");
    println!("[{}] SUCCESS", report.rank());
}

/// Threads available to each worker's device
fn threads_per_worker(workers: usize) -> usize {
    let available = std::thread::available_parallelism().map_or(1, |n| n.get());
    env_value("JACOBI_THREADS").unwrap_or((available / workers.max(1)).max(1))
}

#[cfg(not(feature = "mpi"))]
fn run(options: &SolverOptions) -> i32 {
    use jacobi_rma::transport::LocalFabric;

    let workers = env_value("JACOBI_WORKERS").unwrap_or(4);
    if let Err(e) = options.validate_workers(workers) {
        eprintln!("{e}");
        return 1;
    }
    let threads = threads_per_worker(workers);
    let results = LocalFabric::run(workers, |transport| {
        let device = CpuDevice::new(threads)?;
        solve(&device, &transport, options)
    });

    let mut code = 0;
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(report) if report.is_root() => print_root_report(&report),
            Ok(_) => {}
            Err(e) => {
                eprintln!("[{rank}] {e}");
                code = 1;
            }
        }
    }
    code
}

#[cfg(feature = "mpi")]
fn run(options: &SolverOptions) -> i32 {
    use jacobi_rma::device::Device;
    use jacobi_rma::transport::mpi::{attach_send_buffer, initialize};
    use jacobi_rma::transport::MpiTransport;

    let mut universe = match initialize() {
        Ok(universe) => universe,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    let transport = MpiTransport::new(universe.world());
    let device = match CpuDevice::new(threads_per_worker(1)) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("[{}] {e}", transport.rank());
            transport.abort(1);
            return 1;
        }
    };
    attach_send_buffer(
        &mut universe,
        options.nx(),
        options.effective_lanes(device.max_lanes()),
    );

    match solve(&device, &transport, options) {
        Ok(report) => {
            if report.is_root() {
                print_root_report(&report);
            }
            0
        }
        Err(e) => {
            eprintln!("[{}] {e}", transport.rank());
            transport.abort(1);
            1
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let options = SolverOptions::from_env();
    let code = run(&options);
    if code != 0 {
        std::process::exit(code);
    }
}
