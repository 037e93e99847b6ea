//! Multithreaded CPU device

use super::{Device, DeviceBuffer, LaneGroup};
use crate::types::{Error, Result};
use log::debug;
use rayon::ThreadPoolBuilder;

/// Default upper bound on the lanes of a kernel launch.
pub const DEFAULT_MAX_LANES: usize = 64;

/// A device backed by a dedicated rayon thread pool.
///
/// Each worker owns its own device, so a coordinator spinning on a notification
/// counter never starves the lanes of another worker.
pub struct CpuDevice {
    name: String,
    pool: rayon::ThreadPool,
    max_lanes: usize,
}

impl CpuDevice {
    /// Create a device with `num_threads` threads and the default lane limit
    pub fn new(num_threads: usize) -> Result<Self> {
        Self::with_max_lanes(num_threads, DEFAULT_MAX_LANES)
    }

    /// Create a device with `num_threads` threads and at most `max_lanes` lanes per launch
    pub fn with_max_lanes(num_threads: usize, max_lanes: usize) -> Result<Self> {
        if max_lanes == 0 {
            return Err(Error::Config(
                "A device must support at least one lane".to_string(),
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("jacobi-lane-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("Cannot create thread pool: {e}")))?;
        Ok(Self {
            name: format!("cpu ({} threads)", pool.current_num_threads()),
            pool,
            max_lanes,
        })
    }

    /// Number of threads executing lanes
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Device for CpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_lanes(&self) -> usize {
        self.max_lanes
    }

    fn allocate(&self, len: usize) -> Result<DeviceBuffer> {
        DeviceBuffer::zeroed(len)
    }

    fn copy_from_host(&self, src: &[f64], dst: &DeviceBuffer) -> Result<()> {
        dst.write_from(0, src)
    }

    fn copy_to_host(&self, src: &DeviceBuffer, dst: &mut [f64]) -> Result<()> {
        src.read_into(0, dst)
    }

    fn launch<T, K>(&self, lanes: usize, kernel: K) -> Result<T>
    where
        T: Send,
        K: FnOnce(&LaneGroup) -> Result<T> + Send,
    {
        if lanes == 0 || lanes > self.max_lanes {
            return Err(Error::Config(format!(
                "Cannot launch {lanes} lanes on a device supporting at most {}",
                self.max_lanes
            )));
        }
        debug!("Launching kernel with {lanes} lanes on {}", self.name);
        let group = LaneGroup::new(lanes);
        self.pool.install(|| kernel(&group))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_launch_runs_every_lane() {
        let device = CpuDevice::with_max_lanes(2, 8).unwrap();
        let lanes = device
            .launch(8, |group| {
                assert_eq!(group.lanes(), 8);
                Ok(group.run(|lane| lane * 10))
            })
            .unwrap();
        assert_eq!(lanes, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn test_thread_count() {
        let device = CpuDevice::new(3).unwrap();
        assert_eq!(device.num_threads(), 3);
        assert_eq!(device.max_lanes(), DEFAULT_MAX_LANES);
        assert!(CpuDevice::with_max_lanes(1, 0).is_err());
    }

    #[test]
    fn test_launch_rejects_too_many_lanes() {
        let device = CpuDevice::with_max_lanes(1, 4).unwrap();
        assert!(device.launch(5, |_| Ok(())).is_err());
        assert!(device.launch(0, |_| Ok(())).is_err());
    }

    #[test]
    fn test_host_copies() {
        let device = CpuDevice::new(1).unwrap();
        let buffer = device.allocate(3).unwrap();
        device.copy_from_host(&[1.0, 2.0, 3.0], &buffer).unwrap();
        let mut host = [0.0; 3];
        device.copy_to_host(&buffer, &mut host).unwrap();
        assert_eq!(host, [1.0, 2.0, 3.0]);
        assert!(device.copy_from_host(&[1.0; 4], &buffer).is_err());
    }
}
