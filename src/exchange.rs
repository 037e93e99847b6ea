//! Halo exchange with notified one-sided writes

use crate::decomposition::SubdomainDescriptor;
use crate::device::DeviceBuffer;
use crate::grid::Generation;
use crate::stencil::LaneSpan;
use crate::transport::{OneSidedTransport, PollStrategy};
use crate::types::{Error, Result};
use log::trace;
use std::time::Instant;

/// Ships freshly computed border rows to the neighbouring workers.
pub struct HaloExchange<'a, T: OneSidedTransport + ?Sized> {
    transport: &'a T,
    subdomain: &'a SubdomainDescriptor,
    poll: &'a dyn PollStrategy,
}

impl<'a, T: OneSidedTransport + ?Sized> HaloExchange<'a, T> {
    /// Create new exchange for the worker owning `subdomain`
    pub fn new(
        transport: &'a T,
        subdomain: &'a SubdomainDescriptor,
        poll: &'a dyn PollStrategy,
    ) -> Self {
        Self {
            transport,
            subdomain,
            poll,
        }
    }

    /// Send the border slices of `span` from `out` into the neighbours' buffers of `generation`.
    ///
    /// Returns the number of writes issued. As every worker runs the same number of lanes,
    /// this is also the number of notifications this lane's neighbours send back.
    pub fn send_borders(
        &self,
        out: &DeviceBuffer,
        generation: Generation,
        span: &LaneSpan,
    ) -> Result<u64> {
        let layout = self.subdomain.layout();
        let mut issued = 0;

        if let (Some(target), Some(offset)) = (
            self.subdomain.predecessor(),
            self.subdomain.neighbor_write_offset(),
        ) {
            self.transport.put_notify(
                out,
                layout.index(span.first(), 0),
                span.width(),
                target,
                offset + span.first(),
                generation,
            )?;
            issued += 1;
        }

        if let (Some(target), Some(offset)) = (
            self.subdomain.successor(),
            self.subdomain.successor_write_offset(),
        ) {
            self.transport.put_notify(
                out,
                layout.index(span.first(), layout.y_size() - 1),
                span.width(),
                target,
                offset + span.first(),
                generation,
            )?;
            issued += 1;
        }

        Ok(issued)
    }

    /// Wait until `expected` writes into `generation` have landed, then reset its counter
    pub fn await_halo(&self, generation: Generation, expected: u64) -> Result<()> {
        if expected == 0 {
            return Ok(());
        }
        let start = Instant::now();
        let mut attempt = 0;
        loop {
            let received = self.transport.notification(generation)?;
            if received >= expected {
                debug_assert_eq!(received, expected);
                break;
            }
            if !self.poll.pause(attempt, start.elapsed()) {
                return Err(Error::NotificationTimeout {
                    rank: self.subdomain.rank(),
                    generation: generation.index(),
                    expected,
                    received,
                });
            }
            attempt += 1;
        }
        trace!(
            "Rank {} received {expected} notifications for {generation:?} after {attempt} polls",
            self.subdomain.rank()
        );
        self.transport.reset_notification(generation)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decomposition::decompose_all;
    use crate::transport::{DeadlinePoll, LocalFabric, SpinPoll};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_borders_reach_neighbour_halos() {
        let subs = decompose_all(4, 9, 3).unwrap();
        let fabric = LocalFabric::new(3);
        let transports = (0..3)
            .map(|rank| fabric.endpoint(rank).unwrap())
            .collect::<Vec<_>>();
        let buffers = subs
            .iter()
            .map(|sub| Arc::new(DeviceBuffer::zeroed(sub.layout().padded_len()).unwrap()))
            .collect::<Vec<_>>();
        for (transport, buffer) in transports.iter().zip(&buffers) {
            transport.register(Generation::Odd, Arc::clone(buffer)).unwrap();
        }

        // The middle worker marks its two border rows.
        let layout = subs[1].layout();
        for x in 0..4 {
            buffers[1].store(layout.index(x, 0), 1.0 + x as f64);
            buffers[1].store(layout.index(x, 2), 10.0 + x as f64);
        }
        let poll = SpinPoll::default();
        let exchange = HaloExchange::new(&transports[1], &subs[1], &poll);
        let issued = (0..2)
            .map(|lane| {
                exchange
                    .send_borders(&buffers[1], Generation::Odd, &LaneSpan::new(4, 2, lane))
                    .unwrap()
            })
            .sum::<u64>();
        assert_eq!(issued, 4);

        let above = subs[0].layout();
        let below = subs[2].layout();
        for x in 0..4 {
            assert_eq!(
                buffers[0].load(above.padded_index(x + 1, above.y_size() + 1)),
                1.0 + x as f64
            );
            assert_eq!(buffers[2].load(below.padded_index(x + 1, 0)), 10.0 + x as f64);
        }
        assert_eq!(transports[0].notification(Generation::Odd).unwrap(), 2);
        assert_eq!(transports[2].notification(Generation::Odd).unwrap(), 2);

        let above_exchange = HaloExchange::new(&transports[0], &subs[0], &poll);
        above_exchange.await_halo(Generation::Odd, 2).unwrap();
        assert_eq!(transports[0].notification(Generation::Odd).unwrap(), 0);
    }

    #[test]
    fn test_single_worker_sends_nothing() {
        let sub = decompose_all(4, 4, 1).unwrap().remove(0);
        let fabric = LocalFabric::new(1);
        let transport = fabric.endpoint(0).unwrap();
        let buffer = DeviceBuffer::zeroed(sub.layout().padded_len()).unwrap();
        let poll = SpinPoll::default();
        let exchange = HaloExchange::new(&transport, &sub, &poll);
        let issued = exchange
            .send_borders(&buffer, Generation::Even, &LaneSpan::new(4, 1, 0))
            .unwrap();
        assert_eq!(issued, 0);
        exchange.await_halo(Generation::Even, 0).unwrap();
    }

    #[test]
    fn test_missing_notification_times_out() {
        let sub = decompose_all(4, 4, 2).unwrap().remove(0);
        let fabric = LocalFabric::new(2);
        let transport = fabric.endpoint(0).unwrap();
        transport
            .register(
                Generation::Even,
                Arc::new(DeviceBuffer::zeroed(sub.layout().padded_len()).unwrap()),
            )
            .unwrap();
        let poll = DeadlinePoll::new(Duration::from_millis(20));
        let exchange = HaloExchange::new(&transport, &sub, &poll);
        assert!(matches!(
            exchange.await_halo(Generation::Even, 1),
            Err(Error::NotificationTimeout {
                rank: 0,
                expected: 1,
                received: 0,
                ..
            })
        ));
    }
}
