//! UDP port allocation
//!
//! A port is chosen once, at install time, then persisted in the service
//! record. The probe binds and immediately releases, so another process can
//! still grab the port before the container starts; the post-start status
//! check catches that.

use std::net::{Ipv4Addr, TcpListener, UdpSocket};
use std::ops::Range;

use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Checks whether ports can be bound right now.
pub trait PortProbe: Send + Sync {
    fn udp_free(&self, port: u16) -> bool;
    fn tcp_free(&self, port: u16) -> bool;
}

/// Probes by binding on 127.0.0.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackProbe;

impl PortProbe for LoopbackProbe {
    fn udp_free(&self, port: u16) -> bool {
        UdpSocket::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }

    fn tcp_free(&self, port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }
}

impl<P: PortProbe + ?Sized> PortProbe for &P {
    fn udp_free(&self, port: u16) -> bool {
        (**self).udp_free(port)
    }

    fn tcp_free(&self, port: u16) -> bool {
        (**self).tcp_free(port)
    }
}

/// Picks the UDP port the listener binds.
#[derive(Debug, Clone)]
pub struct PortAllocator<P> {
    probe: P,
    preferred: u16,
    range: Range<u16>,
}

impl<P: PortProbe> PortAllocator<P> {
    pub fn new(probe: P, preferred: u16, range: Range<u16>) -> Self {
        Self {
            probe,
            preferred,
            range,
        }
    }

    /// Returns `fixed` untouched when given. Otherwise the preferred port if
    /// it is free, else the first free port of the range in shuffled order.
    pub fn allocate(&self, fixed: Option<u16>) -> Result<u16> {
        if let Some(port) = fixed {
            debug!("Using fixed port {}", port);
            return Ok(port);
        }

        if self.probe.udp_free(self.preferred) {
            info!("Selected UDP port {}", self.preferred);
            return Ok(self.preferred);
        }
        debug!(
            "UDP port {} is taken, scanning {}..{}",
            self.preferred, self.range.start, self.range.end
        );

        let mut candidates: Vec<u16> = self.range.clone().collect();
        candidates.shuffle(&mut rand::thread_rng());
        let port = candidates
            .into_iter()
            .find(|port| self.probe.udp_free(*port))
            .ok_or(Error::PortExhausted {
                start: self.range.start,
                end: self.range.end,
            })?;

        info!("Selected UDP port {}", port);
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Probe with a fixed set of busy ports.
    struct BusyProbe(HashSet<u16>);

    impl PortProbe for BusyProbe {
        fn udp_free(&self, port: u16) -> bool {
            !self.0.contains(&port)
        }

        fn tcp_free(&self, port: u16) -> bool {
            !self.0.contains(&port)
        }
    }

    fn allocator(busy: impl IntoIterator<Item = u16>) -> PortAllocator<BusyProbe> {
        PortAllocator::new(BusyProbe(busy.into_iter().collect()), 443, 41670..46990)
    }

    #[test]
    fn test_prefers_443() {
        assert_eq!(allocator([]).allocate(None).unwrap(), 443);
    }

    #[test]
    fn test_falls_back_to_range() {
        let port = allocator([443]).allocate(None).unwrap();
        assert!((41670..46990).contains(&port));
    }

    #[test]
    fn test_skips_busy_range_ports() {
        let busy: Vec<u16> = std::iter::once(443).chain(41670..46989).collect();
        assert_eq!(allocator(busy).allocate(None).unwrap(), 46989);
    }

    #[test]
    fn test_fixed_port_is_not_probed() {
        assert_eq!(allocator([8443]).allocate(Some(8443)).unwrap(), 8443);
    }

    #[test]
    fn test_exhausted() {
        let probe = BusyProbe((0..=u16::MAX).collect());
        let err = PortAllocator::new(probe, 443, 50000..50010)
            .allocate(None)
            .unwrap_err();
        assert!(matches!(err, Error::PortExhausted { start: 50000, end: 50010 }));
    }

    #[test]
    fn test_loopback_probe_sees_bound_socket() {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = socket.local_addr().unwrap().port();
        assert!(!LoopbackProbe.udp_free(port));
        drop(socket);
        assert!(LoopbackProbe.udp_free(port));
    }
}
