//! Unused local port selection
//!
//! A port is probed by binding a throwaway listener to port 0 and closing it
//! again. Between the probe and the caller's real bind another probe could
//! hand out the same number, so every selected port is reserved for a short
//! window and skipped by later selections until the reservation expires.

use crate::error::ChannelError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::time::{Duration, Instant};

/// Probes per selection before giving up
const MAX_PROBES: u32 = 64;

static GLOBAL: Lazy<PortAllocator> = Lazy::new(PortAllocator::default);

/// Selects unused localhost ports with a reservation cache
#[derive(Debug)]
pub struct PortAllocator {
    window: Duration,
    reservations: Mutex<HashMap<u16, Instant>>,
}

impl PortAllocator {
    /// Create allocator with the given reservation window
    #[inline]
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide allocator
    #[inline]
    #[must_use]
    pub fn global() -> &'static PortAllocator {
        &GLOBAL
    }

    /// Reservation window
    #[inline]
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Select an unused port on 127.0.0.1 and reserve it
    ///
    /// # Errors
    /// - `ChannelError::Io` if probing fails
    /// - `ChannelError::PortExhausted` if every probe hit a reserved port
    pub fn unused_localhost_port(&self) -> Result<u16, ChannelError> {
        self.select(|| {
            let probe = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
                .map_err(|e| ChannelError::io("probe bind", e))?;
            let port = probe
                .local_addr()
                .map_err(|e| ChannelError::io("probe address", e))?
                .port();
            Ok(port)
        })
    }

    /// Select and reserve a port from the given probe
    fn select<F>(&self, mut probe: F) -> Result<u16, ChannelError>
    where
        F: FnMut() -> Result<u16, ChannelError>,
    {
        let mut reservations = self.reservations.lock();
        let now = Instant::now();
        reservations.retain(|_, expires| *expires > now);

        for _ in 0..MAX_PROBES {
            let port = probe()?;
            if reservations.contains_key(&port) {
                tracing::trace!("Port {} still reserved, probing again", port);
                continue;
            }
            reservations.insert(port, now + self.window);
            return Ok(port);
        }

        Err(ChannelError::PortExhausted {
            attempts: MAX_PROBES,
        })
    }

    /// Whether a port is currently inside its reservation window
    #[must_use]
    pub fn is_reserved(&self, port: u16) -> bool {
        self.reservations
            .lock()
            .get(&port)
            .is_some_and(|expires| *expires > Instant::now())
    }

    /// Number of live reservations
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        let now = Instant::now();
        self.reservations
            .lock()
            .values()
            .filter(|expires| **expires > now)
            .count()
    }
}

impl Default for PortAllocator {
    /// Allocator with a 5 second reservation window
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Loopback address for a port
#[inline]
#[must_use]
pub fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn selected_ports_are_distinct_within_window() {
        let allocator = PortAllocator::new(Duration::from_secs(60));
        let mut seen = HashSet::new();
        for _ in 0..20 {
            let port = allocator.unused_localhost_port().unwrap();
            assert!(seen.insert(port), "port {port} returned twice");
            assert!(allocator.is_reserved(port));
        }
        assert_eq!(allocator.reserved_count(), 20);
    }

    #[test]
    fn reserved_port_is_skipped() {
        let allocator = PortAllocator::new(Duration::from_secs(60));
        let mut probes = vec![4000u16, 4000, 4001].into_iter();

        let first = allocator.select(|| Ok(probes.next().unwrap())).unwrap();
        let second = allocator.select(|| Ok(probes.next().unwrap())).unwrap();

        assert_eq!(first, 4000);
        assert_eq!(second, 4001);
    }

    #[test]
    fn expired_reservations_are_purged() {
        let allocator = PortAllocator::new(Duration::ZERO);
        let first = allocator.select(|| Ok(5000)).unwrap();
        let second = allocator.select(|| Ok(5000)).unwrap();

        assert_eq!(first, second);
        assert_eq!(allocator.reserved_count(), 0);
    }

    #[test]
    fn exhaustion_is_reported() {
        let allocator = PortAllocator::new(Duration::from_secs(60));
        allocator.select(|| Ok(6000)).unwrap();

        let result = allocator.select(|| Ok(6000));
        assert!(matches!(
            result,
            Err(ChannelError::PortExhausted { attempts: MAX_PROBES })
        ));
    }
}
