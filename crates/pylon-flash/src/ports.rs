//! Local TCP port allocation for debug servers
//!
//! Ports are found by binding `127.0.0.1:0` and reading back the number the
//! OS picked. This is best-effort: once a listener is closed, another
//! process may take the port before the debug server binds it. Holding a
//! [`PortReservation`] until just before spawning the server keeps that
//! window short.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use crate::error::{Error, Result};

const MAX_ATTEMPTS: usize = 64;

/// Hands out distinct local ports
///
/// Every port issued by one allocator is remembered, so it never hands out
/// the same number twice even after the listener was released.
#[derive(Debug, Default)]
pub struct PortAllocator {
    issued: HashSet<u16>,
}

/// Listeners held open on allocated ports
#[derive(Debug)]
pub struct PortReservation {
    listeners: Vec<TcpListener>,
    ports: Vec<u16>,
}

impl PortReservation {
    /// Reserved port numbers, in allocation order
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Close the listeners and return the port numbers
    pub fn release(self) -> Vec<u16> {
        drop(self.listeners);
        self.ports
    }
}

impl PortAllocator {
    /// Allocator with no ports issued yet
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` distinct free ports, released immediately
    pub fn allocate(&mut self, count: usize) -> Result<Vec<u16>> {
        Ok(self.reserve(count)?.release())
    }

    /// A single free port
    pub fn allocate_one(&mut self) -> Result<u16> {
        let ports = self.allocate(1)?;
        ports.first().copied().ok_or_else(|| {
            Error::PortAllocationFailure(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no port allocated",
            ))
        })
    }

    /// `count` distinct free ports, kept bound until the reservation is
    /// released or dropped
    pub fn reserve(&mut self, count: usize) -> Result<PortReservation> {
        let mut listeners = Vec::with_capacity(count);
        let mut ports = Vec::with_capacity(count);
        let mut attempts = 0;

        while ports.len() < count {
            attempts += 1;
            if attempts > MAX_ATTEMPTS * count.max(1) {
                return Err(Error::PortAllocationFailure(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("no unused port after {} attempts", attempts - 1),
                )));
            }

            let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
                .map_err(Error::PortAllocationFailure)?;
            let port = listener
                .local_addr()
                .map_err(Error::PortAllocationFailure)?
                .port();

            // Keep the listener bound either way so the OS moves on
            if self.issued.insert(port) {
                ports.push(port);
            }
            listeners.push(listener);
        }

        log::debug!("Allocated local ports {:?}", ports);
        Ok(PortReservation { listeners, ports })
    }
}
