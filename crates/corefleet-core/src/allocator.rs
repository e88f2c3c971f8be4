//! Local port selection for new nodes.
//!
//! The scan is best-effort: nothing reserves the port at the OS level, so
//! another program can still take it between allocation and the core binding it.

use crate::error::{FleetError, Result};
use crate::models::NodeProfile;
use crate::platform;
use std::collections::HashSet;
use tracing::debug;

/// Source of "is something on this host already listening here" answers.
pub trait ListenerProbe: Send + Sync {
    /// Snapshot of every listening port, if the platform can list them.
    fn active_listeners(&self) -> Option<HashSet<u16>>;

    /// Per-port check used when no snapshot is available.
    fn probe_port(&self, _port: u16) -> bool {
        false
    }
}

impl<T: ListenerProbe + ?Sized> ListenerProbe for Box<T> {
    fn active_listeners(&self) -> Option<HashSet<u16>> {
        (**self).active_listeners()
    }

    fn probe_port(&self, port: u16) -> bool {
        (**self).probe_port(port)
    }
}

/// Reads the kernel listener table, falling back to a bind attempt per port.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemListenerProbe;

impl ListenerProbe for SystemListenerProbe {
    fn active_listeners(&self) -> Option<HashSet<u16>> {
        match platform::active_tcp_listeners() {
            Ok(ports) => Some(ports),
            Err(e) => {
                debug!("Listener table unavailable, probing by bind: {}", e);
                None
            }
        }
    }

    fn probe_port(&self, port: u16) -> bool {
        std::net::TcpListener::bind(("127.0.0.1", port)).is_err()
    }
}

/// Picks a port for a node from `[start, end)`.
pub struct PortAllocator<P: ListenerProbe> {
    start: u32,
    end: u32,
    probe: P,
}

impl<P: ListenerProbe> PortAllocator<P> {
    pub fn new(start: u32, end: u32, probe: P) -> Self {
        Self { start, end, probe }
    }

    /// Resolve the primary port a profile should run on.
    ///
    /// An explicit custom port is returned as-is; the caller decides whether
    /// it conflicts. Otherwise the first port whose whole `span` (the primary
    /// port and the offset inbounds after it) is neither in `held` nor
    /// listened on by anything else wins.
    pub fn allocate(&self, profile: &NodeProfile, held: &HashSet<u16>, span: u16) -> Result<u16> {
        if let Some(port) = profile.requested_port()? {
            return Ok(port);
        }

        let listeners = self.probe.active_listeners();
        let is_free = |port: u32| match u16::try_from(port) {
            Ok(port) if !held.contains(&port) => match &listeners {
                Some(set) => !set.contains(&port),
                None => !self.probe.probe_port(port),
            },
            _ => false,
        };

        let span = u32::from(span.max(1));
        let end = self.end.min(u32::from(u16::MAX) + 1);
        let mut candidate = self.start;
        while candidate + span <= end {
            match (candidate..candidate + span).find(|&port| !is_free(port)) {
                // Nothing starting at or below the busy port can fit.
                Some(busy) => candidate = busy + 1,
                None => {
                    let port = u16::try_from(candidate).map_err(|_| FleetError::PortExhausted {
                        start: self.start,
                        end: self.end,
                    })?;
                    debug!("Allocated port {} for node {}", port, profile.index_id);
                    return Ok(port);
                }
            }
        }

        Err(FleetError::PortExhausted {
            start: self.start,
            end: self.end,
        })
    }
}
