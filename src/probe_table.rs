//! The fixed-capacity probe table: a flat array of probe slots indexed by
//! an allocation cursor, correlated to replies by source port rather than
//! by array index.

use std::net::SocketAddr;
use std::time::Instant;

use socket2::Socket;

use crate::config::{MAX_PORT, MAX_PROBES, MIN_PORT};

/// One entry of the probe table. Fields beyond `used`/`command_token`/
/// `source_port` are populated progressively as `send_probe` proceeds,
/// which is why they are `Option`s rather than unconditionally-initialized
/// values.
#[derive(Default)]
pub struct ProbeSlot {
    pub used: bool,
    pub command_token: i64,
    pub source_port: u16,
    /// Connected per-probe socket for TCP/SCTP probes: each of these
    /// protocols needs its own ephemeral source port to correlate replies
    /// by, so each gets its own socket rather than sharing one of
    /// [`crate::socket_set::SocketSet`]'s raw sockets the way ICMP and UDP
    /// probes do. `None` for ICMP/UDP probes.
    pub owned_socket: Option<Socket>,
    pub remote_addr: Option<SocketAddr>,
    pub departure_time: Option<Instant>,
    pub timeout_deadline: Option<Instant>,
}

impl ProbeSlot {
    fn reset(&mut self) {
        self.used = false;
        self.command_token = 0;
        self.owned_socket = None;
        self.remote_addr = None;
        self.departure_time = None;
        self.timeout_deadline = None;
        // source_port is deliberately left alone: the cycling allocator in
        // ProbeTable::alloc advances it independently of slot reuse.
    }
}

/// Fixed-size probe table with port-cycling correlation: source ports are
/// reused only after cycling through the full configured range.
pub struct ProbeTable {
    slots: Vec<ProbeSlot>,
    next_port: u16,
}

impl ProbeTable {
    #[must_use]
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PROBES);
        slots.resize_with(MAX_PROBES, ProbeSlot::default);
        Self {
            slots,
            next_port: MIN_PORT,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ProbeSlot> {
        self.slots.get(index)
    }

    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ProbeSlot> {
        self.slots.get_mut(index)
    }

    /// Find the slot whose source port matches an incoming reply's
    /// destination port.
    #[must_use]
    pub fn find_by_port(&self, port: u16) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.used && slot.source_port == port)
    }

    /// Allocate a free slot, returning its index and the source port
    /// assigned to it. Returns `None` when the table is full, which the
    /// caller reports as `probes-exhausted`.
    ///
    /// The port cursor advances on every call regardless of which slot is
    /// chosen, wrapping from `MAX_PORT` back to `MIN_PORT`. A port is not
    /// handed out again until `MAX_PORT - MIN_PORT` other allocations have
    /// happened in between.
    pub fn alloc(&mut self, command_token: i64) -> Option<usize> {
        let index = self.slots.iter().position(|slot| !slot.used)?;
        let port = self.next_port;
        self.next_port = if self.next_port == MAX_PORT {
            MIN_PORT
        } else {
            self.next_port + 1
        };

        let slot = &mut self.slots[index];
        slot.used = true;
        slot.command_token = command_token;
        slot.source_port = port;
        Some(index)
    }

    pub fn free(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.reset();
        }
    }

    pub fn iter_used(&self) -> impl Iterator<Item = (usize, &ProbeSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.used)
    }

    pub fn iter_used_mut(&mut self) -> impl Iterator<Item = (usize, &mut ProbeSlot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| slot.used)
    }
}

impl Default for ProbeTable {
    fn default() -> Self {
        Self::new()
    }
}
