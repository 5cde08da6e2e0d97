//! Top-level engine state and its two-phase initialization: sockets are
//! opened while still privileged, then non-blocking mode and calibration
//! run once privileges have been dropped by the caller.

use crate::calibration::Calibration;
use crate::error::FatalError;
use crate::probe_table::ProbeTable;
use crate::socket_set::SocketSet;

/// All mutable state the engine needs across the lifetime of the process.
/// Held by the command layer (see [`crate::driver`]) and passed by
/// `&mut` reference into [`crate::send::send_probe`] and
/// [`crate::recv::receive_replies`].
pub struct NetState {
    pub sockets: SocketSet,
    pub calibration: Calibration,
    pub table: ProbeTable,
}

impl NetState {
    /// Phase one: open every socket that needs elevated privilege. Kept as
    /// small as possible, since it runs with elevated privileges. Must be
    /// called before the process drops any privilege it was started with.
    pub fn init_privileged() -> Result<Self, FatalError> {
        let sockets = SocketSet::open_privileged()?;
        Ok(Self {
            sockets,
            calibration: Calibration::default(),
            table: ProbeTable::new(),
        })
    }

    /// Phase two: switch every socket to non-blocking mode, then run
    /// platform calibration (byte order, SCTP availability). Safe to call
    /// with privileges already dropped, since it only changes flags and
    /// sends loopback probes on file descriptors opened in phase one.
    pub fn init_unprivileged(&mut self) -> Result<(), FatalError> {
        self.sockets.set_nonblocking_all()?;
        self.calibration = Calibration::detect(&self.sockets)?;
        Ok(())
    }
}
