//! Probe engine core: the probe table, send/receive protocol state machine,
//! raw-socket I/O discipline, cross-platform IP header byte-order
//! calibration, and the timeout scheduler for a `traceroute`/`mtr`-style
//! network path-diagnostic tool.
//!
//! This crate is deliberately narrow: it owns *only* the probe engine. An
//! external command layer (see [`driver`]) is expected to decode commands,
//! call [`send::send_probe`], and drive the event loop in
//! [`driver::run_event_loop`].

pub mod args;
pub mod calibration;
pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod net_state;
pub mod params;
pub mod probe_table;
pub mod recv;
pub mod select_loop;
pub mod send;
pub mod socket_set;
pub mod timeout;

pub use config::{MAX_PORT, MAX_PROBES, MIN_PORT, PACKET_BUFFER_SIZE};
pub use error::{FatalError, OutcomeKeyword};
pub use net_state::NetState;
pub use params::{IpVersion, ProbeParams, Protocol};
pub use probe_table::{ProbeSlot, ProbeTable};
