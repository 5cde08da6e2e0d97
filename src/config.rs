//! Compile-time tunables shared across the engine.

/// Size of the scratch buffer used for both constructing outgoing packets
/// and reading incoming ones. Must be at least large enough for an IPv4
/// header plus the largest ICMP error quotation we expect to decode.
pub const PACKET_BUFFER_SIZE: usize = 4096;

/// Fixed capacity of the probe table.
pub const MAX_PROBES: usize = 1024;

/// Lower bound (inclusive) of the source port range used for probe
/// correlation.
pub const MIN_PORT: u16 = 33_000;

/// Upper bound (inclusive) of the source port range used for probe
/// correlation.
pub const MAX_PORT: u16 = 65_535;
