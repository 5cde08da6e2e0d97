//! Cross-platform IP header byte-order calibration and SCTP availability
//! probing.
//!
//! BSD-derived kernels (historically including macOS) want the IPv4
//! header's `ip_len` field in host byte order when `IP_HDRINCL` is set;
//! Linux and most others want network byte order. The only reliable way to
//! know which one a given kernel expects is to send a packet to loopback
//! and see whether the kernel accepts it — not whether anything comes
//! back, since a firewalled or loopback-filtering sandbox may never echo
//! the packet at all. A `sendto` that returns a positive byte count means
//! this kernel accepted the header as well-formed.

use std::time::Duration;

use crate::codec::construct_packet;
use crate::config::MIN_PORT;
use crate::error::FatalError;
use crate::params::{IpVersion, ProbeParams, Protocol};
use crate::socket_set::SocketSet;

/// Result of one-time platform calibration, computed during unprivileged
/// startup (after sockets are already non-blocking) and consulted by the
/// codec on every subsequent send.
#[derive(Debug, Clone, Copy, Default)]
pub struct Calibration {
    /// `true` if this kernel wants `IP_HDRINCL` length fields in host byte
    /// order; `false` for network byte order (the common case on Linux).
    pub ip_length_host_order: bool,
    /// `true` if `socket(AF_INET, SOCK_STREAM, IPPROTO_SCTP)` succeeds on
    /// this host, gating whether SCTP probes are offered at all.
    pub sctp_support: bool,
}

impl Calibration {
    /// Detect both properties. Must run after [`SocketSet::set_nonblocking_all`]
    /// — a non-blocking `sendto` to loopback still completes synchronously,
    /// so this ordering costs nothing.
    pub fn detect(sockets: &SocketSet) -> Result<Self, FatalError> {
        let ip_length_host_order = detect_ip_length_order(sockets)?;
        let sctp_support = probe_sctp_support();
        Ok(Self {
            ip_length_host_order,
            sctp_support,
        })
    }

    /// Write the IPv4 total-length field the way this kernel expects it.
    #[must_use]
    pub fn encode_ip_total_len(&self, buf: &mut [u8], total_len: u16) {
        if self.ip_length_host_order {
            buf.copy_from_slice(&total_len.to_ne_bytes());
        } else {
            buf.copy_from_slice(&total_len.to_be_bytes());
        }
    }

    /// Whether the command layer should even attempt a probe of this
    /// protocol: ICMP/UDP/TCP are always offered, SCTP only if this host
    /// supports it.
    #[must_use]
    pub fn is_protocol_supported(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Icmp | Protocol::Udp | Protocol::Tcp => true,
            Protocol::Sctp => self.sctp_support,
        }
    }
}

/// A minimum ICMP echo request to localhost, TTL=255.
fn calibration_params() -> ProbeParams {
    ProbeParams {
        protocol: Protocol::Icmp,
        ip_version: IpVersion::V4,
        ttl: 255,
        address: "127.0.0.1".to_string(),
        dest_port: None,
        timeout: Duration::from_secs(1),
        command_token: 0,
        payload_size: None,
    }
}

fn detect_ip_length_order(sockets: &SocketSet) -> Result<bool, FatalError> {
    let params = calibration_params();
    let dest = params
        .decode_dest_addr()
        .map_err(|_| FatalError::Calibration("failed to decode localhost address".to_string()))?;
    let dest_sockaddr: socket2::SockAddr = dest.into();

    // First attempt: assume network byte order, the common case.
    let network_order = Calibration {
        ip_length_host_order: false,
        sctp_support: false,
    };
    let packet = construct_packet(&params, MIN_PORT, MIN_PORT, &network_order);
    if matches!(sockets.ip4_send.send_to(&packet.bytes, &dest_sockaddr), Ok(n) if n > 0) {
        return Ok(false);
    }

    // Network byte order was rejected by this kernel; try host byte order.
    let host_order = Calibration {
        ip_length_host_order: true,
        sctp_support: false,
    };
    let packet = construct_packet(&params, MIN_PORT, MIN_PORT, &host_order);
    match sockets.ip4_send.send_to(&packet.bytes, &dest_sockaddr) {
        Ok(n) if n > 0 => Ok(true),
        Ok(_) => Err(FatalError::Calibration(
            "sendto returned 0 for both IP length byte orders".to_string(),
        )),
        Err(e) => Err(FatalError::Calibration(format!(
            "sendto to localhost failed for both IP length byte orders: {e}"
        ))),
    }
}

fn probe_sctp_support() -> bool {
    // The only portable way to know if SCTP is usable is to try opening a
    // socket for it.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, libc::IPPROTO_SCTP) };
    if fd < 0 {
        return false;
    }
    unsafe {
        libc::close(fd);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_network_order_by_default() {
        let calib = Calibration {
            ip_length_host_order: false,
            sctp_support: false,
        };
        let mut buf = [0u8; 2];
        calib.encode_ip_total_len(&mut buf, 0x0102);
        assert_eq!(buf, [0x01, 0x02]);
    }

    #[test]
    fn encodes_host_order_when_calibrated() {
        let calib = Calibration {
            ip_length_host_order: true,
            sctp_support: false,
        };
        let mut buf = [0u8; 2];
        calib.encode_ip_total_len(&mut buf, 0x0102);
        assert_eq!(buf, 0x0102u16.to_ne_bytes());
    }

    #[test]
    fn calibration_params_target_localhost_with_max_ttl() {
        let params = calibration_params();
        assert_eq!(params.address, "127.0.0.1");
        assert_eq!(params.ttl, 255);
        assert!(matches!(params.protocol, Protocol::Icmp));
    }
}
