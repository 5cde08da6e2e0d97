//! Probe parameters: the input to [`crate::send::send_probe`].

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::OutcomeKeyword;

/// Transport-level protocol a probe is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Icmp,
    Udp,
    Tcp,
    Sctp,
}

impl Protocol {
    /// Whether this protocol uses a per-probe connected stream socket
    /// rather than one of the shared raw sockets.
    #[must_use]
    pub const fn is_stream(self) -> bool {
        matches!(self, Self::Tcp | Self::Sctp)
    }
}

/// IP address family a probe targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Parameters for a single outgoing probe.
#[derive(Debug, Clone)]
pub struct ProbeParams {
    pub protocol: Protocol,
    pub ip_version: IpVersion,
    pub ttl: u8,
    pub address: String,
    pub dest_port: Option<u16>,
    pub timeout: Duration,
    pub command_token: i64,
    pub payload_size: Option<usize>,
}

impl ProbeParams {
    /// Local validation of invalid combinations, performed before any
    /// socket or probe-table work, so a bad combination never consumes a
    /// probe slot.
    pub fn validate(&self) -> Result<(), OutcomeKeyword> {
        if self.ttl == 0 {
            return Err(OutcomeKeyword::InvalidArgument);
        }
        if !matches!(self.protocol, Protocol::Icmp) && self.dest_port.is_none() {
            return Err(OutcomeKeyword::InvalidArgument);
        }
        Ok(())
    }

    /// Parse [`Self::address`] into a concrete socket address, honoring
    /// [`Self::ip_version`].
    pub fn decode_dest_addr(&self) -> Result<SocketAddr, OutcomeKeyword> {
        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|_| OutcomeKeyword::InvalidArgument)?;
        let family_matches = match (self.ip_version, ip) {
            (IpVersion::V4, IpAddr::V4(_)) => true,
            (IpVersion::V6, IpAddr::V6(_)) => true,
            _ => false,
        };
        if !family_matches {
            return Err(OutcomeKeyword::InvalidArgument);
        }
        // ICMP has no transport port of its own; the probe's source port is
        // used for correlation instead, so the destination port is 0.
        let port = self.dest_port.unwrap_or(0);
        Ok(SocketAddr::new(ip, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(protocol: Protocol) -> ProbeParams {
        ProbeParams {
            protocol,
            ip_version: IpVersion::V4,
            ttl: 64,
            address: "127.0.0.1".to_string(),
            dest_port: Some(33434),
            timeout: Duration::from_secs(1),
            command_token: 1,
            payload_size: None,
        }
    }

    #[test]
    fn zero_ttl_is_invalid() {
        let mut params = base(Protocol::Icmp);
        params.ttl = 0;
        assert_eq!(params.validate(), Err(OutcomeKeyword::InvalidArgument));
    }

    #[test]
    fn non_icmp_without_port_is_invalid() {
        let mut params = base(Protocol::Udp);
        params.dest_port = None;
        assert_eq!(params.validate(), Err(OutcomeKeyword::InvalidArgument));
    }

    #[test]
    fn icmp_without_port_is_valid() {
        let mut params = base(Protocol::Icmp);
        params.dest_port = None;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn address_family_mismatch_is_rejected() {
        let mut params = base(Protocol::Icmp);
        params.address = "::1".to_string();
        assert_eq!(
            params.decode_dest_addr(),
            Err(OutcomeKeyword::InvalidArgument)
        );
    }

    #[test]
    fn valid_v4_address_decodes() {
        let params = base(Protocol::Udp);
        let addr = params.decode_dest_addr().unwrap();
        assert_eq!(addr.port(), 33434);
    }
}
