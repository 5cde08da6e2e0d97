//! Raw and shared sockets the engine keeps open for its whole lifetime: one
//! `IP_HDRINCL` raw socket for sending self-crafted IPv4 packets, one raw
//! socket for reading IPv4 ICMP replies, and (IPv6 has no header-include
//! mode) a plain ICMPv6 socket plus a raw `IPPROTO_UDP` socket the engine
//! builds its own UDP header for, used only to send IPv6 UDP probes.

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};

use crate::error::FatalError;

/// The small, fixed set of sockets the engine multiplexes over. Everything
/// else (per-probe TCP/SCTP sockets) lives in [`crate::probe_table::ProbeSlot`]
/// instead, since their lifetime is scoped to one probe.
pub struct SocketSet {
    /// IPv4 raw socket with `IP_HDRINCL` set, used to send self-crafted IPv4
    /// packets (ICMP echo requests and the IPv4 header wrapping UDP probes).
    pub ip4_send: Socket,
    /// IPv4 raw ICMP socket used only for reading incoming replies.
    pub ip4_recv: Socket,
    /// IPv6 ICMP6 socket, used both to send echo requests and to read
    /// replies (IPv6 raw sockets do not support header-include mode, so the
    /// kernel builds the IPv6 header).
    pub icmp6: Socket,
    /// IPv6 raw socket (`IPPROTO_UDP`, not a connected `SOCK_DGRAM`), used
    /// only to send UDP probes: the kernel builds the IPv6 header, but the
    /// engine's codec supplies its own UDP header so it controls the source
    /// port used for reply correlation.
    pub udp6_send: Socket,
}

impl SocketSet {
    /// Open every socket that requires elevated privilege. Must run before
    /// any privileges are dropped.
    pub fn open_privileged() -> Result<Self, FatalError> {
        // IPPROTO_RAW: this socket only ever sends self-crafted IP headers
        // via IP_HDRINCL, so its protocol isn't pinned to any one transport.
        let ip4_send = Socket::new(Domain::IPV4, Type::RAW, Some(SockProtocol::from(libc::IPPROTO_RAW)))
            .map_err(|e| FatalError::SocketOpen("ipv4 send", e))?;
        ip4_send
            .set_header_included_v4(true)
            .map_err(|e| FatalError::SocketOpen("ipv4 send (IP_HDRINCL)", e))?;

        let ip4_recv = Socket::new(Domain::IPV4, Type::RAW, Some(SockProtocol::ICMPV4))
            .map_err(|e| FatalError::SocketOpen("ipv4 recv", e))?;

        let icmp6 = Socket::new(Domain::IPV6, Type::RAW, Some(SockProtocol::ICMPV6))
            .map_err(|e| FatalError::SocketOpen("icmpv6", e))?;

        let udp6_send = Socket::new(Domain::IPV6, Type::RAW, Some(SockProtocol::UDP))
            .map_err(|e| FatalError::SocketOpen("udp6 send", e))?;
        set_ipv6_udp_checksum_offset(&udp6_send)
            .map_err(|e| FatalError::SocketOpen("udp6 send (IPV6_CHECKSUM)", e))?;

        Ok(Self {
            ip4_send,
            ip4_recv,
            icmp6,
            udp6_send,
        })
    }

    /// Put every socket into non-blocking mode. Run once, after
    /// `open_privileged` and before the event loop starts.
    pub fn set_nonblocking_all(&self) -> Result<(), FatalError> {
        self.ip4_send
            .set_nonblocking(true)
            .map_err(|e| FatalError::NonBlocking("ipv4 send", e))?;
        self.ip4_recv
            .set_nonblocking(true)
            .map_err(|e| FatalError::NonBlocking("ipv4 recv", e))?;
        self.icmp6
            .set_nonblocking(true)
            .map_err(|e| FatalError::NonBlocking("icmpv6", e))?;
        self.udp6_send
            .set_nonblocking(true)
            .map_err(|e| FatalError::NonBlocking("udp6 send", e))?;
        Ok(())
    }
}

/// Tell the kernel where the UDP checksum field sits in every packet this
/// socket sends (byte offset 6 into the UDP header the codec builds) so it
/// can fill it in for us. IPv6 UDP checksums are mandatory and depend on a
/// pseudo-header with the kernel-assigned source address, which the codec
/// never sees, so this is the only way to produce a conformant checksum
/// from a raw socket without a full userspace IPv6 stack.
fn set_ipv6_udp_checksum_offset(socket: &Socket) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let offset: libc::c_int = 6;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IPV6,
            libc::IPV6_CHECKSUM,
            std::ptr::addr_of!(offset).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
