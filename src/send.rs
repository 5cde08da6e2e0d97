//! Sending a single probe: allocate a slot, resolve the destination, build
//! the wire packet, hand it to the right socket, and map any failure
//! through the same errno table the receive path uses.

use std::os::fd::FromRawFd;
use std::time::Instant;

use socket2::{Domain, SockAddr, Socket, Type};

use crate::codec::{construct_packet, ReplyKind};
use crate::error::OutcomeKeyword;
use crate::net_state::NetState;
use crate::params::{IpVersion, ProbeParams, Protocol};
use crate::recv::ProbeReply;

/// What happened when a probe was handed to the kernel.
#[derive(Debug)]
pub enum SendOutcome {
    /// The probe is in flight; `slot` is its index in the probe table and
    /// will be resolved later by [`crate::recv`] or [`crate::timeout`].
    Pending { slot: usize },
    /// The outcome is already known and no slot remains allocated — either
    /// a local validation failure or a fatal-looking but non-fatal socket
    /// error.
    Resolved(OutcomeKeyword),
    /// A TCP/SCTP connect came back `ECONNREFUSED` immediately: spec §4.4
    /// treats this as a successful arrival at the destination, not a
    /// failure, so the slot is already freed and a reply line is ready.
    Immediate(ProbeReply),
}

/// What `dispatch` did with the packet, distinct from whether the probe is
/// still in flight afterward.
enum DispatchOutcome {
    /// Handed to the kernel (or connect is in progress); the slot's owned
    /// socket (if any) is now populated and the probe awaits a reply.
    Sent,
    /// `ECONNREFUSED` surfaced synchronously from `connect()` — the slot is
    /// resolved right away, never watched by `select`.
    ImmediateReply,
}

/// Send one probe. Never blocks longer than a non-blocking syscall can:
/// no engine entry point yields mid-call.
pub fn send_probe(net_state: &mut NetState, params: &ProbeParams) -> SendOutcome {
    if let Err(outcome) = params.validate() {
        return SendOutcome::Resolved(outcome);
    }

    let dest = match params.decode_dest_addr() {
        Ok(dest) => dest,
        Err(outcome) => return SendOutcome::Resolved(outcome),
    };

    let Some(slot_index) = net_state.table.alloc(params.command_token) else {
        return SendOutcome::Resolved(OutcomeKeyword::ProbesExhausted);
    };

    // spec §4.4 steps 3→4: departure_time is sampled before the packet is
    // even constructed, not after the kernel accepts it, since construction
    // and the send syscall both take real time that belongs in the RTT.
    let departure_time = Instant::now();
    let slot = net_state.table.get_mut(slot_index).expect("just allocated");
    slot.departure_time = Some(departure_time);
    slot.timeout_deadline = Some(departure_time + params.timeout);
    slot.remote_addr = Some(dest);
    let source_port = slot.source_port;

    let result = dispatch(net_state, params, slot_index, source_port, dest);

    match result {
        Ok(DispatchOutcome::Sent) => SendOutcome::Pending { slot: slot_index },
        Ok(DispatchOutcome::ImmediateReply) => {
            let rtt = Instant::now().saturating_duration_since(departure_time);
            net_state.table.free(slot_index);
            SendOutcome::Immediate(ProbeReply {
                command_token: params.command_token,
                kind: ReplyKind::EchoReply,
                responder: dest.ip(),
                rtt,
            })
        }
        Err(outcome) => {
            net_state.table.free(slot_index);
            SendOutcome::Resolved(outcome)
        }
    }
}

fn dispatch(
    net_state: &mut NetState,
    params: &ProbeParams,
    slot_index: usize,
    source_port: u16,
    dest: std::net::SocketAddr,
) -> Result<DispatchOutcome, OutcomeKeyword> {
    let packet = construct_packet(params, source_port, source_port, &net_state.calibration);

    match params.protocol {
        Protocol::Icmp => {
            send_icmp(net_state, params.ip_version, params.ttl, &packet.bytes, &dest)?;
            Ok(DispatchOutcome::Sent)
        }
        Protocol::Udp => {
            send_udp(net_state, params, &packet.bytes, &dest)?;
            Ok(DispatchOutcome::Sent)
        }
        Protocol::Tcp => send_tcp(net_state, slot_index, params, dest),
        Protocol::Sctp => send_sctp(net_state, slot_index, params, dest),
    }
}

/// ICMP and UDP probes both go out through one of
/// [`crate::socket_set::SocketSet`]'s shared sockets (IPv4→ip4_send,
/// IPv6+ICMP→icmp6, IPv6+UDP→udp6_send), never a per-probe socket — the
/// IPv4 packet already carries the TTL in the header the codec built, but
/// IPv6 has no header-include mode, so the hop limit is set on the shared
/// socket immediately before each send. This is safe despite the socket
/// being shared: no engine entry point yields mid-call, so no other probe's
/// send can interleave between the setsockopt and the sendto below.
fn send_icmp(
    net_state: &mut NetState,
    ip_version: IpVersion,
    ttl: u8,
    bytes: &[u8],
    dest: &std::net::SocketAddr,
) -> Result<(), OutcomeKeyword> {
    let addr: SockAddr = (*dest).into();
    let socket = match ip_version {
        IpVersion::V4 => &net_state.sockets.ip4_send,
        IpVersion::V6 => {
            net_state
                .sockets
                .icmp6
                .set_unicast_hops_v6(u32::from(ttl))
                .map_err(|e| classify_send_error(&e))?;
            &net_state.sockets.icmp6
        }
    };
    socket
        .send_to(bytes, &addr)
        .map(|_| ())
        .map_err(|e| classify_send_error(&e))
}

fn send_udp(
    net_state: &mut NetState,
    params: &ProbeParams,
    bytes: &[u8],
    dest: &std::net::SocketAddr,
) -> Result<(), OutcomeKeyword> {
    let addr: SockAddr = (*dest).into();
    let socket = match params.ip_version {
        IpVersion::V4 => &net_state.sockets.ip4_send,
        IpVersion::V6 => {
            net_state
                .sockets
                .udp6_send
                .set_unicast_hops_v6(u32::from(params.ttl))
                .map_err(|e| classify_send_error(&e))?;
            &net_state.sockets.udp6_send
        }
    };
    socket
        .send_to(bytes, &addr)
        .map(|_| ())
        .map_err(|e| classify_send_error(&e))
}

fn send_tcp(
    net_state: &mut NetState,
    slot_index: usize,
    params: &ProbeParams,
    dest: std::net::SocketAddr,
) -> Result<DispatchOutcome, OutcomeKeyword> {
    let domain = match params.ip_version {
        IpVersion::V4 => Domain::IPV4,
        IpVersion::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(socket2::Protocol::TCP))
        .map_err(|e| classify_send_error(&e))?;
    socket.set_nonblocking(true).map_err(|e| classify_send_error(&e))?;
    set_ttl(&socket, params)?;

    let addr: SockAddr = dest.into();
    match socket.connect(&addr) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) if e.raw_os_error() == Some(libc::ECONNREFUSED) => {
            return Ok(DispatchOutcome::ImmediateReply)
        }
        Err(e) => return Err(classify_send_error(&e)),
    }

    if let Some(slot) = net_state.table.get_mut(slot_index) {
        slot.owned_socket = Some(socket);
    }
    Ok(DispatchOutcome::Sent)
}

fn send_sctp(
    net_state: &mut NetState,
    slot_index: usize,
    params: &ProbeParams,
    dest: std::net::SocketAddr,
) -> Result<DispatchOutcome, OutcomeKeyword> {
    // socket2 has no SCTP protocol constant, so the socket is opened through
    // the raw syscall (same call check_sctp_support uses to test
    // availability) and wrapped for the rest of the codebase to use
    // uniformly.
    let af = match params.ip_version {
        IpVersion::V4 => libc::AF_INET,
        IpVersion::V6 => libc::AF_INET6,
    };
    let fd = unsafe { libc::socket(af, libc::SOCK_STREAM, libc::IPPROTO_SCTP) };
    if fd < 0 {
        return Err(classify_send_error(&std::io::Error::last_os_error()));
    }
    let socket = unsafe { Socket::from_raw_fd(fd) };
    socket.set_nonblocking(true).map_err(|e| classify_send_error(&e))?;
    set_ttl(&socket, params)?;

    let addr: SockAddr = dest.into();
    match socket.connect(&addr) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) if e.raw_os_error() == Some(libc::ECONNREFUSED) => {
            return Ok(DispatchOutcome::ImmediateReply)
        }
        Err(e) => return Err(classify_send_error(&e)),
    }

    if let Some(slot) = net_state.table.get_mut(slot_index) {
        slot.owned_socket = Some(socket);
    }
    Ok(DispatchOutcome::Sent)
}

fn set_ttl(socket: &Socket, params: &ProbeParams) -> Result<(), OutcomeKeyword> {
    let result = match params.ip_version {
        IpVersion::V4 => socket.set_ttl(u32::from(params.ttl)),
        IpVersion::V6 => socket.set_unicast_hops_v6(u32::from(params.ttl)),
    };
    result.map_err(|e| classify_send_error(&e))
}

fn classify_send_error(err: &std::io::Error) -> OutcomeKeyword {
    OutcomeKeyword::from_io_error(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base_params(protocol: Protocol) -> ProbeParams {
        ProbeParams {
            protocol,
            ip_version: IpVersion::V4,
            ttl: 64,
            address: "127.0.0.1".to_string(),
            dest_port: Some(33434),
            timeout: Duration::from_millis(500),
            command_token: 1,
            payload_size: None,
        }
    }

    #[test]
    fn invalid_params_resolve_without_consuming_a_slot() {
        // This test only exercises the validation short-circuit; it does
        // not open any sockets, so it is safe to run unprivileged.
        let mut params = base_params(Protocol::Icmp);
        params.ttl = 0;
        match params.validate() {
            Err(outcome) => assert_eq!(outcome, OutcomeKeyword::InvalidArgument),
            Ok(()) => panic!("expected validation failure"),
        }
    }
}
