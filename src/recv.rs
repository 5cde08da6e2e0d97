//! Draining reply sockets and completing in-flight probes: drain every
//! ready ICMP socket in a tight non-blocking loop until `EAGAIN`, and poll
//! each outstanding TCP/SCTP socket for writability (a connect that
//! completed) or a pending `SO_ERROR`.

use std::time::{Duration, Instant};

use crate::codec::{decode_icmp6_reply, decode_ip4_reply, DecodedReply, ReplyKind};
use crate::config::PACKET_BUFFER_SIZE;
use crate::error::FatalError;
use crate::net_state::NetState;

/// One completed probe, ready to be rendered as a `reply-<type>` line by the
/// command layer.
#[derive(Debug)]
pub struct ProbeReply {
    pub command_token: i64,
    pub kind: ReplyKind,
    pub responder: std::net::IpAddr,
    pub rtt: Duration,
}

impl ProbeReply {
    #[must_use]
    pub fn as_line(&self) -> String {
        let kind = match self.kind {
            ReplyKind::EchoReply => "reply-echo",
            ReplyKind::TimeExceeded => "reply-ttl-expired",
            ReplyKind::DestinationUnreachable => "reply-unreachable",
        };
        // spec.md §6: `<tok> reply-<type> <ip> <rtt_us>` — microseconds as a
        // plain integer, not milliseconds.
        format!(
            "{} {} {} {}",
            self.command_token,
            kind,
            self.responder,
            self.rtt.as_micros()
        )
    }
}

/// Drain every ready socket once. Intended to be called whenever `select`
/// reports one of the engine's sockets readable; it never blocks itself.
///
/// A receive failure other than `EAGAIN`/`EWOULDBLOCK`/`EINTR` is fatal (it
/// indicates a broken host, not a runtime condition — see spec §7): this
/// propagates it rather than silently dropping the packet.
pub fn receive_replies(net_state: &mut NetState) -> Result<Vec<ProbeReply>, FatalError> {
    let mut replies = Vec::new();
    drain_ip4(net_state, &mut replies)?;
    drain_icmp6(net_state, &mut replies)?;
    poll_owned_sockets(net_state, &mut replies);
    Ok(replies)
}

fn drain_ip4(net_state: &mut NetState, replies: &mut Vec<ProbeReply>) -> Result<(), FatalError> {
    let mut buf = [0u8; PACKET_BUFFER_SIZE];
    loop {
        match recv_into(&net_state.sockets.ip4_recv, &mut buf) {
            RecvResult::Ready(n) => {
                if let Some(decoded) = decode_ip4_reply(&buf[..n]) {
                    complete_from_decoded(net_state, decoded, replies);
                }
            }
            RecvResult::WouldBlock => return Ok(()),
            RecvResult::Fatal(err) => return Err(FatalError::Recv("ipv4 recv", err)),
        }
    }
}

fn drain_icmp6(net_state: &mut NetState, replies: &mut Vec<ProbeReply>) -> Result<(), FatalError> {
    let mut buf = [0u8; PACKET_BUFFER_SIZE];
    loop {
        match recv_from_into(&net_state.sockets.icmp6, &mut buf) {
            RecvResult::Ready((n, Some(std::net::IpAddr::V6(responder)))) => {
                if let Some(decoded) = decode_icmp6_reply(&buf[..n], responder) {
                    complete_from_decoded(net_state, decoded, replies);
                }
            }
            RecvResult::Ready(_) => continue,
            RecvResult::WouldBlock => return Ok(()),
            RecvResult::Fatal(err) => return Err(FatalError::Recv("icmpv6", err)),
        }
    }
}

fn complete_from_decoded(
    net_state: &mut NetState,
    decoded: DecodedReply,
    replies: &mut Vec<ProbeReply>,
) {
    let Some(slot_index) = net_state.table.find_by_port(decoded.identifier) else {
        // No outstanding probe with this correlation key: either a stray
        // packet or a reply for a probe we already timed out and freed.
        return;
    };
    let Some(slot) = net_state.table.get(slot_index) else {
        return;
    };
    let rtt = slot
        .departure_time
        .map_or(Duration::ZERO, |t0| Instant::now().saturating_duration_since(t0));
    replies.push(ProbeReply {
        command_token: slot.command_token,
        kind: decoded.kind,
        responder: decoded.responder,
        rtt,
    });
    net_state.table.free(slot_index);
}

/// Poll every in-flight TCP/SCTP probe's owned socket for a resolved
/// connect(). UDP probes never populate `owned_socket` — they go out
/// through the shared IPv4/IPv6 send sockets and are only ever correlated
/// through `drain_ip4`/`drain_icmp6`'s ICMP error-quotation path, the same
/// as ICMP probes.
fn poll_owned_sockets(net_state: &mut NetState, replies: &mut Vec<ProbeReply>) {
    let mut resolved = Vec::new();
    for (index, slot) in net_state.table.iter_used_mut() {
        let Some(socket) = &slot.owned_socket else {
            continue;
        };
        if !is_writable(socket) {
            continue;
        }
        let pending_error = socket.take_error().ok().flatten();
        let responder = slot
            .remote_addr
            .map(|addr| addr.ip())
            .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
        let rtt = slot
            .departure_time
            .map_or(Duration::ZERO, |t0| Instant::now().saturating_duration_since(t0));

        match pending_error {
            None => {
                // Connection established: treat as arrival at this hop.
                resolved.push((
                    index,
                    ProbeReply {
                        command_token: slot.command_token,
                        kind: ReplyKind::EchoReply,
                        responder,
                        rtt,
                    },
                ));
            }
            Some(ref err) if err.raw_os_error() == Some(libc::ECONNREFUSED) => {
                resolved.push((
                    index,
                    ProbeReply {
                        command_token: slot.command_token,
                        kind: ReplyKind::EchoReply,
                        responder,
                        rtt,
                    },
                ));
            }
            Some(_) => {
                // Any other pending error (e.g. ENETUNREACH surfacing late)
                // leaves the probe to expire through the timeout scheduler
                // rather than invent a reply kind the protocol doesn't have.
            }
        }
    }

    for (index, reply) in resolved {
        replies.push(reply);
        net_state.table.free(index);
    }
}

fn is_writable(socket: &socket2::Socket) -> bool {
    use std::os::fd::AsRawFd;
    let fd = socket.as_raw_fd();
    let mut write_fds: libc::fd_set = unsafe { std::mem::zeroed() };
    unsafe {
        libc::FD_ZERO(&mut write_fds);
        libc::FD_SET(fd, &mut write_fds);
    }
    let mut timeout = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let ready = unsafe {
        libc::select(
            fd + 1,
            std::ptr::null_mut(),
            &mut write_fds,
            std::ptr::null_mut(),
            &mut timeout,
        )
    };
    ready > 0
}

/// Outcome of one non-blocking receive attempt. `EINTR` is handled inside
/// the callers' retry loop below rather than surfaced here, per spec §4.5
/// ("Interrupted receives (errno EINTR) retry"); only `EAGAIN`/`EWOULDBLOCK`
/// (the drain loop's normal termination) and genuine failures reach the
/// caller.
enum RecvResult<T> {
    Ready(T),
    WouldBlock,
    Fatal(std::io::Error),
}

fn recv_into(socket: &socket2::Socket, buf: &mut [u8]) -> RecvResult<usize> {
    let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [std::mem::MaybeUninit<u8>]) };
    loop {
        match socket.recv(uninit) {
            Ok(n) => return RecvResult::Ready(n),
            Err(e) if is_eintr(&e) => continue,
            Err(e) if is_would_block(&e) => return RecvResult::WouldBlock,
            Err(e) => return RecvResult::Fatal(e),
        }
    }
}

fn recv_from_into(
    socket: &socket2::Socket,
    buf: &mut [u8],
) -> RecvResult<(usize, Option<std::net::IpAddr>)> {
    let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [std::mem::MaybeUninit<u8>]) };
    loop {
        match socket.recv_from(uninit) {
            Ok((n, addr)) => return RecvResult::Ready((n, addr.as_socket().map(|s| s.ip()))),
            Err(e) if is_eintr(&e) => continue,
            Err(e) if is_would_block(&e) => return RecvResult::WouldBlock,
            Err(e) => return RecvResult::Fatal(e),
        }
    }
}

fn is_would_block(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn is_eintr(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINTR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_line_reports_rtt_in_whole_microseconds() {
        let reply = ProbeReply {
            command_token: 1,
            kind: ReplyKind::EchoReply,
            responder: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            rtt: Duration::from_micros(42_123),
        };
        assert_eq!(reply.as_line(), "1 reply-echo 127.0.0.1 42123");
    }

    #[test]
    fn as_line_uses_the_matching_keyword_per_kind() {
        let base = |kind| ProbeReply {
            command_token: 7,
            kind,
            responder: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            rtt: Duration::from_micros(1),
        };
        assert!(base(ReplyKind::TimeExceeded).as_line().contains("reply-ttl-expired"));
        assert!(base(ReplyKind::DestinationUnreachable)
            .as_line()
            .contains("reply-unreachable"));
    }
}
