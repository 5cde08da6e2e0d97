//! The thin line-oriented command layer: reads `send-probe` commands from a
//! `BufRead`, drives the engine, and writes outcome lines to a `Write`.
//!
//! This is deliberately not a general interactive parser — one command
//! kind, one wire format, just enough to exercise
//! [`crate::send::send_probe`]/[`crate::recv::receive_replies`]/
//! [`crate::timeout::check_probe_timeouts`] end-to-end from a test harness
//! or a human at a terminal.

use std::io::{BufRead, Write};
use std::net::IpAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use crate::error::OutcomeKeyword;
use crate::net_state::NetState;
use crate::params::{IpVersion, ProbeParams, Protocol};
use crate::select_loop::select_wait;
use crate::send::{send_probe, SendOutcome};
use crate::timeout::{check_probe_timeouts, gather_probe_sockets, get_next_probe_timeout};

/// Parse one `send-probe` command line. Returns `Err` with the literal text
/// to report back over the outcome channel (always reported with token `0`,
/// since a malformed line never reaches probe-table allocation).
fn parse_command(line: &str) -> Result<ProbeParams, String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().ok_or("empty line")?;
    if verb != "send-probe" {
        return Err(format!("unknown command {verb:?}"));
    }

    let token: i64 = parts
        .next()
        .ok_or("missing token")?
        .parse()
        .map_err(|_| "token is not an integer".to_string())?;

    let protocol = match parts.next().ok_or("missing protocol")? {
        "icmp" => Protocol::Icmp,
        "udp" => Protocol::Udp,
        "tcp" => Protocol::Tcp,
        "sctp" => Protocol::Sctp,
        other => return Err(format!("unknown protocol {other:?}")),
    };

    let ip_version = match parts.next().ok_or("missing ip version")? {
        "4" => IpVersion::V4,
        "6" => IpVersion::V6,
        other => return Err(format!("unknown ip version {other:?}")),
    };

    let ttl: u8 = parts
        .next()
        .ok_or("missing ttl")?
        .parse()
        .map_err(|_| "ttl is not a number".to_string())?;

    let address = parts.next().ok_or("missing destination address")?.to_string();
    address
        .parse::<IpAddr>()
        .map_err(|_| "destination address is not a valid IP literal".to_string())?;

    // dest-port is optional for ICMP and required otherwise; the remaining
    // token is always the timeout, so peek ahead to tell them apart.
    let remaining: Vec<&str> = parts.collect();
    let (dest_port, timeout_secs) = match remaining.len() {
        1 => (None, remaining[0]),
        2 => (Some(remaining[0]), remaining[1]),
        _ => return Err("wrong number of trailing fields".to_string()),
    };

    let dest_port = dest_port
        .map(|s| s.parse::<u16>().map_err(|_| "dest-port is not a u16".to_string()))
        .transpose()?;

    let timeout_secs: f64 = timeout_secs
        .parse()
        .map_err(|_| "timeout is not a number".to_string())?;

    if !matches!(protocol, Protocol::Icmp) && dest_port.is_none() {
        return Err("dest-port is required for non-icmp protocols".to_string());
    }

    Ok(ProbeParams {
        protocol,
        ip_version,
        ttl,
        address,
        dest_port,
        timeout: Duration::from_secs_f64(timeout_secs),
        command_token: token,
        payload_size: None,
    })
}

/// Run the event loop until `input` reaches EOF *and* every probe sent has
/// either replied or timed out. Every `send-probe` line is dispatched
/// immediately on read: no engine entry point yields mid-call.
///
/// `input_fd` is the command stream's raw descriptor, when it has one (the
/// real binary passes `stdin`'s). It is folded into the same `select()` call
/// as the reply sockets every iteration, per spec §4.7's loop shape
/// (`select(read-set, write-set, timeout)` with the command stream in the
/// read-set) — `input.read_line` is only attempted once `select` reports it
/// readable, so a `send-probe` line never has to compete with an
/// indefinitely-blocking read for the chance to drain replies and reap
/// timeouts. Pass `None` for an in-memory reader that can't block (e.g. a
/// `Cursor` in a test) — that reader is tried eagerly every iteration
/// instead, matching its always-ready nature.
pub fn run_event_loop<R: BufRead, W: Write>(
    net_state: &mut NetState,
    mut input: R,
    input_fd: Option<RawFd>,
    mut output: W,
) -> Result<(), crate::error::FatalError> {
    let mut line = String::new();
    let mut input_open = true;

    loop {
        if !input_open && net_state.table.iter_used().next().is_none() {
            break;
        }

        // Whether to even attempt input.read_line this iteration. A
        // fd-backed command stream (the real binary's stdin) is folded into
        // the same select() call as the reply sockets every iteration, per
        // spec §4.7's loop shape (`select(read-set, write-set, timeout)`
        // with the command stream in the read-set): read_line is only
        // attempted once select reports it readable, so a blocking read
        // never starves receive_replies/check_probe_timeouts. A reader with
        // no fd (e.g. a `Cursor` in tests) can't be select()ed and can't
        // block either, so it's tried eagerly instead and select is only
        // used to wait once it's exhausted (the `!input_open` path below).
        let should_read_line = if input_open {
            match input_fd {
                Some(fd) => {
                    let read_fds = [
                        net_state.sockets.ip4_recv.as_raw_fd(),
                        net_state.sockets.icmp6.as_raw_fd(),
                        fd,
                    ];
                    let write_fds = gather_probe_sockets(net_state);
                    let wait = get_next_probe_timeout(net_state).unwrap_or(Duration::from_millis(50));
                    let (readable, _writable) = select_wait(&read_fds, &write_fds, Some(wait))?;
                    readable.contains(&fd)
                }
                None => true,
            }
        } else {
            false
        };

        if should_read_line {
            line.clear();
            let n = input.read_line(&mut line).unwrap_or(0);
            if n == 0 {
                // EOF on the command stream. Keep looping to drain any
                // probes still in flight — the event loop's job is to see
                // every send through to a reply or a timeout, not to stop
                // the moment no new command arrives.
                input_open = false;
            } else {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    match parse_command(trimmed) {
                        Ok(params) => dispatch_send(net_state, &params, &mut output),
                        Err(reason) => {
                            tracing::warn!(%reason, line = trimmed, "malformed command line");
                            writeln!(output, "{}", OutcomeKeyword::InvalidArgument.as_line(0)).ok();
                        }
                    }
                }
            }
        }

        for reply in super::recv::receive_replies(net_state)? {
            writeln!(output, "{}", reply.as_line()).ok();
        }
        for timed_out in check_probe_timeouts(net_state) {
            writeln!(output, "{}", timed_out.as_line()).ok();
        }

        if !input_open && net_state.table.iter_used().next().is_none() {
            break;
        }

        // The fd-backed case already waited inside the `select_wait` call
        // above before deciding `should_read_line`; a fd-less reader past
        // EOF still needs to wait for the next socket event or probe
        // deadline here instead of busy-looping.
        if !input_open && input_fd.is_none() {
            let read_fds = [
                net_state.sockets.ip4_recv.as_raw_fd(),
                net_state.sockets.icmp6.as_raw_fd(),
            ];
            let write_fds = gather_probe_sockets(net_state);
            let wait = get_next_probe_timeout(net_state).unwrap_or(Duration::from_millis(50));
            select_wait(&read_fds, &write_fds, Some(wait))?;
        }
    }

    Ok(())
}

fn dispatch_send<W: Write>(net_state: &mut NetState, params: &ProbeParams, output: &mut W) {
    if !net_state.calibration.is_protocol_supported(params.protocol) {
        // SCTP is gated by calibration; reject it the same way send_probe
        // would reject any other invalid-argument combination, without ever
        // touching the probe table (so no slot is consumed for a request
        // the engine already knows it can't service).
        let line = OutcomeKeyword::InvalidArgument.as_line(params.command_token);
        writeln!(output, "{line}").ok();
        return;
    }

    match send_probe(net_state, params) {
        SendOutcome::Pending { slot } => {
            tracing::debug!(slot, token = params.command_token, "probe sent");
        }
        SendOutcome::Resolved(outcome) => {
            writeln!(output, "{}", outcome.as_line(params.command_token)).ok();
        }
        SendOutcome::Immediate(reply) => {
            writeln!(output, "{}", reply.as_line()).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_icmp_command_without_port() {
        let params = parse_command("send-probe 1 icmp 4 64 127.0.0.1 2.0").unwrap();
        assert_eq!(params.protocol, Protocol::Icmp);
        assert_eq!(params.dest_port, None);
        assert_eq!(params.command_token, 1);
    }

    #[test]
    fn parses_udp_command_with_port() {
        let params = parse_command("send-probe 2 udp 4 30 127.0.0.1 33434 1.5").unwrap();
        assert_eq!(params.protocol, Protocol::Udp);
        assert_eq!(params.dest_port, Some(33434));
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse_command("ping 1 icmp 4 64 127.0.0.1 2.0").is_err());
    }

    #[test]
    fn rejects_non_icmp_missing_port() {
        assert!(parse_command("send-probe 3 tcp 4 64 127.0.0.1 2.0").is_err());
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(parse_command("send-probe 4 icmp 4 64 not-an-ip 2.0").is_err());
    }
}
