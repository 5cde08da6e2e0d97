//! The blocking `select()` wrapper the event loop uses to multiplex reply
//! sockets, in-flight probe sockets, and the command input stream in a
//! single-threaded, non-yielding loop. `select()` is used explicitly here
//! rather than an async runtime, since no entry point is allowed to yield
//! partway through.

use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::FatalError;

/// Block until one of `read_fds` is readable or one of `write_fds` is
/// writable, or `timeout` elapses. Returns the readable subset of
/// `read_fds` and the writable subset of `write_fds` (both empty on
/// timeout).
///
/// Matches spec §4.7's event-loop shape: the read set is the engine's fixed
/// reply sockets, the write set is built per-iteration from
/// [`crate::timeout::gather_probe_sockets`] (one fd per in-flight TCP/SCTP
/// probe, watched for connect completion).
pub fn select_wait(
    read_fds: &[RawFd],
    write_fds: &[RawFd],
    timeout: Option<Duration>,
) -> Result<(Vec<RawFd>, Vec<RawFd>), FatalError> {
    let mut read_set: libc::fd_set = unsafe { std::mem::zeroed() };
    let mut write_set: libc::fd_set = unsafe { std::mem::zeroed() };
    unsafe {
        libc::FD_ZERO(&mut read_set);
        libc::FD_ZERO(&mut write_set);
    }

    let mut max_fd = 0;
    for &fd in read_fds {
        unsafe { libc::FD_SET(fd, &mut read_set) };
        max_fd = max_fd.max(fd);
    }
    for &fd in write_fds {
        unsafe { libc::FD_SET(fd, &mut write_set) };
        max_fd = max_fd.max(fd);
    }

    let mut tv = timeout.map(|d| libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: libc::suseconds_t::from(d.subsec_micros()),
    });
    let tv_ptr = tv
        .as_mut()
        .map_or(std::ptr::null_mut(), |tv| tv as *mut libc::timeval);

    let ready = unsafe {
        libc::select(
            max_fd + 1,
            &mut read_set,
            &mut write_set,
            std::ptr::null_mut(),
            tv_ptr,
        )
    };

    if ready < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok((Vec::new(), Vec::new()));
        }
        return Err(FatalError::Select(err));
    }

    let readable = read_fds
        .iter()
        .copied()
        .filter(|&fd| unsafe { libc::FD_ISSET(fd, &read_set) })
        .collect();
    let writable = write_fds
        .iter()
        .copied()
        .filter(|&fd| unsafe { libc::FD_ISSET(fd, &write_set) })
        .collect();

    Ok((readable, writable))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fd_sets_time_out_without_error() {
        let (readable, writable) = select_wait(&[], &[], Some(Duration::from_millis(1))).unwrap();
        assert!(readable.is_empty());
        assert!(writable.is_empty());
    }
}
