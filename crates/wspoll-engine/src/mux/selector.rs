//! OS readiness primitive.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// One descriptor to watch. Read and exceptional readiness are always
/// requested; write only when `write` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub fd: RawFd,
    pub write: bool,
}

/// Descriptors reported ready, in interest order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub readable: Vec<RawFd>,
    pub writable: Vec<RawFd>,
    pub exceptional: Vec<RawFd>,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty() && self.exceptional.is_empty()
    }
}

pub trait Selector {
    /// Block until something is ready or `timeout` passes.
    ///
    /// `None` waits indefinitely, `Some(Duration::ZERO)` never blocks.
    fn select(&mut self, interests: &[Interest], timeout: Option<Duration>) -> io::Result<Readiness>;
}

/// `poll(2)`-backed selector.
#[derive(Default)]
pub struct PollSelector {
    fds: Vec<libc::pollfd>,
}

impl std::fmt::Debug for PollSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSelector")
            .field("watched", &self.fds.len())
            .finish()
    }
}

impl PollSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            // round up so a 100us timeout still sleeps
            let ms = d.as_nanos().div_ceil(1_000_000);
            libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
        }
    }
}

impl Selector for PollSelector {
    fn select(&mut self, interests: &[Interest], timeout: Option<Duration>) -> io::Result<Readiness> {
        if interests.is_empty() && timeout.is_none() {
            return Ok(Readiness::default());
        }

        self.fds.clear();
        self.fds.extend(interests.iter().map(|i| libc::pollfd {
            fd: i.fd,
            events: libc::POLLIN | libc::POLLPRI | if i.write { libc::POLLOUT } else { 0 },
            revents: 0,
        }));

        // SAFETY: `fds` is an initialized buffer of `pollfd` that lives for the
        // whole call, and its exact length is passed as `nfds`.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Readiness::default());
            }
            return Err(err);
        }

        let mut ready = Readiness::default();
        if rc == 0 {
            return Ok(ready);
        }
        for p in &self.fds {
            let r = p.revents;
            if r & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                ready.readable.push(p.fd);
            }
            if r & libc::POLLOUT != 0 {
                ready.writable.push(p.fd);
            }
            if r & (libc::POLLPRI | libc::POLLNVAL) != 0 {
                ready.exceptional.push(p.fd);
            }
        }
        Ok(ready)
    }
}
