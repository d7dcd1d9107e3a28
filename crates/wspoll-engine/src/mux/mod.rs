//! Readiness multiplexer.
//!
//! One poll cycle:
//! 1. every entry runs its pre-poll hook (deadlines, pending close reports);
//! 2. the registry is snapshotted into `fd -> key` and handed to the selector,
//!    whose wait is cut short by the earliest armed entry deadline;
//! 3. readable, writable and exceptional entries are dispatched in that order;
//! 4. entries whose deadline passed during the wait fire their timers.
//!
//! Dispatch goes through keys, not descriptors. An entry that closed or was
//! removed earlier in the cycle no longer resolves and is skipped, even if its
//! descriptor number was reused in the meantime.

pub mod selector;

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::update::{ErrorCode, Update};

pub use selector::{Interest, PollSelector, Readiness, Selector};

/// A state machine the multiplexer can drive.
pub trait Pollable {
    /// `None` once the transport is gone.
    fn handle(&self) -> Option<RawFd>;

    /// Outbound bytes are queued.
    fn wants_write(&self) -> bool;

    fn before_poll(&mut self, out: &mut Vec<Update>);
    fn handle_read(&mut self, out: &mut Vec<Update>);
    fn handle_write(&mut self, out: &mut Vec<Update>);
    fn handle_exceptional(&mut self, out: &mut Vec<Update>);

    /// Earliest instant a timer needs servicing, if any is armed.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn handle_timeout(&mut self, _out: &mut Vec<Update>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ready {
    Read,
    Write,
    Exceptional,
}

/// Owner of the entries polled in one cycle.
pub trait Registry {
    type Key: Clone;

    /// Run pre-poll hooks and return the current interest set.
    fn prepare(&mut self, out: &mut Vec<Update>) -> Vec<(Self::Key, Interest)>;

    /// Service one ready entry. Unknown keys are ignored.
    fn dispatch(&mut self, key: &Self::Key, ready: Ready, out: &mut Vec<Update>);

    /// Earliest deadline over all entries.
    fn next_deadline(&self) -> Option<Instant>;

    /// Fire timers of every entry whose deadline is at or before `now`.
    fn expire(&mut self, now: Instant, out: &mut Vec<Update>);
}

/// Pre-poll hook plus interest for a single entry.
pub fn prepare_one(target: &mut dyn Pollable, out: &mut Vec<Update>) -> Option<Interest> {
    target.before_poll(out);
    target.handle().map(|fd| Interest {
        fd,
        write: target.wants_write(),
    })
}

/// Run the handler for `ready`. Write and exceptional readiness are dropped
/// for entries whose transport closed earlier in the cycle.
pub fn dispatch_one(target: &mut dyn Pollable, ready: Ready, out: &mut Vec<Update>) {
    match ready {
        Ready::Read => target.handle_read(out),
        Ready::Write => {
            if target.handle().is_some() {
                target.handle_write(out);
            }
        }
        Ready::Exceptional => {
            if target.handle().is_some() {
                target.handle_exceptional(out);
            }
        }
    }
}

/// Timer hook for a single entry.
pub fn expire_one(target: &mut dyn Pollable, now: Instant, out: &mut Vec<Update>) {
    if target.next_deadline().is_some_and(|d| d <= now) {
        target.handle_timeout(out);
    }
}

fn clamp_timeout(
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    now: Instant,
) -> Option<Duration> {
    let Some(deadline) = deadline else {
        return timeout;
    };
    let until = deadline.saturating_duration_since(now);
    Some(timeout.map_or(until, |t| t.min(until)))
}

impl<P: Pollable> Registry for [P] {
    type Key = usize;

    fn prepare(&mut self, out: &mut Vec<Update>) -> Vec<(usize, Interest)> {
        self.iter_mut()
            .enumerate()
            .filter_map(|(i, p)| prepare_one(p, out).map(|interest| (i, interest)))
            .collect()
    }

    fn dispatch(&mut self, key: &usize, ready: Ready, out: &mut Vec<Update>) {
        if let Some(p) = self.get_mut(*key) {
            dispatch_one(p, ready, out);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.iter().filter_map(|p| p.next_deadline()).min()
    }

    fn expire(&mut self, now: Instant, out: &mut Vec<Update>) {
        for p in self.iter_mut() {
            expire_one(p, now, out);
        }
    }
}

#[derive(Debug, Default)]
pub struct Multiplexer<S = PollSelector> {
    selector: S,
}

impl Multiplexer<PollSelector> {
    pub fn new() -> Self {
        Self::with_selector(PollSelector::new())
    }
}

impl<S: Selector> Multiplexer<S> {
    pub fn with_selector(selector: S) -> Self {
        Self { selector }
    }

    pub fn selector(&self) -> &S {
        &self.selector
    }

    /// Run one cycle over `registry`.
    ///
    /// Events come out as: pre-poll events, then read-phase events, then
    /// write-phase, then exceptional-phase, then expired timers. A selector
    /// failure yields a single `Error(SELECT)` and ends the cycle.
    ///
    /// `timeout: None` waits indefinitely only while no entry has a timer
    /// armed; otherwise the wait ends at the earliest deadline.
    pub fn poll<R>(&mut self, registry: &mut R, timeout: Option<Duration>) -> Vec<Update>
    where
        R: Registry + ?Sized,
    {
        let mut out = Vec::new();
        let entries = registry.prepare(&mut out);

        let mut interests = Vec::with_capacity(entries.len());
        let mut by_fd: HashMap<RawFd, R::Key> = HashMap::with_capacity(entries.len());
        for (key, interest) in entries {
            interests.push(interest);
            by_fd.insert(interest.fd, key);
        }

        let deadline = registry.next_deadline();
        let timeout = clamp_timeout(timeout, deadline, Instant::now());

        let ready = match self.selector.select(&interests, timeout) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "select failed");
                out.push(Update::error(ErrorCode::Select, None));
                return out;
            }
        };
        if !ready.is_empty() {
            debug!(
                readable = ready.readable.len(),
                writable = ready.writable.len(),
                exceptional = ready.exceptional.len(),
                "ready"
            );
        }

        let phases = [
            (Ready::Read, &ready.readable),
            (Ready::Write, &ready.writable),
            (Ready::Exceptional, &ready.exceptional),
        ];
        for (kind, fds) in phases {
            for fd in fds {
                if let Some(key) = by_fd.get(fd) {
                    registry.dispatch(key, kind, &mut out);
                }
            }
        }

        if deadline.is_some() {
            registry.expire(Instant::now(), &mut out);
        }

        out
    }
}
