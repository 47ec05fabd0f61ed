//! A small `poll(2)` based event loop.
//!
//! `PollLoop` is the host used by the binary: it watches file descriptors
//! (the serial port and stdin) and runs interval timers, queueing
//! [`HostEvent`]s that the caller drains with [`PollLoop::next_event`].
//! Everything runs on the calling thread.
//!
//! Each watch holds its own duplicate of the watched descriptor, so a watch
//! never outlives the descriptor it polls.

use crate::port::{PortError, ReadinessSource};
use crate::session::{EventHost, HostEvent, SourceId};
use rustix::event::{poll, PollFd, PollFlags};
use rustix::fd::{AsRawFd, BorrowedFd, OwnedFd};
use rustix::io::Errno;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug)]
struct Timer {
    id: SourceId,
    interval: Duration,
    due: Instant,
}

#[derive(Debug, Default)]
pub struct PollLoop {
    next_id: u64,
    watches: Vec<(SourceId, OwnedFd)>,
    timers: Vec<Timer>,
    pending: VecDeque<HostEvent>,
}

impl PollLoop {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> SourceId {
        self.next_id += 1;
        SourceId(self.next_id)
    }

    /// Watch an arbitrary descriptor, e.g. stdin.
    pub fn watch_fd(&mut self, fd: BorrowedFd<'_>) -> Result<SourceId, PortError> {
        let owned = fd.try_clone_to_owned().map_err(|e| {
            PortError::EventSource(format!("unable to watch fd {}: {e}", fd.as_raw_fd()))
        })?;
        let id = self.allocate();
        debug!("Watching fd {} as {}", fd.as_raw_fd(), id);
        self.watches.push((id, owned));
        Ok(id)
    }

    /// Number of registered watches and timers.
    pub fn source_count(&self) -> usize {
        self.watches.len() + self.timers.len()
    }

    /// Queued events not yet taken.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn next_event(&mut self) -> Option<HostEvent> {
        self.pending.pop_front()
    }

    /// Block until a watched descriptor is ready, a timer is due, or `max`
    /// elapses, then queue what fired. Returns the number of new events.
    ///
    /// With no sources and no `max` this returns immediately.
    pub fn wait(&mut self, max: Option<Duration>) -> Result<usize, PortError> {
        let before = self.pending.len();
        let timeout = self.timeout(max);

        if self.watches.is_empty() && timeout.is_none() {
            return Ok(0);
        }

        let timeout_ms = timeout.map_or(-1, |t| {
            // Round up so a 0.5ms deadline does not spin.
            let ms = t.as_micros().div_ceil(1000);
            i32::try_from(ms).unwrap_or(i32::MAX)
        });

        let ready = PollFlags::IN | PollFlags::HUP | PollFlags::ERR | PollFlags::NVAL;
        let fired: Vec<SourceId> = {
            let mut fds: Vec<PollFd<'_>> = self
                .watches
                .iter()
                .map(|(_, fd)| PollFd::new(fd, PollFlags::IN))
                .collect();

            match poll(&mut fds, timeout_ms) {
                Ok(_) => {}
                Err(Errno::INTR) => return Ok(0),
                Err(e) => return Err(PortError::EventSource(format!("poll failed: {e}"))),
            }

            fds.iter()
                .zip(&self.watches)
                .filter(|(pfd, _)| pfd.revents().intersects(ready))
                .map(|(pfd, (id, _))| {
                    trace!("{} readable (revents {:?})", id, pfd.revents());
                    *id
                })
                .collect()
        };
        self.pending.extend(fired.into_iter().map(HostEvent::Readable));

        let now = Instant::now();
        for timer in &mut self.timers {
            if timer.due <= now {
                self.pending.push_back(HostEvent::Tick(timer.id));
                // Skip missed periods rather than bursting to catch up.
                while timer.due <= now {
                    timer.due += timer.interval;
                }
            }
        }

        Ok(self.pending.len() - before)
    }

    fn timeout(&self, max: Option<Duration>) -> Option<Duration> {
        let now = Instant::now();
        let next_timer = self
            .timers
            .iter()
            .map(|t| t.due.saturating_duration_since(now))
            .min();

        match (next_timer, max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl EventHost for PollLoop {
    fn on_readable(&mut self, source: &dyn ReadinessSource) -> Result<SourceId, PortError> {
        let fd = source
            .poll_descriptor()
            .ok_or_else(|| PortError::EventSource("source has no descriptor to poll".into()))?;
        self.watch_fd(fd)
    }

    fn schedule_every(&mut self, interval: Duration) -> Result<SourceId, PortError> {
        if interval.is_zero() {
            return Err(PortError::EventSource("timer interval must be non-zero".into()));
        }
        let id = self.allocate();
        self.timers.push(Timer {
            id,
            interval,
            due: Instant::now() + interval,
        });
        debug!("Timer {} every {:?}", id, interval);
        Ok(id)
    }

    fn cancel(&mut self, id: SourceId) {
        self.watches.retain(|(watch, _)| *watch != id);
        self.timers.retain(|t| t.id != id);
        self.pending.retain(|event| match *event {
            HostEvent::Readable(source) | HostEvent::Tick(source) => source != id,
        });
    }
}
