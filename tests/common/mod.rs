//! Shared test utilities for serial-term integration tests.
//!
//! - `ScriptedHost`: an `EventHost` whose events are fired by hand
//! - `RecordingListener`: a `SessionListener` that keeps everything it hears
//! - configuration builders

#![allow(dead_code)]

use serial_term::port::{
    ControlLine, MockOpener, MockSerialPort, PortConfiguration, PortError, PortOpener,
    ReadinessSource, SerialPortAdapter,
};
use serial_term::session::{
    DisconnectReason, EventHost, HostEvent, Session, SessionListener, SourceId,
};
use std::collections::VecDeque;
use std::time::Duration;

/// Default device path used by the mock opener tests.
pub const MOCK_DEVICE: &str = "/dev/ttyMOCK0";

pub fn mock_config() -> PortConfiguration {
    PortConfiguration::builder(MOCK_DEVICE)
        .build()
        .expect("mock configuration is valid")
}

/// An event host driven by the test instead of the kernel.
#[derive(Debug, Default)]
pub struct ScriptedHost {
    pub next_id: u64,
    pub watches: Vec<SourceId>,
    pub timers: Vec<(SourceId, Duration)>,
    pub cancelled: Vec<SourceId>,
    pub pending: VecDeque<HostEvent>,
    pub refuse_watch: bool,
    pub refuse_timer: bool,
    /// Port whose open state is sampled on every `cancel`.
    pub observed: Option<MockSerialPort>,
    /// `(source, port still open)` for each cancel, in call order.
    pub open_at_cancel: Vec<(SourceId, bool)>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a readable event for every live watch.
    pub fn fire_readable(&mut self) {
        for &id in &self.watches {
            self.pending.push_back(HostEvent::Readable(id));
        }
    }

    /// Queue a tick for every live timer.
    pub fn fire_tick(&mut self) {
        for &(id, _) in &self.timers {
            self.pending.push_back(HostEvent::Tick(id));
        }
    }

    /// Queue an arbitrary event, live or not.
    pub fn push(&mut self, event: HostEvent) {
        self.pending.push_back(event);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn live_sources(&self) -> usize {
        self.watches.len() + self.timers.len()
    }

    /// Deliver queued events until the queue is empty.
    pub fn run<O: PortOpener>(
        &mut self,
        session: &mut Session<O>,
        listener: &mut RecordingListener,
    ) -> Vec<PortError> {
        let mut errors = Vec::new();
        while let Some(event) = self.pending.pop_front() {
            if let Err(e) = session.dispatch(self, event, listener) {
                errors.push(e);
            }
        }
        errors
    }
}

impl EventHost for ScriptedHost {
    fn on_readable(&mut self, _source: &dyn ReadinessSource) -> Result<SourceId, PortError> {
        if self.refuse_watch {
            return Err(PortError::EventSource("scripted watch refusal".into()));
        }
        self.next_id += 1;
        let id = SourceId(self.next_id);
        self.watches.push(id);
        Ok(id)
    }

    fn schedule_every(&mut self, interval: Duration) -> Result<SourceId, PortError> {
        if self.refuse_timer {
            return Err(PortError::EventSource("scripted timer refusal".into()));
        }
        self.next_id += 1;
        let id = SourceId(self.next_id);
        self.timers.push((id, interval));
        Ok(id)
    }

    fn cancel(&mut self, id: SourceId) {
        self.watches.retain(|&w| w != id);
        self.timers.retain(|&(t, _)| t != id);
        self.pending.retain(|event| match *event {
            HostEvent::Readable(source) | HostEvent::Tick(source) => source != id,
        });
        if let Some(port) = &self.observed {
            self.open_at_cancel.push((id, port.is_open()));
        }
        self.cancelled.push(id);
    }
}

/// Keeps every notification in arrival order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub received: Vec<u8>,
    pub chunks: usize,
    pub line_changes: Vec<(ControlLine, bool)>,
    pub disconnects: Vec<DisconnectReason>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionListener for RecordingListener {
    fn on_bytes_received(&mut self, bytes: &[u8]) {
        self.received.extend_from_slice(bytes);
        self.chunks += 1;
    }

    fn on_line_changed(&mut self, line: ControlLine, high: bool) {
        self.line_changes.push((line, high));
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.disconnects.push(reason);
    }
}

/// A connected session on a fresh mock opener.
pub fn connected_session() -> (Session<MockOpener>, MockOpener, ScriptedHost) {
    let opener = MockOpener::new();
    let mut host = ScriptedHost::new();
    let mut session = Session::new(opener.clone());
    session
        .connect(&mut host, mock_config())
        .expect("mock connect succeeds");
    host.observed = opener.last_port();
    (session, opener, host)
}
