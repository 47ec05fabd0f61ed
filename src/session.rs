//! Connection session: the seam between the serial core and its host.
//!
//! A `Session` owns at most one live connection together with its
//! `ControlLineMonitor`. The host event loop is reached only through the
//! [`EventHost`] trait: the session asks it to watch the port for readability
//! and to tick the monitor, and the host hands the resulting [`HostEvent`]s
//! back to [`Session::dispatch`]. Upward notifications go to a
//! [`SessionListener`].
//!
//! # State machine
//!
//! ```text
//! Idle ──connect──> Connecting ──open + watch + timer ok──> Connected
//!  ^                    │                                      │
//!  └──── any failure ───┘        disconnect / device lost ─────┘
//! ```

use crate::monitor::ControlLineMonitor;
use crate::port::{
    ControlLine, ControlLines, PortConfiguration, PortError, PortOpener, ReadinessSource,
    SerialPortAdapter,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bytes requested per read; matches the classic 256-byte terminal buffer.
pub const DEFAULT_READ_CHUNK: usize = 256;

/// Interval between control line samples.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Identifier of a watch or timer registered with an [`EventHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something the host observed for a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// A readiness watch fired.
    Readable(SourceId),
    /// A periodic timer fired.
    Tick(SourceId),
}

/// The cooperative event loop the session runs inside.
///
/// Cancelling a source must also discard any of its events that were queued
/// but not yet delivered.
pub trait EventHost {
    /// Watch `source` for "data available to read".
    fn on_readable(&mut self, source: &dyn ReadinessSource) -> Result<SourceId, PortError>;

    /// Fire a `Tick` every `interval` until cancelled.
    fn schedule_every(&mut self, interval: Duration) -> Result<SourceId, PortError>;

    /// Stop a watch or timer. Unknown ids are ignored.
    fn cancel(&mut self, id: SourceId);
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    UserRequested,
    /// The device hung up or stopped answering (e.g. cable pulled).
    DeviceLost(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => write!(f, "disconnected"),
            Self::DeviceLost(reason) => write!(f, "device lost: {reason}"),
        }
    }
}

/// Upward interface to the presentation layer.
#[cfg_attr(test, mockall::automock)]
pub trait SessionListener {
    /// New data arrived, exactly as the kernel buffered it.
    fn on_bytes_received(&mut self, bytes: &[u8]);

    /// A handshake line changed level (or was observed for the first time).
    fn on_line_changed(&mut self, line: ControlLine, high: bool);

    /// The connection ended.
    fn on_disconnected(&mut self, reason: DisconnectReason);
}

/// Where the session is in its connect/disconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
}

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub read_chunk: usize,
    pub poll_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_chunk: DEFAULT_READ_CHUNK,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Outcome of [`Session::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sent {
    /// Bytes the device accepted.
    pub written: usize,
    /// Bytes in the framed message.
    pub total: usize,
}

impl Sent {
    pub fn is_complete(&self) -> bool {
        self.written == self.total
    }
}

/// A live connection and everything whose lifetime is bound to it.
struct Connection {
    port: Box<dyn SerialPortAdapter>,
    monitor: ControlLineMonitor,
    watch: SourceId,
    timer: SourceId,
    config: PortConfiguration,
}

/// Owns the active connection and drives it from host events.
pub struct Session<O: PortOpener> {
    opener: O,
    settings: SessionSettings,
    state: SessionState,
    connection: Option<Connection>,
    /// The configuration of the most recent connect attempt.
    last_config: Option<PortConfiguration>,
}

impl<O: PortOpener> Session<O> {
    pub fn new(opener: O) -> Self {
        Self::with_settings(opener, SessionSettings::default())
    }

    pub fn with_settings(opener: O, settings: SessionSettings) -> Self {
        Self {
            opener,
            settings: SessionSettings {
                read_chunk: settings.read_chunk.max(1),
                ..settings
            },
            state: SessionState::Idle,
            connection: None,
            last_config: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// The live configuration, or the last one attempted while idle.
    pub fn config(&self) -> Option<&PortConfiguration> {
        self.connection
            .as_ref()
            .map(|c| &c.config)
            .or(self.last_config.as_ref())
    }

    /// Open `config` and start watching it.
    ///
    /// # Errors
    ///
    /// - `PortError::AlreadyOpen` if a connection is live
    /// - any open/attribute error from the opener
    /// - `PortError::EventSource` if the host refuses the watch or timer
    ///
    /// On error the session is back in `Idle` and no handle stays open.
    pub fn connect(
        &mut self,
        host: &mut dyn EventHost,
        config: PortConfiguration,
    ) -> Result<(), PortError> {
        if self.connection.is_some() {
            return Err(PortError::AlreadyOpen);
        }

        self.state = SessionState::Connecting;
        self.last_config = Some(config.clone());

        let mut port = match self.opener.open(&config) {
            Ok(port) => port,
            Err(e) => {
                warn!("Unable to connect to {}: {}", config.device_path(), e);
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        let watch = match host.on_readable(port.readiness()) {
            Ok(id) => id,
            Err(e) => {
                warn!("Unable to watch {}: {}", port.name(), e);
                port.close();
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        let timer = match host.schedule_every(self.settings.poll_interval) {
            Ok(id) => id,
            Err(e) => {
                warn!("Unable to schedule line monitoring for {}: {}", port.name(), e);
                host.cancel(watch);
                port.close();
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        info!("Connected: {}", config.summary());
        self.connection = Some(Connection {
            port,
            monitor: ControlLineMonitor::new(),
            watch,
            timer,
            config,
        });
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Connect again with the last configuration, on a fresh handle.
    pub fn reconnect(&mut self, host: &mut dyn EventHost) -> Result<(), PortError> {
        let config = self
            .last_config
            .clone()
            .ok_or_else(|| PortError::invalid("no previous configuration to reconnect with"))?;
        self.connect(host, config)
    }

    /// User-initiated disconnect. A no-op when already idle.
    pub fn disconnect(&mut self, host: &mut dyn EventHost, listener: &mut dyn SessionListener) {
        if self.teardown(host) {
            listener.on_disconnected(DisconnectReason::UserRequested);
        }
    }

    /// Tear down after `error` showed the device is gone, reporting
    /// `DeviceLost`. A no-op when already idle.
    pub fn disconnect_lost(
        &mut self,
        host: &mut dyn EventHost,
        listener: &mut dyn SessionListener,
        error: &PortError,
    ) {
        if self.teardown(host) {
            warn!("Connection lost: {}", error);
            listener.on_disconnected(DisconnectReason::DeviceLost(error.to_string()));
        }
    }

    /// Cancel the watch, stop the monitor, then close the handle, in that
    /// order, so nothing fires against a handle mid-teardown.
    fn teardown(&mut self, host: &mut dyn EventHost) -> bool {
        let Some(mut conn) = self.connection.take() else {
            return false;
        };

        host.cancel(conn.watch);
        conn.monitor.stop();
        host.cancel(conn.timer);
        conn.port.close();

        self.state = SessionState::Idle;
        info!("Disconnected from {}", conn.config.device_path());
        true
    }

    /// Frame `text` with the active terminator and write it in one call.
    ///
    /// Empty text sends nothing. A short write is reported in the result and
    /// never retried here.
    pub fn send(&mut self, text: &str) -> Result<Sent, PortError> {
        let conn = self.connection.as_mut().ok_or(PortError::NotOpen)?;
        if text.is_empty() {
            return Ok(Sent {
                written: 0,
                total: 0,
            });
        }

        let frame = conn.config.frame(text);
        let written = conn.port.write_bytes(&frame)?;
        debug!("Wrote {} of {} bytes to {}", written, frame.len(), conn.port.name());

        Ok(Sent {
            written,
            total: frame.len(),
        })
    }

    /// Drive DTR or RTS on the live connection.
    pub fn set_line(&mut self, line: ControlLine, high: bool) -> Result<(), PortError> {
        let conn = self.connection.as_mut().ok_or(PortError::NotOpen)?;
        conn.port.set_control_line(line, high)
    }

    /// Sample the handshake lines of the live connection.
    pub fn control_lines(&self) -> Result<ControlLines, PortError> {
        let conn = self.connection.as_ref().ok_or(PortError::NotOpen)?;
        conn.port.control_lines()
    }

    /// Handle one event from the host.
    ///
    /// Events for sources that do not belong to the live connection (for
    /// example ones queued before a disconnect) are ignored. Read errors are
    /// returned without tearing the connection down; the caller decides, see
    /// [`disconnect_lost`](Self::disconnect_lost). A control line query that
    /// fails because the device is gone ends the connection and reports
    /// `DeviceLost`, while a device without modem lines only stops the monitor.
    pub fn dispatch(
        &mut self,
        host: &mut dyn EventHost,
        event: HostEvent,
        listener: &mut dyn SessionListener,
    ) -> Result<(), PortError> {
        let Some(conn) = self.connection.as_mut() else {
            debug!("Dropping {:?}: no connection", event);
            return Ok(());
        };

        match event {
            HostEvent::Readable(id) if id == conn.watch => {
                if !conn.port.poll_readable()? {
                    return Ok(());
                }
                let chunk = conn.port.read_available(self.settings.read_chunk)?;
                if !chunk.is_empty() {
                    listener.on_bytes_received(&chunk);
                }
                Ok(())
            }
            HostEvent::Tick(id) if id == conn.timer => {
                match conn.monitor.poll(conn.port.as_ref()) {
                    Ok(changes) => {
                        for change in changes {
                            listener.on_line_changed(change.line, change.high);
                        }
                    }
                    Err(e) if e.is_device_lost() => {
                        self.teardown(host);
                        listener.on_disconnected(DisconnectReason::DeviceLost(e.to_string()));
                    }
                    Err(e) => {
                        // The monitor has stopped itself; data keeps flowing.
                        warn!("Handshake lines of {} are not reported: {}", conn.port.name(), e);
                    }
                }
                Ok(())
            }
            other => {
                debug!("Dropping stale {:?}", other);
                Ok(())
            }
        }
    }
}

impl<O: PortOpener> fmt::Debug for Session<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("device", &self.config().map(|c| c.device_path()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{BaudRate, MockOpener};
    use mockall::predicate::eq;
    use std::collections::HashSet;

    #[derive(Default)]
    struct RecordingHost {
        next: u64,
        live: HashSet<SourceId>,
        cancelled: Vec<SourceId>,
        refuse_watch: bool,
        refuse_timer: bool,
    }

    impl EventHost for RecordingHost {
        fn on_readable(&mut self, _source: &dyn ReadinessSource) -> Result<SourceId, PortError> {
            if self.refuse_watch {
                return Err(PortError::EventSource("watch refused".into()));
            }
            self.next += 1;
            self.live.insert(SourceId(self.next));
            Ok(SourceId(self.next))
        }

        fn schedule_every(&mut self, _interval: Duration) -> Result<SourceId, PortError> {
            if self.refuse_timer {
                return Err(PortError::EventSource("timer refused".into()));
            }
            self.next += 1;
            self.live.insert(SourceId(self.next));
            Ok(SourceId(self.next))
        }

        fn cancel(&mut self, id: SourceId) {
            self.live.remove(&id);
            self.cancelled.push(id);
        }
    }

    fn config() -> PortConfiguration {
        PortConfiguration::builder("/dev/mock0").build().unwrap()
    }

    #[test]
    fn test_connect_registers_watch_and_timer() {
        let mut host = RecordingHost::default();
        let mut session = Session::new(MockOpener::new());

        session.connect(&mut host, config()).unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(host.live.len(), 2);
    }

    #[test]
    fn test_second_connect_rejected() {
        let mut host = RecordingHost::default();
        let opener = MockOpener::new();
        let mut session = Session::new(opener.clone());

        session.connect(&mut host, config()).unwrap();
        assert!(matches!(
            session.connect(&mut host, config()),
            Err(PortError::AlreadyOpen)
        ));
        assert_eq!(opener.opened(), 1);
    }

    #[test]
    fn test_watch_refusal_closes_port() {
        let mut host = RecordingHost {
            refuse_watch: true,
            ..Default::default()
        };
        let opener = MockOpener::new();
        let mut session = Session::new(opener.clone());

        let result = session.connect(&mut host, config());

        assert!(matches!(result, Err(PortError::EventSource(_))));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(opener.live_handles(), 0);
    }

    #[test]
    fn test_timer_refusal_cancels_watch() {
        let mut host = RecordingHost {
            refuse_timer: true,
            ..Default::default()
        };
        let opener = MockOpener::new();
        let mut session = Session::new(opener.clone());

        assert!(session.connect(&mut host, config()).is_err());
        assert!(host.live.is_empty());
        assert_eq!(opener.live_handles(), 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_open_failure_returns_to_idle() {
        let mut host = RecordingHost::default();
        let opener = MockOpener::new();
        opener.reject_baud_rate(BaudRate::B150);
        let mut session = Session::new(opener);

        let bad = PortConfiguration::builder("/dev/mock0")
            .baud_rate(BaudRate::B150)
            .build()
            .unwrap();
        assert!(matches!(
            session.connect(&mut host, bad),
            Err(PortError::AttributeApplyFailed { .. })
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(host.live.is_empty());
        assert_eq!(session.config().unwrap().baud_rate(), BaudRate::B150);
    }

    #[test]
    fn test_dtr_transition_notifies_once() {
        let mut host = RecordingHost::default();
        let opener = MockOpener::new();
        let mut session = Session::new(opener.clone());
        session.connect(&mut host, config()).unwrap();
        let timer = SourceId(2);

        // First tick reports the initial level of every line.
        let mut listener = MockSessionListener::new();
        listener.expect_on_line_changed().times(4).return_const(());
        session
            .dispatch(&mut host, HostEvent::Tick(timer), &mut listener)
            .unwrap();

        opener
            .last_port()
            .unwrap()
            .set_remote_line(ControlLine::Dtr, true);

        let mut listener = MockSessionListener::new();
        listener
            .expect_on_line_changed()
            .with(eq(ControlLine::Dtr), eq(true))
            .times(1)
            .return_const(());
        session
            .dispatch(&mut host, HostEvent::Tick(timer), &mut listener)
            .unwrap();
        session
            .dispatch(&mut host, HostEvent::Tick(timer), &mut listener)
            .unwrap();
    }

    #[test]
    fn test_status_failure_reports_device_lost() {
        let mut host = RecordingHost::default();
        let opener = MockOpener::new();
        let mut session = Session::new(opener.clone());
        session.connect(&mut host, config()).unwrap();

        opener.last_port().unwrap().unplug();

        let mut listener = MockSessionListener::new();
        listener
            .expect_on_disconnected()
            .withf(|reason| matches!(reason, DisconnectReason::DeviceLost(_)))
            .times(1)
            .return_const(());
        session
            .dispatch(&mut host, HostEvent::Tick(SourceId(2)), &mut listener)
            .unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(host.live.is_empty());
        assert_eq!(opener.live_handles(), 0);
    }

    #[test]
    fn test_missing_modem_lines_keep_connection() {
        let mut host = RecordingHost::default();
        let opener = MockOpener::new();
        let mut session = Session::new(opener.clone());
        session.connect(&mut host, config()).unwrap();
        opener.last_port().unwrap().without_control_lines();

        // Strict mock: any notification at all fails the test.
        let mut listener = MockSessionListener::new();
        for _ in 0..3 {
            session
                .dispatch(&mut host, HostEvent::Tick(SourceId(2)), &mut listener)
                .unwrap();
        }

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(host.live.len(), 2);
        assert_eq!(opener.live_handles(), 1);
        assert!(host.cancelled.is_empty());
    }

    #[test]
    fn test_user_disconnect_notifies() {
        let mut host = RecordingHost::default();
        let mut session = Session::new(MockOpener::new());
        session.connect(&mut host, config()).unwrap();

        let mut listener = MockSessionListener::new();
        listener
            .expect_on_disconnected()
            .with(eq(DisconnectReason::UserRequested))
            .times(1)
            .return_const(());

        session.disconnect(&mut host, &mut listener);
        // Already idle: nothing further is reported.
        session.disconnect(&mut host, &mut listener);

        assert_eq!(host.cancelled, vec![SourceId(1), SourceId(2)]);
    }

    #[test]
    fn test_send_while_idle() {
        let mut session = Session::new(MockOpener::new());
        assert!(matches!(session.send("PING"), Err(PortError::NotOpen)));
        assert!(matches!(
            session.set_line(ControlLine::Dtr, true),
            Err(PortError::NotOpen)
        ));
    }
}
