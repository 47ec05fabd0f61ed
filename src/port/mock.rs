//! Mock serial port implementation for testing.
//!
//! Provides a `MockSerialPort` that simulates a serial device without
//! requiring hardware, plus a `MockOpener` that hands such ports to a session
//! and keeps track of how many are still open.

use super::error::PortError;
use super::traits::{
    BaudRate, ControlLine, ControlLines, PortConfiguration, PortOpener, ReadinessSource,
    SerialPortAdapter,
};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::Arc;

/// Inner state of the mock port, shared between clones.
#[derive(Debug)]
struct MockPortState {
    /// Queue of bytes to be returned by read operations.
    read_queue: VecDeque<u8>,
    /// Log of all bytes written to the port, one entry per write call.
    write_log: Vec<Vec<u8>>,
    /// Modem status bits as seen by the local side.
    lines: ControlLines,
    /// Accept at most this many bytes per write.
    write_limit: Option<usize>,
    /// Error kind returned by the next read, if any.
    fail_next_read: Option<io::ErrorKind>,
    /// Error kind returned by the next write, if any.
    fail_next_write: Option<io::ErrorKind>,
    /// Whether the simulated device has been unplugged.
    device_lost: bool,
    /// Whether the remote end has hung up.
    hung_up: bool,
    /// Whether the driver lacks modem status lines.
    lines_unavailable: bool,
    /// Number of read calls that reached the device.
    read_calls: usize,
    open: bool,
}

impl Default for MockPortState {
    fn default() -> Self {
        Self {
            read_queue: VecDeque::new(),
            write_log: Vec::new(),
            lines: ControlLines::default(),
            write_limit: None,
            fail_next_read: None,
            fail_next_write: None,
            device_lost: false,
            hung_up: false,
            lines_unavailable: false,
            read_calls: 0,
            open: true,
        }
    }
}

/// Mock serial port implementation for testing.
///
/// This implementation allows you to:
/// - Enqueue data to be returned by read operations
/// - Inspect what data was written
/// - Flip the remote handshake lines
/// - Simulate short writes, I/O errors and an unplugged device
///
/// Clones share state, so a test can keep a handle while a session owns
/// another.
///
/// # Example
/// ```
/// use serial_term::port::{MockSerialPort, SerialPortAdapter};
///
/// let mut port = MockSerialPort::new("MOCK0");
///
/// port.enqueue_read(b"Hello, World!");
/// assert_eq!(port.read_available(64).unwrap(), b"Hello, World!");
///
/// // Nothing left: an empty chunk, not an error
/// assert!(port.read_available(64).unwrap().is_empty());
///
/// port.write_bytes(b"Response\n").unwrap();
/// assert_eq!(port.get_write_log(), vec![b"Response\n".to_vec()]);
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    /// The port name/identifier.
    name: String,
    state: Arc<Mutex<MockPortState>>,
}

impl MockSerialPort {
    /// Create a new, open mock serial port with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState::default())),
        }
    }

    /// Enqueue bytes to be returned by subsequent read operations.
    pub fn enqueue_read(&mut self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    /// Get a copy of all data written to the port.
    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Set a handshake line as the remote end (or the driver) would.
    pub fn set_remote_line(&mut self, line: ControlLine, high: bool) {
        self.state.lock().lines.set(line, high);
    }

    /// Accept at most `limit` bytes per write call.
    pub fn set_write_limit(&mut self, limit: Option<usize>) {
        self.state.lock().write_limit = limit;
    }

    /// Make the next read fail with an error of `kind`.
    pub fn fail_next_read(&mut self, kind: io::ErrorKind) {
        self.state.lock().fail_next_read = Some(kind);
    }

    /// Make the next write fail with an error of `kind`.
    pub fn fail_next_write(&mut self, kind: io::ErrorKind) {
        self.state.lock().fail_next_write = Some(kind);
    }

    /// Simulate the cable being pulled: status queries and I/O start failing.
    pub fn unplug(&mut self) {
        self.state.lock().device_lost = true;
    }

    /// Simulate the far end closing: reads report end of file.
    pub fn hang_up(&mut self) {
        self.state.lock().hung_up = true;
    }

    /// Behave like a driver without modem lines, e.g. a pseudo-terminal.
    pub fn without_control_lines(&mut self) {
        self.state.lock().lines_unavailable = true;
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }

    /// Number of read calls that reached this port.
    pub fn read_calls(&self) -> usize {
        self.state.lock().read_calls
    }
}

fn device_gone() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "device disconnected")
}

fn no_modem_lines() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "Inappropriate ioctl for device")
}

impl ReadinessSource for MockSerialPort {
    fn poll_readable(&self) -> Result<bool, PortError> {
        let state = self.state.lock();
        if !state.open {
            return Err(PortError::NotOpen);
        }
        Ok(!state.read_queue.is_empty()
            || state.fail_next_read.is_some()
            || state.device_lost
            || state.hung_up)
    }
}

impl SerialPortAdapter for MockSerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_nonblocking(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(PortError::NotOpen);
        }
        state.read_calls += 1;

        if let Some(kind) = state.fail_next_read.take() {
            return Err(PortError::Io(io::Error::new(kind, "simulated read failure")));
        }
        if state.device_lost {
            return Err(PortError::Io(device_gone()));
        }
        if state.hung_up && state.read_queue.is_empty() && !buffer.is_empty() {
            return Err(PortError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "remote end hung up",
            )));
        }

        let n = buffer.len().min(state.read_queue.len());
        for (slot, byte) in buffer.iter_mut().zip(state.read_queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(PortError::NotOpen);
        }
        if let Some(kind) = state.fail_next_write.take() {
            return Err(PortError::Io(io::Error::new(kind, "simulated write failure")));
        }
        if state.device_lost {
            return Err(PortError::Io(device_gone()));
        }

        let accepted = state.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.write_log.push(data[..accepted].to_vec());
        Ok(accepted)
    }

    fn control_lines(&self) -> Result<ControlLines, PortError> {
        let state = self.state.lock();
        if !state.open {
            return Err(PortError::NotOpen);
        }
        if state.device_lost {
            return Err(PortError::ControlLineQueryFailed(device_gone()));
        }
        if state.lines_unavailable {
            return Err(PortError::ControlLinesUnavailable(no_modem_lines()));
        }
        Ok(state.lines)
    }

    fn set_control_line(&mut self, line: ControlLine, high: bool) -> Result<(), PortError> {
        if !line.is_settable() {
            return Err(PortError::invalid(format!("{line} is an input-only line")));
        }
        let mut state = self.state.lock();
        if !state.open {
            return Err(PortError::NotOpen);
        }
        if state.device_lost {
            return Err(PortError::ControlLineQueryFailed(device_gone()));
        }
        if state.lines_unavailable {
            return Err(PortError::ControlLinesUnavailable(no_modem_lines()));
        }
        state.lines.set(line, high);
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn readiness(&self) -> &dyn ReadinessSource {
        self
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .field("open", &self.is_open())
            .finish()
    }
}

#[derive(Debug, Default)]
struct OpenerState {
    /// Every port handed out (or rolled back), in order.
    ports: Vec<MockSerialPort>,
    /// Rates the simulated driver refuses.
    rejected_rates: HashSet<BaudRate>,
    /// Paths that do not exist.
    missing: HashSet<String>,
    /// Bytes pre-loaded into the next opened port.
    pending_input: Vec<u8>,
}

/// Hands out [`MockSerialPort`]s and remembers them.
///
/// Rejected baud rates behave like a driver refusing `tcsetattr`: the handle
/// is opened, then closed again before `AttributeApplyFailed` is returned.
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    state: Arc<Mutex<OpenerState>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make opens at `rate` fail as if the device refused the setting.
    pub fn reject_baud_rate(&self, rate: BaudRate) {
        self.state.lock().rejected_rates.insert(rate);
    }

    /// Make opens of `path` fail as if the node did not exist.
    pub fn remove_device(&self, path: impl Into<String>) {
        self.state.lock().missing.insert(path.into());
    }

    /// Pre-load input for the next port this opener creates.
    pub fn enqueue_for_next(&self, data: &[u8]) {
        self.state.lock().pending_input.extend_from_slice(data);
    }

    /// Most recently created port.
    pub fn last_port(&self) -> Option<MockSerialPort> {
        self.state.lock().ports.last().cloned()
    }

    /// Number of ports created so far, including rolled-back ones.
    pub fn opened(&self) -> usize {
        self.state.lock().ports.len()
    }

    /// Number of ports that are still open.
    pub fn live_handles(&self) -> usize {
        self.state.lock().ports.iter().filter(|p| p.is_open()).count()
    }
}

impl PortOpener for MockOpener {
    fn open(
        &mut self,
        config: &PortConfiguration,
    ) -> Result<Box<dyn SerialPortAdapter>, PortError> {
        let mut state = self.state.lock();
        let path = config.device_path();

        if state.missing.contains(path) {
            return Err(PortError::open_failed(
                path,
                io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            ));
        }

        let mut port = MockSerialPort::new(path);
        state.ports.push(port.clone());

        if state.rejected_rates.contains(&config.baud_rate()) {
            port.close();
            return Err(PortError::attributes(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "Invalid argument"),
            ));
        }

        let input = std::mem::take(&mut state.pending_input);
        port.enqueue_read(&input);
        Ok(Box::new(port))
    }
}
