//! Serial connection over a POSIX character device.
//!
//! `TtyPort` owns one file descriptor for its lifetime. Opening applies the
//! translated line attributes, switches the descriptor to non-blocking mode and
//! flushes stale data; any failure along the way drops the descriptor, so a
//! half-configured handle is never returned.

use super::attributes::translate;
use super::error::PortError;
use super::traits::{
    ControlLine, ControlLines, FlowControl, PortConfiguration, PortOpener, ReadinessSource,
    SerialPortAdapter,
};
use rustix::event::{poll, PollFd, PollFlags};
use rustix::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use rustix::fs::{fcntl_getfl, fcntl_setfl, open, Mode, OFlags};
use rustix::io::Errno;
use rustix::termios::{tcflush, tcgetattr, tcsetattr, OptionalActions, QueueSelector};
use std::io;
use tracing::{debug, info, warn};

/// A serial device opened in raw, non-blocking mode.
pub struct TtyPort {
    /// `None` once closed.
    fd: Option<OwnedFd>,
    /// The device path for identification.
    name: String,
}

impl TtyPort {
    /// Open and configure the device named by `config`.
    ///
    /// # Errors
    /// - `PortError::InvalidConfiguration` if the path cannot be passed to the OS
    /// - `PortError::DeviceOpenFailed` if the node is missing, busy or forbidden
    /// - `PortError::AttributeApplyFailed` if the line settings, non-blocking
    ///   mode or the initial flush are rejected
    ///
    /// # Example
    /// ```no_run
    /// use serial_term::port::{PortConfiguration, TtyPort};
    ///
    /// let config = PortConfiguration::builder("/dev/ttyUSB0").build()?;
    /// let port = TtyPort::open(&config)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(config: &PortConfiguration) -> Result<Self, PortError> {
        let path = config.device_path();
        if path.contains('\0') {
            return Err(PortError::invalid("device path contains a NUL byte"));
        }

        let fd = open(
            path,
            OFlags::RDWR | OFlags::NOCTTY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| PortError::open_failed(path, e.into()))?;

        // From here on an early return drops `fd`, closing it.
        apply_attributes(fd.as_fd(), config).map_err(|e| PortError::attributes(path, e))?;
        set_nonblocking(fd.as_fd()).map_err(|e| PortError::attributes(path, e))?;
        tcflush(&fd, QueueSelector::IOFlush).map_err(|e| PortError::attributes(path, e.into()))?;

        if config.flow_control() == FlowControl::DtrDsr {
            warn!(
                "DTR/DSR flow control is not supported by this line discipline; {} runs without it",
                path
            );
        }
        info!("Opened {}", config.summary());

        Ok(Self {
            fd: Some(fd),
            name: path.to_string(),
        })
    }

    fn descriptor(&self) -> Result<BorrowedFd<'_>, PortError> {
        self.fd.as_ref().map(|fd| fd.as_fd()).ok_or(PortError::NotOpen)
    }

    fn modem_status(&self) -> Result<libc::c_int, PortError> {
        let fd = self.descriptor()?;
        let mut status: libc::c_int = 0;
        // SAFETY: `fd` is open for the duration of the call and TIOCMGET
        // writes exactly one c_int into `status`.
        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCMGET, &mut status as *mut libc::c_int) };
        if rc < 0 {
            return Err(PortError::control_query(io::Error::last_os_error()));
        }
        Ok(status)
    }
}

fn apply_attributes(fd: BorrowedFd<'_>, config: &PortConfiguration) -> io::Result<()> {
    let mut termios = tcgetattr(fd)?;
    translate(config).apply_to(&mut termios)?;
    tcsetattr(fd, OptionalActions::Now, &termios)?;
    Ok(())
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let flags = fcntl_getfl(fd)?;
    fcntl_setfl(fd, flags | OFlags::NONBLOCK)?;
    Ok(())
}

impl ReadinessSource for TtyPort {
    fn poll_readable(&self) -> Result<bool, PortError> {
        let fd = self.descriptor()?;
        let mut fds = [PollFd::new(&fd, PollFlags::IN)];
        match poll(&mut fds, 0) {
            Ok(_) => {}
            Err(Errno::INTR) => return Ok(false),
            Err(e) => return Err(PortError::Io(e.into())),
        }
        // Hangups and errors count as readable so the next read reports them.
        Ok(fds[0]
            .revents()
            .intersects(PollFlags::IN | PollFlags::HUP | PollFlags::ERR | PollFlags::NVAL))
    }

    fn poll_descriptor(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }
}

impl SerialPortAdapter for TtyPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_nonblocking(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let fd = self.descriptor()?;
        if buffer.is_empty() {
            return Ok(0);
        }
        // VMIN=1 with O_NONBLOCK: "no data" is EAGAIN, so zero bytes is a hangup.
        match rustix::io::read(fd, buffer) {
            Ok(0) => Err(PortError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} hung up", self.name),
            ))),
            Ok(n) => Ok(n),
            Err(Errno::AGAIN) | Err(Errno::INTR) => Ok(0),
            Err(e) => Err(PortError::Io(e.into())),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let fd = self.descriptor()?;
        if data.is_empty() {
            return Ok(0);
        }
        let written = match rustix::io::write(fd, data) {
            Ok(n) => n,
            Err(Errno::AGAIN) | Err(Errno::INTR) => 0,
            Err(e) => return Err(PortError::Io(e.into())),
        };
        if written < data.len() {
            debug!("Short write on {}: {} of {} bytes", self.name, written, data.len());
        }
        Ok(written)
    }

    fn control_lines(&self) -> Result<ControlLines, PortError> {
        let status = self.modem_status()?;
        Ok(ControlLines {
            dtr: status & libc::TIOCM_DTR != 0,
            dsr: status & libc::TIOCM_DSR != 0,
            rts: status & libc::TIOCM_RTS != 0,
            cts: status & libc::TIOCM_CTS != 0,
        })
    }

    fn set_control_line(&mut self, line: ControlLine, high: bool) -> Result<(), PortError> {
        let bit = match line {
            ControlLine::Dtr => libc::TIOCM_DTR,
            ControlLine::Rts => libc::TIOCM_RTS,
            ControlLine::Dsr | ControlLine::Cts => {
                return Err(PortError::invalid(format!("{line} is an input-only line")))
            }
        };

        let mut status = self.modem_status()?;
        if high {
            status |= bit;
        } else {
            status &= !bit;
        }

        let fd = self.descriptor()?;
        // SAFETY: `fd` is open for the duration of the call and TIOCMSET reads
        // exactly one c_int from `status`.
        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCMSET, &status as *const libc::c_int) };
        if rc < 0 {
            return Err(PortError::Io(io::Error::last_os_error()));
        }
        debug!("{} set {} on {}", line, if high { "high" } else { "low" }, self.name);
        Ok(())
    }

    fn close(&mut self) {
        if self.fd.take().is_some() {
            info!("Closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    fn readiness(&self) -> &dyn ReadinessSource {
        self
    }
}

impl std::fmt::Debug for TtyPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtyPort")
            .field("name", &self.name)
            .field("fd", &self.fd.as_ref().map(AsRawFd::as_raw_fd))
            .finish()
    }
}

/// Opens [`TtyPort`]s for a session.
#[derive(Debug, Default, Clone, Copy)]
pub struct TtyOpener;

impl PortOpener for TtyOpener {
    fn open(
        &mut self,
        config: &PortConfiguration,
    ) -> Result<Box<dyn SerialPortAdapter>, PortError> {
        Ok(Box::new(TtyPort::open(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_open_failure() {
        let config = PortConfiguration::builder("/dev/nonexistent_port_12345")
            .build()
            .unwrap();
        match TtyPort::open(&config) {
            Err(PortError::DeviceOpenFailed { path, .. }) => {
                assert!(path.contains("nonexistent"));
            }
            other => panic!("Expected DeviceOpenFailed, got: {:?}", other),
        }
    }

    #[test]
    fn test_non_tty_is_attribute_failure() {
        let config = PortConfiguration::builder("/dev/null").build().unwrap();
        let result = TtyPort::open(&config);
        assert!(
            matches!(result, Err(PortError::AttributeApplyFailed { .. })),
            "got {:?}",
            result
        );
    }

    #[test]
    fn test_nul_in_path_rejected() {
        let config = PortConfiguration::builder("/dev/tty\0S0").build().unwrap();
        assert!(matches!(
            TtyPort::open(&config),
            Err(PortError::InvalidConfiguration(_))
        ));
    }
}
