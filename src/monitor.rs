//! Handshake line monitoring.
//!
//! The host has no change notification for DTR/DSR/RTS/CTS, so the session
//! samples them on a timer. `ControlLineMonitor` remembers the last observed
//! level of each line and turns samples into transitions.

use crate::port::{ControlLine, ControlLines, PortError, SerialPortAdapter};
use tracing::{debug, warn};

/// A line moved to a new level (`true` = High).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineChange {
    pub line: ControlLine,
    pub high: bool,
}

/// Last-seen level of each handshake line.
///
/// Every line starts out unknown, so the first sample reports all four.
#[derive(Debug, Clone)]
pub struct ControlLineMonitor {
    last: [Option<bool>; 4],
    running: bool,
}

impl ControlLineMonitor {
    pub fn new() -> Self {
        Self {
            last: [None; 4],
            running: true,
        }
    }

    /// False once a sample has failed or [`stop`](Self::stop) was called.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Last recorded level of `line`; `None` until first observed.
    pub fn last_state(&self, line: ControlLine) -> Option<bool> {
        self.last[slot(line)]
    }

    /// Record a sample and return the lines whose level changed.
    pub fn observe(&mut self, lines: ControlLines) -> Vec<LineChange> {
        let mut changes = Vec::new();
        for line in ControlLine::ALL {
            let high = lines.get(line);
            let previous = &mut self.last[slot(line)];
            if *previous != Some(high) {
                *previous = Some(high);
                changes.push(LineChange { line, high });
            }
        }
        changes
    }

    /// Sample `port` once.
    ///
    /// A failed query stops the monitor and is returned to the caller, which
    /// decides from the error whether the device has gone away.
    pub fn poll(&mut self, port: &dyn SerialPortAdapter) -> Result<Vec<LineChange>, PortError> {
        if !self.running {
            return Ok(Vec::new());
        }

        match port.control_lines() {
            Ok(lines) => {
                let changes = self.observe(lines);
                for change in &changes {
                    debug!(
                        "{} {} on {}",
                        change.line,
                        if change.high { "high" } else { "low" },
                        port.name()
                    );
                }
                Ok(changes)
            }
            Err(e) => {
                warn!("Control line monitoring on {} ended: {}", port.name(), e);
                self.running = false;
                Err(e)
            }
        }
    }
}

impl Default for ControlLineMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(line: ControlLine) -> usize {
    match line {
        ControlLine::Dtr => 0,
        ControlLine::Dsr => 1,
        ControlLine::Rts => 2,
        ControlLine::Cts => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockSerialPort;

    #[test]
    fn test_first_sample_reports_every_line() {
        let mut monitor = ControlLineMonitor::new();
        let changes = monitor.observe(ControlLines::default());

        assert_eq!(changes.len(), 4);
        assert!(changes.iter().all(|c| !c.high));
        assert_eq!(monitor.last_state(ControlLine::Cts), Some(false));
    }

    #[test]
    fn test_single_transition_reported_once() {
        let mut port = MockSerialPort::new("MOCK0");
        let mut monitor = ControlLineMonitor::new();
        monitor.poll(&port).unwrap();

        port.set_remote_line(ControlLine::Dtr, true);
        let changes = monitor.poll(&port).unwrap();
        assert_eq!(
            changes,
            vec![LineChange {
                line: ControlLine::Dtr,
                high: true
            }]
        );

        assert!(monitor.poll(&port).unwrap().is_empty());
        assert!(monitor.poll(&port).unwrap().is_empty());
    }

    #[test]
    fn test_failed_query_stops_monitoring() {
        let mut port = MockSerialPort::new("MOCK0");
        let mut monitor = ControlLineMonitor::new();
        monitor.poll(&port).unwrap();

        port.unplug();
        assert!(matches!(
            monitor.poll(&port),
            Err(PortError::ControlLineQueryFailed(_))
        ));
        assert!(!monitor.is_running());
        assert!(monitor.poll(&port).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_lines_stop_monitoring() {
        let mut port = MockSerialPort::new("MOCK0");
        port.without_control_lines();
        let mut monitor = ControlLineMonitor::new();

        assert!(matches!(
            monitor.poll(&port),
            Err(PortError::ControlLinesUnavailable(_))
        ));
        assert!(!monitor.is_running());
        assert_eq!(monitor.last_state(ControlLine::Dtr), None);
    }
}
