//! Line-oriented console front end.
//!
//! Stdin lines are either text to send or `/` commands. Received bytes are
//! copied to `out` untouched; status notices go to `err`.

use crate::error::{AppError, AppResult};
use crate::port::{ControlLine, ControlLines, PortConfiguration, PortError, PortOpener};
use crate::session::{DisconnectReason, EventHost, Session, SessionListener};
use std::io::Write;
use tracing::debug;

pub const HELP: &str = "\
Commands:
  /connect           open the configured device
  /disconnect        close the device
  /dtr on|off        drive DTR
  /rts on|off        drive RTS
  /lines             show DTR/DSR/RTS/CTS
  /config            show line settings
  /help              this text
  /quit              exit
Any other line is sent with the configured terminator; start it with // to send a literal '/'.";

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Command(Command),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    SetLine(ControlLine, bool),
    Lines,
    Config,
    Help,
    Quit,
}

impl Input {
    pub fn parse(line: &str) -> AppResult<Self> {
        if let Some(literal) = line.strip_prefix("//") {
            return Ok(Self::Send(format!("/{literal}")));
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Self::Send(line.to_string()));
        };

        let mut words = command.split_whitespace();
        let name = words.next().unwrap_or_default().to_ascii_lowercase();
        let arg = words.next();

        let parsed = match (name.as_str(), arg) {
            ("connect", None) => Command::Connect,
            ("disconnect", None) => Command::Disconnect,
            ("dtr", Some(level)) => Command::SetLine(ControlLine::Dtr, parse_level(level)?),
            ("rts", Some(level)) => Command::SetLine(ControlLine::Rts, parse_level(level)?),
            ("lines", None) => Command::Lines,
            ("config", None) => Command::Config,
            ("help", None) => Command::Help,
            ("quit" | "exit", None) => Command::Quit,
            _ => return Err(AppError::usage(format!("unknown command '{line}', try /help"))),
        };
        Ok(Self::Command(parsed))
    }
}

fn parse_level(word: &str) -> AppResult<bool> {
    match word.to_ascii_lowercase().as_str() {
        "on" | "high" | "1" => Ok(true),
        "off" | "low" | "0" => Ok(false),
        other => Err(AppError::usage(format!("expected on or off, got '{other}'"))),
    }
}

/// Splits a byte stream into lines, tolerating CR LF and partial reads.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and take every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The unterminated tail, if any (used at end of input).
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Should the main loop keep going?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Presentation layer: a [`SessionListener`] plus command execution.
pub struct Console<W: Write, E: Write> {
    out: W,
    err: E,
    /// Used by `/connect` when the session has never connected.
    target: Option<PortConfiguration>,
}

impl<W: Write, E: Write> Console<W, E> {
    pub fn new(out: W, err: E, target: Option<PortConfiguration>) -> Self {
        Self { out, err, target }
    }

    pub fn into_parts(self) -> (W, E) {
        (self.out, self.err)
    }

    /// Write a status line to the notice stream.
    pub fn notice(&mut self, message: impl std::fmt::Display) {
        if let Err(e) = writeln!(self.err, "[serial-term] {message}") {
            debug!("Dropped notice: {}", e);
        }
    }

    /// Connect to the configured device, reporting the outcome.
    pub fn connect<O: PortOpener>(
        &mut self,
        session: &mut Session<O>,
        host: &mut dyn EventHost,
    ) -> AppResult<()> {
        let config = match (session.config(), &self.target) {
            (Some(last), _) => last.clone(),
            (None, Some(target)) => target.clone(),
            (None, None) => {
                return Err(AppError::usage(
                    "no device configured; pass --device or set serial.device",
                ))
            }
        };

        let summary = config.summary();
        session.connect(host, config)?;
        self.notice(format!("connected: {summary}"));
        Ok(())
    }

    /// Run one line of user input.
    pub fn execute<O: PortOpener>(
        &mut self,
        session: &mut Session<O>,
        host: &mut dyn EventHost,
        input: Input,
    ) -> AppResult<Flow> {
        match input {
            Input::Send(text) => {
                let sent = session.send(&text)?;
                if !sent.is_complete() {
                    self.notice(format!(
                        "short write: {} of {} bytes accepted",
                        sent.written, sent.total
                    ));
                }
            }
            Input::Command(Command::Connect) => self.connect(session, host)?,
            Input::Command(Command::Disconnect) => {
                if !session.is_connected() {
                    return Err(PortError::NotOpen.into());
                }
                session.disconnect(host, self);
            }
            Input::Command(Command::SetLine(line, high)) => {
                session.set_line(line, high)?;
            }
            Input::Command(Command::Lines) => {
                let lines = session.control_lines()?;
                self.notice(describe_lines(lines));
            }
            Input::Command(Command::Config) => {
                let text = session
                    .config()
                    .or(self.target.as_ref())
                    .map(|config| {
                        format!(
                            "{}, terminator {}",
                            config.summary(),
                            config.terminator().mode().label()
                        )
                    })
                    .unwrap_or_else(|| "no device configured".to_string());
                self.notice(text);
            }
            Input::Command(Command::Help) => self.notice(HELP),
            Input::Command(Command::Quit) => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }
}

impl<W: Write, E: Write> SessionListener for Console<W, E> {
    fn on_bytes_received(&mut self, bytes: &[u8]) {
        if let Err(e) = self.out.write_all(bytes).and_then(|_| self.out.flush()) {
            debug!("Dropped {} received bytes: {}", bytes.len(), e);
        }
    }

    fn on_line_changed(&mut self, line: ControlLine, high: bool) {
        self.notice(format!("{} {}", line, if high { "high" } else { "low" }));
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.notice(reason);
    }
}

/// e.g. `DTR=1 DSR=0 RTS=1 CTS=0`
pub fn describe_lines(lines: ControlLines) -> String {
    ControlLine::ALL
        .iter()
        .map(|&line| format!("{}={}", line.label(), u8::from(lines.get(line))))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{MockOpener, ReadinessSource};
    use crate::session::{SessionState, SourceId};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHost {
        next: u64,
    }

    impl EventHost for CountingHost {
        fn on_readable(&mut self, _source: &dyn ReadinessSource) -> Result<SourceId, PortError> {
            self.next += 1;
            Ok(SourceId(self.next))
        }

        fn schedule_every(&mut self, _interval: Duration) -> Result<SourceId, PortError> {
            self.next += 1;
            Ok(SourceId(self.next))
        }

        fn cancel(&mut self, _id: SourceId) {}
    }

    fn console(target: Option<PortConfiguration>) -> Console<Vec<u8>, Vec<u8>> {
        Console::new(Vec::new(), Vec::new(), target)
    }

    fn target() -> Option<PortConfiguration> {
        Some(PortConfiguration::builder("/dev/mock0").build().unwrap())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Input::parse("/dtr on").unwrap(),
            Input::Command(Command::SetLine(ControlLine::Dtr, true))
        );
        assert_eq!(
            Input::parse("/RTS off").unwrap(),
            Input::Command(Command::SetLine(ControlLine::Rts, false))
        );
        assert_eq!(Input::parse("/quit").unwrap(), Input::Command(Command::Quit));
        assert_eq!(Input::parse("AT+GMR").unwrap(), Input::Send("AT+GMR".into()));
        assert_eq!(Input::parse("//etc").unwrap(), Input::Send("/etc".into()));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(matches!(Input::parse("/reboot"), Err(AppError::Usage(_))));
        assert!(matches!(Input::parse("/dtr maybe"), Err(AppError::Usage(_))));
        assert!(matches!(Input::parse("/dtr"), Err(AppError::Usage(_))));
    }

    #[test]
    fn test_line_assembler() {
        let mut lines = LineAssembler::new();
        assert!(lines.push(b"hel").is_empty());
        assert_eq!(lines.push(b"lo\r\nwor"), vec!["hello".to_string()]);
        assert_eq!(lines.push(b"ld\n\n"), vec!["world".to_string(), String::new()]);
        assert_eq!(lines.finish(), None);

        lines.push(b"tail");
        assert_eq!(lines.finish(), Some("tail".to_string()));
    }

    #[test]
    fn test_send_through_console() {
        let opener = MockOpener::new();
        let mut session = Session::new(opener.clone());
        let mut host = CountingHost::default();
        let mut console = console(target());

        console.connect(&mut session, &mut host).unwrap();
        let flow = console
            .execute(&mut session, &mut host, Input::Send("PING".into()))
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            opener.last_port().unwrap().get_write_log(),
            vec![b"PING\n".to_vec()]
        );
    }

    #[test]
    fn test_connect_without_target() {
        let mut session = Session::new(MockOpener::new());
        let mut host = CountingHost::default();
        let mut console = console(None);

        assert!(matches!(
            console.connect(&mut session, &mut host),
            Err(AppError::Usage(_))
        ));
    }

    #[test]
    fn test_disconnect_reports_on_err_stream() {
        let mut session = Session::new(MockOpener::new());
        let mut host = CountingHost::default();
        let mut console = console(target());
        console.connect(&mut session, &mut host).unwrap();

        console
            .execute(&mut session, &mut host, Input::Command(Command::Disconnect))
            .unwrap();

        assert_eq!(session.state(), SessionState::Idle);
        let (out, err) = console.into_parts();
        assert!(out.is_empty());
        let err = String::from_utf8(err).unwrap();
        assert!(err.contains("connected: /dev/mock0"));
        assert!(err.ends_with("[serial-term] disconnected\n"));
    }

    #[test]
    fn test_received_bytes_pass_through() {
        let mut console = console(None);
        console.on_bytes_received(b"\x1b[0mOK\r\n");
        console.on_line_changed(ControlLine::Cts, true);

        let (out, err) = console.into_parts();
        assert_eq!(out, b"\x1b[0mOK\r\n".to_vec());
        assert_eq!(String::from_utf8(err).unwrap(), "[serial-term] CTS high\n");
    }

    #[test]
    fn test_describe_lines() {
        let lines = ControlLines {
            dtr: true,
            dsr: false,
            rts: true,
            cts: false,
        };
        assert_eq!(describe_lines(lines), "DTR=1 DSR=0 RTS=1 CTS=0");
    }
}
