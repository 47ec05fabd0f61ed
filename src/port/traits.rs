//! Core types and traits for serial port abstraction.
//!
//! Defines the immutable `PortConfiguration` value, its enumerated fields, and
//! the `SerialPortAdapter` trait that lets real character devices and mock
//! implementations be used interchangeably.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(unix)]
use std::os::fd::BorrowedFd;
use std::str::FromStr;

/// Line speed in bits per second.
///
/// Only the rates every POSIX line discipline supports are offered; the
/// variants are listed in ascending order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B150,
    B300,
    B600,
    B1200,
    B1800,
    B2400,
    B4800,
    B9600,
    B19200,
    B38400,
    B57600,
    #[default]
    B115200,
}

impl BaudRate {
    /// Every supported rate, ascending.
    pub const ALL: [BaudRate; 12] = [
        BaudRate::B150,
        BaudRate::B300,
        BaudRate::B600,
        BaudRate::B1200,
        BaudRate::B1800,
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    pub fn bits_per_second(self) -> u32 {
        match self {
            BaudRate::B150 => 150,
            BaudRate::B300 => 300,
            BaudRate::B600 => 600,
            BaudRate::B1200 => 1200,
            BaudRate::B1800 => 1800,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BaudRate::B150 => "150",
            BaudRate::B300 => "300",
            BaudRate::B600 => "600",
            BaudRate::B1200 => "1200",
            BaudRate::B1800 => "1800",
            BaudRate::B2400 => "2400",
            BaudRate::B4800 => "4800",
            BaudRate::B9600 => "9600",
            BaudRate::B19200 => "19200",
            BaudRate::B38400 => "38400",
            BaudRate::B57600 => "57600",
            BaudRate::B115200 => "115200",
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = PortError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .into_iter()
            .find(|rate| rate.bits_per_second() == value)
            .ok_or_else(|| PortError::invalid(format!("unsupported baud rate {value}")))
    }
}

impl From<BaudRate> for u32 {
    fn from(rate: BaudRate) -> Self {
        rate.bits_per_second()
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl DataBits {
    pub const ALL: [DataBits; 4] = [DataBits::Five, DataBits::Six, DataBits::Seven, DataBits::Eight];

    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DataBits::Five => "5",
            DataBits::Six => "6",
            DataBits::Seven => "7",
            DataBits::Eight => "8",
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = PortError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(PortError::invalid(format!("unsupported data bits {other}"))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        bits.bits()
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Even,
    Odd,
    #[default]
    None,
}

impl Parity {
    pub const ALL: [Parity; 3] = [Parity::Even, Parity::Odd, Parity::None];

    pub fn label(self) -> &'static str {
        match self {
            Parity::Even => "Even",
            Parity::Odd => "Odd",
            Parity::None => "None",
        }
    }

    /// Single-letter form used in "8/N/1" style summaries.
    pub fn initial(self) -> char {
        match self {
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::None => 'N',
        }
    }
}

impl FromStr for Parity {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "even" | "e" => Ok(Parity::Even),
            "odd" | "o" => Ok(Parity::Odd),
            "none" | "n" => Ok(Parity::None),
            other => Err(PortError::invalid(format!("unknown parity '{other}'"))),
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl StopBits {
    pub const ALL: [StopBits; 2] = [StopBits::One, StopBits::Two];

    pub fn label(self) -> &'static str {
        match self {
            StopBits::One => "1",
            StopBits::Two => "2",
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = PortError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(PortError::invalid(format!("unsupported stop bits {other}"))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    #[default]
    None,
    RtsCts,
    DtrDsr,
    XonXoff,
}

impl FlowControl {
    pub const ALL: [FlowControl; 4] = [
        FlowControl::None,
        FlowControl::RtsCts,
        FlowControl::DtrDsr,
        FlowControl::XonXoff,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FlowControl::None => "None",
            FlowControl::RtsCts => "RTS/CTS",
            FlowControl::DtrDsr => "DTR/DSR",
            FlowControl::XonXoff => "XON/XOFF",
        }
    }
}

impl FromStr for FlowControl {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(FlowControl::None),
            "rts/cts" | "rtscts" | "rts_cts" | "hardware" => Ok(FlowControl::RtsCts),
            "dtr/dsr" | "dtrdsr" | "dtr_dsr" => Ok(FlowControl::DtrDsr),
            "xon/xoff" | "xonxoff" | "xon_xoff" | "software" => Ok(FlowControl::XonXoff),
            other => Err(PortError::invalid(format!("unknown flow control '{other}'"))),
        }
    }
}

/// How the terminator was chosen; only used for display and selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatorMode {
    None,
    #[default]
    Lf,
    Cr,
    CrLf,
    Custom,
}

impl TerminatorMode {
    pub const ALL: [TerminatorMode; 5] = [
        TerminatorMode::None,
        TerminatorMode::Lf,
        TerminatorMode::Cr,
        TerminatorMode::CrLf,
        TerminatorMode::Custom,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TerminatorMode::None => "None",
            TerminatorMode::Lf => "LF",
            TerminatorMode::Cr => "CR",
            TerminatorMode::CrLf => "CR LF",
            TerminatorMode::Custom => "Custom",
        }
    }
}

impl FromStr for TerminatorMode {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(TerminatorMode::None),
            "lf" => Ok(TerminatorMode::Lf),
            "cr" => Ok(TerminatorMode::Cr),
            "crlf" | "cr lf" | "cr+lf" | "cr_lf" => Ok(TerminatorMode::CrLf),
            "custom" => Ok(TerminatorMode::Custom),
            other => Err(PortError::invalid(format!("unknown terminator '{other}'"))),
        }
    }
}

/// Resolved terminator bytes appended to every outbound message.
///
/// The connection only ever sees these bytes; [`Terminator::mode`] re-derives
/// the display mode when a settings view needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Terminator(Vec<u8>);

impl Terminator {
    /// Resolve one of the fixed modes. `Custom` has no fixed bytes.
    pub fn for_mode(mode: TerminatorMode) -> Option<Self> {
        let bytes = match mode {
            TerminatorMode::None => Vec::new(),
            TerminatorMode::Lf => vec![0x0A],
            TerminatorMode::Cr => vec![0x0D],
            TerminatorMode::CrLf => vec![0x0D, 0x0A],
            TerminatorMode::Custom => return None,
        };
        Some(Self(bytes))
    }

    pub fn custom(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The named mode that produces exactly these bytes, else `Custom`.
    pub fn mode(&self) -> TerminatorMode {
        match self.0.as_slice() {
            [] => TerminatorMode::None,
            [0x0A] => TerminatorMode::Lf,
            [0x0D] => TerminatorMode::Cr,
            [0x0D, 0x0A] => TerminatorMode::CrLf,
            _ => TerminatorMode::Custom,
        }
    }
}

impl Default for Terminator {
    fn default() -> Self {
        Self(vec![0x0A])
    }
}

/// Immutable description of how to open and frame a serial link.
///
/// Built with [`PortConfiguration::builder`]; a value that exists has already
/// been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfiguration {
    device_path: String,
    baud_rate: BaudRate,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    flow_control: FlowControl,
    terminator: Terminator,
}

impl PortConfiguration {
    /// Start a configuration for `device_path` with the 115200-8-N-1, no flow
    /// control, LF-terminated baseline.
    pub fn builder(device_path: impl Into<String>) -> PortConfigurationBuilder {
        PortConfigurationBuilder::new(device_path)
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn baud_rate(&self) -> BaudRate {
        self.baud_rate
    }

    pub fn data_bits(&self) -> DataBits {
        self.data_bits
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn stop_bits(&self) -> StopBits {
        self.stop_bits
    }

    pub fn flow_control(&self) -> FlowControl {
        self.flow_control
    }

    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    /// Text payload followed by the terminator bytes, ready for one write.
    pub fn frame(&self, text: &str) -> Vec<u8> {
        let mut data = Vec::with_capacity(text.len() + self.terminator.len());
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(self.terminator.as_bytes());
        data
    }

    /// One-line status label, e.g. `/dev/ttyUSB0, 115200 8/N/1, None`.
    pub fn summary(&self) -> String {
        format!(
            "{}, {} {}/{}/{}, {}",
            self.device_path,
            self.baud_rate.label(),
            self.data_bits.label(),
            self.parity.initial(),
            self.stop_bits.label(),
            self.flow_control.label()
        )
    }
}

impl fmt::Display for PortConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Builder for [`PortConfiguration`].
#[derive(Debug, Clone)]
pub struct PortConfigurationBuilder {
    device_path: String,
    baud_rate: BaudRate,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    flow_control: FlowControl,
    terminator: Terminator,
}

impl PortConfigurationBuilder {
    fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            baud_rate: BaudRate::default(),
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
            terminator: Terminator::default(),
        }
    }

    pub fn baud_rate(mut self, baud_rate: BaudRate) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<PortConfiguration, PortError> {
        let device_path = self.device_path.trim();
        if device_path.is_empty() {
            return Err(PortError::invalid("device path is empty"));
        }

        Ok(PortConfiguration {
            device_path: device_path.to_string(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            flow_control: self.flow_control,
            terminator: self.terminator,
        })
    }
}

/// One of the four RS-232 handshake signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlLine {
    /// Data Terminal Ready (output).
    Dtr,
    /// Data Set Ready (input).
    Dsr,
    /// Request To Send (output).
    Rts,
    /// Clear To Send (input).
    Cts,
}

impl ControlLine {
    pub const ALL: [ControlLine; 4] = [
        ControlLine::Dtr,
        ControlLine::Dsr,
        ControlLine::Rts,
        ControlLine::Cts,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ControlLine::Dtr => "DTR",
            ControlLine::Dsr => "DSR",
            ControlLine::Rts => "RTS",
            ControlLine::Cts => "CTS",
        }
    }

    /// DTR and RTS are driven by us; DSR and CTS come from the remote end.
    pub fn is_settable(self) -> bool {
        matches!(self, ControlLine::Dtr | ControlLine::Rts)
    }
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of the four handshake lines; `true` means asserted (High).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlLines {
    pub dtr: bool,
    pub dsr: bool,
    pub rts: bool,
    pub cts: bool,
}

impl ControlLines {
    pub fn get(&self, line: ControlLine) -> bool {
        match line {
            ControlLine::Dtr => self.dtr,
            ControlLine::Dsr => self.dsr,
            ControlLine::Rts => self.rts,
            ControlLine::Cts => self.cts,
        }
    }

    pub fn set(&mut self, line: ControlLine, high: bool) {
        match line {
            ControlLine::Dtr => self.dtr = high,
            ControlLine::Dsr => self.dsr = high,
            ControlLine::Rts => self.rts = high,
            ControlLine::Cts => self.cts = high,
        }
    }
}

/// Something an event loop can wait on for "data available to read".
pub trait ReadinessSource {
    /// Check, without blocking, whether a read would return data now.
    fn poll_readable(&self) -> Result<bool, PortError>;

    /// OS descriptor for hosts that multiplex with `poll(2)`.
    ///
    /// Synthetic sources return `None` and are driven by their host directly.
    #[cfg(unix)]
    fn poll_descriptor(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

/// Trait for an open serial connection.
///
/// Implementations own exactly one device handle. Reads never block; absence
/// of data is a zero-length result, not an error.
pub trait SerialPortAdapter: ReadinessSource + Send + fmt::Debug {
    /// Get the name/path of this serial port.
    fn name(&self) -> &str;

    /// Read whatever is available into `buffer` without blocking.
    ///
    /// Returns 0 when nothing is available. A partial fill is normal.
    fn read_nonblocking(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Write bytes exactly as given; a short count is reported, not retried.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Sample DTR/DSR/RTS/CTS from the modem status bits.
    fn control_lines(&self) -> Result<ControlLines, PortError>;

    /// Drive DTR or RTS. DSR and CTS are rejected.
    fn set_control_line(&mut self, line: ControlLine, high: bool) -> Result<(), PortError>;

    /// Release the handle. Calling this on a closed port is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// This port as the readiness source an event host watches.
    fn readiness(&self) -> &dyn ReadinessSource;

    /// Convenience over [`read_nonblocking`](Self::read_nonblocking) that
    /// returns the received chunk (possibly empty).
    fn read_available(&mut self, max_bytes: usize) -> Result<Vec<u8>, PortError> {
        let mut buffer = vec![0u8; max_bytes];
        let n = self.read_nonblocking(&mut buffer)?;
        buffer.truncate(n);
        Ok(buffer)
    }
}

/// Factory for connections, so the session can be driven by mocks in tests.
pub trait PortOpener {
    fn open(&mut self, config: &PortConfiguration)
        -> Result<Box<dyn SerialPortAdapter>, PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = PortConfiguration::builder("/dev/ttyUSB0").build().unwrap();
        assert_eq!(config.baud_rate(), BaudRate::B115200);
        assert_eq!(config.data_bits(), DataBits::Eight);
        assert_eq!(config.parity(), Parity::None);
        assert_eq!(config.stop_bits(), StopBits::One);
        assert_eq!(config.flow_control(), FlowControl::None);
        assert_eq!(config.terminator().as_bytes(), &[0x0A]);
    }

    #[test]
    fn test_empty_device_path_rejected() {
        let err = PortConfiguration::builder("   ").build().unwrap_err();
        assert!(matches!(err, PortError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_summary() {
        let config = PortConfiguration::builder("/dev/ttyS0")
            .baud_rate(BaudRate::B9600)
            .data_bits(DataBits::Seven)
            .parity(Parity::Even)
            .stop_bits(StopBits::Two)
            .flow_control(FlowControl::RtsCts)
            .build()
            .unwrap();
        assert_eq!(config.summary(), "/dev/ttyS0, 9600 7/E/2, RTS/CTS");
    }

    #[test]
    fn test_fixed_terminators() {
        let bytes = |mode| Terminator::for_mode(mode).unwrap().as_bytes().to_vec();
        assert_eq!(bytes(TerminatorMode::None), Vec::<u8>::new());
        assert_eq!(bytes(TerminatorMode::Lf), vec![0x0A]);
        assert_eq!(bytes(TerminatorMode::Cr), vec![0x0D]);
        assert_eq!(bytes(TerminatorMode::CrLf), vec![0x0D, 0x0A]);
        assert!(Terminator::for_mode(TerminatorMode::Custom).is_none());
    }

    #[test]
    fn test_terminator_mode_rederivation() {
        for mode in [
            TerminatorMode::None,
            TerminatorMode::Lf,
            TerminatorMode::Cr,
            TerminatorMode::CrLf,
        ] {
            assert_eq!(Terminator::for_mode(mode).unwrap().mode(), mode);
        }
        assert_eq!(Terminator::custom([0x00]).mode(), TerminatorMode::Custom);
        assert_eq!(Terminator::custom([0x0A, 0x0D]).mode(), TerminatorMode::Custom);
        assert_eq!(
            Terminator::custom([0x0D, 0x0A, 0x00]).mode(),
            TerminatorMode::Custom
        );
    }

    #[test]
    fn test_frame_appends_terminator() {
        let config = PortConfiguration::builder("/dev/ttyUSB0").build().unwrap();
        assert_eq!(config.frame("PING"), b"PING\n".to_vec());
    }

    #[test]
    fn test_raw_value_conversions() {
        assert_eq!(BaudRate::try_from(57600).unwrap(), BaudRate::B57600);
        assert!(BaudRate::try_from(250000).is_err());
        assert_eq!(DataBits::try_from(5).unwrap(), DataBits::Five);
        assert!(DataBits::try_from(9).is_err());
        assert!(StopBits::try_from(3).is_err());
        assert_eq!("E".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("RTS/CTS".parse::<FlowControl>().unwrap(), FlowControl::RtsCts);
        assert_eq!("cr lf".parse::<TerminatorMode>().unwrap(), TerminatorMode::CrLf);
        assert!("mark".parse::<Parity>().is_err());
    }

    #[test]
    fn test_only_outputs_are_settable() {
        assert!(ControlLine::Dtr.is_settable());
        assert!(ControlLine::Rts.is_settable());
        assert!(!ControlLine::Dsr.is_settable());
        assert!(!ControlLine::Cts.is_settable());
    }
}
