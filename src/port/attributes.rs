//! Translation of a [`PortConfiguration`] into termios line-discipline values.
//!
//! Everything here is a table lookup; nothing touches a device. The result is
//! applied to a `Termios` read from the device by [`LineAttributes::apply_to`].

use super::traits::{DataBits, FlowControl, Parity, PortConfiguration, StopBits};
use rustix::termios::{ControlModes, InputModes, LocalModes, OutputModes, SpecialCodeIndex, Termios};
use std::io;

/// Raw line-discipline settings derived from a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAttributes {
    /// Input and output speed in bits per second.
    pub speed: u32,
    /// Character size, parity, stop bits, hardware flow, CREAD, CLOCAL.
    pub control: ControlModes,
    /// Drop parity errors, ignore breaks, optional XON/XOFF.
    pub input: InputModes,
    /// Always empty, no output post-processing.
    pub output: OutputModes,
    /// Always empty, no canonical mode or echo.
    pub local: LocalModes,
    /// A single available byte completes a read.
    pub vmin: u8,
    /// No inter-byte timer.
    pub vtime: u8,
}

impl LineAttributes {
    /// Overwrite the mode fields of `termios` with these settings.
    pub fn apply_to(&self, termios: &mut Termios) -> io::Result<()> {
        termios.control_modes = self.control;
        termios.input_modes = self.input;
        termios.output_modes = self.output;
        termios.local_modes = self.local;
        termios.special_codes[SpecialCodeIndex::VMIN] = self.vmin;
        termios.special_codes[SpecialCodeIndex::VTIME] = self.vtime;
        termios.set_speed(self.speed)?;
        Ok(())
    }
}

/// Map a configuration to line attributes. Total and side-effect free.
///
/// DTR/DSR flow control has no termios encoding on this platform and is left
/// to the caller to report.
pub fn translate(config: &PortConfiguration) -> LineAttributes {
    let mut control = char_size(config.data_bits()) | ControlModes::CREAD | ControlModes::CLOCAL;

    if config.stop_bits() == StopBits::Two {
        control |= ControlModes::CSTOPB;
    }

    control |= match config.parity() {
        Parity::None => ControlModes::empty(),
        Parity::Even => ControlModes::PARENB,
        Parity::Odd => ControlModes::PARENB | ControlModes::PARODD,
    };

    let mut input = InputModes::IGNPAR | InputModes::IGNBRK;

    match config.flow_control() {
        FlowControl::RtsCts => control |= ControlModes::CRTSCTS,
        FlowControl::XonXoff => input |= InputModes::IXON | InputModes::IXOFF,
        FlowControl::DtrDsr | FlowControl::None => {}
    }

    LineAttributes {
        speed: config.baud_rate().bits_per_second(),
        control,
        input,
        output: OutputModes::empty(),
        local: LocalModes::empty(),
        vmin: 1,
        vtime: 0,
    }
}

fn char_size(bits: DataBits) -> ControlModes {
    match bits {
        DataBits::Five => ControlModes::CS5,
        DataBits::Six => ControlModes::CS6,
        DataBits::Seven => ControlModes::CS7,
        DataBits::Eight => ControlModes::CS8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::BaudRate;

    fn config(
        baud: BaudRate,
        bits: DataBits,
        parity: Parity,
        stop: StopBits,
        flow: FlowControl,
    ) -> PortConfiguration {
        PortConfiguration::builder("/dev/ttyS0")
            .baud_rate(baud)
            .data_bits(bits)
            .parity(parity)
            .stop_bits(stop)
            .flow_control(flow)
            .build()
            .unwrap()
    }

    #[test]
    fn test_every_framing_combination() {
        let known = ControlModes::CSIZE
            | ControlModes::CSTOPB
            | ControlModes::PARENB
            | ControlModes::PARODD
            | ControlModes::CREAD
            | ControlModes::CLOCAL;

        for baud in BaudRate::ALL {
            for bits in DataBits::ALL {
                for parity in Parity::ALL {
                    for stop in StopBits::ALL {
                        let attrs = translate(&config(baud, bits, parity, stop, FlowControl::None));

                        assert_eq!(attrs.speed, baud.bits_per_second());
                        assert_eq!(attrs.control & ControlModes::CSIZE, char_size(bits));
                        assert!((attrs.control - known).is_empty(), "stray control bits");
                        assert!(attrs.control.contains(ControlModes::CREAD | ControlModes::CLOCAL));
                        assert_eq!(
                            attrs.control.contains(ControlModes::CSTOPB),
                            stop == StopBits::Two
                        );
                        assert_eq!(
                            attrs.control.contains(ControlModes::PARENB),
                            parity != Parity::None
                        );
                        assert_eq!(
                            attrs.control.contains(ControlModes::PARODD),
                            parity == Parity::Odd
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_character_sizes_are_distinct() {
        let sizes: Vec<ControlModes> = DataBits::ALL.into_iter().map(char_size).collect();
        for (i, a) in sizes.iter().enumerate() {
            for b in &sizes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_raw_mode_invariants() {
        let attrs = translate(&PortConfiguration::builder("/dev/ttyS0").build().unwrap());
        assert_eq!(attrs.input, InputModes::IGNPAR | InputModes::IGNBRK);
        assert!(attrs.output.is_empty());
        assert!(attrs.local.is_empty());
        assert_eq!(attrs.vmin, 1);
        assert_eq!(attrs.vtime, 0);
    }

    #[test]
    fn test_flow_control_encoding() {
        let base = |flow| {
            translate(&config(
                BaudRate::B9600,
                DataBits::Eight,
                Parity::None,
                StopBits::One,
                flow,
            ))
        };

        let rtscts = base(FlowControl::RtsCts);
        assert!(rtscts.control.contains(ControlModes::CRTSCTS));
        assert!(!rtscts.input.intersects(InputModes::IXON | InputModes::IXOFF));

        // Software flow control lives in the input flags, never the control word.
        let xon = base(FlowControl::XonXoff);
        assert!(xon.input.contains(InputModes::IXON | InputModes::IXOFF));
        assert_eq!(xon.control, base(FlowControl::None).control);

        assert_eq!(base(FlowControl::DtrDsr), base(FlowControl::None));
    }
}
