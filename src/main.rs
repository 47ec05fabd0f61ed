use clap::Parser;
use serial_term::config::{ConfigLoader, SerialConfig};
use serial_term::port::{
    BaudRate, DataBits, FlowControl, Parity, StopBits, TerminatorMode,
};
use serial_term::{AppError, AppResult};
use std::path::PathBuf;
use std::process::ExitCode;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "An interactive RS-232 terminal.",
    long_about = "Opens a serial character device, copies received bytes to stdout and sends each stdin line with the configured terminator. Lines starting with '/' are commands; type /help for the list."
)]
struct Args {
    /// Configuration file (defaults to ./serial-term.toml or the platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device, e.g. /dev/ttyUSB0.
    #[arg(short, long)]
    device: Option<String>,

    /// Baud rate (150 to 115200).
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits (5 to 8).
    #[arg(long)]
    data_bits: Option<u8>,

    /// Parity: none, even or odd.
    #[arg(long)]
    parity: Option<Parity>,

    /// Stop bits (1 or 2).
    #[arg(long)]
    stop_bits: Option<u8>,

    /// Flow control: none, rts/cts, dtr/dsr or xon/xoff.
    #[arg(long)]
    flow: Option<FlowControl>,

    /// Line terminator: none, lf, cr or crlf.
    #[arg(short, long)]
    terminator: Option<TerminatorMode>,

    /// Print the supported line settings and exit.
    #[arg(long)]
    list_options: bool,
}

impl Args {
    /// Command-line values win over the configuration file.
    fn apply(&self, serial: &mut SerialConfig) -> AppResult<()> {
        if let Some(device) = &self.device {
            serial.device = Some(device.clone());
        }
        if let Some(baud) = self.baud {
            serial.baud_rate = BaudRate::try_from(baud)?;
        }
        if let Some(bits) = self.data_bits {
            serial.data_bits = DataBits::try_from(bits)?;
        }
        if let Some(parity) = self.parity {
            serial.parity = parity;
        }
        if let Some(bits) = self.stop_bits {
            serial.stop_bits = StopBits::try_from(bits)?;
        }
        if let Some(flow) = self.flow {
            serial.flow_control = flow;
        }
        if let Some(mode) = self.terminator {
            if mode == TerminatorMode::Custom && serial.terminator_bytes.is_none() {
                return Err(AppError::usage(
                    "a custom terminator needs serial.terminator_bytes in the config file",
                ));
            }
            serial.terminator = mode;
        }
        Ok(())
    }
}

/// Device nodes suggested when choosing a port.
const SUGGESTED_PORTS: [&str; 4] = ["/dev/ttyS0", "/dev/ttyS1", "/dev/ttyS2", "/dev/ttyS3"];

fn option_rows() -> Vec<(&'static str, String)> {
    fn row<T: Copy>(
        name: &'static str,
        values: &[T],
        label: impl Fn(T) -> &'static str,
    ) -> (&'static str, String) {
        let labels: Vec<&str> = values.iter().map(|&v| label(v)).collect();
        (name, labels.join(", "))
    }

    vec![
        ("ports", SUGGESTED_PORTS.join(", ")),
        row("baud", &BaudRate::ALL, BaudRate::label),
        row("data bits", &DataBits::ALL, DataBits::label),
        row("parity", &Parity::ALL, Parity::label),
        row("stop bits", &StopBits::ALL, StopBits::label),
        row("flow", &FlowControl::ALL, FlowControl::label),
        row("terminator", &TerminatorMode::ALL, TerminatorMode::label),
    ]
}

fn list_options() {
    for (name, values) in option_rows() {
        println!("{name:<12} {values}");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("serial-term: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
fn run(args: Args) -> AppResult<()> {
    use serial_term::console::{Console, Flow, Input, LineAssembler, HELP};
    use serial_term::{HostEvent, PollLoop, Session, TtyOpener};
    use std::io::{self, BufRead};
    use std::os::fd::AsFd;
    use tracing::{debug, info};

    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let mut config = loader.into_config();
    args.apply(&mut config.serial)?;

    if args.list_options {
        list_options();
        return Ok(());
    }

    serial_term::logging::init(&config.logging);
    info!("serial-term {}", env!("CARGO_PKG_VERSION"));

    let target = match config.serial.to_port_configuration() {
        Ok(port) => Some(port),
        Err(e) => {
            debug!("No usable device configuration: {}", e);
            None
        }
    };

    let stdin = io::stdin();
    let mut host = PollLoop::new();
    let stdin_watch = host.watch_fd(stdin.as_fd())?;
    let mut session = Session::with_settings(TtyOpener, config.monitor.session_settings());
    let mut console = Console::new(io::stdout(), io::stderr(), target.clone());
    let mut lines = LineAssembler::new();

    if target.is_some() {
        if let Err(e) = console.connect(&mut session, &mut host) {
            console.notice(e);
        }
    } else {
        console.notice("no device configured; use --device, then /connect");
        console.notice(HELP);
    }

    loop {
        host.wait(None)?;

        while let Some(event) = host.next_event() {
            if event != HostEvent::Readable(stdin_watch) {
                if let Err(e) = session.dispatch(&mut host, event, &mut console) {
                    if e.is_device_lost() {
                        session.disconnect_lost(&mut host, &mut console, &e);
                    } else {
                        console.notice(&e);
                    }
                }
                continue;
            }

            let mut input = stdin.lock();
            let chunk = input.fill_buf()?.to_vec();
            input.consume(chunk.len());
            drop(input);

            let (mut pending, eof) = (lines.push(&chunk), chunk.is_empty());
            if eof {
                pending.extend(lines.finish());
            }

            for line in pending {
                let flow = Input::parse(&line)
                    .and_then(|input| console.execute(&mut session, &mut host, input));
                match flow {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => {
                        session.disconnect(&mut host, &mut console);
                        return Ok(());
                    }
                    Err(e) => console.notice(e),
                }
            }

            if eof {
                session.disconnect(&mut host, &mut console);
                return Ok(());
            }
        }
    }
}

#[cfg(not(unix))]
fn run(args: Args) -> AppResult<()> {
    if args.list_options {
        list_options();
        return Ok(());
    }
    Err(AppError::usage("serial devices are only supported on Unix-like systems"))
}
