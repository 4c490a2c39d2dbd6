use std::fs;
use std::io::{self, BufReader};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use log::{error, info, LevelFilter};

use pwmctl::{Session, StreamEnd};
use softpwm::class::CLASS_NAME;
use softpwm::sim::SimChip;
use softpwm::{OutputBackend, PwmConfig, Registry, SoftPwmClass, TimerBackend};
use softpwm_posix::{PosixTimers, SysfsGpio, DEFAULT_GPIO_ROOT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-memory lines driven by the real timer service
    Sim,
    /// Kernel GPIO lines through sysfs
    Sysfs,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Software PWM channel manager")]
struct Opts {
    #[arg(long, value_enum, default_value_t = Backend::Sim)]
    backend: Backend,

    #[arg(long, default_value = DEFAULT_GPIO_ROOT, value_name = "DIR")]
    gpio_root: PathBuf,

    /// Number of lines on the simulated chip
    #[arg(long, default_value_t = 64)]
    lines: u32,

    /// Also accept commands on a TCP socket
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// JSON channel configuration; the flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "NS")]
    period_ns: Option<u64>,

    #[arg(long, value_name = "NS")]
    duty_cycle_ns: Option<u64>,

    #[arg(long, value_name = "N")]
    max_channels: Option<usize>,

    /// More output per occurrence
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Opts {
    fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn pwm_config(&self) -> Result<PwmConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str::<PwmConfig>(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => PwmConfig::default(),
        };

        if let Some(period_ns) = self.period_ns {
            config.default_period_ns = period_ns;
        }
        if let Some(duty_ns) = self.duty_cycle_ns {
            config.default_duty_cycle_ns = duty_ns;
        }
        if let Some(max) = self.max_channels {
            config.max_channels = max;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    env_logger::Builder::new()
        .filter_level(opts.log_level())
        .parse_default_env()
        .init();

    let config = opts.pwm_config()?;
    let timers = PosixTimers::new()?;

    match opts.backend {
        Backend::Sim => {
            let chip = SimChip::new(timers.clone(), opts.lines);
            serve(Registry::with_config(timers, chip, config)?, &opts)
        }
        Backend::Sysfs => {
            let gpio = SysfsGpio::open(&opts.gpio_root)?;
            serve(Registry::with_config(timers, gpio, config)?, &opts)
        }
    }
}

fn serve<B: TimerBackend, G: OutputBackend>(registry: Registry<B, G>, opts: &Opts) -> Result<()> {
    info!(
        "{CLASS_NAME}: default period {} ns, duty cycle {} ns, up to {} channel(s)",
        registry.config().default_period_ns,
        registry.config().default_duty_cycle_ns,
        registry.config().max_channels
    );
    let session = Arc::new(Session::new(SoftPwmClass::new(registry)));

    let on_interrupt = Arc::clone(&session);
    ctrlc::set_handler(move || {
        let released = on_interrupt.shutdown();
        info!("interrupted, released {released} channel(s)");
        process::exit(130);
    })
    .context("installing Ctrl-C handler")?;

    let (stop, stopped) = mpsc::channel::<&'static str>();
    let listening = match &opts.listen {
        Some(addr) => {
            let listener = TcpListener::bind(addr).with_context(|| format!("binding {addr}"))?;
            info!("command listener on tcp://{addr}");
            let session = Arc::clone(&session);
            let stop = stop.clone();
            thread::spawn(move || run_command_listener(listener, session, stop));
            true
        }
        None => false,
    };

    {
        let session = Arc::clone(&session);
        thread::Builder::new()
            .name("pwmctl-console".into())
            .spawn(move || run_console(&session, listening, stop))
            .context("spawning console thread")?;
    }

    // The listener holds a sender for as long as it accepts connections.
    let reason = stopped.recv().unwrap_or("all command sources closed");
    let released = session.shutdown();
    info!("{reason}, released {released} channel(s)");
    Ok(())
}

fn run_console<B: TimerBackend, G: OutputBackend>(
    session: &Session<B, G>,
    listening: bool,
    stop: Sender<&'static str>,
) {
    match session.serve(io::stdin().lock(), io::stdout()) {
        Ok(end) if end.stops_service(listening) => {
            let _ = stop.send(match end {
                StreamEnd::Quit => "quit on console",
                StreamEnd::Eof => "console closed",
            });
        }
        Ok(_) => info!("console closed, still serving commands; Ctrl-C or `quit` to stop"),
        Err(err) => {
            error!("console error: {err}");
            if !listening {
                let _ = stop.send("console failed");
            }
        }
    }
}

fn run_command_listener<B: TimerBackend, G: OutputBackend>(
    listener: TcpListener,
    session: Arc<Session<B, G>>,
    stop: Sender<&'static str>,
) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream.peer_addr().ok();
                info!("command connection from {peer:?}");
                let session = Arc::clone(&session);
                let stop = stop.clone();
                thread::spawn(move || {
                    match handle_command_stream(stream, &session) {
                        Ok(StreamEnd::Quit) => {
                            let _ = stop.send("quit on command connection");
                        }
                        Ok(StreamEnd::Eof) => {}
                        Err(err) => error!("command connection error: {err}"),
                    }
                    info!("command connection closed: {peer:?}");
                });
            }
            Err(err) => error!("command accept error: {err}"),
        }
    }
}

fn handle_command_stream<B: TimerBackend, G: OutputBackend>(
    stream: TcpStream,
    session: &Session<B, G>,
) -> io::Result<StreamEnd> {
    stream.set_nodelay(true).ok();
    let reader = BufReader::new(stream.try_clone()?);
    session.serve(reader, stream)
}
