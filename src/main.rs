//! CLI entry point for rust_acq.
//!
//! Headless consumer of the acquisition core:
//! - `run` loads an instrument configuration, opens its interface, optionally
//!   starts logging and prints the notification stream until Ctrl-C.
//! - `probe` streams whatever arrives on a port as text, to check settings.
//!
//! # Usage
//!
//! ```bash
//! rust_acq run config/nmea.toml --port /dev/ttyUSB0 --log
//! rust_acq run config/generic.toml --host 192.168.0.20 --tcp-port 4001 --json
//! rust_acq probe --port /dev/ttyUSB0 --baud 4800 --parity odd
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_acq::instrument::{Instrument, DEFAULT_COMMAND_TIMEOUT};
use rust_acq::probe::{ConnectionProbe, ProbeEvent, ProbeStatus};
use rust_acq::tracing_setup::{self, TracingConfig};
use rust_acq::transport::{Parity, SerialParams, SocketParams, TransportParams};
use rust_acq::{InstrumentEvent, InstrumentKind, RawConfig, Status};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust_acq")]
#[command(about = "Acquire and log serial/socket instrument streams", long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire from one instrument until interrupted
    Run {
        /// Instrument configuration (TOML, RUST_ACQ_* env overrides)
        config: PathBuf,

        #[command(flatten)]
        link: LinkArgs,

        /// Start raw/product logging right after connecting
        #[arg(long)]
        log: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print incoming bytes as text to try interface settings
    Probe {
        #[command(flatten)]
        link: LinkArgs,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[derive(Args)]
struct LinkArgs {
    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    #[arg(long, conflicts_with = "host")]
    port: Option<String>,

    /// Baud rate (default depends on the instrument kind)
    #[arg(long)]
    baud: Option<u32>,

    /// none, even, odd, mark or space
    #[arg(long, default_value = "none")]
    parity: Parity,

    #[arg(long, default_value_t = 8)]
    byte_size: u8,

    #[arg(long, default_value_t = 1)]
    stop_bits: u8,

    /// TCP host
    #[arg(long, requires = "tcp_port")]
    host: Option<String>,

    #[arg(long)]
    tcp_port: Option<u16>,

    /// Read timeout in seconds (default depends on the instrument kind)
    #[arg(long)]
    timeout: Option<f64>,
}

impl LinkArgs {
    fn params(&self, kind: InstrumentKind) -> Result<TransportParams> {
        let (default_baud, default_timeout) = kind.default_serial();
        let timeout = match self.timeout {
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            Some(secs) => bail!("invalid timeout {secs}"),
            None => default_timeout,
        };
        if let (Some(host), Some(port)) = (&self.host, self.tcp_port) {
            return Ok(TransportParams::Socket(SocketParams {
                host: host.clone(),
                port,
                timeout,
            }));
        }
        let Some(port) = &self.port else {
            bail!("either --port or --host/--tcp-port is required");
        };
        let mut params = SerialParams::new(port.clone(), self.baud.unwrap_or(default_baud), timeout);
        params.parity = self.parity;
        params.byte_size = self.byte_size;
        params.stop_bits = self.stop_bits;
        Ok(TransportParams::Serial(params))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_setup::init(
        TracingConfig::parse(&cli.log_level, &cli.log_format).map_err(anyhow::Error::msg)?,
    )
    .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run {
            config,
            link,
            log,
            json,
        } => run(config, link, log, json).await,
        Commands::Probe { link, duration } => probe(link, duration).await,
    }
}

async fn run(config: PathBuf, link: LinkArgs, log: bool, json: bool) -> Result<()> {
    let raw = RawConfig::load_from(&config)
        .with_context(|| format!("loading {}", config.display()))?;
    let instrument = Instrument::from_raw(raw)?;
    let params = link.params(instrument.config().kind)?;
    // A command waits for the read in progress.
    let mut instrument =
        instrument.with_command_timeout(params.read_timeout() + DEFAULT_COMMAND_TIMEOUT);
    let mut events = instrument.subscribe();

    info!(instrument = %instrument.config().name(), endpoint = %params, "Connecting");
    instrument.open(&params)?;
    if log {
        instrument.log_start()?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, json)?;
                    if matches!(event, InstrumentEvent::Status(Status::Disconnected)) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event printer lagging"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing instrument");
                break;
            }
        }
    }

    instrument.close();
    let counters = instrument.counters();
    info!(
        received = counters.received,
        corrupted = counters.corrupted,
        logged = counters.logged,
        noise_bytes = counters.noise_bytes,
        "Session finished"
    );
    Ok(())
}

fn print_event(event: &InstrumentEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        // Per-packet notifications are summarized by the counters.
        InstrumentEvent::PacketReceived
        | InstrumentEvent::PacketCorrupted
        | InstrumentEvent::PacketLogged => {}
        InstrumentEvent::Data {
            record, timestamp, ..
        } => {
            let values: Vec<String> = record.values.iter().map(ToString::to_string).collect();
            println!("{} {}", timestamp.format("%H:%M:%S%.3f"), values.join(", "));
        }
        InstrumentEvent::AuxData(aux) => {
            for (label, value) in aux {
                println!("  {label}: {value}");
            }
        }
        InstrumentEvent::Status(status) => println!("status: {status}"),
        InstrumentEvent::ActiveChannels(names) => println!("channels: {}", names.join(", ")),
        InstrumentEvent::Alarm(true) => println!("ALARM: no data received"),
        InstrumentEvent::Alarm(false) => println!("alarm cleared"),
        InstrumentEvent::LogFile { stream, path } => match path {
            Some(path) => println!("{stream:?} log: {}", path.display()),
            None => println!("{stream:?} log closed"),
        },
        InstrumentEvent::TransportFailure(message) => println!("transport failure: {message}"),
    }
    Ok(())
}

async fn probe(link: LinkArgs, duration: Option<u64>) -> Result<()> {
    let params = link.params(InstrumentKind::Generic)?;
    let (mut probe, events) = ConnectionProbe::new();
    probe.start(params)?;

    tokio::task::spawn_blocking(move || {
        for event in events {
            match event {
                ProbeEvent::Text(text) => print!("{text}"),
                ProbeEvent::Status(ProbeStatus::Failed(message)) => eprintln!("failed: {message}"),
                ProbeEvent::Status(status) => eprintln!("probe: {status:?}"),
            }
        }
    });

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }
    let stopped = probe.shutdown();
    info!(?stopped, "Probe stopped");
    Ok(())
}
