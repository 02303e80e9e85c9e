//! CLI Entry Point for scale_daq
//!
//! Provides command-line interface for:
//! - Listing serial ports
//! - Monitoring a scale interactively (tare, target, calibration, save)
//! - Replaying a raw capture through the framer and classifier
//! - Simulating a scale in memory
//!
//! # Usage
//!
//! ```bash
//! scale_daq ports
//! scale_daq monitor --port /dev/ttyUSB0
//! scale_daq replay capture.bin
//! scale_daq simulate --cadence-ms 500
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scale_daq::config::{ScaleConfig, DEFAULT_CONFIG_PATH};
use scale_daq::hardware::{available_ports, Connector, EmulatorConfig, MockScale};
use scale_daq::protocol::{Classification, LineClassifier, LineFramer};
use scale_daq::session::{ScaleSession, SessionEvent};
use scale_daq::storage::MemoryStore;
use scale_daq::tracing_setup;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "scale_daq")]
#[command(about = "Serial weighing scale reader with calibration handshake", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Connect to a scale and accept operator commands on stdin
    Monitor {
        /// Serial port, overrides `serial.port`
        #[arg(long)]
        port: Option<String>,

        /// Baud rate, overrides `serial.baud_rate`
        #[arg(long)]
        baud: Option<u32>,
    },

    /// Classify every line of a raw capture file
    Replay {
        /// Raw bytes as read from the serial port
        capture: PathBuf,
    },

    /// Run a session against an in-memory scale
    Simulate {
        /// Interval between readings in milliseconds
        #[arg(long, default_value = "2000")]
        cadence_ms: u64,

        /// Skip the calibration dialogue
        #[arg(long)]
        no_calibration: bool,

        /// Gross load on the simulated platform in kg
        #[arg(long, default_value = "12.0")]
        load_kg: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScaleConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing_setup::init(&config)?;

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Monitor { port, baud } => monitor(config, port, baud).await,
        Commands::Replay { capture } => replay(&config, capture).await,
        Commands::Simulate {
            cadence_ms,
            no_calibration,
            load_kg,
        } => simulate(config, cadence_ms, no_calibration, load_kg).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<24} {}", port.name, port.description);
    }
    Ok(())
}

#[cfg(feature = "tokio_serial")]
async fn monitor(mut config: ScaleConfig, port: Option<String>, baud: Option<u32>) -> Result<()> {
    use scale_daq::hardware::SerialConnector;

    if let Some(port) = port {
        config.serial.port = port;
    }
    if let Some(baud) = baud {
        config.serial.baud_rate = baud;
    }
    let connector = SerialConnector::from_config(&config.serial);
    let session = ScaleSession::new(config);
    run_interactive(&session, &connector).await
}

#[cfg(not(feature = "tokio_serial"))]
async fn monitor(_config: ScaleConfig, _port: Option<String>, _baud: Option<u32>) -> Result<()> {
    anyhow::bail!("monitor requires the 'tokio_serial' feature")
}

async fn simulate(config: ScaleConfig, cadence_ms: u64, no_calibration: bool, load_kg: f64) -> Result<()> {
    let (scale, connector) = MockScale::pair();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let emulator = EmulatorConfig {
        cadence: Duration::from_millis(cadence_ms.max(1)),
        calibrate_first: !no_calibration,
        load_kg,
        ..Default::default()
    };
    let firmware = tokio::spawn(scale.run_emulator(emulator, stop_rx));

    let session = ScaleSession::new(config);
    let result = run_interactive(&session, &connector).await;

    let _ = stop_tx.send(());
    match firmware.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "Simulated scale stopped with an error"),
        Err(e) => tracing::warn!(error = %e, "Simulated scale task failed"),
        Ok(Ok(())) => {}
    }
    result
}

async fn replay(config: &ScaleConfig, capture: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&capture)
        .await
        .with_context(|| format!("Failed to read capture {}", capture.display()))?;

    let mut framer = LineFramer::with_max_line_bytes(config.serial.max_line_bytes);
    let classifier = LineClassifier::new(config.protocol.clone());
    let mut number = 0usize;

    for chunk in bytes.chunks(config.serial.read_chunk_size.max(1)) {
        for line in framer.push(chunk) {
            number += 1;
            println!("{:>5}  {}", number, describe(&classifier.classify(&line), &line));
        }
    }
    if !framer.remainder().is_empty() {
        println!("       (unterminated: {:?})", framer.remainder());
    }
    Ok(())
}

fn describe(classification: &Classification, line: &str) -> String {
    match classification {
        Classification::Noise => format!("noise        {line:?}"),
        Classification::Heartbeat => format!("heartbeat    {line}"),
        Classification::CalibrationPrompt { kind, text } => format!("prompt       awaiting {kind}: {text}"),
        Classification::CalibrationDone => "calibrated".to_string(),
        Classification::Measurement(record) => format!(
            "measurement  {:.3} kg target={} diff={} ({:?})",
            record.current_weight,
            fmt_kg(record.target_weight),
            fmt_kg(record.difference),
            record.format
        ),
    }
}

fn fmt_kg(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

/// Operator command typed on stdin.
#[derive(Debug, PartialEq)]
enum Action {
    Tare,
    Target(f64),
    Reference(f64),
    Confirm,
    Sack(String),
    Factory(String),
    Save,
    Status,
    Help,
    Quit,
}

fn parse_action(input: &str) -> std::result::Result<Action, String> {
    let mut parts = input.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or_default().to_lowercase();
    let rest = parts.next().unwrap_or_default().trim();

    let number = |what: &str| {
        rest.replace(',', ".")
            .parse::<f64>()
            .map_err(|_| format!("{what} needs a number, got '{rest}'"))
    };

    match verb.as_str() {
        "tare" => Ok(Action::Tare),
        "target" => number("target").map(Action::Target),
        "ref" => number("ref").map(Action::Reference),
        "ok" => Ok(Action::Confirm),
        "sack" => Ok(Action::Sack(rest.to_string())),
        "factory" => Ok(Action::Factory(rest.to_string())),
        "save" => Ok(Action::Save),
        "status" => Ok(Action::Status),
        "help" | "?" => Ok(Action::Help),
        "quit" | "exit" => Ok(Action::Quit),
        other => Err(format!("unknown command '{other}', type 'help'")),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  tare             zero the scale");
    println!("  target <kg>      set the target weight");
    println!("  ref <kg>         answer a reference-weight prompt");
    println!("  ok               answer a confirmation prompt");
    println!("  sack <code>      set the sack code");
    println!("  factory <id>     select the factory");
    println!("  save             save the current weighing");
    println!("  status           print the current reading");
    println!("  quit             disconnect and exit");
}

async fn run_interactive(session: &ScaleSession, connector: &dyn Connector) -> Result<()> {
    let store = MemoryStore::new();
    let mut events = session.subscribe();
    session.connect(connector).await?;

    print_help();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event display fell behind"),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_action(line) {
                    Ok(Action::Quit) => break,
                    Ok(action) => {
                        if let Err(e) = execute(action, session, &store).await {
                            eprintln!("❌ {e}");
                        }
                    }
                    Err(message) => eprintln!("❌ {message}"),
                }
            }
        }
    }

    session.disconnect().await?;
    println!("👋 Disconnected");
    Ok(())
}

async fn execute(action: Action, session: &ScaleSession, store: &MemoryStore) -> Result<()> {
    match action {
        Action::Tare => session.tare().await?,
        Action::Target(kg) => session.set_target(kg).await?,
        Action::Reference(kg) => session.submit_reference_weight(kg).await?,
        Action::Confirm => session.submit_confirmation().await?,
        Action::Sack(code) => session.set_sack_code(code).await?,
        Action::Factory(id) => session.select_factory(id).await?,
        Action::Save => {
            let weighing = session.confirm_and_save(store).await?;
            println!(
                "💾 Saved {} ({}) {:.3} kg [{}]",
                weighing.code, weighing.factory_id, weighing.actual_weight, weighing.status
            );
            #[cfg(feature = "storage_csv")]
            {
                if let Some(path) = &session.config().storage.csv_backup {
                    scale_daq::storage::CsvBackup::new(path)
                        .append_async(weighing)
                        .await?;
                }
            }
        }
        Action::Status => {
            let s = session.snapshot();
            println!(
                "{} | {:.3} kg target={} diff={} {} | sack='{}' factory={} | fresh={}",
                s.status,
                s.current_weight,
                fmt_kg(s.target_weight),
                fmt_kg(s.difference),
                s.verdict,
                s.sack_code,
                s.factory_id.as_deref().unwrap_or("-"),
                s.data_fresh
            );
        }
        Action::Help => print_help(),
        Action::Quit => {}
    }
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Measurement(record) => println!(
            "⚖️  {:.3} kg target={} diff={}",
            record.current_weight,
            fmt_kg(record.target_weight),
            fmt_kg(record.difference)
        ),
        SessionEvent::Calibration(state) => match state.awaiting() {
            Some(kind) => println!(
                "🔧 Scale is asking for {kind}: {}",
                state.prompt().unwrap_or_default()
            ),
            None => println!("🔧 Calibration idle"),
        },
        SessionEvent::Status(status) => println!("🔌 {status}"),
        SessionEvent::Heartbeat | SessionEvent::Noise(_) => {}
    }
}
