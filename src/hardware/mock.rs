//! Mock Scale
//!
//! In-memory stand-in for the serial scale, built on `tokio::io::duplex`.
//! [`MockScale::pair`] returns the device end as a [`MockScale`] and a
//! [`MockConnector`] that hands the host end to a session.
//!
//! Tests drive the device end directly with [`MockScale::send_line`] and
//! [`MockScale::read_command`]. The `simulate` command runs
//! [`MockScale::run_emulator`], which behaves like the stock firmware:
//! a calibration dialogue, periodic JSON readings, heartbeats, and replies to
//! `TARE` and `OBJ:` commands.

use super::serial::{Connector, DynSerial};
use async_trait::async_trait;
use serde_json::json;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};

const DUPLEX_CAPACITY: usize = 4096;

/// Hands the host end of a [`MockScale`] to one session.
pub struct MockConnector {
    host: Mutex<Option<DuplexStream>>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> anyhow::Result<DynSerial> {
        match self.host.lock().await.take() {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(anyhow::anyhow!("mock scale is already connected")),
        }
    }

    fn describe(&self) -> String {
        "mock scale".to_string()
    }
}

/// Device end of an in-memory scale link.
pub struct MockScale {
    commands: Lines<BufReader<ReadHalf<DuplexStream>>>,
    output: WriteHalf<DuplexStream>,
}

impl MockScale {
    /// Create a connected device end and connector.
    pub fn pair() -> (MockScale, MockConnector) {
        let (host, device) = tokio::io::duplex(DUPLEX_CAPACITY);
        let (read, write) = tokio::io::split(device);
        let scale = MockScale {
            commands: BufReader::new(read).lines(),
            output: write,
        };
        let connector = MockConnector {
            host: Mutex::new(Some(host)),
        };
        (scale, connector)
    }

    /// Write one line followed by `\n`.
    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.output.write_all(line.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await
    }

    /// Write raw bytes with no terminator added.
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.write_all(bytes).await?;
        self.output.flush().await
    }

    /// Next command written by the host, without its terminator.
    /// `None` once the host closed the link.
    pub async fn read_command(&mut self) -> io::Result<Option<String>> {
        Ok(self
            .commands
            .next_line()
            .await?
            .map(|line| line.trim_end_matches('\r').to_string()))
    }

    /// Run a firmware emulation until `shutdown` fires or the host goes away.
    pub async fn run_emulator(
        mut self,
        config: EmulatorConfig,
        mut shutdown: oneshot::Receiver<()>,
    ) -> io::Result<()> {
        let mut firmware = Firmware::new(config);
        self.send_line("Arduino listo.").await?;
        if firmware.config.calibrate_first {
            self.send_line("Por favor ingrese el peso conocido (kg):").await?;
        }

        let mut ticker = tokio::time::interval(firmware.config.cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                command = self.commands.next_line() => {
                    let Some(command) = command? else {
                        tracing::debug!("Host closed the mock link");
                        break;
                    };
                    for reply in firmware.handle(command.trim()) {
                        self.send_line(&reply).await?;
                    }
                }
                _ = ticker.tick() => {
                    if let Some(line) = firmware.tick() {
                        self.send_line(&line).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Behavior of the emulated firmware.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Interval between readings
    pub cadence: Duration,
    /// Start with the reference-weight calibration dialogue
    pub calibrate_first: bool,
    /// Gross load on the platform in kilograms
    pub load_kg: f64,
    /// Sack code reported with each reading
    pub sack_code: Option<String>,
    /// Factory label reported with each reading
    pub factory: String,
    /// A heartbeat is sent instead of a reading every this many ticks
    pub heartbeat_every: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(2),
            calibrate_first: true,
            load_kg: 12.0,
            sack_code: None,
            factory: "Planta Demo".to_string(),
            heartbeat_every: 5,
        }
    }
}

#[derive(Debug, PartialEq)]
enum CalibrationStep {
    AwaitingReference,
    AwaitingOk,
    Done,
}

struct Firmware {
    config: EmulatorConfig,
    step: CalibrationStep,
    tare_offset: f64,
    target: f64,
    ticks: u64,
}

impl Firmware {
    fn new(config: EmulatorConfig) -> Self {
        let step = if config.calibrate_first {
            CalibrationStep::AwaitingReference
        } else {
            CalibrationStep::Done
        };
        Self {
            config,
            step,
            tare_offset: 0.0,
            target: 0.0,
            ticks: 0,
        }
    }

    fn gross(&self) -> f64 {
        // Small deterministic wobble so the chart moves.
        self.config.load_kg + (self.ticks as f64 * 0.7).sin() * 0.004
    }

    fn handle(&mut self, command: &str) -> Vec<String> {
        match self.step {
            CalibrationStep::AwaitingReference => {
                return match command.parse::<f64>() {
                    Ok(kg) if kg > 0.0 => {
                        self.step = CalibrationStep::AwaitingOk;
                        vec![format!("Referencia {kg:.3} kg. Coloque el peso y escriba ok")]
                    }
                    _ => vec!["Valor invalido. Ingrese el peso conocido:".to_string()],
                };
            }
            CalibrationStep::AwaitingOk => {
                if command.eq_ignore_ascii_case("ok") {
                    self.step = CalibrationStep::Done;
                    return vec![
                        "Calibración completa".to_string(),
                        "Iniciando pesaje".to_string(),
                    ];
                }
                return vec!["Escriba ok para continuar".to_string()];
            }
            CalibrationStep::Done => {}
        }

        if command == "TARE" {
            self.tare_offset = self.gross();
            return vec!["Tara realizada".to_string()];
        }
        if let Some(value) = command.strip_prefix("OBJ:") {
            if let Ok(kg) = value.trim().parse::<f64>() {
                self.target = kg;
                return vec![format!("Nuevo objetivo: {kg:.3}")];
            }
        }
        vec![format!("MENU: comando desconocido '{command}'")]
    }

    fn tick(&mut self) -> Option<String> {
        self.ticks += 1;
        if self.step != CalibrationStep::Done {
            return None;
        }
        if self.config.heartbeat_every > 0 && self.ticks % self.config.heartbeat_every == 0 {
            return Some("HEARTBEAT".to_string());
        }

        let net = self.gross() - self.tare_offset;
        let difference = if self.target > 0.0 { net - self.target } else { 0.0 };
        let record = json!({
            "peso": round3(net),
            "objetivo": round3(self.target),
            "diferencia": round3(difference),
            "codigo_saco": self.config.sack_code.clone().unwrap_or_else(|| "SIN-CODIGO".to_string()),
            "fabrica": self.config.factory,
            "timestamp": self.ticks * self.config.cadence.as_millis() as u64,
        });
        Some(record.to_string())
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
