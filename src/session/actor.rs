//! The session loop.
//!
//! One task per connection owns the framer, classifier, calibration machine
//! and sink. It waits on four things at once: the next chunk from the
//! transport, a request from the handle, the shutdown signal, and the
//! freshness timer. Chunks are processed to completion before the next read
//! is issued, so lines are handled strictly in arrival order.

use super::snapshot::{ConnectionStatus, SessionEvent, SessionSnapshot};
use crate::calibration::{CalibrationMachine, CalibrationState};
use crate::config::ScaleConfig;
use crate::error::{ScaleError, ScaleResult};
use crate::hardware::DynSerial;
use crate::measurement::MeasurementSink;
use crate::protocol::{Classification, DeviceCommand, LineClassifier, LineFramer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

/// A command write that has not completed after this long fails the session.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Sink edit applied inside the session task.
pub(crate) type SinkEdit = Box<dyn FnOnce(&mut MeasurementSink) + Send>;

/// Operator actions that write to the device.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DeviceAction {
    Tare,
    SetTarget(f64),
    ReferenceWeight(f64),
    Confirm,
}

pub(crate) enum Request {
    Device {
        action: DeviceAction,
        reply: oneshot::Sender<ScaleResult<()>>,
    },
    EditSink {
        edit: SinkEdit,
        reply: oneshot::Sender<()>,
    },
}

enum Exit {
    Cancelled,
    EndOfStream,
    Failed(ScaleError),
}

pub(crate) struct SessionActor {
    config: Arc<ScaleConfig>,
    framer: LineFramer,
    classifier: LineClassifier,
    calibration: CalibrationMachine,
    sink: MeasurementSink,
    status: ConnectionStatus,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionActor {
    pub(crate) fn new(
        config: Arc<ScaleConfig>,
        sink: MeasurementSink,
        snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
        events_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            framer: LineFramer::with_max_line_bytes(config.serial.max_line_bytes),
            classifier: LineClassifier::new(config.protocol.clone()),
            calibration: CalibrationMachine::new(),
            sink,
            status: ConnectionStatus::Connecting,
            snapshot_tx,
            events_tx,
            config,
        }
    }

    /// Run until cancelled, end of stream, or a transport failure. Hands the
    /// sink back so operator fields survive a reconnect.
    pub(crate) async fn run(
        mut self,
        io: DynSerial,
        mut requests: mpsc::Receiver<Request>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> MeasurementSink {
        let (mut reader, mut writer) = tokio::io::split(io);
        let mut chunk = vec![0u8; self.config.serial.read_chunk_size.max(1)];

        let mut freshness = tokio::time::interval(self.config.measurement.freshness_check_interval());
        freshness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.set_status(ConnectionStatus::Connected);

        let exit = loop {
            tokio::select! {
                _ = &mut shutdown_rx => break Exit::Cancelled,
                request = requests.recv() => match request {
                    Some(request) => {
                        if let Err(e) = self.handle_request(request, &mut writer).await {
                            break Exit::Failed(e);
                        }
                    }
                    None => break Exit::Cancelled,
                },
                _ = freshness.tick() => {
                    if self.sink.check_freshness(Instant::now()) {
                        self.publish();
                    }
                }
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => break Exit::EndOfStream,
                    Ok(n) => self.process_chunk(&chunk[..n]),
                    Err(e) => break Exit::Failed(ScaleError::Transport(e)),
                },
            }
        };

        // Release the transport before reporting the final status.
        let _ = writer.shutdown().await;
        drop(writer);
        drop(reader);
        requests.close();

        if !self.framer.remainder().is_empty() {
            tracing::debug!(fragment = %self.framer.remainder(), "Discarding unterminated fragment");
        }
        self.framer.reset();
        self.calibration = CalibrationMachine::new();
        self.sink.mark_stale();

        let status = match exit {
            Exit::Cancelled => {
                tracing::info!("Scale session disconnected");
                ConnectionStatus::Disconnected
            }
            Exit::EndOfStream => {
                tracing::info!("Device closed the connection");
                ConnectionStatus::Disconnected
            }
            Exit::Failed(e) => {
                tracing::error!(error = %e, "Scale session failed");
                ConnectionStatus::Error(e.to_string())
            }
        };
        self.set_status(status);
        self.sink
    }

    fn process_chunk(&mut self, bytes: &[u8]) {
        let lines = self.framer.push(bytes);
        if lines.is_empty() {
            return;
        }
        let mut changed = false;
        for line in lines {
            changed |= self.process_line(&line);
        }
        if changed {
            self.publish();
        }
    }

    /// Route one line. Returns `true` if published state changed.
    fn process_line(&mut self, line: &str) -> bool {
        match self.classifier.classify(line) {
            Classification::Noise => {
                self.emit(SessionEvent::Noise(line.to_string()));
                false
            }
            Classification::Heartbeat => {
                self.emit(SessionEvent::Heartbeat);
                false
            }
            Classification::CalibrationPrompt { kind, text } => {
                let changed = self.calibration.on_prompt(kind, text);
                if changed {
                    self.emit(SessionEvent::Calibration(self.calibration.state().clone()));
                }
                changed
            }
            Classification::CalibrationDone => {
                let changed = self.calibration.on_done();
                if changed {
                    self.emit(SessionEvent::Calibration(CalibrationState::Idle));
                }
                changed
            }
            Classification::Measurement(record) => {
                let record = self.sink.accept(record);
                self.emit(SessionEvent::Measurement(record));
                true
            }
        }
    }

    /// Serve one request. Only a transport failure is returned as an error;
    /// everything else is answered on the reply channel.
    async fn handle_request(
        &mut self,
        request: Request,
        writer: &mut WriteHalf<DynSerial>,
    ) -> ScaleResult<()> {
        match request {
            Request::EditSink { edit, reply } => {
                edit(&mut self.sink);
                self.publish();
                let _ = reply.send(());
                Ok(())
            }
            Request::Device { action, reply } => match self.perform(action, writer).await {
                Err(ScaleError::Transport(e)) => {
                    let _ = reply.send(Err(ScaleError::Transport(std::io::Error::new(
                        e.kind(),
                        e.to_string(),
                    ))));
                    Err(ScaleError::Transport(e))
                }
                result => {
                    let _ = reply.send(result);
                    Ok(())
                }
            },
        }
    }

    async fn perform(
        &mut self,
        action: DeviceAction,
        writer: &mut WriteHalf<DynSerial>,
    ) -> ScaleResult<()> {
        match action {
            DeviceAction::Tare => {
                self.write_command(writer, DeviceCommand::Tare).await?;
                self.sink.apply_tare();
            }
            DeviceAction::SetTarget(kg) => {
                let command = DeviceCommand::set_target(kg)?;
                self.write_command(writer, command).await?;
                self.sink.set_target_weight(kg);
            }
            DeviceAction::ReferenceWeight(kg) => {
                let before = self.calibration.state().clone();
                let command = self.calibration.submit_reference_weight(kg)?;
                if let Err(e) = self.write_command(writer, command).await {
                    self.calibration.restore(before);
                    return Err(e);
                }
                self.emit(SessionEvent::Calibration(CalibrationState::Idle));
            }
            DeviceAction::Confirm => {
                let before = self.calibration.state().clone();
                let command = self.calibration.submit_confirmation()?;
                if let Err(e) = self.write_command(writer, command).await {
                    self.calibration.restore(before);
                    return Err(e);
                }
                self.emit(SessionEvent::Calibration(CalibrationState::Idle));
            }
        }
        self.publish();
        Ok(())
    }

    async fn write_command(
        &self,
        writer: &mut WriteHalf<DynSerial>,
        command: DeviceCommand,
    ) -> ScaleResult<()> {
        let bytes = command.to_wire(&self.config.serial.command_terminator);
        let write = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => {
                tracing::info!(command = %command, "Command sent to scale");
                Ok(())
            }
            Ok(Err(e)) => Err(ScaleError::Transport(e)),
            Err(_) => Err(ScaleError::Transport(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("writing '{command}' timed out after {WRITE_TIMEOUT:?}"),
            ))),
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status.clone();
        self.emit(SessionEvent::Status(status));
        self.publish();
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events_tx.send(event);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot::capture(
            self.status.clone(),
            self.calibration.state().clone(),
            &self.sink,
        ));
    }
}
