//! Scale session.
//!
//! [`ScaleSession`] is the handle an operator interface talks to. It connects
//! through a [`Connector`], spawns the session loop, and forwards operator
//! actions to it. State is published two ways:
//!
//! - a `watch` channel holding the latest [`SessionSnapshot`] (polled by UIs)
//! - a `broadcast` channel of [`SessionEvent`]s in arrival order
//!
//! # Example
//!
//! ```rust,ignore
//! let session = ScaleSession::new(ScaleConfig::load()?);
//! session.connect(&SerialConnector::from_config(&config.serial)).await?;
//!
//! let mut snapshots = session.watch();
//! while snapshots.changed().await.is_ok() {
//!     let snapshot = snapshots.borrow().clone();
//!     println!("{:.3} kg ({})", snapshot.current_weight, snapshot.verdict);
//! }
//! ```
//!
//! Between connections the sink is parked inside the handle, so the operator's
//! sack code and factory selection survive a reconnect.

mod actor;
mod snapshot;

pub use snapshot::{ConnectionStatus, SessionEvent, SessionSnapshot};

use crate::calibration::CalibrationState;
use crate::config::ScaleConfig;
use crate::error::{ScaleError, ScaleResult};
use crate::hardware::Connector;
use crate::measurement::MeasurementSink;
use crate::protocol::DeviceCommand;
use crate::storage::{RecordStore, SackWeighing};
use actor::{DeviceAction, Request, SessionActor, SinkEdit};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

const REQUEST_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct Running {
    requests: mpsc::Sender<Request>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<MeasurementSink>,
}

/// Exactly one of `parked` and `running` is populated.
struct Link {
    parked: Option<MeasurementSink>,
    running: Option<Running>,
    /// The last loop was stopped by `disconnect`
    closed_by_operator: bool,
}

/// Handle to a scale session.
pub struct ScaleSession {
    config: Arc<ScaleConfig>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    events_tx: broadcast::Sender<SessionEvent>,
    link: Mutex<Link>,
}

impl ScaleSession {
    /// Create a disconnected session.
    pub fn new(config: ScaleConfig) -> Self {
        let sink = MeasurementSink::new(&config.measurement);
        let initial = SessionSnapshot::capture(
            ConnectionStatus::Disconnected,
            CalibrationState::Idle,
            &sink,
        );
        let (snapshot_tx, _) = watch::channel(initial);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: Arc::new(config),
            snapshot_tx: Arc::new(snapshot_tx),
            events_tx,
            link: Mutex::new(Link {
                parked: Some(sink),
                running: None,
                closed_by_operator: false,
            }),
        }
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.config
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Receiver of subsequent session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Open the transport and start the session loop.
    ///
    /// Connecting while a loop is already running is a no-op. If the
    /// transport cannot be opened the status becomes `Error` and a
    /// `Transport` error is returned.
    pub async fn connect(&self, connector: &dyn Connector) -> ScaleResult<()> {
        let mut link = self.link.lock().await;
        Self::reclaim_finished(&mut link, &self.config).await;
        if link.running.is_some() {
            tracing::warn!("Scale session is already connected");
            return Ok(());
        }

        let target = connector.describe();
        tracing::info!(target = %target, "Connecting to scale");
        self.announce(&link, ConnectionStatus::Connecting);

        let io = match connector.open().await {
            Ok(io) => io,
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(target = %target, error = %message, "Failed to open scale transport");
                self.announce(&link, ConnectionStatus::Error(message.clone()));
                return Err(ScaleError::Transport(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    message,
                )));
            }
        };

        let mut sink = link
            .parked
            .take()
            .unwrap_or_else(|| MeasurementSink::new(&self.config.measurement));
        sink.mark_stale();

        let (requests, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let actor = SessionActor::new(
            Arc::clone(&self.config),
            sink,
            Arc::clone(&self.snapshot_tx),
            self.events_tx.clone(),
        );
        let task = tokio::spawn(actor.run(io, requests_rx, shutdown_rx));

        link.running = Some(Running {
            requests,
            shutdown_tx: Some(shutdown_tx),
            task,
        });
        link.closed_by_operator = false;
        tracing::info!(target = %target, "Scale session started");
        Ok(())
    }

    /// Stop the session loop and wait for it to release the transport.
    /// Safe to call at any time, any number of times. Device commands issued
    /// afterwards fail with `TransportClosed` until the next `connect`.
    pub async fn disconnect(&self) -> ScaleResult<()> {
        let mut link = self.link.lock().await;
        if let Some(mut running) = link.running.take() {
            let was_live = !running.task.is_finished();
            if let Some(shutdown_tx) = running.shutdown_tx.take() {
                let _ = shutdown_tx.send(());
            }
            link.parked = Some(Self::join(running.task, &self.config).await);
            link.closed_by_operator = was_live;
        }
        Ok(())
    }

    /// Whether a session loop is currently running.
    pub async fn is_running(&self) -> bool {
        let mut link = self.link.lock().await;
        Self::reclaim_finished(&mut link, &self.config).await;
        link.running.is_some()
    }

    /// Send `TARE`. On success the displayed weight and difference are zeroed.
    pub async fn tare(&self) -> ScaleResult<()> {
        self.device_request(DeviceAction::Tare).await
    }

    /// Send `OBJ:<kg>` and adopt it as the local target.
    pub async fn set_target(&self, kg: f64) -> ScaleResult<()> {
        DeviceCommand::set_target(kg)?;
        self.device_request(DeviceAction::SetTarget(kg)).await
    }

    /// Answer the pending reference-weight prompt.
    pub async fn submit_reference_weight(&self, kg: f64) -> ScaleResult<()> {
        self.device_request(DeviceAction::ReferenceWeight(kg)).await
    }

    /// Answer the pending confirmation prompt with `ok`.
    pub async fn submit_confirmation(&self) -> ScaleResult<()> {
        self.device_request(DeviceAction::Confirm).await
    }

    /// Set the operator's sack code. Works while disconnected.
    pub async fn set_sack_code(&self, code: impl Into<String>) -> ScaleResult<()> {
        let code = code.into();
        self.edit_sink(Box::new(move |sink| sink.set_sack_code(code))).await
    }

    pub async fn clear_sack_code(&self) -> ScaleResult<()> {
        self.edit_sink(Box::new(|sink| sink.clear_sack_code())).await
    }

    /// Select the factory for the next weighings; blank clears the selection.
    pub async fn select_factory(&self, factory_id: impl Into<String>) -> ScaleResult<()> {
        let factory_id = factory_id.into();
        self.edit_sink(Box::new(move |sink| sink.select_factory(Some(factory_id))))
            .await
    }

    /// Package the current reading into a `sacos` row and insert it.
    ///
    /// On success the operator's sack code is cleared for the next sack.
    pub async fn confirm_and_save(&self, store: &dyn RecordStore) -> ScaleResult<SackWeighing> {
        let snapshot = self.snapshot();
        let weighing = SackWeighing::from_snapshot(&snapshot, Utc::now())?;
        let record = serde_json::to_value(&weighing)
            .map_err(|e| ScaleError::Storage(format!("failed to encode weighing: {e}")))?;

        store.insert(&self.config.storage.table, record).await?;
        tracing::info!(
            code = %weighing.code,
            factory = %weighing.factory_id,
            weight_kg = weighing.actual_weight,
            estado = %weighing.status,
            "Weighing saved"
        );

        self.clear_sack_code().await?;
        Ok(weighing)
    }

    async fn device_request(&self, action: DeviceAction) -> ScaleResult<()> {
        let requests = {
            let mut link = self.link.lock().await;
            Self::reclaim_finished(&mut link, &self.config).await;
            match &link.running {
                Some(running) => running.requests.clone(),
                None if link.closed_by_operator => return Err(ScaleError::TransportClosed),
                None => return Err(ScaleError::NotConnected),
            }
        };

        let (reply, reply_rx) = oneshot::channel();
        requests
            .send(Request::Device { action, reply })
            .await
            .map_err(|_| ScaleError::NotConnected)?;
        reply_rx.await.map_err(|_| ScaleError::NotConnected)?
    }

    async fn edit_sink(&self, edit: SinkEdit) -> ScaleResult<()> {
        let mut link = self.link.lock().await;
        Self::reclaim_finished(&mut link, &self.config).await;

        let edit = match &link.running {
            Some(running) => {
                let (reply, reply_rx) = oneshot::channel();
                match running.requests.send(Request::EditSink { edit, reply }).await {
                    Ok(()) => {
                        if reply_rx.await.is_ok() {
                            return Ok(());
                        }
                        // The loop exited before applying the edit; the
                        // request and its edit were dropped with it.
                        return Err(ScaleError::NotConnected);
                    }
                    Err(mpsc::error::SendError(Request::EditSink { edit, .. })) => edit,
                    Err(_) => return Err(ScaleError::NotConnected),
                }
            }
            None => edit,
        };

        // The loop has exited: apply to the parked sink.
        if let Some(running) = link.running.take() {
            link.parked = Some(Self::join(running.task, &self.config).await);
        }
        let status = self.snapshot_tx.borrow().status.clone();
        if let Some(sink) = link.parked.as_mut() {
            edit(sink);
        }
        self.publish_parked(&link, status);
        Ok(())
    }

    async fn reclaim_finished(link: &mut Link, config: &ScaleConfig) {
        let finished = link
            .running
            .as_ref()
            .is_some_and(|running| running.task.is_finished());
        if finished {
            if let Some(running) = link.running.take() {
                link.parked = Some(Self::join(running.task, config).await);
            }
        }
    }

    async fn join(task: JoinHandle<MeasurementSink>, config: &ScaleConfig) -> MeasurementSink {
        match task.await {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(error = %e, "Scale session task did not finish cleanly");
                MeasurementSink::new(&config.measurement)
            }
        }
    }

    fn announce(&self, link: &Link, status: ConnectionStatus) {
        let _ = self.events_tx.send(SessionEvent::Status(status.clone()));
        self.publish_parked(link, status);
    }

    fn publish_parked(&self, link: &Link, status: ConnectionStatus) {
        if let Some(sink) = &link.parked {
            self.snapshot_tx.send_replace(SessionSnapshot::capture(
                status,
                CalibrationState::Idle,
                sink,
            ));
        }
    }
}
