//! End-to-end session tests against the in-memory scale.
//!
//! Each test connects a `ScaleSession` to `MockScale::pair()` and drives the
//! device end by hand.

use async_trait::async_trait;
use scale_daq::hardware::{Connector, DynSerial, MockScale};
use scale_daq::measurement::ToleranceVerdict;
use scale_daq::storage::{Filter, MemoryStore, RecordStore, SACOS_TABLE};
use scale_daq::{
    CalibrationState, ConnectionStatus, ScaleConfig, ScaleError, ScaleSession, SessionEvent,
    SessionSnapshot,
};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

async fn wait_for<F>(session: &ScaleSession, mut predicate: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut rx = session.watch();
    let snapshot = timeout(WAIT, rx.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for snapshot")
        .expect("session dropped")
        .clone();
    snapshot
}

/// Next event that is not a status change.
async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if !matches!(event, SessionEvent::Status(_)) {
            return event;
        }
    }
}

async fn connected_with(config: ScaleConfig) -> (ScaleSession, MockScale) {
    let (scale, connector) = MockScale::pair();
    let session = ScaleSession::new(config);
    session.connect(&connector).await.unwrap();
    wait_for(&session, |s| s.status == ConnectionStatus::Connected).await;
    (session, scale)
}

async fn connected() -> (ScaleSession, MockScale) {
    connected_with(ScaleConfig::default()).await
}

#[tokio::test]
async fn json_record_split_across_chunks_yields_one_measurement() {
    let (session, mut scale) = connected().await;
    let mut events = session.subscribe();

    scale.send_bytes(br#"{"peso":12.340,"obj"#).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    scale
        .send_bytes(b"etivo\":12.000,\"diferencia\":0.340}\n")
        .await
        .unwrap();

    let snapshot = wait_for(&session, |s| s.measurements == 1).await;
    assert_eq!(snapshot.current_weight, 12.340);
    assert_eq!(snapshot.target_weight, Some(12.0));
    assert_eq!(snapshot.difference, Some(0.340));
    assert_eq!(snapshot.verdict, ToleranceVerdict::OutOfRange);
    assert!(snapshot.data_fresh);
    assert!(snapshot.last_received_at.is_some());

    match next_event(&mut events).await {
        SessionEvent::Measurement(record) => assert_eq!(record.current_weight, 12.340),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn delimited_frame_within_tolerance_is_ok() {
    let (session, mut scale) = connected().await;

    scale.send_line("OBJ:10.000;ACT:10.003;DIF:0.003").await.unwrap();

    let snapshot = wait_for(&session, |s| s.measurements == 1).await;
    assert_eq!(snapshot.current_weight, 10.003);
    assert_eq!(snapshot.target_weight, Some(10.0));
    assert_eq!(snapshot.difference, Some(0.003));
    assert_eq!(snapshot.verdict, ToleranceVerdict::Ok);
}

#[tokio::test]
async fn calibration_handshake_writes_reference_weight() {
    let (session, mut scale) = connected().await;

    scale
        .send_line("Coloque el peso conocido e ingrese el peso en kg")
        .await
        .unwrap();
    let snapshot = wait_for(&session, |s| s.calibration != CalibrationState::Idle).await;
    assert!(matches!(
        snapshot.calibration,
        CalibrationState::AwaitingReferenceWeight(_)
    ));

    session.submit_reference_weight(5.25).await.unwrap();
    let command = timeout(WAIT, scale.read_command()).await.unwrap().unwrap();
    assert_eq!(command.as_deref(), Some("5.250"));
    assert_eq!(session.snapshot().calibration, CalibrationState::Idle);

    scale.send_line("Retire el peso y escriba ok").await.unwrap();
    wait_for(&session, |s| {
        matches!(s.calibration, CalibrationState::AwaitingConfirmation(_))
    })
    .await;
    session.submit_confirmation().await.unwrap();
    let command = timeout(WAIT, scale.read_command()).await.unwrap().unwrap();
    assert_eq!(command.as_deref(), Some("ok"));
}

#[tokio::test]
async fn calibration_input_is_validated_before_anything_is_written() {
    let (session, mut scale) = connected().await;

    let err = session.submit_confirmation().await.unwrap_err();
    assert!(matches!(err, ScaleError::InvalidState { .. }));

    scale.send_line("ingrese el peso conocido").await.unwrap();
    wait_for(&session, |s| s.calibration != CalibrationState::Idle).await;

    for bad in [0.0, -1.0, f64::NAN] {
        let err = session.submit_reference_weight(bad).await.unwrap_err();
        assert!(matches!(err, ScaleError::InvalidCalibrationInput(_)));
    }
    assert!(matches!(
        session.snapshot().calibration,
        CalibrationState::AwaitingReferenceWeight(_)
    ));

    // Nothing reached the device: the next command seen is the tare.
    session.tare().await.unwrap();
    let command = timeout(WAIT, scale.read_command()).await.unwrap().unwrap();
    assert_eq!(command.as_deref(), Some("TARE"));
}

#[tokio::test]
async fn heartbeat_changes_no_state() {
    let (session, mut scale) = connected().await;
    let mut events = session.subscribe();
    let before = session.snapshot();

    scale.send_line("HEARTBEAT").await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Heartbeat);

    let after = session.snapshot();
    assert_eq!(after.measurements, before.measurements);
    assert_eq!(after.calibration, CalibrationState::Idle);
    assert_eq!(after.current_weight, before.current_weight);
    assert!(after.history.is_empty());
}

#[tokio::test]
async fn garbage_is_reported_and_the_loop_keeps_reading() {
    let (session, mut scale) = connected().await;
    let mut events = session.subscribe();

    scale.send_line("garbage not json {not valid").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Noise("garbage not json {not valid".to_string())
    );

    scale.send_line(r#"{"peso":3.0}"#).await.unwrap();
    let snapshot = wait_for(&session, |s| s.measurements == 1).await;
    assert_eq!(snapshot.current_weight, 3.0);
    assert!(session.is_running().await);
}

#[tokio::test]
async fn history_keeps_the_last_fifty_points() {
    let (session, mut scale) = connected().await;

    for i in 0..51 {
        scale.send_line(&format!(r#"{{"peso":{i}.0}}"#)).await.unwrap();
    }

    let snapshot = wait_for(&session, |s| s.measurements == 51).await;
    assert_eq!(snapshot.history.len(), 50);
    assert_eq!(snapshot.history[0].weight, 1.0);
    assert_eq!(snapshot.history[49].weight, 50.0);
    assert_eq!(snapshot.current_weight, 50.0);
}

#[tokio::test]
async fn tare_and_target_are_written_and_applied() {
    let (session, mut scale) = connected().await;

    scale
        .send_line(r#"{"peso":4.0,"objetivo":5.0,"diferencia":-1.0}"#)
        .await
        .unwrap();
    wait_for(&session, |s| s.measurements == 1).await;

    session.tare().await.unwrap();
    let command = timeout(WAIT, scale.read_command()).await.unwrap().unwrap();
    assert_eq!(command.as_deref(), Some("TARE"));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.current_weight, 0.0);
    assert_eq!(snapshot.difference, Some(0.0));

    session.set_target(12.0).await.unwrap();
    let command = timeout(WAIT, scale.read_command()).await.unwrap().unwrap();
    assert_eq!(command.as_deref(), Some("OBJ:12.000"));
    assert_eq!(session.snapshot().target_weight, Some(12.0));

    let err = session.set_target(-1.0).await.unwrap_err();
    assert!(matches!(err, ScaleError::InvalidCommand(_)));
}

#[tokio::test]
async fn data_goes_stale_after_the_freshness_window() {
    let mut config = ScaleConfig::default();
    config.measurement.freshness_window_ms = 150;
    config.measurement.freshness_check_interval_ms = 25;
    let (session, mut scale) = connected_with(config).await;

    scale.send_line(r#"{"peso":1.0}"#).await.unwrap();
    wait_for(&session, |s| s.measurements == 1 && s.data_fresh).await;

    let snapshot = wait_for(&session, |s| !s.data_fresh).await;
    assert_eq!(snapshot.current_weight, 1.0);
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn confirmed_weighing_is_saved_and_sack_code_cleared() {
    let (session, mut scale) = connected().await;
    let store = MemoryStore::new();

    session.select_factory("F-1").await.unwrap();
    scale
        .send_line(r#"{"peso":12.003,"objetivo":12.0,"diferencia":0.003,"codigo_saco":"S-17"}"#)
        .await
        .unwrap();
    let snapshot = wait_for(&session, |s| s.measurements == 1).await;
    assert_eq!(snapshot.sack_code, "S-17");

    let weighing = session.confirm_and_save(&store).await.unwrap();
    assert_eq!(weighing.code, "S-17");
    assert_eq!(weighing.status, "OK");

    let rows = store
        .query(SACOS_TABLE, &Filter::all().eq("fabrica_id", "F-1"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["codigo"], "S-17");
    assert_eq!(rows[0]["estado"], "OK");

    assert_eq!(session.snapshot().sack_code, "");
}

#[tokio::test]
async fn save_without_factory_is_rejected() {
    let (session, mut scale) = connected().await;
    let store = MemoryStore::new();

    scale
        .send_line(r#"{"peso":2.0,"codigo_saco":"S-1"}"#)
        .await
        .unwrap();
    wait_for(&session, |s| s.measurements == 1).await;

    let err = session.confirm_and_save(&store).await.unwrap_err();
    assert!(matches!(err, ScaleError::SaveRejected(_)));
    assert!(store
        .query(SACOS_TABLE, &Filter::all())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn device_closing_the_link_disconnects() {
    let (session, scale) = connected().await;

    drop(scale);
    wait_for(&session, |s| s.status == ConnectionStatus::Disconnected).await;

    let err = session.tare().await.unwrap_err();
    assert!(matches!(err, ScaleError::NotConnected));
}

#[tokio::test]
async fn disconnect_is_idempotent_and_operator_fields_survive_reconnect() {
    let session = ScaleSession::new(ScaleConfig::default());
    session.disconnect().await.unwrap();
    assert!(matches!(
        session.tare().await.unwrap_err(),
        ScaleError::NotConnected
    ));

    session.set_sack_code("S-99").await.unwrap();
    assert_eq!(session.snapshot().sack_code, "S-99");

    let (_scale, connector) = MockScale::pair();
    session.connect(&connector).await.unwrap();
    wait_for(&session, |s| s.status == ConnectionStatus::Connected).await;
    // Already connected: no-op.
    session.connect(&connector).await.unwrap();

    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();
    assert!(matches!(
        session.tare().await.unwrap_err(),
        ScaleError::TransportClosed
    ));
    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert_eq!(snapshot.sack_code, "S-99");
    assert!(!snapshot.data_fresh);

    let (_scale, connector) = MockScale::pair();
    session.connect(&connector).await.unwrap();
    let snapshot = wait_for(&session, |s| s.status == ConnectionStatus::Connected).await;
    assert_eq!(snapshot.sack_code, "S-99");
}

#[tokio::test]
async fn calibration_does_not_survive_a_reconnect() {
    let (session, mut scale) = connected().await;
    scale.send_line("escriba ok para continuar").await.unwrap();
    wait_for(&session, |s| s.calibration != CalibrationState::Idle).await;

    session.disconnect().await.unwrap();
    assert_eq!(session.snapshot().calibration, CalibrationState::Idle);
}

struct ScriptedConnector {
    io: Mutex<Option<tokio_test::io::Mock>>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self) -> anyhow::Result<DynSerial> {
        self.io
            .lock()
            .await
            .take()
            .map(|io| Box::new(io) as DynSerial)
            .ok_or_else(|| anyhow::anyhow!("already opened"))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[tokio::test]
async fn read_failure_puts_the_session_in_error() {
    let io = tokio_test::io::Builder::new()
        .read(b"{\"peso\":1.5}\n")
        .read_error(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "cable unplugged",
        ))
        .build();
    let connector = ScriptedConnector {
        io: Mutex::new(Some(io)),
    };
    let session = ScaleSession::new(ScaleConfig::default());
    session.connect(&connector).await.unwrap();

    let snapshot = wait_for(&session, |s| {
        matches!(s.status, ConnectionStatus::Error(_))
    })
    .await;
    match snapshot.status {
        ConnectionStatus::Error(message) => assert!(message.contains("cable unplugged")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(snapshot.measurements, 1);
    assert!(!snapshot.data_fresh);
}

#[tokio::test]
async fn failed_command_write_puts_the_session_in_error() {
    let io = tokio_test::io::Builder::new()
        .read(b"Retire el peso y escriba ok\n")
        .write_error(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "port vanished",
        ))
        .build();
    let connector = ScriptedConnector {
        io: Mutex::new(Some(io)),
    };
    let session = ScaleSession::new(ScaleConfig::default());
    session.connect(&connector).await.unwrap();
    wait_for(&session, |s| {
        matches!(s.calibration, CalibrationState::AwaitingConfirmation(_))
    })
    .await;

    let err = session.submit_confirmation().await.unwrap_err();
    assert!(matches!(err, ScaleError::Transport(_)));

    let snapshot = wait_for(&session, |s| {
        matches!(s.status, ConnectionStatus::Error(_))
    })
    .await;
    match snapshot.status {
        ConnectionStatus::Error(message) => assert!(message.contains("port vanished")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        session.tare().await.unwrap_err(),
        ScaleError::NotConnected
    ));
}

#[tokio::test]
async fn failed_open_reports_error() {
    let connector = ScriptedConnector {
        io: Mutex::new(None),
    };
    let session = ScaleSession::new(ScaleConfig::default());

    let err = session.connect(&connector).await.unwrap_err();
    assert!(matches!(err, ScaleError::Transport(_)));
    assert!(matches!(
        session.snapshot().status,
        ConnectionStatus::Error(_)
    ));
    assert!(!session.is_running().await);
}
