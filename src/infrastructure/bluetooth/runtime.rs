//! Session Runtime
//!
//! Runs a [`DeviceSession`] on its own tokio task. Transport completions,
//! API commands and fired timers are funnelled through one loop so the
//! session is only ever touched from a single place.

use crate::domain::clock::Clock;
use crate::domain::models::{
    AccRange, ConnectionStatus, DeviceConfig, DeviceIdentity, GyroRange, LatestSample,
    LedBrightness, RecordingMode, ResendBatch, ResendRequest, SensorMode, SessionEvent,
};
use crate::domain::settings::SessionConfig;
use crate::error::SessionError;
use crate::infrastructure::bluetooth::service::DeviceSession;
use crate::infrastructure::bluetooth::timer::{TimerScheduler, TokioTimers};
use crate::infrastructure::bluetooth::transport::{Transport, TransportEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

/// Operations a [`SessionHandle`] forwards to the session task.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    StartScan,
    StopScan,
    Connect(DeviceIdentity),
    Disconnect,
    RequestLatest(u16),
    RequestDefaultLatest,
    RequestRange(ResendBatch),
    CancelRequest,
    SetSensorMode(SensorMode),
    SyncClock,
    ReadClock,
    ReadDeviceConfig,
    WriteDeviceConfig(DeviceConfig),
    SetLedBrightness(LedBrightness),
    SetRecordingMode(RecordingMode),
    SetAutoRecord(bool),
    SetLogDuration(u16),
    SetRanges(AccRange, GyroRange),
    StartAccumulation,
    StopAccumulation,
    ClearAccumulation,
}

pub enum SessionInput {
    Transport(TransportEvent),
    Command {
        command: SessionCommand,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Shutdown,
}

/// What observers can read without going through the event stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub identity: Option<DeviceIdentity>,
    pub device_config: DeviceConfig,
    pub latest: Option<LatestSample>,
}

#[derive(Clone)]
pub struct SessionHandle {
    input: mpsc::UnboundedSender<SessionInput>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

/// Create a session and start its task on the current tokio runtime.
pub fn spawn_session<T, C>(
    transport: T,
    clock: C,
    config: SessionConfig,
) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>), SessionError>
where
    T: Transport + 'static,
    C: Clock + 'static,
{
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
    let (input_tx, mut input_rx) = mpsc::unbounded_channel();

    let mut session = DeviceSession::new(
        transport,
        TokioTimers::new(fired_tx),
        clock,
        config,
        event_tx,
    )?;
    let (snapshot_tx, snapshot_rx) = watch::channel(snapshot_of(&session));

    tokio::spawn(async move {
        info!("Session task started");
        loop {
            tokio::select! {
                input = input_rx.recv() => match input {
                    Some(SessionInput::Transport(event)) => session.handle(event),
                    Some(SessionInput::Command { command, reply }) => {
                        let result = apply(&mut session, command);
                        // callers reading the snapshot after the reply see this command
                        publish(&snapshot_tx, &session);
                        let _ = reply.send(result);
                    }
                    Some(SessionInput::Shutdown) | None => break,
                },
                Some(id) = fired_rx.recv() => session.on_timer(id),
            }
            publish(&snapshot_tx, &session);
        }
        session.disconnect();
        info!("Session task stopped");
    });

    Ok((
        SessionHandle {
            input: input_tx,
            snapshot: snapshot_rx,
        },
        event_rx,
    ))
}

fn publish<T: Transport, S: TimerScheduler, C: Clock>(
    snapshot_tx: &watch::Sender<SessionSnapshot>,
    session: &DeviceSession<T, S, C>,
) {
    let next = snapshot_of(session);
    snapshot_tx.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

fn snapshot_of<T: Transport, S: TimerScheduler, C: Clock>(
    session: &DeviceSession<T, S, C>,
) -> SessionSnapshot {
    SessionSnapshot {
        status: session.status(),
        identity: session.identity().cloned(),
        device_config: session.device_config(),
        latest: session.latest_sample().cloned(),
    }
}

fn apply<T, S, C>(session: &mut DeviceSession<T, S, C>, command: SessionCommand) -> Result<(), SessionError>
where
    T: Transport,
    S: TimerScheduler,
    C: Clock,
{
    debug!("Session command: {:?}", command);
    match command {
        SessionCommand::StartScan => session.start_scan(),
        SessionCommand::StopScan => session.stop_scan(),
        SessionCommand::Connect(identity) => session.connect(&identity),
        SessionCommand::Disconnect => session.disconnect(),
        SessionCommand::RequestLatest(count) => return session.request_latest(count),
        SessionCommand::RequestDefaultLatest => return session.request_default_latest(),
        SessionCommand::RequestRange(batch) => return session.request_batch(batch),
        SessionCommand::CancelRequest => return session.cancel_request(),
        SessionCommand::SetSensorMode(mode) => return session.set_sensor_mode(mode),
        SessionCommand::SyncClock => return session.sync_clock(),
        SessionCommand::ReadClock => return session.read_clock(),
        SessionCommand::ReadDeviceConfig => return session.read_device_config(),
        SessionCommand::WriteDeviceConfig(config) => return session.write_device_config(config),
        SessionCommand::SetLedBrightness(level) => return session.set_led_brightness(level),
        SessionCommand::SetRecordingMode(mode) => return session.set_recording_mode(mode),
        SessionCommand::SetAutoRecord(on) => return session.set_auto_record(on),
        SessionCommand::SetLogDuration(seconds) => return session.set_log_duration(seconds),
        SessionCommand::SetRanges(acc, gyro) => return session.set_ranges(acc, gyro),
        SessionCommand::StartAccumulation => return session.start_accumulation(),
        SessionCommand::StopAccumulation => return session.stop_accumulation(),
        SessionCommand::ClearAccumulation => return session.clear_accumulation(),
    }
    Ok(())
}

impl SessionHandle {
    /// Hand a completion from the host BLE stack to the session.
    pub fn deliver(&self, event: TransportEvent) -> Result<(), SessionError> {
        self.input
            .send(SessionInput::Transport(event))
            .map_err(|_| SessionError::SessionClosed)
    }

    async fn call(&self, command: SessionCommand) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.input
            .send(SessionInput::Command { command, reply })
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes whenever the snapshot changes.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.borrow().status
    }

    pub fn device_config(&self) -> DeviceConfig {
        self.snapshot.borrow().device_config
    }

    pub fn shutdown(&self) {
        let _ = self.input.send(SessionInput::Shutdown);
    }

    pub async fn start_scan(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::StopScan).await
    }

    pub async fn connect(&self, identity: DeviceIdentity) -> Result<(), SessionError> {
        self.call(SessionCommand::Connect(identity)).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::Disconnect).await
    }

    pub async fn request_latest(&self, count: u16) -> Result<(), SessionError> {
        self.call(SessionCommand::RequestLatest(count)).await
    }

    pub async fn request_default_latest(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::RequestDefaultLatest).await
    }

    /// Batch size is checked here, before anything reaches the session task.
    pub async fn request_range(&self, requests: Vec<ResendRequest>) -> Result<(), SessionError> {
        let batch = ResendBatch::new(requests)?;
        self.call(SessionCommand::RequestRange(batch)).await
    }

    pub async fn cancel_request(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::CancelRequest).await
    }

    pub async fn set_sensor_mode(&self, mode: SensorMode) -> Result<(), SessionError> {
        self.call(SessionCommand::SetSensorMode(mode)).await
    }

    pub async fn sync_clock(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::SyncClock).await
    }

    pub async fn read_clock(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::ReadClock).await
    }

    pub async fn read_device_config(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::ReadDeviceConfig).await
    }

    pub async fn write_device_config(&self, config: DeviceConfig) -> Result<(), SessionError> {
        self.call(SessionCommand::WriteDeviceConfig(config)).await
    }

    pub async fn set_led_brightness(&self, level: LedBrightness) -> Result<(), SessionError> {
        self.call(SessionCommand::SetLedBrightness(level)).await
    }

    pub async fn set_recording_mode(&self, mode: RecordingMode) -> Result<(), SessionError> {
        self.call(SessionCommand::SetRecordingMode(mode)).await
    }

    pub async fn set_auto_record(&self, on: bool) -> Result<(), SessionError> {
        self.call(SessionCommand::SetAutoRecord(on)).await
    }

    pub async fn set_log_duration(&self, seconds: u16) -> Result<(), SessionError> {
        self.call(SessionCommand::SetLogDuration(seconds)).await
    }

    pub async fn set_ranges(&self, acc: AccRange, gyro: GyroRange) -> Result<(), SessionError> {
        self.call(SessionCommand::SetRanges(acc, gyro)).await
    }

    pub async fn start_accumulation(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::StartAccumulation).await
    }

    pub async fn stop_accumulation(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::StopAccumulation).await
    }

    pub async fn clear_accumulation(&self) -> Result<(), SessionError> {
        self.call(SessionCommand::ClearAccumulation).await
    }
}
