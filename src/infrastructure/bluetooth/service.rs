//! Device Session
//!
//! Composition root for one paired device. Owns the connection state machine,
//! the gap-recovery manager and the cached device configuration, routes
//! transport events through the frame decoder and exposes the public API.
//!
//! The session is synchronous and single-owner. [`super::runtime`] runs it on
//! a tokio task.

use crate::domain::clock::Clock;
use crate::domain::models::{
    AccRange, ConnectionStatus, ControlEvent, DeviceConfig, DeviceIdentity, GyroRange,
    LatestSample, LedBrightness, RecordingMode, ResendBatch, ResendRequest, SensorMode,
    SessionEvent,
};
use crate::domain::recovery::{GapRecoveryManager, LatestPlan};
use crate::domain::settings::SessionConfig;
use crate::error::SessionError;
use crate::infrastructure::bluetooth::connection::{
    ConnectionStateMachine, ConnectionTiming, SetupStep,
};
use crate::infrastructure::bluetooth::frame::{self, DecodeContext, DecodedFrame};
use crate::infrastructure::bluetooth::protocol::{
    self, DeviceCommand, DeviceProfile, DATE_TIME_CHAR_UUID, DEVICE_INFO_CHAR_UUID,
    INFO_SERVICE_UUID, SENSOR_VALUES_CHAR_UUID,
};
use crate::infrastructure::bluetooth::timer::{TimerId, TimerScheduler};
use crate::infrastructure::bluetooth::transport::{Transport, TransportEvent, WriteKind};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

pub struct DeviceSession<T, S, C> {
    transport: T,
    timers: S,
    clock: C,
    config: SessionConfig,
    profile: DeviceProfile,
    connection: ConnectionStateMachine,
    recovery: GapRecoveryManager,
    device_config: DeviceConfig,
    device_config_read: bool,
    latest: Option<LatestSample>,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
}

impl<T, S, C> DeviceSession<T, S, C>
where
    T: Transport,
    S: TimerScheduler,
    C: Clock,
{
    /// Fails with [`SessionError::TransportUnavailable`] when the host has no adapter.
    pub fn new(
        transport: T,
        timers: S,
        clock: C,
        config: SessionConfig,
        event_sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        if !transport.adapter_available() {
            warn!("No bluetooth adapter available");
            return Err(SessionError::TransportUnavailable);
        }
        let profile = DeviceProfile::for_line(config.product_line);
        let timing = ConnectionTiming {
            scan_period: config.scan_period,
            settle_delay: config.settle_delay,
        };
        info!(
            "Creating {:?} session for {:?}",
            profile.product_line, config.side_position
        );
        Ok(Self {
            transport,
            timers,
            clock,
            config,
            profile,
            connection: ConnectionStateMachine::new(profile, timing, event_sender.clone()),
            recovery: GapRecoveryManager::new(
                profile.serial_interval(),
                profile.default_latest_count,
            ),
            device_config: DeviceConfig {
                side_position: config.side_position,
                acc_range: config.acc_range,
                gyro_range: config.gyro_range,
                ..DeviceConfig::default()
            },
            device_config_read: false,
            latest: None,
            event_sender,
        })
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_sender.send(event);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.connection.identity()
    }

    /// Last configuration read from the device, or the configured defaults before the first read.
    pub fn device_config(&self) -> DeviceConfig {
        self.device_config
    }

    pub fn latest_sample(&self) -> Option<&LatestSample> {
        self.latest.as_ref()
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    // Connection lifecycle

    pub fn start_scan(&mut self) {
        self.connection
            .start_scan(&mut self.transport, &mut self.timers);
    }

    pub fn stop_scan(&mut self) {
        self.connection
            .stop_scan(&mut self.transport, &mut self.timers);
    }

    pub fn connect(&mut self, identity: &DeviceIdentity) {
        self.connection
            .connect(identity, &mut self.transport, &mut self.timers);
    }

    pub fn disconnect(&mut self) {
        self.connection
            .disconnect(&mut self.transport, &mut self.timers);
    }

    fn require_connected(&self) -> Result<(), SessionError> {
        match self.status() {
            ConnectionStatus::Connected => Ok(()),
            status => Err(SessionError::NotConnected { status }),
        }
    }

    fn write(
        &mut self,
        characteristic: Uuid,
        value: &[u8],
        kind: WriteKind,
    ) -> Result<(), SessionError> {
        trace!("Write {} <- {:02X?}", characteristic, value);
        self.transport
            .write(INFO_SERVICE_UUID, characteristic, value, kind)
            .map_err(SessionError::from)
    }

    fn send_command(&mut self, command: DeviceCommand) -> Result<(), SessionError> {
        self.require_connected()?;
        debug!("Sending {} command", command.name());
        let bytes = command.encode(&self.profile);
        self.write(DEVICE_INFO_CHAR_UUID, &bytes, WriteKind::Acknowledged)
    }

    // Telemetry requests

    /// Ask for the latest `count` samples, or everything since the last known
    /// serial number when `count` is 0.
    pub fn request_latest(&mut self, count: u16) -> Result<(), SessionError> {
        self.require_connected()?;
        match self.recovery.plan_latest(count, self.clock.now()) {
            LatestPlan::QueryCurrentSerial => {
                info!("No serial number known yet, querying the device");
                self.send_command(DeviceCommand::GetCurrentSerialNumber)
            }
            LatestPlan::Request(request) => self.request_batch(ResendBatch::single(request)),
        }
    }

    /// [`Self::request_latest`] with the configured default count.
    pub fn request_default_latest(&mut self) -> Result<(), SessionError> {
        self.request_latest(self.config.latest_request_length)
    }

    /// Ask the device to resend up to 30 windows of samples.
    pub fn request_range(&mut self, requests: Vec<ResendRequest>) -> Result<(), SessionError> {
        let batch = ResendBatch::new(requests)?;
        self.request_batch(batch)
    }

    /// Send an already validated batch.
    pub fn request_batch(&mut self, batch: ResendBatch) -> Result<(), SessionError> {
        info!("Requesting resend of {} windows", batch.requests().len());
        self.send_command(DeviceCommand::Resend(batch.clone()))?;
        self.recovery.begin_recovery(&batch, self.clock.now());
        Ok(())
    }

    /// Abort an in-flight resend. The device does not acknowledge this.
    pub fn cancel_request(&mut self) -> Result<(), SessionError> {
        self.send_command(DeviceCommand::CancelResend)?;
        self.recovery.cancel();
        Ok(())
    }

    pub fn set_sensor_mode(&mut self, mode: SensorMode) -> Result<(), SessionError> {
        self.send_command(DeviceCommand::SetSensorMode(mode))
    }

    pub fn query_current_serial(&mut self) -> Result<(), SessionError> {
        self.send_command(DeviceCommand::GetCurrentSerialNumber)
    }

    pub fn start_accumulation(&mut self) -> Result<(), SessionError> {
        self.send_command(DeviceCommand::StartAccumulation)
    }

    pub fn stop_accumulation(&mut self) -> Result<(), SessionError> {
        self.send_command(DeviceCommand::StopAccumulation)
    }

    pub fn clear_accumulation(&mut self) -> Result<(), SessionError> {
        self.send_command(DeviceCommand::ClearAccumulation)
    }

    // Clock

    /// Write the host clock to the device. Insole writes are unacknowledged.
    pub fn sync_clock(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;
        let bytes = protocol::encode_clock(self.clock.now(), &self.profile);
        debug!("Syncing device clock");
        self.write(DATE_TIME_CHAR_UUID, &bytes, self.profile.clock_write_kind())
    }

    /// Read the device clock back; it arrives as [`SessionEvent::DeviceClock`].
    pub fn read_clock(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;
        self.transport
            .read(INFO_SERVICE_UUID, DATE_TIME_CHAR_UUID)
            .map_err(SessionError::from)
    }

    // Configuration register

    pub fn read_device_config(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;
        self.transport
            .read(INFO_SERVICE_UUID, DEVICE_INFO_CHAR_UUID)
            .map_err(SessionError::from)
    }

    /// Write a full configuration frame, then read it back. The cache only
    /// changes once the read completes.
    pub fn write_device_config(&mut self, config: DeviceConfig) -> Result<(), SessionError> {
        self.require_connected()?;
        info!("Writing device config: {:?}", config);
        self.write(DEVICE_INFO_CHAR_UUID, &config.to_bytes(), WriteKind::Acknowledged)?;
        self.read_device_config()
    }

    pub fn set_led_brightness(&mut self, led_brightness: LedBrightness) -> Result<(), SessionError> {
        self.write_device_config(DeviceConfig {
            led_brightness,
            ..self.device_config
        })
    }

    pub fn set_recording_mode(&mut self, recording_mode: RecordingMode) -> Result<(), SessionError> {
        self.write_device_config(DeviceConfig {
            recording_mode,
            ..self.device_config
        })
    }

    pub fn set_auto_record(&mut self, auto_record: bool) -> Result<(), SessionError> {
        self.write_device_config(DeviceConfig {
            auto_record,
            ..self.device_config
        })
    }

    pub fn set_log_duration(&mut self, log_duration: u16) -> Result<(), SessionError> {
        self.write_device_config(DeviceConfig {
            log_duration,
            ..self.device_config
        })
    }

    pub fn set_ranges(&mut self, acc_range: AccRange, gyro_range: GyroRange) -> Result<(), SessionError> {
        self.write_device_config(DeviceConfig {
            acc_range,
            gyro_range,
            ..self.device_config
        })
    }

    // Inbound

    pub fn on_timer(&mut self, id: TimerId) {
        if let Some(step) = self
            .connection
            .on_timer(id, &mut self.transport, &mut self.timers)
        {
            self.perform_setup(step);
        }
    }

    pub fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Advertisement(adv) => self.connection.on_advertisement(&adv),
            TransportEvent::LinkUp => self.connection.on_link_up(&mut self.transport),
            TransportEvent::LinkDown => {
                self.recovery.cancel();
                self.connection
                    .on_link_down(&mut self.transport, &mut self.timers);
            }
            TransportEvent::ServicesDiscovered(result) => self
                .connection
                .on_services_discovered(result, &mut self.transport),
            TransportEvent::NotificationsArmed {
                characteristic,
                enabled,
            } => {
                if let Some(step) = self.connection.on_notifications_armed(
                    characteristic,
                    enabled,
                    &mut self.timers,
                ) {
                    self.perform_setup(step);
                }
            }
            TransportEvent::Notification {
                characteristic,
                value,
            } => {
                if characteristic == SENSOR_VALUES_CHAR_UUID {
                    self.on_sensor_values(&value);
                } else {
                    trace!("Notification from {} ignored", characteristic);
                }
            }
            TransportEvent::ReadComplete {
                characteristic,
                value,
            } => match value {
                Ok(value) => self.on_read(characteristic, &value),
                Err(e) => {
                    warn!("Read of {} failed: {}", characteristic, e);
                    self.emit(SessionEvent::Error(e.into()));
                }
            },
        }
    }

    fn perform_setup(&mut self, step: SetupStep) {
        let result = match step {
            SetupStep::ReadDeviceConfig => self.read_device_config(),
            SetupStep::SyncClock => self.sync_clock(),
            SetupStep::QueryCurrentSerial => self.query_current_serial(),
        };
        if let Err(e) = result {
            warn!("Setup step {:?} failed: {}", step, e);
            self.emit(SessionEvent::Error(e));
        }
    }

    fn decode_context(&self) -> DecodeContext {
        let (acc_range, gyro_range) = if self.device_config_read {
            (self.device_config.acc_range, self.device_config.gyro_range)
        } else {
            (self.config.acc_range, self.config.gyro_range)
        };
        DecodeContext {
            product_line: self.profile.product_line,
            side_position: self.config.side_position,
            acc_range,
            gyro_range,
            calibrated_pressure: self.config.calibrated_pressure,
            serial_interval: self.profile.serial_interval(),
            host_now: self.clock.now(),
        }
    }

    fn on_sensor_values(&mut self, value: &[u8]) {
        let ctx = self.decode_context();
        match frame::decode(value, &ctx) {
            Ok(DecodedFrame::Samples(mut batch)) => {
                let Some(serial) = batch.serial_number() else {
                    return;
                };
                if self.recovery.classify_resend(serial, ctx.host_now) {
                    batch.mark_resend();
                } else {
                    self.recovery.observe(serial, ctx.host_now);
                }
                self.latest = batch.newest();
                self.emit(SessionEvent::Samples(batch));
            }
            Ok(DecodedFrame::Control(event)) => self.on_control(event, &ctx),
            Err(e) => {
                warn!("Dropping malformed frame ({} bytes): {}", value.len(), e);
                self.emit(SessionEvent::Error(SessionError::MalformedFrame(e)));
            }
        }
    }

    fn on_control(&mut self, event: ControlEvent, ctx: &DecodeContext) {
        match event {
            ControlEvent::CurrentSerialNumber { serial } => {
                info!("Current serial number: {}", serial);
                self.recovery.observe(serial, ctx.host_now);
                self.emit(SessionEvent::CurrentSerialNumber(serial));
                if let Some(count) = self.profile.auto_fetch_count {
                    let request = ResendRequest::new(serial, count);
                    if let Err(e) = self.request_batch(ResendBatch::single(request)) {
                        self.emit(SessionEvent::Error(e));
                    }
                }
            }
            ControlEvent::RangeNotFound {
                start_serial,
                length,
            } => {
                debug!("Device has no samples {}+{}", start_serial, length);
                for serial in GapRecoveryManager::missing_serials(start_serial, length) {
                    self.recovery.settle(serial);
                    self.emit(SessionEvent::SampleMissing(serial));
                }
            }
            ControlEvent::AccumulationStarted => {
                info!("Accumulation started");
                self.emit(SessionEvent::AccumulationStarted);
            }
            ControlEvent::RecoveryRejected => {
                warn!("Device rejected the resend request");
                self.recovery.cancel();
                self.emit(SessionEvent::RecoveryRejected);
            }
            ControlEvent::Acknowledged { opcode } => {
                trace!("Command {} acknowledged", opcode);
                self.emit(SessionEvent::Acknowledged(opcode));
            }
            ControlEvent::Status { code } => self.emit(SessionEvent::DeviceStatus(code)),
        }
    }

    fn on_read(&mut self, characteristic: Uuid, value: &[u8]) {
        if characteristic == DEVICE_INFO_CHAR_UUID {
            match DeviceConfig::from_bytes(value) {
                Ok(config) => {
                    info!("Device config: {:?}", config);
                    self.device_config = config;
                    self.device_config_read = true;
                    self.emit(SessionEvent::Config(config));
                }
                Err(e) => {
                    warn!("Bad device config frame: {}", e);
                    self.emit(SessionEvent::Error(e.into()));
                }
            }
        } else if characteristic == DATE_TIME_CHAR_UUID {
            match protocol::decode_clock(value) {
                Ok(clock) => {
                    debug!("Device clock: {}", clock);
                    self.emit(SessionEvent::DeviceClock(clock));
                }
                Err(e) => self.emit(SessionEvent::Error(e.into())),
            }
        } else {
            trace!("Read of {} ignored", characteristic);
        }
    }
}
