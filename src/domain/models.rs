use crate::domain::orientation::{EulerAngles, Quaternion, Vector3};
use crate::error::SessionError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Opaque handle to a discovered peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: Option<String>,
    pub address: String,
}

impl DeviceIdentity {
    pub fn new(name: Option<&str>, address: impl Into<String>) -> Self {
        Self {
            name: name.map(str::to_string),
            address: address.into(),
        }
    }
}

/// Connection lifecycle of one Device Session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    None,
    Scanned,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionStatus {
    /// True while a link-level operation is in progress or established.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Disconnecting
        )
    }
}

/// Which product line a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductLine {
    #[default]
    Core,
    Insole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryStatus {
    #[default]
    Unknown,
    Low,
    Normal,
    Full,
}

impl BatteryStatus {
    /// Wire value `0xFF` is unknown, `0..=2` are low/normal/full.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0xFF => Some(Self::Unknown),
            0 => Some(Self::Low),
            1 => Some(Self::Normal),
            2 => Some(Self::Full),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Unknown => 0xFF,
            Self::Low => 0,
            Self::Normal => 1,
            Self::Full => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
    Both,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
            Self::Both => Self::Both,
        }
    }

    /// Combine with a mounting position. `Both` on either side yields `SidePosition::Both`.
    pub fn with_position(self, position: Position) -> SidePosition {
        match (self, position) {
            (Self::Left, Position::Plantar) => SidePosition::LeftPlantar,
            (Self::Right, Position::Plantar) => SidePosition::RightPlantar,
            (Self::Left, Position::Instep) => SidePosition::LeftInstep,
            (Self::Right, Position::Instep) => SidePosition::RightInstep,
            _ => SidePosition::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Plantar,
    Instep,
    Both,
}

impl Position {
    pub fn other(self) -> Self {
        match self {
            Self::Plantar => Self::Instep,
            Self::Instep => Self::Plantar,
            Self::Both => Self::Both,
        }
    }
}

/// Attachment side and position. Wire order is the declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidePosition {
    LeftPlantar,
    RightPlantar,
    LeftInstep,
    RightInstep,
    #[default]
    Both,
}

impl SidePosition {
    const ALL: [Self; 5] = [
        Self::LeftPlantar,
        Self::RightPlantar,
        Self::LeftInstep,
        Self::RightInstep,
        Self::Both,
    ];

    pub fn from_wire(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn side(self) -> Side {
        match self {
            Self::LeftPlantar | Self::LeftInstep => Side::Left,
            Self::RightPlantar | Self::RightInstep => Side::Right,
            Self::Both => Side::Both,
        }
    }

    pub fn position(self) -> Position {
        match self {
            Self::LeftPlantar | Self::RightPlantar => Position::Plantar,
            Self::LeftInstep | Self::RightInstep => Position::Instep,
            Self::Both => Position::Both,
        }
    }

    pub fn other_side(self) -> Self {
        self.side().other().with_position(self.position())
    }

    pub fn other_position(self) -> Self {
        self.side().with_position(self.position().other())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    #[default]
    Stop,
    Recording,
    Pause,
    Resume,
}

impl RecordingMode {
    const ALL: [Self; 4] = [Self::Stop, Self::Recording, Self::Pause, Self::Resume];

    pub fn from_wire(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedBrightness {
    #[default]
    Off,
    Weak,
    Strong,
}

impl LedBrightness {
    const ALL: [Self; 3] = [Self::Off, Self::Weak, Self::Strong];

    pub fn from_wire(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Accelerometer full-scale range in g.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccRange {
    G2,
    G4,
    G8,
    #[default]
    G16,
}

impl AccRange {
    const ALL: [Self; 4] = [Self::G2, Self::G4, Self::G8, Self::G16];

    pub fn from_wire(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn full_scale(self) -> f64 {
        match self {
            Self::G2 => 2.0,
            Self::G4 => 4.0,
            Self::G8 => 8.0,
            Self::G16 => 16.0,
        }
    }
}

/// Gyroscope full-scale range in degrees per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GyroRange {
    Dps250,
    Dps500,
    Dps1000,
    #[default]
    Dps2000,
}

impl GyroRange {
    const ALL: [Self; 4] = [Self::Dps250, Self::Dps500, Self::Dps1000, Self::Dps2000];

    pub fn from_wire(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn full_scale(self) -> f64 {
        match self {
            Self::Dps250 => 250.0,
            Self::Dps500 => 500.0,
            Self::Dps1000 => 1000.0,
            Self::Dps2000 => 2000.0,
        }
    }
}

/// How the device streams sensor data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorMode {
    Realtime,
    Request,
    RealtimeInsole,
}

impl SensorMode {
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Realtime => 1,
            Self::Request => 2,
            Self::RealtimeInsole => 3,
        }
    }
}

/// Snapshot of the 10-byte device configuration register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub battery: BatteryStatus,
    pub side_position: SidePosition,
    pub recording_mode: RecordingMode,
    pub auto_record: bool,
    pub led_brightness: LedBrightness,
    /// Seconds.
    pub log_duration: u16,
    pub acc_range: AccRange,
    pub gyro_range: GyroRange,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            battery: BatteryStatus::Unknown,
            side_position: SidePosition::Both,
            recording_mode: RecordingMode::Stop,
            auto_record: false,
            led_brightness: LedBrightness::Off,
            log_duration: 60,
            acc_range: AccRange::G16,
            gyro_range: GyroRange::Dps2000,
        }
    }
}

/// One resend sub-request: `length` samples starting at `start_serial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendRequest {
    pub start_serial: u16,
    pub length: u16,
}

impl ResendRequest {
    pub fn new(start_serial: u16, length: u16) -> Self {
        Self {
            start_serial,
            length,
        }
    }

    /// Whether `serial` falls inside this window, honouring wraparound.
    pub fn contains(&self, serial: u16) -> bool {
        (serial.wrapping_sub(self.start_serial) as u32) < self.length as u32
    }

    /// Last serial of the window, if the window is non-empty.
    pub fn last_serial(&self) -> Option<u16> {
        (self.length > 0).then(|| self.start_serial.wrapping_add(self.length - 1))
    }
}

/// Validated batch of 1..=30 resend sub-requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendBatch(Vec<ResendRequest>);

impl ResendBatch {
    pub const MAX_REQUESTS: usize = 30;

    pub fn new(requests: Vec<ResendRequest>) -> Result<Self, SessionError> {
        if requests.is_empty() {
            return Err(SessionError::EmptyRequest);
        }
        if requests.len() > Self::MAX_REQUESTS {
            return Err(SessionError::TooManyRequests {
                count: requests.len(),
            });
        }
        Ok(Self(requests))
    }

    pub fn single(request: ResendRequest) -> Self {
        Self(vec![request])
    }

    pub fn requests(&self) -> &[ResendRequest] {
        &self.0
    }
}

/// A three-axis reading together with its range-normalised counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Triad {
    pub value: Vector3,
    pub normalized: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreSample {
    pub side_position: SidePosition,
    pub serial_number: u16,
    /// Slot within the notification, 0 is the newest.
    pub position: usize,
    pub timestamp: NaiveDateTime,
    pub quaternion: Quaternion,
    pub euler: EulerAngles,
    pub normalized_euler: EulerAngles,
    pub gravity: Vector3,
    pub gyro: Triad,
    pub acc: Triad,
    pub resend: bool,
    pub dropped_frames: u8,
}

/// Pressure channels named by their place on the sole.
///
/// Four-channel firmware leaves `midfoot_outer` and `midfoot_inner` empty.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PressureChannels {
    pub toe: f64,
    pub metatarsal_outer: f64,
    pub metatarsal_inner: f64,
    pub midfoot_outer: Option<f64>,
    pub midfoot_inner: Option<f64>,
    pub heel: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsoleSample {
    pub side_position: SidePosition,
    pub serial_number: u16,
    pub position: usize,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub pressure: PressureChannels,
    pub gyro: Triad,
    pub acc: Triad,
    /// Zero-filled when the frame carries no quaternion block.
    pub quaternion: Quaternion,
    pub resend: bool,
    pub dropped_frames: u8,
}

/// Samples decoded from one notification, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "samples", rename_all = "snake_case")]
pub enum SampleBatch {
    Core(Vec<CoreSample>),
    Insole(Vec<InsoleSample>),
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        match self {
            Self::Core(samples) => samples.len(),
            Self::Insole(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn serial_number(&self) -> Option<u16> {
        match self {
            Self::Core(samples) => samples.first().map(|s| s.serial_number),
            Self::Insole(samples) => samples.first().map(|s| s.serial_number),
        }
    }

    /// The most recent sample of the batch.
    pub fn newest(&self) -> Option<LatestSample> {
        match self {
            Self::Core(samples) => samples.last().cloned().map(LatestSample::Core),
            Self::Insole(samples) => samples.last().cloned().map(LatestSample::Insole),
        }
    }

    pub fn mark_resend(&mut self) {
        match self {
            Self::Core(samples) => samples.iter_mut().for_each(|s| s.resend = true),
            Self::Insole(samples) => samples.iter_mut().for_each(|s| s.resend = true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LatestSample {
    Core(CoreSample),
    Insole(InsoleSample),
}

/// Non-telemetry frames from the sensor-values characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlEvent {
    AccumulationStarted,
    RecoveryRejected,
    Status { code: u8 },
    Acknowledged { opcode: u8 },
    CurrentSerialNumber { serial: u16 },
    RangeNotFound { start_serial: u16, length: u16 },
}

/// Events emitted by a Device Session to its caller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A matching peer, or `None` when the scan period ended without one.
    Scan(Option<DeviceIdentity>),
    Connected(DeviceIdentity),
    Disconnected(Option<DeviceIdentity>),
    NotificationsArmed,
    Config(DeviceConfig),
    Samples(SampleBatch),
    CurrentSerialNumber(u16),
    SampleMissing(u16),
    AccumulationStarted,
    RecoveryRejected,
    /// The device acknowledged a command with this opcode.
    Acknowledged(u8),
    /// Status code the session has no dedicated meaning for.
    DeviceStatus(u8),
    DeviceClock(NaiveDateTime),
    Error(SessionError),
}
