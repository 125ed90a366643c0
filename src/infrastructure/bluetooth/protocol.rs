//! Sensor Protocol
//!
//! GATT identifiers, command frames and the device configuration register
//! shared by the core and insole product lines.

use crate::domain::models::{
    AccRange, BatteryStatus, DeviceConfig, GyroRange, LedBrightness, ProductLine, RecordingMode,
    ResendBatch, ResendRequest, SensorMode, SidePosition,
};
use crate::error::DecodeError;
use crate::infrastructure::bluetooth::transport::WriteKind;
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use uuid::Uuid;

/// Information service: configuration register, command sink and clock.
pub const INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x01a9d6b5_ff6e_444a_b266_0be75e85c064);

/// Service carrying the sensor-values characteristic.
pub const OTHER_SERVICE_UUID: Uuid = Uuid::from_u128(0xdb1b7aca_cda5_4453_a49b_33a53d3f0833);

/// 10-byte configuration frame on read, command frames on write.
pub const DEVICE_INFO_CHAR_UUID: Uuid = Uuid::from_u128(0x24354f22_1c46_430e_a4ab_a1eeabbcdfc0);

/// 7-byte clock, written on sync and echoed on read.
pub const DATE_TIME_CHAR_UUID: Uuid = Uuid::from_u128(0xf53eeeb1_b2e8_492a_9673_10e0f1c29026);

/// Telemetry and control notifications.
pub const SENSOR_VALUES_CHAR_UUID: Uuid = Uuid::from_u128(0xf3f9c7ce_46ee_4205_89ac_abe64e626c0f);

/// Opcode prefix for resend and accumulation commands.
pub const OPCODE_RECOVERY: u8 = 11;
/// Opcode prefix for sensor mode commands.
pub const OPCODE_SENSOR: u8 = 13;

/// Length of the configuration register frame.
pub const DEVICE_CONFIG_LEN: usize = 10;
/// Length of the clock frame.
pub const CLOCK_FRAME_LEN: usize = 7;
/// Core firmware expects resend frames padded to this size.
pub const CORE_RESEND_FRAME_LEN: usize = 122;

/// Settle delay between arming notifications and the first writes.
pub const SETTLE_DELAY_MS: u64 = 500;
/// How long a scan runs before giving up.
pub const SCAN_PERIOD_MS: u64 = 20_000;

/// Insole advertising payload marker (manufacturer id 0).
pub const INSOLE_PRODUCT_CODE: [u8; 2] = [0x01, 0x12];

/// Family-specific constants: discovery, opcodes and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub product_line: ProductLine,
    /// Substring the advertised name must contain.
    pub name_prefix: &'static str,
    /// Time between consecutive serial numbers.
    pub serial_interval_ms: i64,
    /// Samples requested by a "since last known" request with no elapsed time.
    pub default_latest_count: u16,
    /// Opcode prefix of the get-serial command.
    pub serial_query_opcode: u8,
    /// Samples fetched automatically when the current serial number arrives.
    pub auto_fetch_count: Option<u16>,
}

impl DeviceProfile {
    pub const CORE: Self = Self {
        product_line: ProductLine::Core,
        name_prefix: "CR-",
        serial_interval_ms: 40,
        default_latest_count: 40,
        serial_query_opcode: OPCODE_SENSOR,
        auto_fetch_count: None,
    };

    pub const INSOLE: Self = Self {
        product_line: ProductLine::Insole,
        name_prefix: "CR-",
        serial_interval_ms: 20,
        default_latest_count: 10,
        serial_query_opcode: OPCODE_RECOVERY,
        auto_fetch_count: Some(10),
    };

    pub fn for_line(line: ProductLine) -> Self {
        match line {
            ProductLine::Core => Self::CORE,
            ProductLine::Insole => Self::INSOLE,
        }
    }

    pub fn serial_interval(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.serial_interval_ms)
    }

    /// Service filter passed to discovery. The insole does not advertise its services.
    pub fn scan_filter(&self) -> Vec<Uuid> {
        match self.product_line {
            ProductLine::Core => vec![INFO_SERVICE_UUID, OTHER_SERVICE_UUID],
            ProductLine::Insole => Vec::new(),
        }
    }

    /// Insole firmware does not acknowledge clock writes.
    pub fn clock_write_kind(&self) -> WriteKind {
        match self.product_line {
            ProductLine::Core => WriteKind::Acknowledged,
            ProductLine::Insole => WriteKind::Unacknowledged,
        }
    }
}

/// Command frames written to the device-info characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    SetSensorMode(SensorMode),
    GetCurrentSerialNumber,
    Resend(ResendBatch),
    CancelResend,
    StartAccumulation,
    StopAccumulation,
    ClearAccumulation,
}

impl DeviceCommand {
    pub fn encode(&self, profile: &DeviceProfile) -> Vec<u8> {
        match self {
            Self::SetSensorMode(mode) => vec![OPCODE_SENSOR, mode.to_wire()],
            Self::GetCurrentSerialNumber => vec![profile.serial_query_opcode, 1],
            Self::Resend(batch) => encode_resend(batch, profile),
            Self::CancelResend => vec![OPCODE_RECOVERY, 7],
            Self::StartAccumulation => vec![OPCODE_RECOVERY, 4],
            Self::StopAccumulation => vec![OPCODE_RECOVERY, 6],
            Self::ClearAccumulation => vec![OPCODE_RECOVERY, 3],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetSensorMode(_) => "set-sensor-mode",
            Self::GetCurrentSerialNumber => "get-current-serial",
            Self::Resend(_) => "resend",
            Self::CancelResend => "cancel-resend",
            Self::StartAccumulation => "start-accumulation",
            Self::StopAccumulation => "stop-accumulation",
            Self::ClearAccumulation => "clear-accumulation",
        }
    }
}

/// Resend frame: `[11, 2, (startHi, startLo, lenHi, lenLo) x k]`.
fn encode_resend(batch: &ResendBatch, profile: &DeviceProfile) -> Vec<u8> {
    let requests = batch.requests();
    let mut frame = Vec::with_capacity(CORE_RESEND_FRAME_LEN.max(2 + requests.len() * 4));
    frame.push(OPCODE_RECOVERY);
    frame.push(2);
    for request in requests {
        frame.extend_from_slice(&request.start_serial.to_be_bytes());
        frame.extend_from_slice(&request.length.to_be_bytes());
    }
    if profile.product_line == ProductLine::Core {
        frame.resize(CORE_RESEND_FRAME_LEN, 0);
    }
    frame
}

/// Parse a resend frame back into its requests.
///
/// Zero padding after the last request is ignored, so padded core frames
/// parse the same as unpadded insole ones.
pub fn parse_resend_frame(bytes: &[u8]) -> Result<Vec<ResendRequest>, DecodeError> {
    if bytes.len() < 2 {
        return Err(DecodeError::Truncated {
            kind: "resend",
            expected: 2,
            actual: bytes.len(),
        });
    }
    if bytes[0] != OPCODE_RECOVERY || bytes[1] != 2 {
        return Err(DecodeError::UnknownTag { tag: bytes[0] });
    }

    let mut requests: Vec<ResendRequest> = bytes[2..]
        .chunks_exact(4)
        .map(|c| {
            ResendRequest::new(u16::from_be_bytes([c[0], c[1]]), u16::from_be_bytes([c[2], c[3]]))
        })
        .collect();
    while requests
        .last()
        .is_some_and(|r| r.start_serial == 0 && r.length == 0)
    {
        requests.pop();
    }
    Ok(requests)
}

/// Clock frame: `[year - 2000, month, day, hour, minute, second, centisecond]`.
pub fn encode_clock(now: NaiveDateTime, profile: &DeviceProfile) -> [u8; CLOCK_FRAME_LEN] {
    let centis = match profile.product_line {
        ProductLine::Core => (now.nanosecond() / 10_000_000).min(99) as u8,
        ProductLine::Insole => 0,
    };
    [
        (now.year() - 2000).clamp(0, 255) as u8,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
        centis,
    ]
}

pub fn decode_clock(bytes: &[u8]) -> Result<NaiveDateTime, DecodeError> {
    if bytes.len() < CLOCK_FRAME_LEN {
        return Err(DecodeError::Truncated {
            kind: "clock",
            expected: CLOCK_FRAME_LEN,
            actual: bytes.len(),
        });
    }
    let date = NaiveDate::from_ymd_opt(2000 + bytes[0] as i32, bytes[1] as u32, bytes[2] as u32)
        .ok_or(DecodeError::InvalidField {
            field: "date",
            value: bytes[2],
        })?;
    date.and_hms_milli_opt(
        bytes[3] as u32,
        bytes[4] as u32,
        bytes[5] as u32,
        bytes[6] as u32 * 10,
    )
    .ok_or(DecodeError::InvalidField {
        field: "time",
        value: bytes[3],
    })
}

impl DeviceConfig {
    /// Decode the configuration register.
    ///
    /// ```text
    /// [0]    : battery (0xFF unknown, 0 low, 1 normal, 2 full)
    /// [1]    : side/position index
    /// [2]    : recording mode
    /// [3]    : auto record (1 = on)
    /// [4]    : LED brightness index
    /// [5]    : reserved
    /// [6..8] : log duration, u16 big-endian seconds
    /// [8]    : accelerometer range index
    /// [9]    : gyroscope range index
    /// ```
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < DEVICE_CONFIG_LEN {
            return Err(DecodeError::Truncated {
                kind: "device config",
                expected: DEVICE_CONFIG_LEN,
                actual: bytes.len(),
            });
        }

        fn field<T>(name: &'static str, value: u8, f: impl Fn(u8) -> Option<T>) -> Result<T, DecodeError> {
            f(value).ok_or(DecodeError::InvalidField { field: name, value })
        }

        Ok(Self {
            battery: field("battery", bytes[0], BatteryStatus::from_wire)?,
            side_position: field("side_position", bytes[1], SidePosition::from_wire)?,
            recording_mode: field("recording_mode", bytes[2], RecordingMode::from_wire)?,
            auto_record: bytes[3] == 1,
            led_brightness: field("led_brightness", bytes[4], LedBrightness::from_wire)?,
            log_duration: u16::from_be_bytes([bytes[6], bytes[7]]),
            acc_range: field("acc_range", bytes[8], AccRange::from_wire)?,
            gyro_range: field("gyro_range", bytes[9], GyroRange::from_wire)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; DEVICE_CONFIG_LEN] {
        let duration = self.log_duration.to_be_bytes();
        [
            self.battery.to_wire(),
            self.side_position.to_wire(),
            self.recording_mode.to_wire(),
            u8::from(self.auto_record),
            self.led_brightness.to_wire(),
            0,
            duration[0],
            duration[1],
            self.acc_range.to_wire(),
            self.gyro_range.to_wire(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        let core = DeviceProfile::CORE;
        let insole = DeviceProfile::INSOLE;
        assert_eq!(DeviceCommand::GetCurrentSerialNumber.encode(&core), vec![13, 1]);
        assert_eq!(DeviceCommand::GetCurrentSerialNumber.encode(&insole), vec![11, 1]);
        assert_eq!(
            DeviceCommand::SetSensorMode(SensorMode::Request).encode(&core),
            vec![13, 2]
        );
        assert_eq!(DeviceCommand::CancelResend.encode(&insole), vec![11, 7]);
        assert_eq!(DeviceCommand::StartAccumulation.encode(&core), vec![11, 4]);
        assert_eq!(DeviceCommand::StopAccumulation.encode(&core), vec![11, 6]);
        assert_eq!(DeviceCommand::ClearAccumulation.encode(&core), vec![11, 3]);
    }

    #[test]
    fn test_resend_frame_round_trip() {
        let requests: Vec<ResendRequest> = (0..30u16)
            .map(|i| ResendRequest::new(65_500u16.wrapping_add(i * 7), i + 1))
            .collect();
        let batch = ResendBatch::new(requests.clone()).unwrap();

        let insole = DeviceCommand::Resend(batch.clone()).encode(&DeviceProfile::INSOLE);
        assert_eq!(insole.len(), 2 + 4 * 30);
        assert_eq!(parse_resend_frame(&insole).unwrap(), requests);

        let core = DeviceCommand::Resend(batch).encode(&DeviceProfile::CORE);
        assert_eq!(core.len(), CORE_RESEND_FRAME_LEN);
        assert_eq!(parse_resend_frame(&core).unwrap(), requests);
    }

    #[test]
    fn test_resend_frame_layout() {
        let batch = ResendBatch::single(ResendRequest::new(0x0102, 0x0304));
        let frame = DeviceCommand::Resend(batch).encode(&DeviceProfile::INSOLE);
        assert_eq!(frame, vec![11, 2, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_device_config_round_trip() {
        let config = DeviceConfig {
            battery: BatteryStatus::Normal,
            side_position: SidePosition::RightInstep,
            recording_mode: RecordingMode::Recording,
            auto_record: true,
            led_brightness: LedBrightness::Weak,
            log_duration: 300,
            acc_range: AccRange::G4,
            gyro_range: GyroRange::Dps500,
        };
        let bytes = config.to_bytes();
        assert_eq!(bytes, [1, 3, 1, 1, 1, 0, 0x01, 0x2C, 1, 1]);
        assert_eq!(DeviceConfig::from_bytes(&bytes).unwrap(), config);
    }

    #[test]
    fn test_device_config_rejects_bad_input() {
        assert!(matches!(
            DeviceConfig::from_bytes(&[0xFF; 4]),
            Err(DecodeError::Truncated { expected: 10, actual: 4, .. })
        ));
        let mut bytes = DeviceConfig::default().to_bytes();
        bytes[8] = 9;
        assert_eq!(
            DeviceConfig::from_bytes(&bytes),
            Err(DecodeError::InvalidField {
                field: "acc_range",
                value: 9
            })
        );
    }

    #[test]
    fn test_clock_frame() {
        let now = NaiveDate::from_ymd_opt(2024, 7, 9)
            .and_then(|d| d.and_hms_milli_opt(13, 45, 7, 560))
            .unwrap();
        let core = encode_clock(now, &DeviceProfile::CORE);
        assert_eq!(core, [24, 7, 9, 13, 45, 7, 56]);
        let insole = encode_clock(now, &DeviceProfile::INSOLE);
        assert_eq!(insole[6], 0);

        assert_eq!(decode_clock(&core).unwrap(), now);
        assert!(decode_clock(&core[..3]).is_err());
    }

    #[test]
    fn test_profiles() {
        assert_eq!(DeviceProfile::CORE.scan_filter().len(), 2);
        assert!(DeviceProfile::INSOLE.scan_filter().is_empty());
        assert_eq!(DeviceProfile::CORE.clock_write_kind(), WriteKind::Acknowledged);
        assert_eq!(
            DeviceProfile::INSOLE.serial_interval(),
            TimeDelta::milliseconds(20)
        );
    }
}
