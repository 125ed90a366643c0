//! Frame Decoder
//!
//! Turns sensor-values notifications into typed samples or control events.
//! Decoding is pure: everything it needs arrives in [`DecodeContext`].
//!
//! # Telemetry layout (tags 54/55/56)
//!
//! ```text
//! [0]    : tag
//! [1..3] : serial number (u16 big-endian), shared by every sample
//! [3]    : hour
//! [4]    : minute
//! [5]    : second
//! [6]    : centisecond
//! [7]    : dropped frame count
//! [8..]  : sample slots, slot 0 is the newest
//! ```
//!
//! Slot contents are big-endian 16-bit words whose order depends on the
//! product line and tag, see [`FrameKind::layout`].

use crate::domain::clock::anchor_time_of_day;
use crate::domain::models::{
    AccRange, ControlEvent, CoreSample, GyroRange, InsoleSample, PressureChannels, ProductLine,
    SampleBatch, Side, SidePosition, Triad,
};
use crate::domain::orientation::{self, Quaternion, Vector3};
use crate::error::DecodeError;
use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use tracing::trace;

/// Fixed-point scale of gyro and accelerometer words.
const FIXED_POINT_SCALE: f64 = 32768.0;

const HEADER_LEN: usize = 8;

/// Frame types, resolved once from the leading byte and the product line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Core tag 54: gyro and accelerometer, four samples.
    CoreInertial,
    /// Core tag 55: quaternion, gyro and accelerometer, two samples.
    CoreQuaternionPair,
    /// Core tag 56: quaternion, gyro and accelerometer, four samples.
    CoreQuaternion,
    /// Insole tag 54: six pressure channels plus inertial data, four samples.
    InsoleInertial,
    /// Insole tag 55: four pressure channels, eight samples.
    InsolePressure,
    /// Insole tag 56: six pressure channels, inertial data and quaternion, two samples.
    InsoleQuaternion,
    /// Tag 51.
    Status,
    /// Tag 52.
    Acknowledgement,
    /// Tag 53, subtype 1.
    CurrentSerialNumber,
    /// Tag 53, subtype 2.
    RangeNotFound,
}

/// Word positions within one telemetry sample slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub samples: usize,
    pub stride: usize,
    pub pressure_channels: usize,
    pub quaternion_offset: Option<usize>,
    pub gyro_offset: Option<usize>,
    pub acc_offset: Option<usize>,
}

impl SlotLayout {
    pub fn min_len(&self) -> usize {
        HEADER_LEN + self.samples * self.stride
    }
}

impl FrameKind {
    pub fn resolve(bytes: &[u8], line: ProductLine) -> Result<Self, DecodeError> {
        let tag = *bytes.first().ok_or(DecodeError::Empty)?;
        let kind = match (tag, line) {
            (51, _) => Self::Status,
            (52, _) => Self::Acknowledgement,
            (53, _) => match bytes.get(1) {
                Some(1) => Self::CurrentSerialNumber,
                Some(2) => Self::RangeNotFound,
                Some(&value) => {
                    return Err(DecodeError::InvalidField {
                        field: "control subtype",
                        value,
                    })
                }
                None => {
                    return Err(DecodeError::Truncated {
                        kind: "serial control",
                        expected: 2,
                        actual: bytes.len(),
                    })
                }
            },
            (54, ProductLine::Core) => Self::CoreInertial,
            (55, ProductLine::Core) => Self::CoreQuaternionPair,
            (56, ProductLine::Core) => Self::CoreQuaternion,
            (54, ProductLine::Insole) => Self::InsoleInertial,
            (55, ProductLine::Insole) => Self::InsolePressure,
            (56, ProductLine::Insole) => Self::InsoleQuaternion,
            (tag, _) => return Err(DecodeError::UnknownTag { tag }),
        };
        Ok(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CoreInertial => "core inertial",
            Self::CoreQuaternionPair => "core quaternion pair",
            Self::CoreQuaternion => "core quaternion",
            Self::InsoleInertial => "insole inertial",
            Self::InsolePressure => "insole pressure",
            Self::InsoleQuaternion => "insole quaternion",
            Self::Status => "status",
            Self::Acknowledgement => "acknowledgement",
            Self::CurrentSerialNumber => "current serial",
            Self::RangeNotFound => "range not found",
        }
    }

    /// Slot layout for telemetry kinds, `None` for control frames.
    pub fn layout(&self) -> Option<SlotLayout> {
        let layout = match self {
            Self::CoreInertial => SlotLayout {
                samples: 4,
                stride: 12,
                pressure_channels: 0,
                quaternion_offset: None,
                gyro_offset: Some(0),
                acc_offset: Some(6),
            },
            Self::CoreQuaternionPair | Self::CoreQuaternion => SlotLayout {
                samples: if *self == Self::CoreQuaternionPair { 2 } else { 4 },
                stride: 21,
                pressure_channels: 0,
                quaternion_offset: Some(0),
                gyro_offset: Some(8),
                acc_offset: Some(14),
            },
            Self::InsoleInertial => SlotLayout {
                samples: 4,
                stride: 24,
                pressure_channels: 6,
                quaternion_offset: None,
                gyro_offset: Some(12),
                acc_offset: Some(18),
            },
            Self::InsolePressure => SlotLayout {
                samples: 8,
                stride: 8,
                pressure_channels: 4,
                quaternion_offset: None,
                gyro_offset: None,
                acc_offset: None,
            },
            Self::InsoleQuaternion => SlotLayout {
                samples: 2,
                stride: 32,
                pressure_channels: 6,
                quaternion_offset: Some(24),
                gyro_offset: Some(12),
                acc_offset: Some(18),
            },
            Self::Status | Self::Acknowledgement => return None,
            Self::CurrentSerialNumber | Self::RangeNotFound => return None,
        };
        Some(layout)
    }

    pub fn min_len(&self) -> usize {
        match self {
            Self::Status | Self::Acknowledgement => 2,
            Self::CurrentSerialNumber => 4,
            Self::RangeNotFound => 6,
            telemetry => telemetry.layout().map_or(HEADER_LEN, |l| l.min_len()),
        }
    }
}

/// Everything a decode needs besides the bytes.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    pub product_line: ProductLine,
    pub side_position: SidePosition,
    pub acc_range: AccRange,
    pub gyro_range: GyroRange,
    pub calibrated_pressure: bool,
    /// Time between consecutive serial numbers.
    pub serial_interval: TimeDelta,
    /// Host clock, supplies the calendar date.
    pub host_now: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Samples(SampleBatch),
    Control(ControlEvent),
}

/// Calibrated pressure sensor transfer function: ADC counts to Newtons.
pub fn milli_volt_to_newton(raw: u16) -> f64 {
    let milli_volts = raw as f64 * 3.3 / 4096.0 * 1000.0;
    ((milli_volts + 360.02) / 300.03).exp()
}

pub fn decode(bytes: &[u8], ctx: &DecodeContext) -> Result<DecodedFrame, DecodeError> {
    let kind = FrameKind::resolve(bytes, ctx.product_line)?;
    let expected = kind.min_len();
    if bytes.len() < expected {
        return Err(DecodeError::Truncated {
            kind: kind.name(),
            expected,
            actual: bytes.len(),
        });
    }
    trace!("Decoding {} frame: {:02X?}", kind.name(), bytes);

    let Some(layout) = kind.layout() else {
        return Ok(DecodedFrame::Control(decode_control(kind, bytes)));
    };

    let header = Header::parse(bytes, ctx)?;
    // Per-sample spacing can be fractional milliseconds (20 ms / 8).
    let spacing_us = ctx.serial_interval.num_microseconds().unwrap_or(0) / layout.samples as i64;

    let batch = match ctx.product_line {
        ProductLine::Core => {
            let samples = (0..layout.samples)
                .rev()
                .map(|slot| {
                    let words = SlotReader::new(bytes, &layout, slot);
                    let timestamp = header.base_time - TimeDelta::microseconds(spacing_us * slot as i64);
                    core_sample(&header, &layout, &words, slot, timestamp, ctx)
                })
                .collect();
            SampleBatch::Core(samples)
        }
        ProductLine::Insole => {
            let samples = (0..layout.samples)
                .rev()
                .map(|slot| {
                    let words = SlotReader::new(bytes, &layout, slot);
                    let end_time = header.base_time - TimeDelta::microseconds(spacing_us * slot as i64);
                    let start_time = end_time - TimeDelta::microseconds(spacing_us);
                    insole_sample(&header, &layout, &words, slot, start_time, end_time, ctx)
                })
                .collect();
            SampleBatch::Insole(samples)
        }
    };
    Ok(DecodedFrame::Samples(batch))
}

fn decode_control(kind: FrameKind, bytes: &[u8]) -> ControlEvent {
    match kind {
        FrameKind::Status => match bytes[1] {
            3 => ControlEvent::AccumulationStarted,
            4 => ControlEvent::RecoveryRejected,
            code => ControlEvent::Status { code },
        },
        FrameKind::Acknowledgement => ControlEvent::Acknowledged { opcode: bytes[1] },
        FrameKind::CurrentSerialNumber => ControlEvent::CurrentSerialNumber {
            serial: u16::from_be_bytes([bytes[2], bytes[3]]),
        },
        _ => ControlEvent::RangeNotFound {
            start_serial: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
        },
    }
}

struct Header {
    serial_number: u16,
    base_time: NaiveDateTime,
    dropped_frames: u8,
}

impl Header {
    fn parse(bytes: &[u8], ctx: &DecodeContext) -> Result<Self, DecodeError> {
        let centis = bytes[6];
        if centis > 99 {
            return Err(DecodeError::InvalidField {
                field: "centisecond",
                value: centis,
            });
        }
        let device_time = NaiveTime::from_hms_milli_opt(
            bytes[3] as u32,
            bytes[4] as u32,
            bytes[5] as u32,
            centis as u32 * 10,
        )
        .ok_or(DecodeError::InvalidField {
            field: "time of day",
            value: bytes[3],
        })?;

        Ok(Self {
            serial_number: u16::from_be_bytes([bytes[1], bytes[2]]),
            base_time: anchor_time_of_day(ctx.host_now, device_time),
            dropped_frames: bytes[7],
        })
    }
}

/// Reads big-endian words out of one sample slot.
struct SlotReader<'a> {
    slot: &'a [u8],
}

impl<'a> SlotReader<'a> {
    fn new(bytes: &'a [u8], layout: &SlotLayout, index: usize) -> Self {
        let start = HEADER_LEN + index * layout.stride;
        Self {
            slot: &bytes[start..start + layout.stride],
        }
    }

    fn i16_at(&self, offset: usize) -> i16 {
        i16::from_be_bytes([self.slot[offset], self.slot[offset + 1]])
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.slot[offset], self.slot[offset + 1]])
    }

    fn vector(&self, offset: usize) -> Vector3 {
        Vector3::new(
            self.i16_at(offset) as f64,
            self.i16_at(offset + 2) as f64,
            self.i16_at(offset + 4) as f64,
        )
    }

    /// Scaled reading and its [-1, 1] counterpart.
    fn triad(&self, offset: Option<usize>, full_scale: f64) -> Triad {
        let Some(offset) = offset else {
            return Triad::default();
        };
        let normalized = self.vector(offset).scale(1.0 / FIXED_POINT_SCALE);
        Triad {
            value: normalized.scale(full_scale),
            normalized,
        }
    }

    fn quaternion(&self, offset: Option<usize>) -> Quaternion {
        match offset {
            Some(o) => Quaternion::from_fixed_point(
                self.i16_at(o),
                self.i16_at(o + 2),
                self.i16_at(o + 4),
                self.i16_at(o + 6),
            ),
            None => Quaternion::default(),
        }
    }

    fn pressure(&self, channels: usize, side: Side, calibrated: bool) -> PressureChannels {
        let read = |index: usize| {
            let raw = self.u16_at(index * 2);
            if calibrated {
                milli_volt_to_newton(raw)
            } else {
                raw as f64
            }
        };

        // Words 1/2 (and 3/4) form outer/inner pairs, mirrored on the right foot.
        let mirrored = side == Side::Right;
        let pair = |a: usize, b: usize| if mirrored { (read(b), read(a)) } else { (read(a), read(b)) };

        if channels == 6 {
            let (metatarsal_outer, metatarsal_inner) = pair(1, 2);
            let (midfoot_outer, midfoot_inner) = pair(3, 4);
            PressureChannels {
                toe: read(0),
                metatarsal_outer,
                metatarsal_inner,
                midfoot_outer: Some(midfoot_outer),
                midfoot_inner: Some(midfoot_inner),
                heel: read(5),
            }
        } else {
            let (metatarsal_outer, metatarsal_inner) = pair(1, 2);
            PressureChannels {
                toe: read(0),
                metatarsal_outer,
                metatarsal_inner,
                midfoot_outer: None,
                midfoot_inner: None,
                heel: read(3),
            }
        }
    }
}

fn core_sample(
    header: &Header,
    layout: &SlotLayout,
    words: &SlotReader<'_>,
    slot: usize,
    timestamp: NaiveDateTime,
    ctx: &DecodeContext,
) -> CoreSample {
    let quaternion = words.quaternion(layout.quaternion_offset);
    let euler = orientation::euler_angles(quaternion.to_device_axes());
    CoreSample {
        side_position: ctx.side_position,
        serial_number: header.serial_number,
        position: slot,
        timestamp,
        quaternion,
        euler,
        normalized_euler: euler.normalized(),
        gravity: orientation::gravity(quaternion),
        gyro: words.triad(layout.gyro_offset, ctx.gyro_range.full_scale()),
        acc: words.triad(layout.acc_offset, ctx.acc_range.full_scale()),
        resend: false,
        dropped_frames: header.dropped_frames,
    }
}

fn insole_sample(
    header: &Header,
    layout: &SlotLayout,
    words: &SlotReader<'_>,
    slot: usize,
    start_time: NaiveDateTime,
    end_time: NaiveDateTime,
    ctx: &DecodeContext,
) -> InsoleSample {
    InsoleSample {
        side_position: ctx.side_position,
        serial_number: header.serial_number,
        position: slot,
        start_time,
        end_time,
        pressure: words.pressure(
            layout.pressure_channels,
            ctx.side_position.side(),
            ctx.calibrated_pressure,
        ),
        gyro: words.triad(layout.gyro_offset, ctx.gyro_range.full_scale()),
        acc: words.triad(layout.acc_offset, ctx.acc_range.full_scale()),
        quaternion: words.quaternion(layout.quaternion_offset),
        resend: false,
        dropped_frames: header.dropped_frames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn host_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 17)
            .and_then(|d| d.and_hms_opt(10, 20, 31))
            .unwrap()
    }

    fn ctx(line: ProductLine, side_position: SidePosition) -> DecodeContext {
        DecodeContext {
            product_line: line,
            side_position,
            acc_range: AccRange::G16,
            gyro_range: GyroRange::Dps2000,
            calibrated_pressure: false,
            serial_interval: TimeDelta::milliseconds(match line {
                ProductLine::Core => 40,
                ProductLine::Insole => 20,
            }),
            host_now: host_now(),
        }
    }

    /// Telemetry frame stamped 10:20:30.50 whose slot words are `fill(slot, word)`.
    fn telemetry(tag: u8, line: ProductLine, fill: impl Fn(usize, usize) -> i16) -> Vec<u8> {
        let kind = FrameKind::resolve(&[tag], line).unwrap();
        let layout = kind.layout().unwrap();
        let mut bytes = vec![tag, 0x12, 0x34, 10, 20, 30, 50, 2];
        for slot in 0..layout.samples {
            let mut slot_bytes = Vec::with_capacity(layout.stride);
            for word in 0..layout.stride / 2 {
                slot_bytes.extend_from_slice(&fill(slot, word).to_be_bytes());
            }
            slot_bytes.resize(layout.stride, 0);
            bytes.extend_from_slice(&slot_bytes);
        }
        assert_eq!(bytes.len(), layout.min_len());
        bytes
    }

    fn core_samples(frame: DecodedFrame) -> Vec<CoreSample> {
        match frame {
            DecodedFrame::Samples(SampleBatch::Core(samples)) => samples,
            other => panic!("expected core samples, got {:?}", other),
        }
    }

    fn insole_samples(frame: DecodedFrame) -> Vec<InsoleSample> {
        match frame {
            DecodedFrame::Samples(SampleBatch::Insole(samples)) => samples,
            other => panic!("expected insole samples, got {:?}", other),
        }
    }

    #[test]
    fn test_core_frames_are_chronological() {
        let context = ctx(ProductLine::Core, SidePosition::LeftPlantar);
        for (tag, count) in [(54u8, 4usize), (55, 2), (56, 4)] {
            let bytes = telemetry(tag, ProductLine::Core, |slot, _| slot as i16);
            let samples = core_samples(decode(&bytes, &context).unwrap());

            assert_eq!(samples.len(), count, "tag {}", tag);
            assert!(samples.iter().all(|s| s.serial_number == 0x1234));
            assert!(samples.iter().all(|s| s.dropped_frames == 2));
            assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

            let positions: Vec<usize> = samples.iter().map(|s| s.position).collect();
            let expected: Vec<usize> = (0..count).rev().collect();
            assert_eq!(positions, expected);

            let newest = samples.last().unwrap();
            let base = NaiveDate::from_ymd_opt(2024, 5, 17)
                .and_then(|d| d.and_hms_milli_opt(10, 20, 30, 500))
                .unwrap();
            assert_eq!(newest.timestamp, base);
        }
    }

    #[test]
    fn test_core_92_byte_frame_values() {
        let context = ctx(ProductLine::Core, SidePosition::RightInstep);
        // identity quaternion, gyro x = 16384 (half scale), acc z = -32768
        let bytes = telemetry(56, ProductLine::Core, |_, word| match word {
            0 => 16384,
            4 => 16384,
            9 => i16::MIN,
            _ => 0,
        });
        assert_eq!(bytes.len(), 92);
        let samples = core_samples(decode(&bytes, &context).unwrap());

        let s = &samples[0];
        assert_eq!(s.quaternion, Quaternion::IDENTITY);
        assert!(s.euler.x.abs() < 1e-9);
        assert!(s.euler.y.abs() < 1e-9);
        assert!((s.euler.z.abs() - 180.0).abs() < 1e-9);
        assert!((s.normalized_euler.z.abs() - 1.0).abs() < 1e-9);
        assert!(s.gravity.x.abs() < 1e-9);
        assert!(s.gravity.y.abs() < 1e-9);
        assert!((s.gravity.z - 1.0).abs() < 1e-9);
        assert!((s.gyro.value.x - 1000.0).abs() < 1e-9);
        assert!((s.gyro.normalized.x - 0.5).abs() < 1e-9);
        assert!((s.acc.value.z + 16.0).abs() < 1e-9);
        assert!((s.acc.normalized.z + 1.0).abs() < 1e-9);
        assert_eq!(s.side_position, SidePosition::RightInstep);
        assert!(!s.resend);

        // spacing of 40 ms / 4 between slots
        let gap = samples[1].timestamp - samples[0].timestamp;
        assert_eq!(gap, TimeDelta::milliseconds(10));
    }

    #[test]
    fn test_core_rest_pose_orientation() {
        let context = ctx(ProductLine::Core, SidePosition::LeftPlantar);
        // quaternion z word at full scale
        let bytes = telemetry(55, ProductLine::Core, |_, word| if word == 3 { 16384 } else { 0 });
        for s in core_samples(decode(&bytes, &context).unwrap()) {
            assert!(s.euler.x.abs() < 1e-9);
            assert!(s.euler.y.abs() < 1e-9);
            assert!(s.euler.z.abs() < 1e-9);
            assert!(s.gravity.x.abs() < 1e-9);
            assert!(s.gravity.y.abs() < 1e-9);
            assert!((s.gravity.z - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_insole_frames() {
        let context = ctx(ProductLine::Insole, SidePosition::LeftPlantar);
        for (tag, count, channels) in [(54u8, 4usize, 6), (55, 8, 4), (56, 2, 6)] {
            let bytes = telemetry(tag, ProductLine::Insole, |_, word| word as i16 + 1);
            let samples = insole_samples(decode(&bytes, &context).unwrap());
            assert_eq!(samples.len(), count, "tag {}", tag);
            assert!(samples.windows(2).all(|w| w[0].end_time < w[1].end_time));
            assert!(samples.iter().all(|s| s.start_time < s.end_time));
            assert_eq!(samples[0].pressure.midfoot_outer.is_some(), channels == 6);
        }

        // 20 ms / 8 slots
        let bytes = telemetry(55, ProductLine::Insole, |_, _| 0);
        let samples = insole_samples(decode(&bytes, &context).unwrap());
        assert_eq!(
            samples[1].end_time - samples[0].end_time,
            TimeDelta::microseconds(2500)
        );
        assert_eq!(samples[0].quaternion, Quaternion::default());
    }

    #[test]
    fn test_insole_side_remap() {
        let bytes = telemetry(54, ProductLine::Insole, |_, word| word as i16 + 1);
        let left = insole_samples(
            decode(&bytes, &ctx(ProductLine::Insole, SidePosition::LeftPlantar)).unwrap(),
        );
        let right = insole_samples(
            decode(&bytes, &ctx(ProductLine::Insole, SidePosition::RightPlantar)).unwrap(),
        );
        let (l, r) = (left[0].pressure, right[0].pressure);

        assert_eq!(l.toe, 1.0);
        assert_eq!(l.metatarsal_outer, 2.0);
        assert_eq!(l.metatarsal_inner, 3.0);
        assert_eq!(l.midfoot_outer, Some(4.0));
        assert_eq!(l.midfoot_inner, Some(5.0));
        assert_eq!(l.heel, 6.0);

        assert_eq!(r.toe, l.toe);
        assert_eq!(r.heel, l.heel);
        assert_eq!(r.metatarsal_outer, l.metatarsal_inner);
        assert_eq!(r.metatarsal_inner, l.metatarsal_outer);
        assert_eq!(r.midfoot_outer, l.midfoot_inner);
        assert_eq!(r.midfoot_inner, l.midfoot_outer);
    }

    #[test]
    fn test_calibrated_pressure() {
        let mut context = ctx(ProductLine::Insole, SidePosition::LeftPlantar);
        context.calibrated_pressure = true;
        let bytes = telemetry(55, ProductLine::Insole, |_, _| 1000);
        let samples = insole_samples(decode(&bytes, &context).unwrap());
        assert!((samples[0].pressure.toe - milli_volt_to_newton(1000)).abs() < 1e-12);
    }

    #[test]
    fn test_milli_volt_to_newton_is_monotonic() {
        let mut previous = milli_volt_to_newton(0);
        for raw in 1..=4095u16 {
            let value = milli_volt_to_newton(raw);
            assert!(value > previous, "not increasing at {}", raw);
            previous = value;
        }
    }

    #[test]
    fn test_control_frames() {
        let context = ctx(ProductLine::Core, SidePosition::Both);
        let control = |bytes: &[u8]| match decode(bytes, &context).unwrap() {
            DecodedFrame::Control(event) => event,
            other => panic!("expected control, got {:?}", other),
        };

        assert_eq!(control(&[51, 3]), ControlEvent::AccumulationStarted);
        assert_eq!(control(&[51, 4]), ControlEvent::RecoveryRejected);
        assert_eq!(control(&[51, 9]), ControlEvent::Status { code: 9 });
        assert_eq!(control(&[52, 11]), ControlEvent::Acknowledged { opcode: 11 });
        assert_eq!(
            control(&[53, 1, 0x01, 0x00]),
            ControlEvent::CurrentSerialNumber { serial: 256 }
        );
        assert_eq!(
            control(&[53, 2, 0xFF, 0xFE, 0x00, 0x05]),
            ControlEvent::RangeNotFound {
                start_serial: 65534,
                length: 5
            }
        );
    }

    #[test]
    fn test_malformed_frames() {
        for line in [ProductLine::Core, ProductLine::Insole] {
            let context = ctx(line, SidePosition::LeftPlantar);
            for tag in 51u8..=56 {
                assert!(
                    matches!(decode(&[tag], &context), Err(DecodeError::Truncated { .. })),
                    "tag {} accepted a single byte",
                    tag
                );
            }
            assert_eq!(decode(&[], &context), Err(DecodeError::Empty));
            assert_eq!(
                decode(&[99, 0, 0], &context),
                Err(DecodeError::UnknownTag { tag: 99 })
            );
        }

        let context = ctx(ProductLine::Core, SidePosition::LeftPlantar);
        let bytes = telemetry(56, ProductLine::Core, |_, _| 0);
        assert_eq!(
            decode(&bytes[..91], &context),
            Err(DecodeError::Truncated {
                kind: "core quaternion",
                expected: 92,
                actual: 91
            })
        );
        assert!(matches!(
            decode(&[53, 1, 0], &context),
            Err(DecodeError::Truncated { expected: 4, .. })
        ));
        assert!(matches!(
            decode(&[53, 7], &context),
            Err(DecodeError::InvalidField { value: 7, .. })
        ));

        let mut bad_clock = bytes.clone();
        bad_clock[3] = 24;
        assert!(matches!(
            decode(&bad_clock, &context),
            Err(DecodeError::InvalidField { .. })
        ));
    }
}
