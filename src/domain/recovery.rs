//! Gap-Recovery Manager
//!
//! Tracks the last confirmed serial number and sizes resend requests from it.

use crate::domain::models::{ResendBatch, ResendRequest};
use chrono::{NaiveDateTime, TimeDelta};
use tracing::debug;

const SERIAL_MODULUS: i64 = 1 << 16;

/// How long a resend window may stay unanswered past its own duration.
const RESEND_GRACE_MS: i64 = 5_000;

/// Whether `serial` comes after `anchor` on the wrapping serial counter.
pub fn is_newer(serial: u16, anchor: u16) -> bool {
    serial != anchor && serial.wrapping_sub(anchor) < 0x8000
}

/// What the session should send for a "latest N samples" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatestPlan {
    /// No serial number known yet, ask the device for its current one.
    QueryCurrentSerial,
    Request(ResendRequest),
}

/// Last observed serial number and the host instant it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRecoveryState {
    pub serial_number: u16,
    pub observed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy)]
struct OutstandingWindow {
    request: ResendRequest,
    requested_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct GapRecoveryManager {
    interval: TimeDelta,
    default_latest_count: u16,
    state: Option<GapRecoveryState>,
    outstanding: Vec<OutstandingWindow>,
}

impl GapRecoveryManager {
    pub fn new(interval: TimeDelta, default_latest_count: u16) -> Self {
        Self {
            interval,
            default_latest_count,
            state: None,
            outstanding: Vec::new(),
        }
    }

    pub fn state(&self) -> Option<GapRecoveryState> {
        self.state
    }

    /// Record a serial number seen at `at`, either from a sample or a
    /// current-serial reply.
    pub fn observe(&mut self, serial_number: u16, at: NaiveDateTime) {
        self.state = Some(GapRecoveryState {
            serial_number,
            observed_at: at,
        });
    }

    /// Size a request for the latest `count` samples, or everything since the
    /// last observation when `count` is 0.
    pub fn plan_latest(&self, count: u16, now: NaiveDateTime) -> LatestPlan {
        let Some(state) = self.state else {
            return LatestPlan::QueryCurrentSerial;
        };
        let interval_ms = self.interval.num_milliseconds().max(1);
        let elapsed_ms = (now - state.observed_at).num_milliseconds();
        let next = state.serial_number.wrapping_add(1) as i64;

        let request = if count > 0 {
            // serial that was current `count` intervals ago
            let start_offset_ms = elapsed_ms - count as i64 * interval_ms;
            let start = (next + start_offset_ms / interval_ms).rem_euclid(SERIAL_MODULUS);
            ResendRequest::new(start as u16, count)
        } else if elapsed_ms > 0 {
            let length = (elapsed_ms / interval_ms).clamp(1, u16::MAX as i64);
            ResendRequest::new(next as u16, length as u16)
        } else {
            ResendRequest::new(next as u16, self.default_latest_count)
        };
        debug!(
            "Planned latest request: start={} length={} (last serial {}, {} ms ago)",
            request.start_serial, request.length, state.serial_number, elapsed_ms
        );
        LatestPlan::Request(request)
    }

    /// Remember the windows of a resend batch sent at `now`.
    pub fn begin_recovery(&mut self, batch: &ResendBatch, now: NaiveDateTime) {
        self.outstanding.extend(
            batch
                .requests()
                .iter()
                .filter(|r| r.length > 0)
                .map(|&request| OutstandingWindow {
                    request,
                    requested_at: now,
                }),
        );
    }

    /// Forget every outstanding window.
    pub fn cancel(&mut self) {
        if !self.outstanding.is_empty() {
            debug!("Dropping {} outstanding resend windows", self.outstanding.len());
        }
        self.outstanding.clear();
    }

    pub fn outstanding(&self) -> Vec<ResendRequest> {
        self.outstanding.iter().map(|w| w.request).collect()
    }

    fn expire(&mut self, now: NaiveDateTime) {
        let interval = self.interval;
        let before = self.outstanding.len();
        self.outstanding.retain(|w| {
            let budget =
                interval * w.request.length as i32 + TimeDelta::milliseconds(RESEND_GRACE_MS);
            now - w.requested_at <= budget
        });
        if self.outstanding.len() != before {
            debug!(
                "Expired {} unanswered resend windows",
                before - self.outstanding.len()
            );
        }
    }

    /// Retire the window `serial` closes, if any.
    pub fn settle(&mut self, serial: u16) {
        self.outstanding
            .retain(|w| w.request.last_serial() != Some(serial));
    }

    /// Whether a frame carrying `serial` answers an outstanding resend request.
    ///
    /// Only serials inside a window and not newer than the last observed one
    /// count. Anything newer is live data, even when a window covers it.
    pub fn classify_resend(&mut self, serial: u16, now: NaiveDateTime) -> bool {
        self.expire(now);
        let in_window = self.outstanding.iter().any(|w| w.request.contains(serial));
        if !in_window {
            return false;
        }
        self.settle(serial);
        match self.state {
            Some(state) => !is_newer(serial, state.serial_number),
            None => false,
        }
    }

    /// Serial numbers reported missing by a range-not-found frame, one by one.
    pub fn missing_serials(start_serial: u16, length: u16) -> impl Iterator<Item = u16> {
        (0..length).map(move |i| start_serial.wrapping_add(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(8, 0, 0))
            .unwrap()
    }

    fn core() -> GapRecoveryManager {
        GapRecoveryManager::new(TimeDelta::milliseconds(40), 40)
    }

    #[test]
    fn test_unknown_serial_queries_device() {
        assert_eq!(core().plan_latest(50, t0()), LatestPlan::QueryCurrentSerial);
    }

    #[test]
    fn test_extrapolates_latest_window() {
        let mut manager = core();
        manager.observe(100, t0());
        let now = t0() + TimeDelta::milliseconds(50 * 40);
        assert_eq!(
            manager.plan_latest(50, now),
            LatestPlan::Request(ResendRequest::new(101, 50))
        );

        // 10 more intervals later the window slides by 10
        let later = now + TimeDelta::milliseconds(10 * 40);
        assert_eq!(
            manager.plan_latest(50, later),
            LatestPlan::Request(ResendRequest::new(111, 50))
        );
    }

    #[test]
    fn test_extrapolation_wraps() {
        let mut manager = core();
        manager.observe(65535, t0());
        let now = t0() + TimeDelta::milliseconds(20 * 40);
        assert_eq!(
            manager.plan_latest(10, now),
            LatestPlan::Request(ResendRequest::new(10, 10))
        );

        // asking for more than has elapsed reaches back before the last serial
        manager.observe(2, t0());
        assert_eq!(
            manager.plan_latest(5, t0()),
            LatestPlan::Request(ResendRequest::new(65534, 5))
        );
    }

    #[test]
    fn test_since_last_known() {
        let mut manager = GapRecoveryManager::new(TimeDelta::milliseconds(20), 10);
        manager.observe(500, t0());
        let now = t0() + TimeDelta::milliseconds(30 * 20 + 7);
        assert_eq!(
            manager.plan_latest(0, now),
            LatestPlan::Request(ResendRequest::new(501, 30))
        );
        assert_eq!(
            manager.plan_latest(0, t0()),
            LatestPlan::Request(ResendRequest::new(501, 10))
        );
        // less than one interval still asks for one sample
        assert_eq!(
            manager.plan_latest(0, t0() + TimeDelta::milliseconds(5)),
            LatestPlan::Request(ResendRequest::new(501, 1))
        );
    }

    #[test]
    fn test_resend_windows_retire() {
        let mut manager = core();
        manager.observe(400, t0());
        let batch = ResendBatch::new(vec![
            ResendRequest::new(65535, 2),
            ResendRequest::new(300, 1),
        ])
        .unwrap();
        manager.begin_recovery(&batch, t0());

        assert!(!manager.classify_resend(10, t0()));
        assert!(manager.classify_resend(65535, t0()));
        assert_eq!(manager.outstanding().len(), 2);
        assert!(manager.classify_resend(0, t0()));
        assert_eq!(manager.outstanding(), vec![ResendRequest::new(300, 1)]);
        assert!(!manager.classify_resend(0, t0()));

        manager.cancel();
        assert!(!manager.classify_resend(300, t0()));
    }

    #[test]
    fn test_newer_serials_are_live() {
        let mut manager = GapRecoveryManager::new(TimeDelta::milliseconds(20), 10);
        manager.observe(500, t0());
        manager.begin_recovery(&ResendBatch::single(ResendRequest::new(500, 10)), t0());

        // live frames overtaking the window move the anchor
        for serial in 501..=505 {
            assert!(!manager.classify_resend(serial, t0()));
            manager.observe(serial, t0());
        }
        assert_eq!(manager.state().map(|s| s.serial_number), Some(505));

        // the device answering the window afterwards
        assert!(manager.classify_resend(500, t0()));
        assert!(manager.classify_resend(503, t0()));
        assert!(!manager.classify_resend(509, t0()));
        assert!(manager.outstanding().is_empty());
    }

    #[test]
    fn test_unanswered_windows_expire() {
        let mut manager = core();
        manager.observe(100, t0());
        manager.begin_recovery(&ResendBatch::single(ResendRequest::new(50, 10)), t0());

        // 10 x 40 ms plus the grace period is still in time
        let deadline = t0() + TimeDelta::milliseconds(400 + RESEND_GRACE_MS);
        assert!(manager.classify_resend(51, deadline));
        assert!(!manager.classify_resend(52, deadline + TimeDelta::milliseconds(1)));
        assert!(manager.outstanding().is_empty());
    }

    #[test]
    fn test_is_newer_wraps() {
        assert!(is_newer(1, 65535));
        assert!(!is_newer(65535, 1));
        assert!(!is_newer(7, 7));
        assert!(is_newer(0x8000 - 1, 0));
        assert!(!is_newer(0x8000, 0));
    }

    #[test]
    fn test_missing_serials_wrap() {
        let serials: Vec<u16> = GapRecoveryManager::missing_serials(65534, 4).collect();
        assert_eq!(serials, vec![65534, 65535, 0, 1]);
        assert_eq!(GapRecoveryManager::missing_serials(7, 0).count(), 0);
    }
}
