//! Connection State Machine
//!
//! Owns the device identity and connection status, drives scan, connect and
//! disconnect calls on the transport, and sequences the post-connect setup:
//! service discovery, notification arming, then two settle-delayed writes.

use crate::domain::models::{ConnectionStatus, DeviceIdentity, SessionEvent};
use crate::error::{SessionError, TransportError};
use crate::infrastructure::bluetooth::protocol::{
    DeviceProfile, OTHER_SERVICE_UUID, SCAN_PERIOD_MS, SENSOR_VALUES_CHAR_UUID, SETTLE_DELAY_MS,
};
use crate::infrastructure::bluetooth::scanner;
use crate::infrastructure::bluetooth::timer::{TimerId, TimerScheduler};
use crate::infrastructure::bluetooth::transport::{Advertisement, Transport};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Timing for scan and post-connect setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTiming {
    pub scan_period: Duration,
    pub settle_delay: Duration,
}

impl Default for ConnectionTiming {
    fn default() -> Self {
        Self {
            scan_period: Duration::from_millis(SCAN_PERIOD_MS),
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
        }
    }
}

/// Writes the session performs when the setup sequence asks for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    ReadDeviceConfig,
    SyncClock,
    QueryCurrentSerial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleStage {
    ClockSync,
    SerialQuery,
}

pub struct ConnectionStateMachine {
    profile: DeviceProfile,
    timing: ConnectionTiming,
    status: ConnectionStatus,
    identity: Option<DeviceIdentity>,
    matched_during_scan: bool,
    scan_timer: Option<TimerId>,
    settle_timer: Option<(TimerId, SettleStage)>,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ConnectionStateMachine {
    pub fn new(
        profile: DeviceProfile,
        timing: ConnectionTiming,
        event_sender: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            profile,
            timing,
            status: ConnectionStatus::None,
            identity: None,
            matched_during_scan: false,
            scan_timer: None,
            settle_timer: None,
            event_sender,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_sender.send(event);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            debug!("Connection status {:?} -> {:?}", self.status, status);
            self.status = status;
        }
    }

    fn cancel_timers(&mut self, timers: &mut dyn TimerScheduler) {
        if let Some(id) = self.scan_timer.take() {
            timers.cancel(id);
        }
        if let Some((id, _)) = self.settle_timer.take() {
            timers.cancel(id);
        }
    }

    /// Begin discovery. Restarts a scan already in progress; no-op while a
    /// link is being set up, up or torn down.
    pub fn start_scan(&mut self, transport: &mut dyn Transport, timers: &mut dyn TimerScheduler) {
        if self.status.is_busy() {
            debug!("Ignoring start_scan while {:?}", self.status);
            return;
        }
        if self.status == ConnectionStatus::Scanned {
            if let Err(e) = transport.stop_discovery() {
                warn!("Failed to stop previous scan: {}", e);
            }
            self.cancel_timers(timers);
            self.set_status(ConnectionStatus::None);
        }

        let filter = self.profile.scan_filter();
        info!(
            "Starting scan for {:?} devices ({} service filters)",
            self.profile.product_line,
            filter.len()
        );
        if let Err(e) = transport.start_discovery(&filter) {
            error!("Failed to start scan: {}", e);
            self.emit(SessionEvent::Error(SessionError::Transport(e)));
            return;
        }
        self.matched_during_scan = false;
        self.scan_timer = Some(timers.schedule(self.timing.scan_period));
        self.set_status(ConnectionStatus::Scanned);
    }

    pub fn stop_scan(&mut self, transport: &mut dyn Transport, timers: &mut dyn TimerScheduler) {
        if self.status != ConnectionStatus::Scanned {
            return;
        }
        info!("Stopping scan");
        if let Err(e) = transport.stop_discovery() {
            warn!("Failed to stop scan: {}", e);
        }
        self.cancel_timers(timers);
        self.set_status(ConnectionStatus::None);
    }

    pub fn on_advertisement(&mut self, adv: &Advertisement) {
        if self.status != ConnectionStatus::Scanned {
            trace!("Advertisement outside of a scan ignored");
            return;
        }
        if !scanner::matches(&self.profile, adv) {
            return;
        }
        info!(
            "Found {:?} ({}) rssi={}",
            adv.identity.name, adv.identity.address, adv.rssi
        );
        self.matched_during_scan = true;
        self.identity = Some(adv.identity.clone());
        self.emit(SessionEvent::Scan(Some(adv.identity.clone())));
    }

    pub fn connect(
        &mut self,
        identity: &DeviceIdentity,
        transport: &mut dyn Transport,
        timers: &mut dyn TimerScheduler,
    ) {
        if self.status.is_busy() {
            debug!("Ignoring connect while {:?}", self.status);
            return;
        }
        if self.status == ConnectionStatus::Scanned {
            if let Err(e) = transport.stop_discovery() {
                warn!("Failed to stop scan before connecting: {}", e);
            }
        }
        self.cancel_timers(timers);

        info!("Connecting to {:?} ({})", identity.name, identity.address);
        self.identity = Some(identity.clone());
        self.set_status(ConnectionStatus::Connecting);
        if let Err(e) = transport.connect(identity) {
            error!("Connect rejected: {}", e);
            self.fail_connect(e.to_string());
        }
    }

    fn fail_connect(&mut self, reason: String) {
        self.identity = None;
        self.set_status(ConnectionStatus::None);
        self.emit(SessionEvent::Error(SessionError::ConnectFailed(reason)));
    }

    /// User-initiated disconnect. Only valid while connected.
    pub fn disconnect(&mut self, transport: &mut dyn Transport, timers: &mut dyn TimerScheduler) {
        if self.status != ConnectionStatus::Connected {
            debug!("Ignoring disconnect while {:?}", self.status);
            return;
        }
        info!("Disconnecting");
        self.cancel_timers(timers);
        self.set_status(ConnectionStatus::Disconnecting);
        if let Err(e) = transport.disconnect() {
            // the link-down will never come, finish locally
            warn!("Disconnect request failed: {}", e);
            self.finish_disconnect();
        }
    }

    fn finish_disconnect(&mut self) {
        let identity = self.identity.take();
        self.set_status(ConnectionStatus::None);
        self.emit(SessionEvent::Disconnected(identity));
    }

    pub fn on_link_up(&mut self, transport: &mut dyn Transport) {
        if self.status != ConnectionStatus::Connecting {
            debug!("Link up while {:?} ignored", self.status);
            return;
        }
        self.set_status(ConnectionStatus::Connected);
        if let Some(identity) = self.identity.clone() {
            info!("Connected to {:?}", identity.name);
            self.emit(SessionEvent::Connected(identity));
        }
        if let Err(e) = transport.discover_services() {
            self.fail_setup(transport, e);
        }
    }

    pub fn on_link_down(&mut self, transport: &mut dyn Transport, timers: &mut dyn TimerScheduler) {
        self.cancel_timers(timers);
        match self.status {
            ConnectionStatus::Connected => {
                warn!("Link lost, rescanning");
                self.finish_disconnect();
                self.start_scan(transport, timers);
            }
            ConnectionStatus::Disconnecting => {
                info!("Disconnected");
                self.finish_disconnect();
            }
            ConnectionStatus::Connecting => {
                self.fail_connect("link dropped while connecting".to_string());
            }
            status => debug!("Link down while {:?} ignored", status),
        }
    }

    pub fn on_services_discovered(
        &mut self,
        result: Result<(), TransportError>,
        transport: &mut dyn Transport,
    ) {
        if self.status != ConnectionStatus::Connected {
            return;
        }
        let armed = result.and_then(|()| {
            debug!("Services discovered, arming sensor notifications");
            transport.set_notify(OTHER_SERVICE_UUID, SENSOR_VALUES_CHAR_UUID, true)
        });
        if let Err(e) = armed {
            self.fail_setup(transport, e);
        }
    }

    /// Setup failures end the connection attempt without retrying.
    fn fail_setup(&mut self, transport: &mut dyn Transport, e: TransportError) {
        error!("Service discovery failed: {}", e);
        self.emit(SessionEvent::Error(SessionError::ServiceDiscoveryFailed(
            e.to_string(),
        )));
        self.set_status(ConnectionStatus::Disconnecting);
        if let Err(e) = transport.disconnect() {
            warn!("Disconnect after failed discovery also failed: {}", e);
            self.finish_disconnect();
        }
    }

    pub fn on_notifications_armed(
        &mut self,
        characteristic: Uuid,
        enabled: bool,
        timers: &mut dyn TimerScheduler,
    ) -> Option<SetupStep> {
        if self.status != ConnectionStatus::Connected
            || characteristic != SENSOR_VALUES_CHAR_UUID
            || !enabled
        {
            return None;
        }
        info!("Sensor notifications armed");
        self.emit(SessionEvent::NotificationsArmed);
        self.arm_settle(SettleStage::ClockSync, timers);
        Some(SetupStep::ReadDeviceConfig)
    }

    fn arm_settle(&mut self, stage: SettleStage, timers: &mut dyn TimerScheduler) {
        if let Some((id, _)) = self.settle_timer.take() {
            timers.cancel(id);
        }
        self.settle_timer = Some((timers.schedule(self.timing.settle_delay), stage));
    }

    /// Handle a fired timer. Ids that are no longer armed are ignored.
    pub fn on_timer(
        &mut self,
        id: TimerId,
        transport: &mut dyn Transport,
        timers: &mut dyn TimerScheduler,
    ) -> Option<SetupStep> {
        if self.scan_timer == Some(id) {
            self.scan_timer = None;
            self.on_scan_timeout(transport);
            return None;
        }
        match self.settle_timer {
            Some((armed, stage)) if armed == id => {
                self.settle_timer = None;
                if self.status != ConnectionStatus::Connected {
                    return None;
                }
                match stage {
                    SettleStage::ClockSync => {
                        self.arm_settle(SettleStage::SerialQuery, timers);
                        Some(SetupStep::SyncClock)
                    }
                    SettleStage::SerialQuery => Some(SetupStep::QueryCurrentSerial),
                }
            }
            _ => {
                trace!("Stale timer {:?} ignored", id);
                None
            }
        }
    }

    fn on_scan_timeout(&mut self, transport: &mut dyn Transport) {
        if self.status != ConnectionStatus::Scanned {
            return;
        }
        if let Err(e) = transport.stop_discovery() {
            warn!("Failed to stop scan after timeout: {}", e);
        }
        self.set_status(ConnectionStatus::None);
        if !self.matched_during_scan {
            info!("Scan period ended without a matching device");
            self.emit(SessionEvent::Scan(None));
            self.emit(SessionEvent::Error(SessionError::ScanTimeout));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::{ManualTimers, MockTransport, TransportCall};

    struct Harness {
        machine: ConnectionStateMachine,
        transport: MockTransport,
        timers: ManualTimers,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Harness {
        fn new(profile: DeviceProfile) -> Self {
            let (tx, events) = mpsc::unbounded_channel();
            Self {
                machine: ConnectionStateMachine::new(profile, ConnectionTiming::default(), tx),
                transport: MockTransport::new(),
                timers: ManualTimers::new(),
                events,
            }
        }

        fn drain(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn start_scan(&mut self) {
            self.machine.start_scan(&mut self.transport, &mut self.timers);
        }

        fn connect(&mut self, identity: &DeviceIdentity) {
            self.machine
                .connect(identity, &mut self.transport, &mut self.timers);
        }

        fn fire(&mut self, id: TimerId) -> Option<SetupStep> {
            self.machine
                .on_timer(id, &mut self.transport, &mut self.timers)
        }

        /// Drive a fresh machine all the way to `connected`.
        fn connected(profile: DeviceProfile) -> Self {
            let mut h = Self::new(profile);
            h.start_scan();
            h.connect(&identity());
            h.machine.on_link_up(&mut h.transport);
            h.transport.take_calls();
            h.drain();
            h
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(Some("CR-0042"), "D4:36:39:00:00:42")
    }

    fn advertisement(name: &str) -> Advertisement {
        Advertisement {
            identity: DeviceIdentity::new(Some(name), "D4:36:39:00:00:42"),
            rssi: -50,
            manufacturer_data: Vec::new(),
            service_uuids: Vec::new(),
        }
    }

    #[test]
    fn test_scan_match_and_timeout() {
        let mut h = Harness::new(DeviceProfile::CORE);
        h.start_scan();
        assert_eq!(h.machine.status(), ConnectionStatus::Scanned);
        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::StartDiscovery(DeviceProfile::CORE.scan_filter())]
        );

        h.machine.on_advertisement(&advertisement("Speaker"));
        assert!(h.drain().is_empty());
        h.machine.on_advertisement(&advertisement("CR-0042"));
        assert!(matches!(h.drain().as_slice(), [SessionEvent::Scan(Some(_))]));

        // matched but never connected: back to none, no not-found event
        let (scan_timer, delay) = h.timers.pop_next().unwrap();
        assert_eq!(delay, Duration::from_millis(SCAN_PERIOD_MS));
        assert_eq!(h.fire(scan_timer), None);
        assert_eq!(h.machine.status(), ConnectionStatus::None);
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_scan_timeout_without_match() {
        let mut h = Harness::new(DeviceProfile::INSOLE);
        h.start_scan();
        let (scan_timer, _) = h.timers.pop_next().unwrap();
        h.fire(scan_timer);

        assert_eq!(h.machine.status(), ConnectionStatus::None);
        let events = h.drain();
        assert!(matches!(events[0], SessionEvent::Scan(None)));
        assert!(matches!(
            events[1],
            SessionEvent::Error(SessionError::ScanTimeout)
        ));
        assert_eq!(h.transport.count("stop_discovery"), 1);
    }

    #[test]
    fn test_restarting_scan_cancels_old_timer() {
        let mut h = Harness::new(DeviceProfile::CORE);
        h.start_scan();
        let (first, _) = h.timers.pending()[0];
        h.start_scan();
        assert_eq!(h.timers.pending().len(), 1);
        assert_ne!(h.timers.pending()[0].0, first);

        // the old timer firing late must not end the new scan
        assert_eq!(h.fire(first), None);
        assert_eq!(h.machine.status(), ConnectionStatus::Scanned);
    }

    #[test]
    fn test_connect_is_noop_when_connected() {
        let mut h = Harness::connected(DeviceProfile::CORE);
        assert_eq!(h.machine.status(), ConnectionStatus::Connected);

        h.connect(&DeviceIdentity::new(Some("CR-9"), "other"));
        assert!(h.transport.calls().is_empty());
        assert_eq!(h.machine.status(), ConnectionStatus::Connected);
        assert_eq!(h.machine.identity(), Some(&identity()));

        h.start_scan();
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn test_link_down_rescans_once() {
        let mut h = Harness::connected(DeviceProfile::CORE);
        h.machine.on_link_down(&mut h.transport, &mut h.timers);

        assert_eq!(h.machine.identity(), None);
        assert_eq!(h.transport.count("start_discovery"), 1);
        // the rescan leaves the machine scanning again
        assert_eq!(h.machine.status(), ConnectionStatus::Scanned);
        assert!(matches!(
            h.drain().as_slice(),
            [SessionEvent::Disconnected(Some(_))]
        ));
    }

    #[test]
    fn test_user_disconnect_does_not_rescan() {
        let mut h = Harness::connected(DeviceProfile::CORE);
        h.machine.disconnect(&mut h.transport, &mut h.timers);
        assert_eq!(h.machine.status(), ConnectionStatus::Disconnecting);

        h.machine.on_link_down(&mut h.transport, &mut h.timers);
        assert_eq!(h.machine.status(), ConnectionStatus::None);
        assert_eq!(h.transport.count("start_discovery"), 0);
        assert_eq!(h.transport.count("disconnect"), 1);
    }

    #[test]
    fn test_connect_failure_returns_to_none() {
        let mut h = Harness::new(DeviceProfile::CORE);
        h.transport
            .fail("connect", TransportError::Rejected("bad address".into()));
        h.connect(&identity());

        assert_eq!(h.machine.status(), ConnectionStatus::None);
        assert_eq!(h.machine.identity(), None);
        assert!(matches!(
            h.drain().as_slice(),
            [SessionEvent::Error(SessionError::ConnectFailed(_))]
        ));

        // link dropping mid-connect is also a connect failure
        h.transport.clear_failures();
        h.connect(&identity());
        h.machine.on_link_down(&mut h.transport, &mut h.timers);
        assert_eq!(h.machine.status(), ConnectionStatus::None);
        assert_eq!(h.transport.count("start_discovery"), 0);
    }

    #[test]
    fn test_setup_sequence() {
        let mut h = Harness::new(DeviceProfile::CORE);
        h.connect(&identity());
        h.machine.on_link_up(&mut h.transport);
        assert_eq!(h.transport.count("discover_services"), 1);

        h.machine.on_services_discovered(Ok(()), &mut h.transport);
        assert!(h.transport.calls().contains(&TransportCall::SetNotify {
            service: OTHER_SERVICE_UUID,
            characteristic: SENSOR_VALUES_CHAR_UUID,
            enable: true,
        }));

        let step = h
            .machine
            .on_notifications_armed(SENSOR_VALUES_CHAR_UUID, true, &mut h.timers);
        assert_eq!(step, Some(SetupStep::ReadDeviceConfig));

        let (clock, delay) = h.timers.pop_next().unwrap();
        assert_eq!(delay, Duration::from_millis(500));
        assert_eq!(h.fire(clock), Some(SetupStep::SyncClock));

        let (serial, delay) = h.timers.pop_next().unwrap();
        assert_eq!(delay, Duration::from_millis(500));
        assert_eq!(h.fire(serial), Some(SetupStep::QueryCurrentSerial));
        assert!(h.timers.pending().is_empty());

        // firing again is stale
        assert_eq!(h.fire(serial), None);
    }

    #[test]
    fn test_settle_timer_cancelled_by_link_loss() {
        let mut h = Harness::connected(DeviceProfile::CORE);
        h.machine
            .on_notifications_armed(SENSOR_VALUES_CHAR_UUID, true, &mut h.timers);
        let (clock, _) = h.timers.pending()[0];

        h.machine.on_link_down(&mut h.transport, &mut h.timers);
        assert_eq!(h.fire(clock), None);
        assert_eq!(h.transport.writes().len(), 0);
    }

    #[test]
    fn test_discovery_failure_is_terminal() {
        let mut h = Harness::connected(DeviceProfile::CORE);
        h.machine.on_services_discovered(
            Err(TransportError::MissingCharacteristic(SENSOR_VALUES_CHAR_UUID)),
            &mut h.transport,
        );
        assert_eq!(h.machine.status(), ConnectionStatus::Disconnecting);
        assert_eq!(h.transport.count("disconnect"), 1);
        assert!(matches!(
            h.drain().as_slice(),
            [SessionEvent::Error(SessionError::ServiceDiscoveryFailed(_))]
        ));

        h.machine.on_link_down(&mut h.transport, &mut h.timers);
        assert_eq!(h.machine.status(), ConnectionStatus::None);
        assert_eq!(h.transport.count("start_discovery"), 0);
    }
}
