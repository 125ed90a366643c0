//! In-memory transport and timers for driving a session without a radio.

use crate::domain::models::DeviceIdentity;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::timer::{TimerId, TimerScheduler};
use crate::infrastructure::bluetooth::transport::{Transport, WriteKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// One call made against [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartDiscovery(Vec<Uuid>),
    StopDiscovery,
    Connect(DeviceIdentity),
    Disconnect,
    DiscoverServices,
    SetNotify {
        service: Uuid,
        characteristic: Uuid,
        enable: bool,
    },
    Read {
        service: Uuid,
        characteristic: Uuid,
    },
    Write {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        kind: WriteKind,
    },
}

impl TransportCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartDiscovery(_) => "start_discovery",
            Self::StopDiscovery => "stop_discovery",
            Self::Connect(_) => "connect",
            Self::Disconnect => "disconnect",
            Self::DiscoverServices => "discover_services",
            Self::SetNotify { .. } => "set_notify",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<TransportCall>,
    failures: HashMap<&'static str, TransportError>,
}

/// Records every call. Clones share the same log.
#[derive(Debug, Clone)]
pub struct MockTransport {
    available: bool,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            available: true,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// A transport whose host has no adapter.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make every later call named `call` (see [`TransportCall::name`]) fail.
    pub fn fail(&self, call: &'static str, error: TransportError) {
        self.lock().failures.insert(call, error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    /// Return and forget the calls recorded so far.
    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut self.lock().calls)
    }

    pub fn count(&self, name: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.name() == name).count()
    }

    /// Payloads written so far, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, WriteKind)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Write {
                    characteristic,
                    value,
                    kind,
                    ..
                } => Some((*characteristic, value.clone(), *kind)),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, call: TransportCall) -> Result<(), TransportError> {
        let mut state = self.lock();
        let failure = state.failures.get(call.name()).cloned();
        state.calls.push(call);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Transport for MockTransport {
    fn adapter_available(&self) -> bool {
        self.available
    }

    fn start_discovery(&mut self, service_filter: &[Uuid]) -> Result<(), TransportError> {
        self.record(TransportCall::StartDiscovery(service_filter.to_vec()))
    }

    fn stop_discovery(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::StopDiscovery)
    }

    fn connect(&mut self, identity: &DeviceIdentity) -> Result<(), TransportError> {
        self.record(TransportCall::Connect(identity.clone()))
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect)
    }

    fn discover_services(&mut self) -> Result<(), TransportError> {
        self.record(TransportCall::DiscoverServices)
    }

    fn set_notify(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::SetNotify {
            service,
            characteristic,
            enable,
        })
    }

    fn read(&mut self, service: Uuid, characteristic: Uuid) -> Result<(), TransportError> {
        self.record(TransportCall::Read {
            service,
            characteristic,
        })
    }

    fn write(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        kind: WriteKind,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Write {
            service,
            characteristic,
            value: value.to_vec(),
            kind,
        })
    }
}

#[derive(Debug, Default)]
struct ManualState {
    next_id: u64,
    armed: Vec<(TimerId, Duration)>,
}

/// Timers that only fire when a test says so. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ManualTimers {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Armed timers that have been neither cancelled nor fired.
    pub fn pending(&self) -> Vec<(TimerId, Duration)> {
        self.lock().armed.clone()
    }

    /// Remove the oldest armed timer so the caller can deliver it.
    pub fn pop_next(&self) -> Option<(TimerId, Duration)> {
        let mut state = self.lock();
        if state.armed.is_empty() {
            None
        } else {
            Some(state.armed.remove(0))
        }
    }
}

impl TimerScheduler for ManualTimers {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        state.armed.push((id, delay));
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.lock().armed.retain(|(armed, _)| *armed != id);
    }
}
