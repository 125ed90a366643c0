//! Client-side protocol engine for BLE wearable motion and pressure sensors.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{DeviceConfig, DeviceIdentity, SampleBatch, SessionEvent};
pub use error::{DecodeError, SessionError, TransportError};
pub use infrastructure::bluetooth::{spawn_session, DeviceSession, SessionHandle};
