//! Bluetooth Module
//!
//! BLE client protocol engine for core and insole wearable sensors.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │               SessionHandle (runtime)                    │
//! │  (tokio task - public async API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────┐
//! │                  DeviceSession                           │
//! │  (composition root - routes events, owns caches)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┬─────────────┐
//!         │             │             │             │
//!         ▼             ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │  │  Frame   │
//! │           │  │            │  │          │  │          │
//! │ - Adv.    │  │ - Status   │  │ - UUIDs  │  │ - Tags   │
//! │   filter  │  │ - Setup    │  │ - Cmds   │  │ - Samples│
//! └───────────┘  └────────────┘  └──────────┘  └──────────┘
//!                       │
//!                       ▼
//!            Transport + TimerScheduler
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers, device profiles, command and config frames
//! - [`frame`] - Sensor-values notification decoding
//! - [`scanner`] - Advertisement matching
//! - [`connection`] - Connection state machine and setup sequencing
//! - [`transport`] - Host BLE stack seam
//! - [`timer`] - Cancellable timers
//! - [`service`] - Device session
//! - [`runtime`] - Tokio task wrapper around a session
//! - [`mock`] - In-memory transport and timers

pub mod connection;
pub mod frame;
pub mod mock;
pub mod protocol;
pub mod runtime;
pub mod scanner;
pub mod service;
pub mod timer;
pub mod transport;

// Re-export the session types for convenience
pub use runtime::{spawn_session, SessionHandle, SessionSnapshot};
pub use service::DeviceSession;
