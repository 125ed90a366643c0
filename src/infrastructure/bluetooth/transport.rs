//! Transport Seam
//!
//! The capability set the session needs from a host BLE stack. Every call is
//! fire-and-forget; completions come back later as [`TransportEvent`]s.

use crate::domain::models::DeviceIdentity;
use crate::error::TransportError;
use uuid::Uuid;

/// Whether the link layer confirms a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Acknowledged,
    Unacknowledged,
}

/// One received advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub identity: DeviceIdentity,
    pub rssi: i16,
    /// Manufacturer-specific payloads keyed by company id.
    pub manufacturer_data: Vec<(u16, Vec<u8>)>,
    pub service_uuids: Vec<Uuid>,
}

impl Advertisement {
    pub fn manufacturer_payload(&self, company_id: u16) -> Option<&[u8]> {
        self.manufacturer_data
            .iter()
            .find(|(id, _)| *id == company_id)
            .map(|(_, data)| data.as_slice())
    }
}

/// Asynchronous completions delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Advertisement(Advertisement),
    LinkUp,
    LinkDown,
    ServicesDiscovered(Result<(), TransportError>),
    NotificationsArmed {
        characteristic: Uuid,
        enabled: bool,
    },
    Notification {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    ReadComplete {
        characteristic: Uuid,
        value: Result<Vec<u8>, TransportError>,
    },
}

/// Host BLE stack as seen by a device session.
///
/// Errors returned here mean the request was not issued at all.
pub trait Transport: Send {
    fn adapter_available(&self) -> bool;

    fn start_discovery(&mut self, service_filter: &[Uuid]) -> Result<(), TransportError>;

    fn stop_discovery(&mut self) -> Result<(), TransportError>;

    fn connect(&mut self, identity: &DeviceIdentity) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    fn discover_services(&mut self) -> Result<(), TransportError>;

    fn set_notify(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<(), TransportError>;

    fn read(&mut self, service: Uuid, characteristic: Uuid) -> Result<(), TransportError>;

    fn write(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        kind: WriteKind,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manufacturer_payload_lookup() {
        let adv = Advertisement {
            identity: DeviceIdentity::new(None, "AA:BB"),
            rssi: -60,
            manufacturer_data: vec![(0x004C, vec![9]), (0, vec![1, 0x12, 0, 0, 5])],
            service_uuids: Vec::new(),
        };
        assert_eq!(adv.manufacturer_payload(0), Some(&[1, 0x12, 0, 0, 5][..]));
        assert_eq!(adv.manufacturer_payload(7), None);
    }
}
