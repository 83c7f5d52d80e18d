use crate::error::{ConnectError, ReadError, TransportError, WriteError};
use anyhow::Result;
use pl2303_types::VersionNumber;
use tokio::sync::mpsc::Sender;

/// The sink receiving incoming chunks. Invoked from the read loop's thread, so
/// it must not block for long and must not assume any particular lock is free.
pub type ReadConsumer = Box<dyn FnMut(Vec<u8>) + Send>;

/// The connection contract for a bridge chip: claim it, programme the line,
/// push bytes out, stream bytes back. All methods take `&self`, writes may be
/// issued from any number of threads concurrently.
pub trait SerialBridge: Send + Sync {
    /// Claims the device and programmes the line at `baud_rate`, 8-N-1. Fails
    /// closed: on any error the device is left unclaimed and the connection
    /// stays disconnected.
    fn connect(&self, baud_rate: u32) -> Result<(), ConnectError>;

    /// Stops the read loop if one is running, releases the device session.
    /// Idempotent, never fails outward; teardown hiccups are logged.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Transmits the whole buffer, blocking the caller until the transport has
    /// accepted it. Concurrent writers are serialized, bytes from two calls
    /// never interleave on the wire.
    fn write(&self, data: &[u8]) -> Result<(), WriteError>;

    /// Launches the background read loop delivering chunks to `consumer` in
    /// arrival order. At most one loop may run per connection.
    fn start_reading(&self, consumer: ReadConsumer) -> Result<(), ReadError>;

    /// Descriptor snapshot of the claimed device, `None` while unclaimed.
    fn usb_data(&self) -> Option<UsbData>;
}

pub trait AttachSerialBridge {
    fn from_device(
        device: BridgeDevice,
        disconnect_sender: Sender<String>,
    ) -> Result<Box<dyn SerialBridge>>
    where
        Self: Sized;
}

/// What sits underneath a connection: one claimed USB session on the chip.
/// `read_chunk` polls with a short internal timeout and reports `Ok(None)`
/// when nothing arrived, so the loop above can observe its stop flag.
pub trait BridgeTransport: Send + Sync {
    fn claim(&self) -> Result<(), ConnectError>;
    fn configure(&self, baud_rate: u32) -> Result<(), ConnectError>;
    fn read_chunk(&self) -> Result<Option<Vec<u8>>, TransportError>;
    fn write_chunk(&self, data: &[u8]) -> Result<usize, TransportError>;
    fn release(&self);
    fn usb_data(&self) -> Option<UsbData>;
}

// We primarily need the bus number, and address for comparison.. the matching
// against vendor/product identifiers happened upstream.
#[derive(Debug, Clone)]
pub struct BridgeDevice {
    pub(crate) bus_number: u8,
    pub(crate) address: u8,
    pub(crate) identifier: Option<String>,
}

impl BridgeDevice {
    pub fn new(bus_number: u8, address: u8, identifier: Option<String>) -> Self {
        Self {
            bus_number,
            address,
            identifier,
        }
    }

    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn identifier(&self) -> &Option<String> {
        &self.identifier
    }
}

#[derive(Debug, Clone)]
pub struct UsbData {
    pub(crate) vendor_id: u16,
    pub(crate) product_id: u16,
    pub(crate) device_version: VersionNumber,
    pub(crate) device_manufacturer: Option<String>,
    pub(crate) product_name: Option<String>,
}

impl UsbData {
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }
    pub fn product_id(&self) -> u16 {
        self.product_id
    }
    pub fn device_version(&self) -> VersionNumber {
        self.device_version.clone()
    }
    pub fn device_manufacturer(&self) -> Option<String> {
        self.device_manufacturer.clone()
    }
    pub fn product_name(&self) -> Option<String> {
        self.product_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PID_PL2303, VID_PROLIFIC};

    #[test]
    fn usb_data_reports_a_displayable_device_version() {
        let data = UsbData {
            vendor_id: VID_PROLIFIC,
            product_id: PID_PL2303,
            device_version: VersionNumber(4, 0, 0),
            device_manufacturer: Some("Prolific Technology Inc.".to_owned()),
            product_name: None,
        };

        assert_eq!(data.device_version(), VersionNumber(4, 0, 0));
        assert_eq!(data.device_version().to_string(), "4.0.0");
    }
}
