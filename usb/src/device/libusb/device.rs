use crate::chip;
use crate::chip::LineCoding;
use crate::connection::SerialBridgeConnection;
use crate::device::base::{
    AttachSerialBridge, BridgeDevice, BridgeTransport, SerialBridge, UsbData,
};
use crate::error::{ConnectError, TransportError};
use anyhow::Result;
use cfg_if::cfg_if;
use log::{debug, info, warn};
use pl2303_types::ChipVariant;
use pl2303_types::VersionNumber;
use rusb::{
    Device, DeviceDescriptor, DeviceHandle, Direction, GlobalContext, Recipient, RequestType,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::Sender;

const READ_BUFFER_SIZE: usize = 1024;

/// One claimed libusb session on the chip.
struct Session {
    handle: Arc<DeviceHandle<GlobalContext>>,
    variant: ChipVariant,
    usb_data: UsbData,
}

/// rusb transport for the bridge. Claim opens and claims the vendor
/// interface, configure programmes the line, the bulk endpoints carry the
/// byte stream. The handle is shared between the read loop and writers, the
/// endpoints are independent so that's safe.
pub struct Pl2303Transport {
    device: BridgeDevice,
    session: Mutex<Option<Session>>,

    timeout: Duration,
    read_timeout: Duration,
}

impl Pl2303Transport {
    pub(crate) fn new(device: BridgeDevice) -> Self {
        Self {
            device,
            session: Mutex::new(None),
            timeout: Duration::from_secs(1),
            // Short enough that a stop request is observed promptly, the read
            // loop treats a timeout as "nothing yet" and polls again.
            read_timeout: Duration::from_millis(100),
        }
    }

    fn find_device(
        device: &BridgeDevice,
    ) -> Result<(Device<GlobalContext>, DeviceDescriptor), rusb::Error> {
        for usb_device in rusb::devices()?.iter() {
            if usb_device.bus_number() == device.bus_number()
                && usb_device.address() == device.address()
            {
                let descriptor = usb_device.device_descriptor()?;
                return Ok((usb_device, descriptor));
            }
        }
        Err(rusb::Error::NoDevice)
    }

    fn read_usb_data(
        handle: &DeviceHandle<GlobalContext>,
        descriptor: &DeviceDescriptor,
        timeout: Duration,
    ) -> UsbData {
        let version = descriptor.device_version();

        // Strings are best effort, plenty of clone chips don't carry them.
        let language = handle
            .read_languages(timeout)
            .ok()
            .and_then(|languages| languages.first().copied());

        let device_manufacturer = language.and_then(|language| {
            handle
                .read_manufacturer_string(language, descriptor, timeout)
                .ok()
        });
        let product_name = language
            .and_then(|language| handle.read_product_string(language, descriptor, timeout).ok());

        UsbData {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            device_version: VersionNumber(version.major(), version.minor(), version.sub_minor()),
            device_manufacturer,
            product_name,
        }
    }

    fn write_class_control(
        handle: &DeviceHandle<GlobalContext>,
        request: u8,
        value: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), rusb::Error> {
        handle.write_control(
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface),
            request,
            value,
            0,
            data,
            timeout,
        )?;

        Ok(())
    }

    fn release_session(session: Session, timeout: Duration) {
        // Best effort from here on, the device may already be gone.
        if let Err(error) =
            Self::write_class_control(&session.handle, chip::SET_CONTROL_REQUEST, 0, &[], timeout)
        {
            debug!("Couldn't drop the control lines: {}", error);
        }
        if let Err(error) = session.handle.release_interface(chip::BRIDGE_INTERFACE) {
            debug!("Couldn't release the interface: {}", error);
        }
    }
}

impl BridgeTransport for Pl2303Transport {
    fn claim(&self) -> Result<(), ConnectError> {
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // A stale session from a vanished device gets cleared first.
        if let Some(stale) = session.take() {
            Self::release_session(stale, self.timeout);
        }

        let (device, descriptor) =
            Self::find_device(&self.device).map_err(ConnectError::DeviceUnavailable)?;
        let mut handle = device.open().map_err(ConnectError::DeviceUnavailable)?;

        cfg_if! {
            if #[cfg(target_os = "linux")] {
                // The kernel's own pl2303 module will have bound the port,
                // have libusb move it aside while we hold the interface.
                if let Err(error) = handle.set_auto_detach_kernel_driver(true) {
                    debug!("Kernel driver auto-detach unavailable: {}", error);
                }
            }
        }

        handle
            .claim_interface(chip::BRIDGE_INTERFACE)
            .map_err(ConnectError::DeviceUnavailable)?;

        let variant = chip::detect_variant(
            descriptor.class_code(),
            descriptor.max_packet_size(),
            descriptor.product_id(),
        );
        let usb_data = Self::read_usb_data(&handle, &descriptor, self.timeout);

        info!(
            "Claimed PL2303 ({}) on bus {} address {}",
            variant,
            self.device.bus_number(),
            self.device.address()
        );

        *session = Some(Session {
            handle: Arc::new(handle),
            variant,
            usb_data,
        });

        Ok(())
    }

    fn configure(&self, baud_rate: u32) -> Result<(), ConnectError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(session) = session.as_ref() else {
            return Err(ConnectError::DeviceUnavailable(rusb::Error::NoDevice));
        };

        if !chip::supports_baud(session.variant, baud_rate) {
            return Err(ConnectError::UnsupportedBaudRate(baud_rate));
        }

        let map_usb = |error: rusb::Error| match error {
            rusb::Error::NoDevice => ConnectError::DeviceUnavailable(error),
            error => ConnectError::ConfigurationFailed(error),
        };

        let coding = LineCoding::new(baud_rate).encode();
        Self::write_class_control(
            &session.handle,
            chip::SET_LINE_REQUEST,
            0,
            &coding,
            self.timeout,
        )
        .map_err(map_usb)?;

        // Read the coding back; a chip whose divider can't lock the requested
        // speed quietly keeps its previous setting.
        let mut confirmed = [0; 7];
        let length = session
            .handle
            .read_control(
                rusb::request_type(Direction::In, RequestType::Class, Recipient::Interface),
                chip::GET_LINE_REQUEST,
                0,
                0,
                &mut confirmed,
                self.timeout,
            )
            .map_err(map_usb)?;

        if length != confirmed.len() || LineCoding::decode(&confirmed).baud_rate != baud_rate {
            warn!(
                "Chip refused {} baud, reports {:?}",
                baud_rate,
                LineCoding::decode(&confirmed)
            );
            return Err(ConnectError::UnsupportedBaudRate(baud_rate));
        }

        // Raise DTR/RTS so the far end sees a ready terminal.
        Self::write_class_control(
            &session.handle,
            chip::SET_CONTROL_REQUEST,
            chip::CONTROL_DTR | chip::CONTROL_RTS,
            &[],
            self.timeout,
        )
        .map_err(map_usb)?;

        debug!("Line configured at {} baud (8-N-1)", baud_rate);
        Ok(())
    }

    fn read_chunk(&self) -> Result<Option<Vec<u8>>, TransportError> {
        // Clone the handle out rather than holding the session lock across a
        // blocking transfer.
        let handle = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| Arc::clone(&session.handle));
        let Some(handle) = handle else {
            return Err(TransportError::DeviceLost);
        };

        let mut buffer = [0; READ_BUFFER_SIZE];
        match handle.read_bulk(chip::ENDPOINT_BULK_IN, &mut buffer, self.read_timeout) {
            Ok(0) => Ok(None),
            Ok(count) => Ok(Some(buffer[..count].to_vec())),
            Err(rusb::Error::Timeout) => Ok(None),
            Err(rusb::Error::NoDevice) => Err(TransportError::DeviceLost),
            Err(error) => Err(TransportError::Usb(error)),
        }
    }

    fn write_chunk(&self, data: &[u8]) -> Result<usize, TransportError> {
        let handle = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| Arc::clone(&session.handle));
        let Some(handle) = handle else {
            return Err(TransportError::DeviceLost);
        };

        match handle.write_bulk(chip::ENDPOINT_BULK_OUT, data, self.timeout) {
            Ok(count) => Ok(count),
            // Nothing accepted in time, let the caller decide how long to
            // keep trying.
            Err(rusb::Error::Timeout) => Ok(0),
            Err(rusb::Error::NoDevice) => Err(TransportError::DeviceLost),
            Err(error) => Err(TransportError::Usb(error)),
        }
    }

    fn release(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            Self::release_session(session, self.timeout);
        }
    }

    fn usb_data(&self) -> Option<UsbData> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.usb_data.clone())
    }
}

impl AttachSerialBridge for Pl2303Transport {
    fn from_device(
        device: BridgeDevice,
        disconnect_sender: Sender<String>,
    ) -> Result<Box<dyn SerialBridge>> {
        let identifier = device.identifier().clone().unwrap_or_else(|| {
            format!("usb-{}:{}", device.bus_number(), device.address())
        });

        let transport = Pl2303Transport::new(device);
        Ok(Box::new(SerialBridgeConnection::new(
            transport,
            identifier,
            disconnect_sender,
        )))
    }
}
