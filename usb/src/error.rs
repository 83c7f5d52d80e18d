#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("Device is already connected")]
    AlreadyConnected,

    #[error("Device could not be claimed: {0}")]
    DeviceUnavailable(rusb::Error),

    #[error("Baud rate {0} is not supported by this chip")]
    UnsupportedBaudRate(u32),

    #[error("Failed to programme the line: {0}")]
    ConfigurationFailed(#[from] rusb::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("Device is not connected")]
    NotConnected,

    #[error("Transport only accepted {written} of {total} bytes")]
    PartialWrite { written: usize, total: usize },

    #[error("Device vanished during write")]
    DeviceLost,

    #[error("USB error: {0}")]
    WriteFailed(#[from] rusb::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("Device is not connected")]
    NotConnected,

    #[error("A read loop is already running")]
    AlreadyReading,
}

/// Low level failures crossing the transport seam. Anything other than a poll
/// timeout coming off the bulk endpoints ends up as one of these.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Device has been disconnected")]
    DeviceLost,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}
