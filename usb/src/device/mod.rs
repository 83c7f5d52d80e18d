use crate::device::base::{AttachSerialBridge, BridgeDevice, SerialBridge};
use anyhow::Result;
use tokio::sync::mpsc::Sender;

pub mod base;

// All the family's chips speak libusb, so unlike vendor stacks there's no
// per-platform backend split here.
mod libusb;

pub fn from_device(
    device: BridgeDevice,
    disconnect_sender: Sender<String>,
) -> Result<Box<dyn SerialBridge>> {
    libusb::device::Pl2303Transport::from_device(device, disconnect_sender)
}
