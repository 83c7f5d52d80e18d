use crate::device::base::{BridgeTransport, ReadConsumer, SerialBridge, UsbData};
use crate::error::{ConnectError, ReadError, TransportError, WriteError};
use futures::executor::block_on;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::thread::JoinHandle;
use tokio::sync::mpsc::Sender;

// A write gets this many zero-progress submissions before we give up on it.
const WRITE_STALL_LIMIT: usize = 20;

/// One open session on a bridge chip. Generic over the transport so the state
/// machine can be exercised without hardware; `from_device` wires it to the
/// libusb transport.
///
/// Lock order is lifecycle -> reader, the read loop itself takes neither. The
/// write lock is independent so writers never stall the loop and vice versa.
pub struct SerialBridgeConnection<T: BridgeTransport + 'static> {
    transport: Arc<T>,
    identifier: String,

    connected: Arc<AtomicBool>,
    claimed: AtomicBool,
    reading: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,

    lifecycle: Mutex<()>,
    write_lock: Mutex<()>,
    reader: Mutex<Option<JoinHandle<()>>>,

    disconnect_sender: Sender<String>,
}

impl<T: BridgeTransport + 'static> SerialBridgeConnection<T> {
    pub fn new(transport: T, identifier: String, disconnect_sender: Sender<String>) -> Self {
        Self {
            transport: Arc::new(transport),
            identifier,
            connected: Arc::new(AtomicBool::new(false)),
            claimed: AtomicBool::new(false),
            reading: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(()),
            write_lock: Mutex::new(()),
            reader: Mutex::new(None),
            disconnect_sender,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Joins the reader thread if one is (or was) running. Callers must hold
    /// the lifecycle lock.
    fn join_reader(&self) {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Read loop for {} panicked", self.identifier);
            }
        }
    }

    /// The disconnect path, shared with Drop. Signals the loop, waits for it
    /// to exit, then releases the session, in that order, so the loop can
    /// never touch a released handle.
    fn teardown(&self) {
        let _lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        self.stopping.store(true, Ordering::Relaxed);
        self.join_reader();

        if self.claimed.swap(false, Ordering::Relaxed) {
            self.transport.release();
            info!("Released {}", self.identifier);
        }

        self.connected.store(false, Ordering::Relaxed);
    }

    /// Marks the connection dead and tells the owner, exactly once per loss.
    fn notify_device_lost(
        connected: &AtomicBool,
        sender: &Sender<String>,
        identifier: &str,
    ) {
        if connected.swap(false, Ordering::Relaxed) {
            if block_on(sender.send(identifier.to_owned())).is_err() {
                warn!("Nobody listening for the loss of {}", identifier);
            }
        }
    }
}

impl<T: BridgeTransport + 'static> SerialBridge for SerialBridgeConnection<T> {
    fn connect(&self, baud_rate: u32) -> Result<(), ConnectError> {
        let _lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.connected.load(Ordering::Relaxed) {
            return Err(ConnectError::AlreadyConnected);
        }

        // A session that ended in device loss leaves its reader and claim
        // behind, clear those out before claiming afresh.
        self.stopping.store(true, Ordering::Relaxed);
        self.join_reader();
        if self.claimed.swap(false, Ordering::Relaxed) {
            self.transport.release();
        }

        self.transport.claim()?;
        self.claimed.store(true, Ordering::Relaxed);

        if let Err(error) = self.transport.configure(baud_rate) {
            // No leak on the failure path: unwind the claim before reporting.
            self.claimed.store(false, Ordering::Relaxed);
            self.transport.release();
            return Err(error);
        }

        self.connected.store(true, Ordering::Relaxed);
        info!("Connected to {} at {} baud", self.identifier, baud_rate);
        Ok(())
    }

    fn disconnect(&self) {
        self.teardown();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(WriteError::NotConnected);
        }

        let _writer = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut written = 0;
        let mut stalled = 0;
        while written < data.len() {
            match self.transport.write_chunk(&data[written..]) {
                Ok(0) => {
                    stalled += 1;
                    if stalled >= WRITE_STALL_LIMIT {
                        warn!(
                            "Write to {} stalled after {} of {} bytes",
                            self.identifier,
                            written,
                            data.len()
                        );
                        return Err(WriteError::PartialWrite {
                            written,
                            total: data.len(),
                        });
                    }
                }
                Ok(count) => {
                    written += count;
                    stalled = 0;
                }
                Err(TransportError::DeviceLost) => {
                    Self::notify_device_lost(
                        &self.connected,
                        &self.disconnect_sender,
                        &self.identifier,
                    );
                    return Err(WriteError::DeviceLost);
                }
                Err(TransportError::Usb(error)) => {
                    return Err(WriteError::WriteFailed(error));
                }
            }
        }

        Ok(())
    }

    fn start_reading(&self, consumer: ReadConsumer) -> Result<(), ReadError> {
        let _lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !self.connected.load(Ordering::Relaxed) {
            return Err(ReadError::NotConnected);
        }

        // The loop clears this flag as its final action, so a loop that is
        // still shutting down rejects a replacement just like a live one.
        if self
            .reading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ReadError::AlreadyReading);
        }

        self.stopping.store(false, Ordering::Relaxed);

        let transport = Arc::clone(&self.transport);
        let connected = Arc::clone(&self.connected);
        let reading = Arc::clone(&self.reading);
        let stopping = Arc::clone(&self.stopping);
        let sender = self.disconnect_sender.clone();
        let identifier = self.identifier.clone();
        let mut consumer = consumer;

        let handle = thread::spawn(move || {
            debug!("Read loop running for {}", identifier);
            loop {
                if stopping.load(Ordering::Relaxed) {
                    break;
                }

                match transport.read_chunk() {
                    Ok(Some(chunk)) => consumer(chunk),
                    Ok(None) => {
                        // Poll timeout with nothing waiting, go round again.
                    }
                    Err(TransportError::DeviceLost) => {
                        warn!("Device {} vanished, stopping read loop", identifier);
                        Self::notify_device_lost(&connected, &sender, &identifier);
                        break;
                    }
                    Err(TransportError::Usb(error)) => {
                        error!("Fatal USB error on {}: {}", identifier, error);
                        Self::notify_device_lost(&connected, &sender, &identifier);
                        break;
                    }
                }
            }
            debug!("Read loop stopped for {}", identifier);
            reading.store(false, Ordering::SeqCst);
        });

        *self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    fn usb_data(&self) -> Option<UsbData> {
        self.transport.usb_data()
    }
}

impl<T: BridgeTransport + 'static> Drop for SerialBridgeConnection<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
