//! The seam between the capture core and the platform's USB stack.
//!
//! [`LibUsb`](crate::LibUsb) implements these traits on top of libusb. Other platforms (or tests)
//! provide their own implementation.

use std::sync::Arc;

use crate::{device::DeviceDesc, permission::PermissionRequest, Result};

/// Enumerates devices, obtains permission to use them, and opens them.
pub trait UsbBackend {
    /// Lists the currently attached devices, in the order the platform reports them.
    fn list_devices(&self) -> Result<Vec<DeviceDesc>>;

    /// Asks the user or OS for permission to open `device`.
    ///
    /// The returned request resolves once the platform delivers the grant or denial.
    fn request_permission(&self, device: &DeviceDesc) -> PermissionRequest;

    /// Opens a connection to `device`. Permission must have been granted beforehand.
    fn open(&self, device: &DeviceDesc) -> Result<Arc<dyn Connection>>;
}

/// An open handle to a USB device.
///
/// At most one transfer may be queued at a time: [`queue`](Connection::queue) followed by
/// [`wait`](Connection::wait), from a single thread.
pub trait Connection: Send + Sync {
    /// Claims interface `number` exclusively, detaching any kernel driver bound to it.
    fn claim_interface(&self, number: u8) -> rusb::Result<()>;

    fn release_interface(&self, number: u8) -> rusb::Result<()>;

    /// Submits a read request on the request's endpoint.
    fn queue(&self, request: TransferRequest) -> rusb::Result<()>;

    /// Blocks until the queued request completes and returns it.
    fn wait(&self) -> rusb::Result<TransferRequest>;

    /// Closes the handle. Further operations fail with [`rusb::Error::NoDevice`].
    fn close(&self);
}

/// A bulk IN transfer, owning the buffer the data is read into.
#[derive(Debug)]
pub struct TransferRequest {
    id: u64,
    endpoint: u8,
    buffer: Vec<u8>,
    len: usize,
}

impl TransferRequest {
    pub(crate) fn new(id: u64, endpoint: u8, buffer: Vec<u8>) -> Self {
        Self {
            id,
            endpoint,
            buffer,
            len: 0,
        }
    }

    /// Identifies the request, so that completions can be matched against submissions.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// The whole buffer, to be filled by the backend.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Marks the first `len` bytes of the buffer as transferred.
    pub fn complete(&mut self, len: usize) {
        self.len = len.min(self.buffer.len());
    }

    /// The bytes received by the completed transfer.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub(crate) fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}
