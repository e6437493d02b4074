use std::sync::Arc;

use crate::{
    backend::{Connection, UsbBackend},
    bind::{bind, Session},
    config::Config,
    device::DeviceDesc,
    error::{err, Action},
    frame::{Decoder, FrameSink, ImageDecoder},
    permission::PermissionRequest,
    select::find_candidate,
    transfer::{Status, TransferLoop},
    Result,
};

/// Drives a single device from discovery to teardown.
///
/// The expected call sequence is [`find_device`](Self::find_device),
/// [`request_permission`](Self::request_permission), and once permission is granted,
/// [`open_device`](Self::open_device), which also starts capturing. [`connect`](Self::connect)
/// does all of that in one blocking call.
///
/// Afterwards [`stop_capture`](Self::stop_capture) and [`start_capture`](Self::start_capture)
/// follow the availability of the display, and [`release_session`](Self::release_session) (or
/// dropping the `Capture`) gives the device back.
pub struct Capture<B: UsbBackend> {
    backend: B,
    transfer: TransferLoop,
    device: Option<DeviceDesc>,
    connection: Option<Arc<dyn Connection>>,
    session: Option<Arc<Session>>,
}

impl<B: UsbBackend> Capture<B> {
    /// Creates a capture controller that decodes JPEG/PNG payloads.
    pub fn new(backend: B, sink: Arc<dyn FrameSink>, config: Config) -> Self {
        Self::with_decoder(backend, sink, Arc::new(ImageDecoder::new()), config)
    }

    pub fn with_decoder(
        backend: B,
        sink: Arc<dyn FrameSink>,
        decoder: Arc<dyn Decoder>,
        config: Config,
    ) -> Self {
        Self {
            backend,
            transfer: TransferLoop::new(sink, decoder, config),
            device: None,
            connection: None,
            session: None,
        }
    }

    /// Enumerates attached devices and picks the one to capture from.
    pub fn find_device(&self) -> Result<DeviceDesc> {
        let devices = self.backend.list_devices()?;
        find_candidate(&devices).map(DeviceDesc::clone)
    }

    pub fn request_permission(&self, device: &DeviceDesc) -> PermissionRequest {
        self.backend.request_permission(device)
    }

    /// Opens `device` and starts capturing from it. Call once permission has been granted.
    ///
    /// A previously opened device is released first.
    pub fn open_device(&mut self, device: DeviceDesc) -> Result<()> {
        if self.connection.is_some() {
            self.release_session()?;
        }

        log::info!(
            "USB device connected: {:?}, vendor id {:04x}, product id {:04x}",
            device.id(),
            device.vendor_id(),
            device.product_id(),
        );

        let connection = self.backend.open(&device)?;
        self.device = Some(device);
        self.connection = Some(connection);
        self.start_capture()
    }

    /// Finds a device, waits for permission to use it, opens it and starts capturing.
    pub fn connect(&mut self) -> Result<()> {
        let device = self.find_device()?;
        self.request_permission(&device).wait()?;
        self.open_device(device)
    }

    /// Starts (or resumes) capturing from the open device.
    ///
    /// The video interface is bound on the first call and stays claimed until the session is
    /// released.
    pub fn start_capture(&mut self) -> Result<()> {
        let (device, connection) = match (&self.device, &self.connection) {
            (Some(device), Some(connection)) => (device, connection.clone()),
            _ => return err("no USB device connected", Action::StartingCapture),
        };

        let session = match &self.session {
            Some(session) => session.clone(),
            None => {
                let session = Arc::new(bind(device, connection)?);
                self.session = Some(session.clone());
                session
            }
        };

        self.transfer.start(session)
    }

    /// Stops capturing. The device stays open and its interface claimed.
    pub fn stop_capture(&self) {
        self.transfer.stop();
    }

    pub fn status(&self) -> Status {
        self.transfer.status()
    }

    /// The device opened by [`open_device`](Self::open_device), if any.
    pub fn device(&self) -> Option<&DeviceDesc> {
        self.device.as_ref()
    }

    /// The bound video interface, once capture has been started.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_deref()
    }

    /// Stops capturing, releases the video interface and closes the device.
    ///
    /// Waits for the capture thread to exit.
    pub fn release_session(&mut self) -> Result<()> {
        self.transfer.stop();

        let mut result = Ok(());
        if let Some(session) = self.session.take() {
            result = session.release();
        }
        if let Some(connection) = self.connection.take() {
            // a transfer still waiting for data fails with NoDevice once closed
            connection.close();
            log::info!("capture session released");
        }

        self.transfer.join();
        self.device = None;
        result
    }
}

impl<B: UsbBackend> Drop for Capture<B> {
    fn drop(&mut self) {
        if let Err(e) = self.release_session() {
            log::warn!("failed to release capture session: {}", e);
        }
    }
}
