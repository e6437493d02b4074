//! [`UsbBackend`] implementation on top of libusb.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    time::{Duration, Instant},
};

use rusb::{Context, Device, DeviceHandle, UsbContext};

use crate::{
    backend::{Connection, TransferRequest, UsbBackend},
    device::{DeviceDesc, DeviceId, EndpointDesc, InterfaceDesc},
    error::{err, Action, ResultExt},
    permission::PermissionRequest,
    Result,
};

pub struct LibUsb {
    ctx: Context,
    timeout: Duration,
}

impl LibUsb {
    pub fn new() -> Result<Self> {
        let ctx = Context::new().during(Action::EnumeratingDevices)?;
        Ok(Self {
            ctx,
            timeout: Duration::from_secs(0),
        })
    }

    /// Sets how long a bulk read may take before it fails with [`rusb::Error::Timeout`].
    ///
    /// The default of zero waits until data arrives or the connection is closed.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn find_device(&self, id: DeviceId) -> Result<Device<Context>> {
        let list = self.ctx.devices().during(Action::OpeningDevice)?;
        for dev in list.iter() {
            if dev.bus_number() == id.bus_number() && dev.address() == id.address() {
                return Ok(dev);
            }
        }
        err(format!("{:?} is no longer attached", id), Action::OpeningDevice)
    }
}

impl fmt::Debug for LibUsb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibUsb")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl UsbBackend for LibUsb {
    fn list_devices(&self) -> Result<Vec<DeviceDesc>> {
        let list = self.ctx.devices().during(Action::EnumeratingDevices)?;

        let devices = list
            .iter()
            .filter_map(|dev| match describe(&dev) {
                Ok(desc) => Some(desc),
                Err(e) => {
                    log::error!("{:?}: {}", dev, e);
                    None
                }
            })
            .collect();

        Ok(devices)
    }

    fn request_permission(&self, device: &DeviceDesc) -> PermissionRequest {
        // libusb has no prompt; missing access rights show up as an error from `open`
        log::debug!("no permission prompt for {:?}", device.id());
        PermissionRequest::granted()
    }

    fn open(&self, device: &DeviceDesc) -> Result<Arc<dyn Connection>> {
        let handle = self
            .find_device(device.id())?
            .open()
            .during(Action::OpeningDevice)?;

        Ok(Arc::new(LibUsbConnection {
            handle: RwLock::new(Some(handle)),
            closed: AtomicBool::new(false),
            pending: Mutex::new(None),
            timeout: self.timeout,
        }))
    }
}

/// Reads the device descriptor and the interfaces of the active configuration.
fn describe(device: &Device<Context>) -> Result<DeviceDesc> {
    let device_desc = device
        .device_descriptor()
        .during(Action::EnumeratingDevices)?;

    let config_desc = match device.active_config_descriptor() {
        Ok(config) => config,
        Err(e) => {
            log::debug!("no active configuration ({}), using the first one", e);
            device
                .config_descriptor(0)
                .during(Action::EnumeratingDevices)?
        }
    };

    // only the default alternate setting is described
    let interfaces = config_desc
        .interfaces()
        .filter_map(|interface| {
            let desc = interface.descriptors().next()?;
            let endpoints = desc
                .endpoint_descriptors()
                .map(|ep| {
                    EndpointDesc::new(
                        ep.address(),
                        ep.transfer_type(),
                        ep.direction(),
                        ep.max_packet_size(),
                    )
                })
                .collect();
            Some(InterfaceDesc::new(
                desc.interface_number(),
                desc.class_code(),
                desc.sub_class_code(),
                endpoints,
            ))
        })
        .collect();

    Ok(DeviceDesc::new(
        DeviceId::new(device.bus_number(), device.address()),
        device_desc.vendor_id(),
        device_desc.product_id(),
        device_desc.class_code(),
        interfaces,
    ))
}

/// Longest single `read_bulk` call. Between calls the handle lock is released and `close` is
/// noticed.
const READ_SLICE: Duration = Duration::from_millis(1000);

/// An open libusb device handle.
///
/// `queue` only records the request; the bulk read happens synchronously in `wait`, in slices of
/// at most [`READ_SLICE`]. `close` makes a waiting read return [`rusb::Error::NoDevice`] after the
/// current slice.
pub struct LibUsbConnection {
    handle: RwLock<Option<DeviceHandle<Context>>>,
    closed: AtomicBool,
    pending: Mutex<Option<TransferRequest>>,
    timeout: Duration,
}

impl LibUsbConnection {
    fn with_handle_mut<T>(
        &self,
        cb: impl FnOnce(&mut DeviceHandle<Context>) -> rusb::Result<T>,
    ) -> rusb::Result<T> {
        let mut handle = self.handle.write().unwrap_or_else(PoisonError::into_inner);
        match handle.as_mut() {
            Some(usb) => cb(usb),
            None => Err(rusb::Error::NoDevice),
        }
    }
}

impl Connection for LibUsbConnection {
    fn claim_interface(&self, number: u8) -> rusb::Result<()> {
        self.with_handle_mut(|usb| {
            if let Err(e) = usb.set_auto_detach_kernel_driver(true) {
                log::warn!("set_auto_detach_kernel_driver failed: {}", e);
            }
            usb.claim_interface(number)
        })
    }

    fn release_interface(&self, number: u8) -> rusb::Result<()> {
        self.with_handle_mut(|usb| usb.release_interface(number))
    }

    fn queue(&self, request: TransferRequest) -> rusb::Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_some() {
            return Err(rusb::Error::Busy);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(rusb::Error::NoDevice);
        }

        *pending = Some(request);
        Ok(())
    }

    fn wait(&self) -> rusb::Result<TransferRequest> {
        let mut request = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(rusb::Error::NotFound)?;

        let endpoint = request.endpoint();
        let len = poll_read(&self.closed, self.timeout, |slice| {
            let handle = self.handle.read().unwrap_or_else(PoisonError::into_inner);
            let usb = handle.as_ref().ok_or(rusb::Error::NoDevice)?;
            usb.read_bulk(endpoint, request.buffer_mut(), slice)
        })?;
        log::trace!("read {} bytes from endpoint {:#04x}", len, endpoint);
        request.complete(len);
        Ok(request)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut handle = self.handle.write().unwrap_or_else(PoisonError::into_inner);
        if handle.take().is_some() {
            log::debug!("closed USB device handle");
        }
    }
}

/// Repeats `read` with timeouts of at most [`READ_SLICE`] until it completes or fails with
/// anything but [`rusb::Error::Timeout`].
///
/// Gives up with [`rusb::Error::NoDevice`] once `closed` is set, and with
/// [`rusb::Error::Timeout`] once `timeout` has elapsed. A zero `timeout` never elapses.
fn poll_read<T>(
    closed: &AtomicBool,
    timeout: Duration,
    mut read: impl FnMut(Duration) -> rusb::Result<T>,
) -> rusb::Result<T> {
    let started = Instant::now();
    loop {
        if closed.load(Ordering::Acquire) {
            return Err(rusb::Error::NoDevice);
        }

        let slice = if timeout == Duration::from_secs(0) {
            READ_SLICE
        } else {
            // a zero timeout would make libusb wait forever
            match timeout.checked_sub(started.elapsed()) {
                Some(left) if left > Duration::from_secs(0) => left.min(READ_SLICE),
                _ => return Err(rusb::Error::Timeout),
            }
        };

        match read(slice) {
            Err(rusb::Error::Timeout) => log::trace!("no data after {:?}, reading again", slice),
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, thread};

    use super::*;

    #[test]
    fn close_interrupts_idle_read() {
        let closed = Arc::new(AtomicBool::new(false));
        let reads = AtomicUsize::new(0);

        let t = {
            let closed = closed.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                closed.store(true, Ordering::Release);
            })
        };

        let res: rusb::Result<usize> = poll_read(&closed, Duration::from_secs(0), |slice| {
            assert_eq!(slice, READ_SLICE);
            reads.fetch_add(1, Ordering::Relaxed);
            thread::sleep(Duration::from_millis(5));
            Err(rusb::Error::Timeout)
        });
        t.join().unwrap();

        assert_eq!(res, Err(rusb::Error::NoDevice));
        assert!(reads.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn closed_before_read() {
        let closed = AtomicBool::new(true);
        let res: rusb::Result<usize> =
            poll_read(&closed, Duration::from_secs(0), |_| panic!("read after close"));
        assert_eq!(res, Err(rusb::Error::NoDevice));
    }

    #[test]
    fn timeouts_are_retried_until_data() {
        let closed = AtomicBool::new(false);
        let mut reads = 0;
        let res = poll_read(&closed, Duration::from_secs(0), |_| {
            reads += 1;
            if reads < 3 {
                Err(rusb::Error::Timeout)
            } else {
                Ok(512)
            }
        });
        assert_eq!(res, Ok(512));
        assert_eq!(reads, 3);
    }

    #[test]
    fn other_errors_are_returned() {
        let closed = AtomicBool::new(false);
        let mut reads = 0;
        let res: rusb::Result<usize> = poll_read(&closed, Duration::from_secs(0), |_| {
            reads += 1;
            Err(rusb::Error::Pipe)
        });
        assert_eq!(res, Err(rusb::Error::Pipe));
        assert_eq!(reads, 1);
    }

    #[test]
    fn transfer_timeout_bounds_the_read() {
        let closed = AtomicBool::new(false);
        let timeout = Duration::from_millis(30);
        let res: rusb::Result<usize> = poll_read(&closed, timeout, |slice| {
            assert!(slice > Duration::from_secs(0) && slice <= timeout);
            thread::sleep(slice);
            Err(rusb::Error::Timeout)
        });
        assert_eq!(res, Err(rusb::Error::Timeout));
    }

    #[test]
    fn closed_connection_rejects_transfers() {
        let conn = LibUsbConnection {
            handle: RwLock::new(None),
            closed: AtomicBool::new(false),
            pending: Mutex::new(None),
            timeout: Duration::from_secs(0),
        };
        conn.queue(TransferRequest::new(1, 0x81, vec![0; 64])).unwrap();
        conn.close();

        assert_eq!(conn.wait().unwrap_err(), rusb::Error::NoDevice);
        let request = TransferRequest::new(2, 0x81, vec![0; 64]);
        assert_eq!(conn.queue(request), Err(rusb::Error::NoDevice));
    }
}
