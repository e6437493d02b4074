//! Scripted stand-ins for the USB stack, the decoder and the frame consumer.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use crate::{
    backend::{Connection, TransferRequest, UsbBackend},
    device::{
        DeviceDesc, DeviceId, Direction, EndpointDesc, InterfaceDesc, TransferType, CLASS_VIDEO,
    },
    error::{err, Action},
    frame::{Decoder, Frame, FrameSink},
    permission::{permission_channel, Permission, PermissionRequest},
    Error, Result,
};

/// What the next transfer does.
pub(crate) enum Outcome {
    /// Completes with this payload.
    Data(Vec<u8>),
    /// `queue` rejects the request.
    QueueError(rusb::Error),
    /// `wait` reports an I/O error.
    WaitError(rusb::Error),
    /// `wait` returns a request other than the queued one.
    Mismatch,
}

pub(crate) fn frame_payload() -> Outcome {
    Outcome::Data(b"FRAME-payload".to_vec())
}

struct State {
    script: VecDeque<Outcome>,
    pending: Option<TransferRequest>,
    closed: bool,
    claimed: Vec<u8>,
    released: Vec<u8>,
    queued: usize,
}

/// A connection whose transfers follow a script.
///
/// Once the script runs out, `wait` blocks until more outcomes are pushed or the connection is
/// closed, like a device that stopped sending data.
pub(crate) struct MockConnection {
    state: Mutex<State>,
    cond: Condvar,
    claim_error: Option<rusb::Error>,
}

impl MockConnection {
    pub(crate) fn new(script: Vec<Outcome>) -> Arc<Self> {
        Self::build(script, None)
    }

    pub(crate) fn failing_claim(error: rusb::Error) -> Arc<Self> {
        Self::build(Vec::new(), Some(error))
    }

    fn build(script: Vec<Outcome>, claim_error: Option<rusb::Error>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                script: script.into(),
                pending: None,
                closed: false,
                claimed: Vec::new(),
                released: Vec::new(),
                queued: 0,
            }),
            cond: Condvar::new(),
            claim_error,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn push(&self, outcome: Outcome) {
        self.lock().script.push_back(outcome);
        self.cond.notify_all();
    }

    pub(crate) fn claimed(&self) -> Vec<u8> {
        self.lock().claimed.clone()
    }

    pub(crate) fn released(&self) -> Vec<u8> {
        self.lock().released.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn queued(&self) -> usize {
        self.lock().queued
    }

    pub(crate) fn is_waiting(&self) -> bool {
        let state = self.lock();
        state.pending.is_some() && state.script.is_empty()
    }
}

impl Connection for MockConnection {
    fn claim_interface(&self, number: u8) -> rusb::Result<()> {
        if let Some(e) = self.claim_error {
            return Err(e);
        }
        self.lock().claimed.push(number);
        Ok(())
    }

    fn release_interface(&self, number: u8) -> rusb::Result<()> {
        self.lock().released.push(number);
        Ok(())
    }

    fn queue(&self, request: TransferRequest) -> rusb::Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(rusb::Error::NoDevice);
        }
        if let Some(Outcome::QueueError(e)) = state.script.front() {
            let e = *e;
            state.script.pop_front();
            return Err(e);
        }
        if state.pending.is_some() {
            return Err(rusb::Error::Busy);
        }
        state.queued += 1;
        state.pending = Some(request);
        Ok(())
    }

    fn wait(&self) -> rusb::Result<TransferRequest> {
        let mut state = self.lock();
        loop {
            if state.closed {
                state.pending = None;
                return Err(rusb::Error::NoDevice);
            }
            if state.pending.is_none() {
                return Err(rusb::Error::NotFound);
            }
            match state.script.pop_front() {
                Some(Outcome::Data(bytes)) => {
                    let mut request = state.pending.take().unwrap();
                    let n = bytes.len().min(request.capacity());
                    request.buffer_mut()[..n].copy_from_slice(&bytes[..n]);
                    request.complete(n);
                    return Ok(request);
                }
                Some(Outcome::WaitError(e)) | Some(Outcome::QueueError(e)) => {
                    state.pending = None;
                    return Err(e);
                }
                Some(Outcome::Mismatch) => {
                    let request = state.pending.take().unwrap();
                    return Ok(TransferRequest::new(
                        request.id().wrapping_add(1),
                        request.endpoint(),
                        Vec::new(),
                    ));
                }
                None => state = self.cond.wait(state).unwrap(),
            }
        }
    }

    fn close(&self) {
        self.lock().closed = true;
        self.cond.notify_all();
    }
}

pub(crate) struct MockBackend {
    pub(crate) devices: Vec<DeviceDesc>,
    pub(crate) connection: Option<Arc<MockConnection>>,
    pub(crate) permission: Permission,
}

impl MockBackend {
    pub(crate) fn new(devices: Vec<DeviceDesc>, connection: Arc<MockConnection>) -> Self {
        Self {
            devices,
            connection: Some(connection),
            permission: Permission::Granted,
        }
    }
}

impl UsbBackend for MockBackend {
    fn list_devices(&self) -> Result<Vec<DeviceDesc>> {
        Ok(self.devices.clone())
    }

    fn request_permission(&self, _device: &DeviceDesc) -> PermissionRequest {
        let (responder, request) = permission_channel();
        responder.respond(self.permission);
        request
    }

    fn open(&self, _device: &DeviceDesc) -> Result<Arc<dyn Connection>> {
        match &self.connection {
            Some(connection) => Ok(connection.clone() as Arc<dyn Connection>),
            None => err(rusb::Error::NoDevice, Action::OpeningDevice),
        }
    }
}

/// Accepts payloads starting with `FRAME`; the frame width is the payload length.
pub(crate) struct FakeDecoder;

impl Decoder for FakeDecoder {
    fn decode(&self, data: &[u8]) -> Result<Frame> {
        if data.starts_with(b"FRAME") {
            Ok(Frame::new(data.len() as u32, 1, data.to_vec()))
        } else {
            err("not a frame", Action::DecodingFrame)
        }
    }
}

#[derive(Default)]
pub(crate) struct CollectingSink {
    frames: Mutex<Vec<Frame>>,
    failures: Mutex<Vec<Error>>,
}

impl CollectingSink {
    pub(crate) fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub(crate) fn failure_count(&self) -> usize {
        self.failures.lock().unwrap().len()
    }

    pub(crate) fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub(crate) fn failure_classes(&self) -> Vec<crate::ErrorClass> {
        self.failures.lock().unwrap().iter().map(Error::class).collect()
    }
}

impl FrameSink for CollectingSink {
    fn on_frame(&self, frame: Frame) {
        self.frames.lock().unwrap().push(frame);
    }

    fn on_failure(&self, error: Error) {
        self.failures.lock().unwrap().push(error);
    }
}

pub(crate) fn bulk_in(max_packet_size: u16) -> EndpointDesc {
    EndpointDesc::new(0x81, TransferType::Bulk, Direction::In, max_packet_size)
}

/// A device with the video class and a single video interface.
pub(crate) fn camera(endpoints: Vec<EndpointDesc>) -> DeviceDesc {
    DeviceDesc::new(
        DeviceId::new(1, 4),
        0x046d,
        0x0825,
        CLASS_VIDEO,
        vec![InterfaceDesc::new(0, CLASS_VIDEO, 2, endpoints)],
    )
}

pub(crate) fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting until {}", what);
        }
        thread::sleep(Duration::from_millis(1));
    }
}

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
