//! The capture loop.
//!
//! A [`TransferLoop`] owns one worker thread per running session. The worker keeps a single
//! bulk read in flight, decodes every completed buffer, and hands the resulting frame to the
//! [`FrameSink`]. Transfer failures are retried on the spot until
//! [`Config::max_retry_attempts`] is reached, at which point the loop gives up and reports the
//! last error to the sink. The counter is only reset by [`TransferLoop::start`], so failures
//! accumulate over the lifetime of a session even if transfers succeed in between.
//!
//! Stopping is cooperative: the worker notices the request once its current transfer returns.
//! A transfer that never completes keeps the worker alive until the connection is closed or the
//! backend's transfer timeout expires.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    backend::TransferRequest,
    bind::Session,
    config::Config,
    error::{err, Action, ResultExt},
    frame::{Decoder, FrameSink},
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No capture thread is running.
    Idle,
    /// The capture thread is transferring frames.
    Running,
    /// A stop was requested; the capture thread exits after its current transfer.
    Stopping,
    /// Capture gave up after too many transfer failures.
    Failed,
}

/// Snapshot of a [`TransferLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub state: CaptureState,
    /// Transfer failures since the last [`TransferLoop::start`].
    pub retry_attempts: u32,
}

struct Shared {
    status: Mutex<Status>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.lock().state == CaptureState::Running
    }

    fn record_failure(&self) -> u32 {
        let mut status = self.lock();
        status.retry_attempts = status.retry_attempts.saturating_add(1);
        status.retry_attempts
    }

    /// Returns whether this call moved the loop into the failed state.
    fn fail(&self) -> bool {
        let mut status = self.lock();
        if status.state == CaptureState::Running {
            status.state = CaptureState::Failed;
            true
        } else {
            false
        }
    }

    fn finish(&self) {
        let mut status = self.lock();
        match status.state {
            CaptureState::Running | CaptureState::Stopping => status.state = CaptureState::Idle,
            CaptureState::Idle | CaptureState::Failed => {}
        }
    }
}

/// Runs the capture cycle for one session at a time.
pub struct TransferLoop {
    shared: Arc<Shared>,
    sink: Arc<dyn FrameSink>,
    decoder: Arc<dyn Decoder>,
    config: Config,
    worker: Option<JoinHandle<()>>,
}

impl TransferLoop {
    pub fn new(sink: Arc<dyn FrameSink>, decoder: Arc<dyn Decoder>, config: Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                status: Mutex::new(Status {
                    state: CaptureState::Idle,
                    retry_attempts: 0,
                }),
            }),
            sink,
            decoder,
            config,
            worker: None,
        }
    }

    pub fn status(&self) -> Status {
        *self.shared.lock()
    }

    /// Starts capturing from `session` on a new worker thread.
    ///
    /// Fails if a capture is already running. If the previous capture is still stopping, this
    /// blocks until its worker has exited.
    pub fn start(&mut self, session: Arc<Session>) -> Result<()> {
        if self.status().state == CaptureState::Running {
            return err("video capture is already running", Action::StartingCapture);
        }
        self.join();

        let endpoint = session.endpoint();
        let buffer_size = self.config.buffer_size(endpoint.max_packet_size());
        if buffer_size == 0 {
            return err(
                format!("capture buffer for endpoint {:#04x} is empty", endpoint.address()),
                Action::StartingCapture,
            );
        }

        *self.shared.lock() = Status {
            state: CaptureState::Running,
            retry_attempts: 0,
        };

        let worker = Worker {
            shared: self.shared.clone(),
            session,
            sink: self.sink.clone(),
            decoder: self.decoder.clone(),
            config: self.config.clone(),
            buffer_size,
        };
        let spawned = thread::Builder::new()
            .name("uvc-capture".into())
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                log::info!(
                    "video capture started on endpoint {:#04x} ({} byte buffer)",
                    endpoint.address(),
                    buffer_size
                );
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.lock().state = CaptureState::Idle;
                err(e, Action::StartingCapture)
            }
        }
    }

    /// Asks the worker to exit after its current transfer. Does nothing if capture is idle.
    pub fn stop(&self) {
        let mut status = self.shared.lock();
        match status.state {
            CaptureState::Running => {
                log::info!("stopping video capture");
                status.state = CaptureState::Stopping;
            }
            CaptureState::Failed => status.state = CaptureState::Idle,
            CaptureState::Idle | CaptureState::Stopping => {}
        }
    }

    /// Waits for the worker thread to exit.
    ///
    /// Call [`stop`](Self::stop) first, unless the loop already failed; otherwise this waits for
    /// as long as capture keeps running.
    pub fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("video capture thread panicked");
            }
        }
    }
}

impl Drop for TransferLoop {
    fn drop(&mut self) {
        // the worker is left to exit on its own, a hung transfer must not block the drop
        self.stop();
    }
}

struct Worker {
    shared: Arc<Shared>,
    session: Arc<Session>,
    sink: Arc<dyn FrameSink>,
    decoder: Arc<dyn Decoder>,
    config: Config,
    buffer_size: usize,
}

/// Leaves the loop idle when the worker exits, including by panicking.
struct ExitGuard<'a>(&'a Shared);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

impl Worker {
    fn run(self) {
        let _guard = ExitGuard(&self.shared);
        let endpoint = self.session.endpoint().address();
        let max_attempts = self.config.max_retry_attempts();

        let mut buffer = None;
        let mut next_id = 0u64;
        while self.shared.is_running() {
            next_id = next_id.wrapping_add(1);
            let buf = buffer.take().unwrap_or_else(|| vec![0; self.buffer_size]);

            match self.transfer(TransferRequest::new(next_id, endpoint, buf)) {
                Ok(completed) => {
                    self.deliver(completed.data());
                    buffer = Some(completed.into_buffer());
                }
                Err(e) => {
                    if !self.shared.is_running() {
                        log::debug!("transfer interrupted by stop: {}", e);
                        break;
                    }

                    let attempts = self.shared.record_failure();
                    log::warn!("{} (attempt {}/{})", e, attempts, max_attempts);
                    if attempts >= max_attempts {
                        if self.shared.fail() {
                            log::error!("giving up after {} failed transfers", attempts);
                            self.sink.on_failure(e);
                        }
                        break;
                    }

                    let backoff = self.config.retry_backoff();
                    if backoff > Duration::from_secs(0) {
                        thread::sleep(backoff);
                    }
                }
            }
        }

        log::debug!("video capture thread exiting");
    }

    fn transfer(&self, request: TransferRequest) -> Result<TransferRequest> {
        let id = request.id();
        let connection = self.session.connection();
        connection.queue(request).during(Action::QueueingTransfer)?;
        let completed = connection.wait().during(Action::AwaitingTransfer)?;
        if completed.id() != id {
            return err(
                format!(
                    "completed request {} does not match queued request {}",
                    completed.id(),
                    id
                ),
                Action::AwaitingTransfer,
            );
        }
        Ok(completed)
    }

    fn deliver(&self, data: &[u8]) {
        match self.decoder.decode(data) {
            Ok(frame) => self.sink.on_frame(frame),
            Err(e) => log::debug!("dropping {} byte payload: {}", data.len(), e),
        }
    }
}
