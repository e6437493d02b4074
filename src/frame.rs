//! Decoded frames and the consumers they are handed to.

use std::fmt;

use futures::channel::mpsc;
use image::ImageFormat;

use crate::{
    error::{Action, ResultExt},
    Error, Result,
};

/// A decoded frame in 8-bit RGBA.
///
/// Owned by whoever received it; the capture thread keeps no reference.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Turns the payload of one bulk transfer into a [`Frame`].
pub trait Decoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Frame>;
}

/// Decodes compressed still images (JPEG or PNG) using the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder {
    format: Option<ImageFormat>,
}

impl ImageDecoder {
    /// Guesses the format of every payload from its magic bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes every payload as `format`, skipping format detection.
    pub fn with_format(format: ImageFormat) -> Self {
        Self {
            format: Some(format),
        }
    }
}

impl Decoder for ImageDecoder {
    fn decode(&self, data: &[u8]) -> Result<Frame> {
        let image = match self.format {
            Some(format) => image::load_from_memory_with_format(data, format),
            None => image::load_from_memory(data),
        }
        .during(Action::DecodingFrame)?;

        let rgba = image.into_rgba8();
        Ok(Frame::new(rgba.width(), rgba.height(), rgba.into_raw()))
    }
}

/// Receives decoded frames from the capture thread.
///
/// Both methods are called on the capture thread and must not block. Consumers that need to do
/// real work (rendering, encoding) should forward the frame to their own thread, for example via
/// [`ChannelSink`].
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: Frame);

    /// Called once when the capture loop gives up after repeated transfer failures.
    fn on_failure(&self, error: Error) {
        log::error!("video capture failed: {}", error);
    }
}

impl<F> FrameSink for F
where
    F: Fn(Frame) + Send + Sync,
{
    fn on_frame(&self, frame: Frame) {
        self(frame)
    }
}

#[derive(Debug)]
pub enum CaptureEvent {
    Frame(Frame),
    Failed(Error),
}

/// A [`FrameSink`] that forwards everything into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (tx, rx) = mpsc::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: CaptureEvent) {
        if self.tx.unbounded_send(event).is_err() {
            log::debug!("frame receiver dropped, discarding event");
        }
    }
}

impl FrameSink for ChannelSink {
    fn on_frame(&self, frame: Frame) {
        self.send(CaptureEvent::Frame(frame));
    }

    fn on_failure(&self, error: Error) {
        self.send(CaptureEvent::Failed(error));
    }
}
