//! Grabs frames from USB video devices that stream over a bulk endpoint.
//!
//! The pipeline, leaves first:
//! - [`find_candidate`] picks a device from the enumerated list.
//! - A [`PermissionRequest`] resolves once the platform allows opening it.
//! - [`bind`] claims the device's video interface and finds its bulk IN endpoint.
//! - [`TransferLoop`] reads from that endpoint on a worker thread and hands decoded [`Frame`]s
//!   to a [`FrameSink`].
//!
//! [`Capture`] strings these together for a single device; [`LibUsb`] provides the USB stack.
//! Payloads are treated as opaque images: no UVC payload headers are parsed and no stream format
//! is negotiated.

mod backend;
mod bind;
mod capture;
mod config;
mod device;
mod error;
mod frame;
mod permission;
mod select;
mod transfer;
mod usb;

#[cfg(test)]
mod mock;

pub use backend::{Connection, TransferRequest, UsbBackend};
pub use bind::{bind, Session};
pub use capture::Capture;
pub use config::{Config, BUFFER_MULTIPLIER, MAX_RETRY_ATTEMPTS};
pub use device::{
    DeviceDesc, DeviceId, Direction, EndpointDesc, InterfaceDesc, TransferType, CLASS_VIDEO,
};
pub use error::{Action, BindError, Error, ErrorClass};
pub use frame::{CaptureEvent, ChannelSink, Decoder, Frame, FrameSink, ImageDecoder};
pub use image::ImageFormat;
pub use permission::{permission_channel, Permission, PermissionRequest, PermissionResponder};
pub use select::find_candidate;
pub use transfer::{CaptureState, Status, TransferLoop};
pub use usb::{LibUsb, LibUsbConnection};

pub type Result<T> = std::result::Result<T, Error>;
