use std::{fmt, io};

pub struct Error {
    action: Option<Action>,
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn with_action(kind: impl Into<ErrorKind>, action: Action) -> Self {
        Self {
            action: Some(action),
            kind: kind.into(),
        }
    }

    /// Returns what the library was doing when the error occurred.
    pub fn action(&self) -> Option<Action> {
        self.action
    }

    /// Classifies the error by the stage of the capture pipeline it originated in.
    pub fn class(&self) -> ErrorClass {
        if let ErrorKind::Bind { reason, .. } = &self.kind {
            return ErrorClass::Bind(*reason);
        }

        match self.action {
            Some(Action::EnumeratingDevices) => ErrorClass::Discovery,
            Some(Action::RequestingPermission) => ErrorClass::Permission,
            Some(Action::OpeningDevice) => ErrorClass::Connection,
            Some(Action::BindingInterface) => ErrorClass::Bind(BindError::ClaimFailed),
            Some(Action::QueueingTransfer) | Some(Action::AwaitingTransfer) => {
                ErrorClass::Transfer
            }
            Some(Action::DecodingFrame) => ErrorClass::Decode,
            Some(Action::StartingCapture) | Some(Action::ReleasingSession) | None => {
                ErrorClass::Lifecycle
            }
        }
    }

    /// If this error was caused by a failure to bind the video interface, returns the reason.
    pub fn bind_error(&self) -> Option<BindError> {
        match self.class() {
            ErrorClass::Bind(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(action) = &self.action {
            write!(f, "error while {}: ", action)?;
        }

        match &self.kind {
            ErrorKind::Rusb(e) => write!(f, "{}", e),
            ErrorKind::Io(e) => write!(f, "{}", e),
            ErrorKind::Image(e) => write!(f, "{}", e),
            ErrorKind::Bind {
                reason,
                source: Some(source),
            } => write!(f, "{}: {}", reason, source),
            ErrorKind::Bind {
                reason,
                source: None,
            } => write!(f, "{}", reason),
            ErrorKind::Other(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Rusb(e) => Some(e),
            ErrorKind::Io(e) => Some(e),
            ErrorKind::Image(e) => Some(e),
            ErrorKind::Bind {
                source: Some(e), ..
            } => Some(e),
            ErrorKind::Bind { source: None, .. } => None,
            ErrorKind::Other(e) => Some(&**e),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Rusb(rusb::Error),
    Io(io::Error),
    Image(image::ImageError),
    Bind {
        reason: BindError,
        source: Option<rusb::Error>,
    },
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ErrorKind {
    fn from(v: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(v)
    }
}

impl From<String> for ErrorKind {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}

impl From<&'_ str> for ErrorKind {
    fn from(s: &str) -> Self {
        Self::Other(s.into())
    }
}

impl From<rusb::Error> for ErrorKind {
    fn from(e: rusb::Error) -> Self {
        Self::Rusb(e)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<image::ImageError> for ErrorKind {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

/// Reasons why the video interface of a device could not be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    /// None of the device's interfaces uses the video class.
    NoVideoInterface,
    /// The video interface could not be claimed exclusively.
    ClaimFailed,
    /// The video interface has no bulk IN endpoint.
    NoEndpoint,
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BindError::NoVideoInterface => "device has no video interface",
            BindError::ClaimFailed => "failed to claim video interface",
            BindError::NoEndpoint => "video interface has no bulk IN endpoint",
        };
        f.write_str(s)
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No candidate device could be found.
    Discovery,
    /// Access to the device was denied or revoked.
    Permission,
    /// The device could not be opened.
    Connection,
    /// The video interface could not be bound.
    Bind(BindError),
    /// A bulk transfer could not be queued or completed.
    Transfer,
    /// A transferred buffer did not contain a decodable frame.
    Decode,
    /// The capture controller was used incorrectly, or a session resource failed.
    Lifecycle,
}

/// A list of actions during which this library might encounter errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Action {
    EnumeratingDevices,
    RequestingPermission,
    OpeningDevice,
    BindingInterface,
    StartingCapture,
    QueueingTransfer,
    AwaitingTransfer,
    DecodingFrame,
    ReleasingSession,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::EnumeratingDevices => "enumerating USB devices",
            Action::RequestingPermission => "requesting device permission",
            Action::OpeningDevice => "opening USB device",
            Action::BindingInterface => "binding the video interface",
            Action::StartingCapture => "starting video capture",
            Action::QueueingTransfer => "queueing a bulk transfer",
            Action::AwaitingTransfer => "waiting for a bulk transfer",
            Action::DecodingFrame => "decoding a video frame",
            Action::ReleasingSession => "releasing the capture session",
        };
        f.write_str(s)
    }
}

pub(crate) trait ResultExt<T, E> {
    fn during(self, action: Action) -> Result<T, Error>;
}

impl<T, E: Into<ErrorKind>> ResultExt<T, E> for Result<T, E> {
    fn during(self, action: Action) -> Result<T, Error> {
        self.map_err(|e| Error::with_action(e, action))
    }
}

pub(crate) fn err<T>(err: impl Into<ErrorKind>, action: Action) -> Result<T, Error> {
    Err(Error::with_action(err, action))
}

pub(crate) fn bind_err<T>(reason: BindError, source: Option<rusb::Error>) -> Result<T, Error> {
    err(ErrorKind::Bind { reason, source }, Action::BindingInterface)
}
