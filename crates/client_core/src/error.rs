use shared::domain::DeviceId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Camera permission is required to scan QR codes")]
    PermissionDenied,
    #[error("No camera found on this device")]
    NoDevice,
    #[error("camera source is not supported: {0}")]
    Unsupported(String),
    #[error("Invalid QR code")]
    ValidationMismatch,
    #[error("failed to update {device}: {source}")]
    RemoteWriteFailed {
        device: DeviceId,
        #[source]
        source: anyhow::Error,
    },
    #[error("command interpreter is unavailable")]
    InterpreterUnavailable,
    #[error("Authentication required")]
    AuthRequired,
    #[error("unknown device '{0}'")]
    UnknownDevice(String),
    #[error("session store failure: {0}")]
    Session(#[source] anyhow::Error),
    #[error("{0}")]
    Remote(#[source] anyhow::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
