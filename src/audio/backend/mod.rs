// Audio backend abstraction
//
// A backend is a push-style audio output: the ticker thread writes PCM
// bytes and the backend blocks until they are accepted by the device.
//
// Every backend follows the same linear state machine:
//
//   Config --open--> Open --start--> Running
//   Config <-close-- Open <--stop--- Running
//
// Operations outside their state are programming errors and fail with a
// `BackendError` carrying the backend id and the state at failure time.

pub mod cpal;
pub mod dummy;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::audio::spec::StreamSpec;

pub use self::cpal::CpalBackend;
pub use self::dummy::DummyBackend;

/// Identity of a backend implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendId {
    Dummy,
    Cpal,
    /// Backends living outside this crate
    Custom(&'static str),
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendId::Dummy => write!(f, "dummy"),
            BackendId::Cpal => write!(f, "cpal"),
            BackendId::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Lifecycle state of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendState {
    Config,
    Open,
    Running,
}

/// Output device offered by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Category of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Operation called outside the state that allows it
    InvalidState,
    /// The device API reported a failure
    Device,
    /// No usable device or stream configuration
    Unsupported,
}

/// Failure of a backend operation
#[derive(Debug, Clone, Error)]
#[error("{backend} backend ({state:?}): {message}")]
pub struct BackendError {
    pub backend: BackendId,
    pub state: BackendState,
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(
        backend: BackendId,
        state: BackendState,
        kind: BackendErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            state,
            kind,
            message: message.into(),
        }
    }

    /// The device API reported a failure
    pub fn device(backend: BackendId, state: BackendState, message: impl Into<String>) -> Self {
        Self::new(backend, state, BackendErrorKind::Device, message)
    }

    /// An operation was called in a state that does not allow it
    pub fn invalid_state(backend: BackendId, state: BackendState, operation: &str) -> Self {
        Self::new(
            backend,
            state,
            BackendErrorKind::InvalidState,
            format!("'{}' is not allowed in state {:?}", operation, state),
        )
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Fails with an invalid-state error unless `state == expected`
pub fn require_state(
    backend: BackendId,
    state: BackendState,
    expected: BackendState,
    operation: &str,
) -> BackendResult<()> {
    if state == expected {
        Ok(())
    } else {
        Err(BackendError::invalid_state(backend, state, operation))
    }
}

/// Push-style audio output device
pub trait Backend: Send {
    fn id(&self) -> BackendId;

    /// Output devices offered by this backend
    fn devices(&mut self) -> BackendResult<Vec<DeviceInfo>>;

    /// Requests a stream spec (Config state only)
    fn configure(&mut self, spec: StreamSpec) -> BackendResult<()>;

    /// Opens the device (Config -> Open) and returns the negotiated spec,
    /// which may differ from the requested one
    fn open(&mut self) -> BackendResult<StreamSpec>;

    /// Open -> Config
    fn close(&mut self) -> BackendResult<()>;

    /// Open -> Running
    fn start(&mut self) -> BackendResult<()>;

    /// Running -> Open; pending audio is drained
    fn stop(&mut self) -> BackendResult<()>;

    /// Writes all of `data` or fails (Running state only)
    fn write(&mut self, data: &[u8]) -> BackendResult<()>;

    /// Discards pending audio
    fn flush(&mut self) -> BackendResult<()>;

    /// Blocks until pending audio has been played
    fn drain(&mut self) -> BackendResult<()>;

    /// Output latency (zero if unknown)
    fn latency(&self) -> Duration;

    fn state(&self) -> BackendState;
}

/// Brings a backend back to the Config state, ignoring failures
///
/// Used for cleanup after another error, where a secondary failure must
/// not hide the primary one.
pub fn close_quietly(backend: &mut dyn Backend) {
    if backend.state() == BackendState::Running {
        if let Err(e) = backend.stop() {
            log::debug!("Ignoring failure while stopping backend: {}", e);
        }
    }
    if backend.state() == BackendState::Open {
        if let Err(e) = backend.close() {
            log::debug!("Ignoring failure while closing backend: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_state() {
        assert!(
            require_state(
                BackendId::Dummy,
                BackendState::Open,
                BackendState::Open,
                "start"
            )
            .is_ok()
        );

        let err = require_state(
            BackendId::Dummy,
            BackendState::Config,
            BackendState::Running,
            "write",
        )
        .unwrap_err();
        assert_eq!(err.backend, BackendId::Dummy);
        assert_eq!(err.state, BackendState::Config);
        assert_eq!(err.kind, BackendErrorKind::InvalidState);
        assert!(err.to_string().contains("write"));
    }

    #[test]
    fn test_close_quietly_from_running() {
        let mut backend = DummyBackend::new();
        backend.open().unwrap();
        backend.start().unwrap();
        close_quietly(&mut backend);
        assert_eq!(backend.state(), BackendState::Config);
    }
}
