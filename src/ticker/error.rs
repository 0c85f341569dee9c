// Ticker errors

use std::time::Duration;

use thiserror::Error;

use crate::audio::backend::BackendError;
use crate::audio::spec::StreamSpec;

/// Failure of a ticker operation
///
/// `Clone` so a latched audio thread error can be returned by every
/// `start`/`stop` until the ticker is reset.
#[derive(Debug, Clone, Error)]
pub enum GMetronomeError {
    #[error("Failed to spawn audio thread: {0}")]
    ThreadSpawn(String),

    #[error("Failed to join audio thread: {0}")]
    ThreadJoin(String),

    #[error("Backend swap timed out after {0:?}")]
    SwapTimeout(Duration),

    #[error("Unsupported stream spec: {0}")]
    UnsupportedSpec(StreamSpec),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Audio thread failed: {0}")]
    AudioThread(String),
}

pub type TickerResult<T> = Result<T, GMetronomeError>;
