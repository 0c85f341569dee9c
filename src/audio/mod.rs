// Audio module - stream specs and output backends

pub mod backend;
pub mod spec;

pub use backend::{Backend, BackendError, BackendId, BackendState, CpalBackend, DummyBackend};
pub use spec::{SampleFormat, StreamSpec};
