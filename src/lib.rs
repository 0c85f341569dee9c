// GMetronome - Library exports for the demo, tests and benchmarks

pub mod audio;
pub mod config;
pub mod physics;
pub mod sequencer;
pub mod synth;
pub mod ticker;

// Re-export commonly used types for convenience
pub use audio::backend::{
    Backend, BackendError, BackendId, BackendState, CpalBackend, DummyBackend,
};
pub use audio::spec::{SampleFormat, StreamSpec};
pub use config::{GeneratorConfig, TickerConfig};
pub use sequencer::{
    Accent, Estimate, GeneratorId, Meter, TapAnalyser, TapFlags, TempoMode, TrainerMode,
};
pub use synth::SoundParameters;
pub use ticker::{GMetronomeError, Statistics, Ticker, TickerResult, TickerState};
