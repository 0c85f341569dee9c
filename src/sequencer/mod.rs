// Sequencer module - meter, stream generator and tap tempo

pub mod generator;
pub mod meter;
pub mod tap_analyser;

pub use generator::{Generator, GeneratorId, TempoMode, TrainerMode};
pub use meter::{Accent, Meter};
pub use tap_analyser::{Estimate, Tap, TapAnalyser, TapFlags};
