// Synth module - click sounds

pub mod library;
pub mod sound;
pub mod synthesizer;

pub use library::SoundLibrary;
pub use sound::{Envelope, EnvelopeShape, SoundParameters};
pub use synthesizer::Synthesizer;
