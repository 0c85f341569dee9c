// Configuration of the ticker and its generator

use std::time::Duration;

use crate::audio::spec::StreamSpec;

/// Timing of the generated stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Length of every rendered click sound
    pub sound_duration: Duration,
    /// Silence written before ticking starts, to prime the device buffers
    pub fill_duration: Duration,
    /// Upper bound of a single chunk
    pub max_chunk: Duration,
    /// Target size of silence chunks
    pub avg_chunk: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sound_duration: Duration::from_millis(60),
            fill_duration: Duration::from_millis(200),
            max_chunk: Duration::from_millis(80),
            avg_chunk: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickerConfig {
    /// Stream spec requested from backends (they may negotiate another one)
    pub spec: StreamSpec,
    pub generator: GeneratorConfig,
    /// How long `reset` waits for the audio thread to finish
    pub join_timeout: Duration,
    /// How long the audio thread waits for the control thread during a
    /// backend swap
    pub swap_timeout: Duration,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            spec: StreamSpec::default(),
            generator: GeneratorConfig::default(),
            join_timeout: Duration::from_secs(2),
            swap_timeout: Duration::from_secs(1),
        }
    }
}
