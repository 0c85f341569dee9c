// Ticker state flags and the statistics snapshot

use std::time::{Duration, Instant};

use bitflags::bitflags;

use crate::sequencer::generator::{GeneratorId, GeneratorStatistics, TempoMode};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TickerState: u8 {
        /// `start` was called and not yet followed by `stop`
        const STARTED = 1 << 0;
        /// An audio thread was spawned and not yet joined
        const RUNNING = 1 << 1;
        /// The audio thread failed; cleared by `reset`
        const ERROR = 1 << 2;
    }
}

/// Snapshot exported by the audio thread after every cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    /// When the snapshot was taken
    pub timestamp: Instant,
    pub generator: GeneratorId,
    pub mode: TempoMode,
    /// Beat position (`0 <= position < beats`)
    pub position: f64,
    /// BPM
    pub tempo: f64,
    /// BPM per minute
    pub acceleration: f64,
    pub beats: usize,
    pub accents: usize,
    pub next_accent: usize,
    /// Time from `timestamp` until the next accent becomes audible
    pub next_accent_delay: Duration,
    pub backend_latency: Duration,
}

impl Statistics {
    pub fn new(generator: GeneratorStatistics, latency: Duration) -> Self {
        Self {
            timestamp: Instant::now(),
            generator: generator.generator,
            mode: generator.mode,
            position: generator.position,
            tempo: generator.tempo,
            acceleration: generator.acceleration,
            beats: generator.beats,
            accents: generator.accents,
            next_accent: generator.next_accent,
            next_accent_delay: generator.next_accent_delay + latency,
            backend_latency: latency,
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            timestamp: Instant::now(),
            generator: GeneratorId::DrainBuffer,
            mode: TempoMode::Constant,
            position: 0.0,
            tempo: 120.0,
            acceleration: 0.0,
            beats: 4,
            accents: 4,
            next_accent: 0,
            next_accent_delay: Duration::ZERO,
            backend_latency: Duration::ZERO,
        }
    }
}
