// Generator - state machine producing the click stream chunk by chunk
//
// Every audio cycle the active state decides how many frames to hand to
// the backend and whether they are silence or (a prefix of) an accent's
// sound. In the regular state the beat oscillator is advanced by exactly
// the emitted duration, so accents stay sample accurate while the tempo
// changes under acceleration or synchronization.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::meter::{Accent, Meter};
use crate::audio::spec::StreamSpec;
use crate::config::GeneratorConfig;
use crate::physics::BeatKinematics;
use crate::synth::library::SoundLibrary;
use crate::synth::sound::SoundParameters;

/// Valid ranges of the generator settings
pub mod limits {
    /// Tempo in BPM
    pub const MIN_TEMPO: f64 = 30.0;
    pub const MAX_TEMPO: f64 = 250.0;
    /// Acceleration in BPM per minute
    pub const MIN_ACCEL: f64 = 1.0;
    pub const MAX_ACCEL: f64 = 1000.0;
    /// Stepwise tempo increment in BPM
    pub const MIN_STEP: f64 = 1.0;
    pub const MAX_STEP: f64 = 100.0;
    /// Beats between two stepwise increments
    pub const MIN_HOLD: usize = 1;
    pub const MAX_HOLD: usize = 1000;
}

/// Tempo differences below this are considered equal (BPM)
const TEMPO_EPSILON: f64 = 1e-9;

/// Identity of a generator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GeneratorId {
    FillBuffer = 0,
    PreCount = 1,
    Regular = 2,
    DrainBuffer = 3,
}

/// Tempo training program selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrainerMode {
    #[default]
    Off,
    /// Ramp toward the target tempo with constant acceleration
    Continuous,
    /// Increase the tempo by a fixed step every `hold` beats
    Stepwise,
}

/// Tempo behaviour currently in effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TempoMode {
    Constant,
    Continuous,
    Stepwise,
    Sync,
}

/// Snapshot of the generator for the statistics export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorStatistics {
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
    /// Index of the next accent to be played
    pub next_accent: usize,
    /// Time from the end of the last emitted chunk to the next accent
    pub next_accent_delay: Duration,
}

/// Splits `remaining` frames into chunks of at most `max` frames
///
/// Returns the size of the next chunk. When more than one chunk is needed
/// the frames are divided evenly into pieces close to `avg`, so there is
/// no tiny trailing chunk.
pub fn chunk_frames(remaining: usize, max: usize, avg: usize) -> usize {
    if remaining <= max {
        return remaining;
    }
    let pieces = (remaining as f64 / avg.max(1) as f64).round().max(1.0) as usize;
    (remaining / pieces).clamp(1, max.max(1))
}

#[derive(Debug, Clone, Copy)]
struct Regular {
    /// Last accent reached (about to be played if `accent_point`)
    accent: usize,
    accent_point: bool,
    /// Frames until the next accent is reached
    next_accent_frames: usize,
    /// Beats crossed since the last stepwise increment
    hold_counter: usize,
    /// A timed synchronization is in progress
    synchronizing: bool,
}

#[derive(Debug, Clone, Copy)]
enum State {
    FillBuffer { remaining: usize },
    PreCount,
    Regular(Regular),
    DrainBuffer,
}

impl State {
    fn id(&self) -> GeneratorId {
        match self {
            State::FillBuffer { .. } => GeneratorId::FillBuffer,
            State::PreCount => GeneratorId::PreCount,
            State::Regular(_) => GeneratorId::Regular,
            State::DrainBuffer => GeneratorId::DrainBuffer,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Chunk {
    Silence(usize),
    Sound(Accent, usize),
}

impl Chunk {
    fn frames(self) -> usize {
        match self {
            Chunk::Silence(frames) | Chunk::Sound(_, frames) => frames,
        }
    }
}

pub struct Generator {
    config: GeneratorConfig,
    spec: StreamSpec,
    max_chunk_frames: usize,
    avg_chunk_frames: usize,
    fill_frames: usize,
    silence: Vec<u8>,
    library: SoundLibrary,

    meter: Meter,
    tempo: f64,
    target: f64,
    accel: f64,
    step: f64,
    hold: usize,
    trainer: TrainerMode,

    kinematics: BeatKinematics,
    state: State,
}

impl Generator {
    pub fn new(config: GeneratorConfig, spec: StreamSpec) -> Self {
        let mut generator = Self {
            config,
            spec,
            max_chunk_frames: 0,
            avg_chunk_frames: 0,
            fill_frames: 0,
            silence: Vec::new(),
            library: SoundLibrary::new(spec, config.sound_duration),
            meter: Meter::default(),
            tempo: 120.0,
            target: 120.0,
            accel: 60.0,
            step: 1.0,
            hold: 4,
            trainer: TrainerMode::Off,
            kinematics: BeatKinematics::new(),
            state: State::DrainBuffer,
        };
        generator.prepare(spec);
        generator
    }

    /// Adapts the generator to the stream spec negotiated with a backend
    pub fn prepare(&mut self, spec: StreamSpec) {
        self.spec = spec;
        self.max_chunk_frames = spec.duration_to_frames(self.config.max_chunk);
        self.avg_chunk_frames = spec.duration_to_frames(self.config.avg_chunk);
        self.fill_frames = spec.duration_to_frames(self.config.fill_duration);
        self.silence = vec![0; spec.frames_to_bytes(self.max_chunk_frames)];

        if self.library.reconfigure(spec) {
            log::debug!("Sound library reconfigured for {}", spec);
        }
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    pub fn id(&self) -> GeneratorId {
        self.state.id()
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn trainer_mode(&self) -> TrainerMode {
        self.trainer
    }

    pub fn sound_library(&self) -> &SoundLibrary {
        &self.library
    }

    /// Begins a new stream with the buffer priming state
    pub fn start(&mut self) {
        self.switch_generator(GeneratorId::FillBuffer);
    }

    /// Ends the stream
    pub fn stop(&mut self) {
        self.switch_generator(GeneratorId::DrainBuffer);
    }

    /// Leaves the active state and enters `id`
    ///
    /// States may forward to another state on entry.
    pub fn switch_generator(&mut self, id: GeneratorId) {
        self.leave();
        let mut next = Some(id);
        while let Some(id) = next {
            next = self.enter(id);
        }
        log::trace!("Generator switched to {:?}", self.state.id());
    }

    fn leave(&mut self) {
        if let State::Regular(_) = self.state {
            self.kinematics.stop_acceleration();
            self.kinematics.stop_synchronization();
        }
    }

    fn enter(&mut self, id: GeneratorId) -> Option<GeneratorId> {
        match id {
            GeneratorId::FillBuffer => {
                self.state = State::FillBuffer {
                    remaining: self.fill_frames,
                };
                (self.fill_frames == 0).then_some(GeneratorId::PreCount)
            }
            GeneratorId::PreCount => {
                self.state = State::PreCount;
                Some(GeneratorId::Regular)
            }
            GeneratorId::Regular => {
                self.kinematics.reset();
                self.kinematics.set_beats(self.meter.beats(), false);
                self.kinematics.set_tempo(self.tempo);
                if self.trainer == TrainerMode::Continuous {
                    self.start_acceleration();
                }

                let mut regular = Regular {
                    accent: 0,
                    accent_point: true,
                    next_accent_frames: 0,
                    hold_counter: 0,
                    synchronizing: false,
                };
                self.update_next_accent(&mut regular);
                self.state = State::Regular(regular);
                None
            }
            GeneratorId::DrainBuffer => {
                self.state = State::DrainBuffer;
                None
            }
        }
    }

    /// Produces the next chunk of audio
    pub fn cycle(&mut self) -> &[u8] {
        let chunk = match self.state {
            State::FillBuffer { remaining } => {
                let frames = self.chunk_frames(remaining);
                let remaining = remaining - frames;
                self.state = State::FillBuffer { remaining };
                if remaining == 0 {
                    self.switch_generator(GeneratorId::PreCount);
                }
                Chunk::Silence(frames)
            }
            State::PreCount | State::DrainBuffer => Chunk::Silence(0),
            State::Regular(regular) => self.cycle_regular(regular),
        };

        match chunk {
            Chunk::Silence(frames) => &self.silence[..self.spec.frames_to_bytes(frames)],
            Chunk::Sound(accent, frames) => {
                let bytes = self.spec.frames_to_bytes(frames);
                &self.library.get(accent)[..bytes]
            }
        }
    }

    fn cycle_regular(&mut self, mut regular: Regular) -> Chunk {
        if !regular.accent_point && regular.next_accent_frames == 0 {
            self.reach_next_accent(&mut regular);
        }

        let chunk = if regular.accent_point {
            regular.accent_point = false;
            let accent = self.meter.accents()[regular.accent];
            let audible = self
                .library
                .params(accent)
                .is_some_and(|params| !params.is_silent());
            if audible {
                Chunk::Sound(
                    accent,
                    self.library.frames().min(regular.next_accent_frames),
                )
            } else {
                Chunk::Silence(self.chunk_frames(regular.next_accent_frames))
            }
        } else {
            Chunk::Silence(self.chunk_frames(regular.next_accent_frames))
        };

        let frames = chunk.frames();
        self.kinematics.step(self.spec.frames_to_secs(frames));
        regular.next_accent_frames = regular.next_accent_frames.saturating_sub(frames);

        if regular.next_accent_frames == 0 {
            self.reach_next_accent(&mut regular);
        }

        if regular.synchronizing && !self.kinematics.is_synchronizing() {
            regular.synchronizing = false;
            if self.trainer == TrainerMode::Continuous {
                self.start_acceleration();
                self.update_next_accent(&mut regular);
            }
        }

        self.state = State::Regular(regular);
        chunk
    }

    fn reach_next_accent(&mut self, regular: &mut Regular) {
        regular.accent = (regular.accent + 1) % self.meter.accent_count();
        regular.accent_point = true;

        if self.trainer == TrainerMode::Stepwise && regular.accent % self.meter.division() == 0 {
            self.step_tempo(regular);
        }
        self.update_next_accent(regular);
    }

    /// Counts a crossed beat and applies a tempo step every `hold` beats
    fn step_tempo(&mut self, regular: &mut Regular) {
        regular.hold_counter += 1;
        if regular.hold_counter < self.hold {
            return;
        }
        regular.hold_counter = 0;

        let next = if self.target > self.tempo {
            (self.tempo + self.step).min(self.target)
        } else {
            (self.tempo - self.step).max(self.target)
        };
        if (next - self.tempo).abs() > TEMPO_EPSILON {
            log::debug!("Stepwise tempo {:.1} -> {:.1} BPM", self.tempo, next);
            self.tempo = next;
            self.kinematics.set_tempo(next);
        }
    }

    /// Realigns the hold counter after beats or hold changed
    ///
    /// The counter keeps its residue modulo `gcd(hold, beats)` in sync with
    /// the current beat, so steps stay on the same beats of the bar.
    fn recompute_stepwise(&self, regular: &mut Regular) {
        let hold = self.hold.max(1);
        let beats = self.meter.beats();
        let g = gcd(hold, beats);
        let beat = (regular.accent / self.meter.division()) % beats;
        let counter = regular.hold_counter;
        regular.hold_counter = (counter - counter % g + beat % g) % hold;
    }

    /// Beat distance from the current position to the next accent
    fn next_accent_distance(&self, regular: &Regular) -> f64 {
        let beats = self.meter.beats() as f64;
        let grid = 1.0 / self.meter.division() as f64;
        let next = (regular.accent + 1) % self.meter.accent_count();
        let mut distance =
            (self.meter.accent_position(next) - self.kinematics.position()).rem_euclid(beats);

        if regular.accent_point {
            // a single accent per bar lies one full bar ahead
            if distance < 0.5 * grid {
                distance += beats;
            }
        } else if distance > grid * (1.0 + 1e-6) {
            // slightly past the accent through rounding
            distance = 0.0;
        }
        distance
    }

    fn update_next_accent(&self, regular: &mut Regular) {
        let distance = self.next_accent_distance(regular);
        let secs = self.kinematics.arrival(distance);
        regular.next_accent_frames = if secs.is_finite() {
            self.spec.secs_to_frames(secs)
        } else {
            usize::MAX
        };
    }

    fn chunk_frames(&self, remaining: usize) -> usize {
        chunk_frames(remaining, self.max_chunk_frames, self.avg_chunk_frames)
    }

    fn start_acceleration(&mut self) {
        if (self.target - self.kinematics.tempo()).abs() > TEMPO_EPSILON {
            self.kinematics.accelerate(self.accel, self.target);
        } else {
            self.kinematics.stop_acceleration();
        }
    }

    /// Applies `f` to the regular state, if active, and refreshes the
    /// distance to the next accent afterwards
    fn with_regular(&mut self, f: impl FnOnce(&mut Self, &mut Regular)) {
        if let State::Regular(mut regular) = self.state {
            f(self, &mut regular);
            self.update_next_accent(&mut regular);
            self.state = State::Regular(regular);
        }
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        self.tempo = bpm.clamp(limits::MIN_TEMPO, limits::MAX_TEMPO);
        self.with_regular(|generator, regular| {
            regular.synchronizing = false;
            generator.kinematics.set_tempo(generator.tempo);
            match generator.trainer {
                TrainerMode::Off => {}
                TrainerMode::Continuous => generator.start_acceleration(),
                TrainerMode::Stepwise => generator.recompute_stepwise(regular),
            }
        });
    }

    pub fn set_target_tempo(&mut self, bpm: f64) {
        self.target = bpm.clamp(limits::MIN_TEMPO, limits::MAX_TEMPO);
        self.refresh_acceleration();
    }

    pub fn set_accel(&mut self, bpm_per_min: f64) {
        self.accel = bpm_per_min.clamp(limits::MIN_ACCEL, limits::MAX_ACCEL);
        self.refresh_acceleration();
    }

    fn refresh_acceleration(&mut self) {
        if self.trainer != TrainerMode::Continuous {
            return;
        }
        self.with_regular(|generator, regular| {
            if !regular.synchronizing {
                generator.start_acceleration();
            }
        });
    }

    pub fn set_step(&mut self, bpm: f64) {
        self.step = bpm.clamp(limits::MIN_STEP, limits::MAX_STEP);
    }

    pub fn set_hold(&mut self, beats: usize) {
        self.hold = beats.clamp(limits::MIN_HOLD, limits::MAX_HOLD);
        if self.trainer == TrainerMode::Stepwise {
            self.with_regular(|generator, regular| generator.recompute_stepwise(regular));
        }
    }

    pub fn set_trainer_mode(&mut self, mode: TrainerMode) {
        if mode == self.trainer {
            return;
        }
        self.trainer = mode;
        self.with_regular(|generator, regular| match mode {
            TrainerMode::Off => generator.kinematics.stop_acceleration(),
            TrainerMode::Continuous => {
                if !regular.synchronizing {
                    generator.start_acceleration();
                }
            }
            TrainerMode::Stepwise => {
                generator.kinematics.stop_acceleration();
                generator.tempo = generator.kinematics.tempo();
                regular.hold_counter = 0;
                generator.recompute_stepwise(regular);
            }
        });
    }

    /// Replaces the meter
    pub fn set_meter(&mut self, meter: Meter) {
        let old = std::mem::replace(&mut self.meter, meter);

        self.with_regular(|generator, regular| {
            let turnover = !old.has_audible_accents() && generator.meter.has_audible_accents();
            generator
                .kinematics
                .set_beats(generator.meter.beats(), turnover);

            let old_division = old.division();
            let division = generator.meter.division();
            let count = generator.meter.accent_count();
            let grid_position = generator.kinematics.position() * division as f64;

            if regular.accent_point && (regular.accent * division) % old_division == 0 {
                regular.accent = grid_position.round() as usize % count;
            } else {
                regular.accent = grid_position.floor() as usize % count;
                regular.accent_point = false;
            }

            if generator.trainer == TrainerMode::Stepwise {
                generator.recompute_stepwise(regular);
            }
        });
    }

    /// Corrects the phase by `beat_dev` beats and the tempo by `tempo_dev`
    /// BPM within `time`
    ///
    /// Only effective while ticking; a zero `time` jumps instantly.
    pub fn synchronize(&mut self, beat_dev: f64, tempo_dev: f64, time: Duration) {
        self.with_regular(|generator, regular| {
            let tempo = generator.kinematics.tempo();
            let tempo_dev = tempo_dev.clamp(limits::MIN_TEMPO - tempo, limits::MAX_TEMPO - tempo);
            let secs = time.as_secs_f64();

            generator.kinematics.synchronize(beat_dev, tempo_dev, secs);

            if secs > 0.0 {
                regular.synchronizing = true;
            } else {
                let grid_position =
                    generator.kinematics.position() * generator.meter.division() as f64;
                regular.accent = grid_position.floor() as usize % generator.meter.accent_count();
                regular.accent_point = false;
                regular.synchronizing = false;
                if generator.trainer == TrainerMode::Continuous {
                    generator.start_acceleration();
                }
            }
        });
    }

    /// Sets the sound of an accent level; returns whether it changed
    pub fn set_sound(&mut self, accent: Accent, params: SoundParameters) -> bool {
        self.library.adjust(accent, params)
    }

    /// Renders all sounds that are out of date
    pub fn update_sounds(&mut self) {
        self.library.update_all();
    }

    /// The tempo behaviour actually in effect
    ///
    /// Continuous and synchronizing modes read back as constant once their
    /// force has run out.
    pub fn effective_mode(&self) -> TempoMode {
        if self.kinematics.is_synchronizing() {
            TempoMode::Sync
        } else if self.kinematics.is_accelerating() {
            TempoMode::Continuous
        } else if self.trainer == TrainerMode::Stepwise {
            TempoMode::Stepwise
        } else {
            TempoMode::Constant
        }
    }

    pub fn statistics(&self) -> GeneratorStatistics {
        let count = self.meter.accent_count();

        let (position, tempo, acceleration) = match self.state {
            State::Regular(_) => (
                self.kinematics.position(),
                self.kinematics.tempo(),
                self.kinematics.acceleration(),
            ),
            _ => (0.0, self.tempo, 0.0),
        };

        let (next_accent, delay_frames) = match self.state {
            State::Regular(regular) if regular.accent_point => (regular.accent, 0),
            State::Regular(regular) => ((regular.accent + 1) % count, regular.next_accent_frames),
            State::FillBuffer { remaining } => (0, remaining),
            State::PreCount | State::DrainBuffer => (0, 0),
        };

        GeneratorStatistics {
            generator: self.state.id(),
            mode: self.effective_mode(),
            position,
            tempo,
            acceleration,
            beats: self.meter.beats(),
            accents: count,
            next_accent,
            next_accent_delay: self.spec.frames_to_duration(delay_frames),
        }
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a.max(1) } else { gcd(b, a % b) }
}
