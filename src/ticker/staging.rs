// Staging - lock-free hand-over of settings from the control thread to the
// audio thread, plus the lock-guarded state both threads share
//
// Scalars are staged in atomics with a per-parameter pending flag. Setting a
// value marks it pending, the audio thread takes it once (at least once,
// last write wins). Everything else lives behind one short-lived mutex the
// audio thread only ever `try_lock`s outside the swap rendezvous.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::error::GMetronomeError;
use super::state::Statistics;
use crate::audio::backend::Backend;
use crate::sequencer::generator::TrainerMode;
use crate::sequencer::meter::{Accent, Meter};
use crate::synth::sound::SoundParameters;

/// Values that fit into the 64 bits of a staging slot
pub trait StageValue: Copy {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

impl StageValue for f64 {
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

impl StageValue for usize {
    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as usize
    }
}

impl StageValue for TrainerMode {
    fn to_bits(self) -> u64 {
        match self {
            TrainerMode::Off => 0,
            TrainerMode::Continuous => 1,
            TrainerMode::Stepwise => 2,
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits {
            1 => TrainerMode::Continuous,
            2 => TrainerMode::Stepwise,
            _ => TrainerMode::Off,
        }
    }
}

/// Atomic value with a pending-import flag
pub struct Staged<T: StageValue> {
    bits: AtomicU64,
    pending: AtomicBool,
    _marker: PhantomData<T>,
}

impl<T: StageValue> Staged<T> {
    pub fn new(value: T) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
            pending: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    /// Stores a new value and marks it pending (control thread)
    pub fn stage(&self, value: T) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// Takes the value if it is pending (audio thread)
    pub fn take(&self) -> Option<T> {
        if self.pending.swap(false, Ordering::Acquire) {
            Some(T::from_bits(self.bits.load(Ordering::Relaxed)))
        } else {
            None
        }
    }

    /// Current value, regardless of the pending flag
    pub fn get(&self) -> T {
        T::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Pending phase/tempo correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncRequest {
    pub beat_dev: f64,
    pub tempo_dev: f64,
    pub time: Duration,
}

/// Backend mailbox of a swap negotiated with the running audio thread
pub enum SwapState {
    Idle,
    /// The control thread posted a replacement (`None` installs the dummy)
    Requested(Option<Box<dyn Backend>>),
    /// The audio thread took the replacement and is closing the old backend
    InProgress,
    /// The old backend is ready to be picked up by the control thread
    Completed(Box<dyn Backend>),
}

impl SwapState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SwapState::Idle)
    }
}

/// State guarded by the shared mutex
pub struct Staging {
    pub meter: Meter,
    pub meter_pending: bool,
    pub sync: Option<SyncRequest>,
    /// Indexed like `Accent::AUDIBLE`
    pub sounds: [SoundParameters; 3],
    pub sounds_pending: [bool; 3],
    pub statistics: Statistics,
    /// Backend parked here while no audio thread owns it
    pub backend: Option<Box<dyn Backend>>,
    pub swap: SwapState,
    /// The audio thread has terminated
    pub finished: bool,
}

impl Staging {
    fn new() -> Self {
        Self {
            meter: Meter::default(),
            meter_pending: false,
            sync: None,
            sounds: Accent::AUDIBLE.map(SoundParameters::for_accent),
            sounds_pending: [false; 3],
            statistics: Statistics::default(),
            backend: None,
            swap: SwapState::Idle,
            finished: true,
        }
    }

    pub fn sound_slot(accent: Accent) -> Option<usize> {
        Accent::AUDIBLE.iter().position(|&a| a == accent)
    }
}

/// Everything the control thread and the audio thread share
pub struct Shared {
    pub tempo: Staged<f64>,
    pub target_tempo: Staged<f64>,
    pub accel: Staged<f64>,
    pub step: Staged<f64>,
    pub hold: Staged<usize>,
    pub trainer: Staged<TrainerMode>,

    pub stop_requested: AtomicBool,
    pub running: AtomicBool,
    pub error_flag: AtomicBool,
    pub error: Mutex<Option<GMetronomeError>>,

    pub staging: Mutex<Staging>,
    pub cond: Condvar,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            tempo: Staged::new(120.0),
            target_tempo: Staged::new(120.0),
            accel: Staged::new(60.0),
            step: Staged::new(1.0),
            hold: Staged::new(4),
            trainer: Staged::new(TrainerMode::Off),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            error_flag: AtomicBool::new(false),
            error: Mutex::new(None),
            staging: Mutex::new(Staging::new()),
            cond: Condvar::new(),
        }
    }

    /// Stores an audio thread failure until `reset`
    pub fn latch_error(&self, error: GMetronomeError) {
        let mut latched = self.error.lock();
        if latched.is_none() {
            *latched = Some(error);
        }
        self.error_flag.store(true, Ordering::Release);
    }

    pub fn latched_error(&self) -> Option<GMetronomeError> {
        if self.error_flag.load(Ordering::Acquire) {
            self.error.lock().clone()
        } else {
            None
        }
    }

    pub fn clear_error(&self) {
        *self.error.lock() = None;
        self.error_flag.store(false, Ordering::Release);
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_take_once() {
        let tempo = Staged::new(120.0);
        assert_eq!(tempo.take(), None);

        tempo.stage(90.0);
        tempo.stage(95.0);
        assert!(tempo.is_pending());
        assert_eq!(tempo.take(), Some(95.0));
        assert_eq!(tempo.take(), None);
        assert_eq!(tempo.get(), 95.0);
    }

    #[test]
    fn test_staged_trainer_mode() {
        let mode = Staged::new(TrainerMode::Off);
        mode.stage(TrainerMode::Stepwise);
        assert_eq!(mode.take(), Some(TrainerMode::Stepwise));
        mode.stage(TrainerMode::Continuous);
        assert_eq!(mode.get(), TrainerMode::Continuous);
    }

    #[test]
    fn test_sound_slots_follow_audible_order() {
        assert_eq!(Staging::sound_slot(Accent::Off), None);
        assert_eq!(Staging::sound_slot(Accent::Weak), Some(0));
        assert_eq!(Staging::sound_slot(Accent::Strong), Some(2));
    }

    #[test]
    fn test_first_error_wins() {
        let shared = Shared::new();
        assert!(shared.latched_error().is_none());

        shared.latch_error(GMetronomeError::AudioThread("first".into()));
        shared.latch_error(GMetronomeError::AudioThread("second".into()));
        assert!(matches!(
            shared.latched_error(),
            Some(GMetronomeError::AudioThread(msg)) if msg == "first"
        ));

        shared.clear_error();
        assert!(shared.latched_error().is_none());
    }
}
