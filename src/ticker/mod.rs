// Ticker - control surface of the metronome
//
// The ticker owns one audio thread at a time. Control calls only stage
// data for the audio thread and return immediately; the exceptions are
// `swap_backend`, which waits (bounded) for the audio thread to reach a
// safe point, and `start`/`reset`, which join a finished thread.
//
// Errors of the audio thread are latched: they make `start` and `stop`
// fail until `reset` clears them.

mod audio_thread;
pub mod error;
pub mod staging;
pub mod state;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::MutexGuard;

use crate::audio::backend::{self, Backend, DummyBackend};
use crate::config::TickerConfig;
use crate::sequencer::generator::{TempoMode, TrainerMode};
use crate::sequencer::meter::{Accent, Meter};
use crate::synth::sound::SoundParameters;

pub use error::{GMetronomeError, TickerResult};
pub use staging::SyncRequest;
pub use state::{Statistics, TickerState};

use staging::{Shared, Staging, SwapState};

pub struct Ticker {
    config: TickerConfig,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    started: bool,
}

impl Ticker {
    pub fn new() -> Self {
        Self::with_config(TickerConfig::default())
    }

    pub fn with_config(config: TickerConfig) -> Self {
        let shared = Arc::new(Shared::new());
        shared.staging.lock().backend = Some(Box::new(DummyBackend::new()));
        Self {
            config,
            shared,
            thread: None,
            started: false,
        }
    }

    pub fn config(&self) -> &TickerConfig {
        &self.config
    }

    // Settings

    /// BPM
    pub fn set_tempo(&self, bpm: f64) {
        self.shared.tempo.stage(bpm);
    }

    /// BPM, the goal of the tempo trainer
    pub fn set_target_tempo(&self, bpm: f64) {
        self.shared.target_tempo.stage(bpm);
    }

    /// BPM per minute
    pub fn set_accel(&self, bpm_per_min: f64) {
        self.shared.accel.stage(bpm_per_min);
    }

    /// BPM added per stepwise increment
    pub fn set_step(&self, bpm: f64) {
        self.shared.step.stage(bpm);
    }

    /// Beats between stepwise increments
    pub fn set_hold(&self, beats: usize) {
        self.shared.hold.stage(beats);
    }

    pub fn set_trainer_mode(&self, mode: TrainerMode) {
        self.shared.trainer.stage(mode);
    }

    pub fn set_meter(&self, meter: Meter) {
        let mut staging = self.staging();
        staging.meter = meter;
        staging.meter_pending = true;
    }

    /// Shifts the phase by `beat_dev` beats and the tempo by `tempo_dev`
    /// BPM within `time`
    pub fn synchronize(&self, beat_dev: f64, tempo_dev: f64, time: Duration) {
        self.staging().sync = Some(SyncRequest {
            beat_dev,
            tempo_dev,
            time,
        });
    }

    /// Sets the sound of an accent level (`Accent::Off` is ignored)
    pub fn set_sound(&self, accent: Accent, params: SoundParameters) {
        if let Some(slot) = Staging::sound_slot(accent) {
            let mut staging = self.staging();
            staging.sounds[slot] = params;
            staging.sounds_pending[slot] = true;
        }
    }

    pub fn set_sound_strong(&self, params: SoundParameters) {
        self.set_sound(Accent::Strong, params);
    }

    pub fn set_sound_mid(&self, params: SoundParameters) {
        self.set_sound(Accent::Mid, params);
    }

    pub fn set_sound_weak(&self, params: SoundParameters) {
        self.set_sound(Accent::Weak, params);
    }

    // Backend

    /// Installs `backend` (the dummy for `None`) and returns the previous one
    ///
    /// While the audio thread runs, the exchange happens at its next safe
    /// point; if it does not get there within `timeout` the swap is called
    /// off and `SwapTimeout` returned. The returned backend is closed.
    pub fn swap_backend(
        &self,
        backend: Option<Box<dyn Backend>>,
        timeout: Duration,
    ) -> TickerResult<Box<dyn Backend>> {
        if self.thread.is_some() && self.shared.running.load(Ordering::Acquire) {
            self.negotiate_swap(backend, timeout)
        } else {
            Ok(Self::direct_swap(&mut self.staging(), backend))
        }
    }

    pub fn set_backend(&self, backend: Box<dyn Backend>, timeout: Duration) -> TickerResult<()> {
        self.swap_backend(Some(backend), timeout).map(drop)
    }

    /// Takes the active backend out, leaving the dummy in its place
    pub fn get_backend(&self, timeout: Duration) -> TickerResult<Box<dyn Backend>> {
        self.swap_backend(None, timeout)
    }

    fn direct_swap(staging: &mut Staging, backend: Option<Box<dyn Backend>>) -> Box<dyn Backend> {
        let backend = backend.unwrap_or_else(|| Box::new(DummyBackend::new()));
        let mut old = staging
            .backend
            .replace(backend)
            .unwrap_or_else(|| Box::new(DummyBackend::new()));
        backend::close_quietly(old.as_mut());
        old
    }

    fn negotiate_swap(
        &self,
        backend: Option<Box<dyn Backend>>,
        timeout: Duration,
    ) -> TickerResult<Box<dyn Backend>> {
        let deadline = Instant::now() + timeout;
        let mut staging = self.staging();

        while !staging.swap.is_idle() && !staging.finished {
            if self.shared.cond.wait_until(&mut staging, deadline).timed_out() {
                log::warn!("Backend swap timed out waiting for a previous swap");
                return Err(GMetronomeError::SwapTimeout(timeout));
            }
        }
        if staging.finished {
            return Ok(Self::direct_swap(&mut staging, backend));
        }

        staging.swap = SwapState::Requested(backend);
        let mut timed_out = false;
        loop {
            match std::mem::replace(&mut staging.swap, SwapState::Idle) {
                SwapState::Completed(old) => return Ok(old),
                SwapState::Requested(backend) if staging.finished => {
                    return Ok(Self::direct_swap(&mut staging, backend));
                }
                SwapState::Requested(_) if timed_out => {
                    log::warn!("Backend swap timed out, request withdrawn");
                    return Err(GMetronomeError::SwapTimeout(timeout));
                }
                SwapState::InProgress if staging.finished => {
                    drop(staging);
                    return Err(self.shared.latched_error().unwrap_or_else(|| {
                        GMetronomeError::AudioThread("stopped during backend swap".to_string())
                    }));
                }
                other => staging.swap = other,
            }

            // a swap taken by the audio thread runs to completion, bounded by
            // closing the old backend and `swap_timeout` on that side
            if matches!(staging.swap, SwapState::InProgress) {
                if timed_out {
                    log::debug!("Backend swap past its deadline, waiting for completion");
                }
                self.shared.cond.wait(&mut staging);
            } else {
                timed_out = self.shared.cond.wait_until(&mut staging, deadline).timed_out();
            }
        }
    }

    // Lifecycle

    /// Spawns the audio thread
    ///
    /// Fails with the latched error if the previous audio thread failed.
    pub fn start(&mut self) -> TickerResult<()> {
        if let Some(error) = self.shared.latched_error() {
            return Err(error);
        }
        if self.thread.is_some() {
            self.stop_audio_thread()?;
        }

        let backend = {
            let mut staging = self.staging();
            staging.finished = false;
            staging.swap = SwapState::Idle;
            staging.backend.take()
        }
        .unwrap_or_else(|| Box::new(DummyBackend::new()));

        self.shared.stop_requested.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let config = self.config;
        let spawned = thread::Builder::new()
            .name("gmetronome-audio".to_string())
            .spawn(move || audio_thread::run(shared, config, backend));

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                self.started = true;
                log::info!("Ticker started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                let mut staging = self.staging();
                staging.finished = true;
                staging.backend = Some(Box::new(DummyBackend::new()));
                Err(GMetronomeError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Asks the audio thread to stop without waiting for it
    ///
    /// Fails with the latched error if the audio thread failed.
    pub fn stop(&mut self) -> TickerResult<()> {
        if let Some(error) = self.shared.latched_error() {
            return Err(error);
        }
        self.shared.stop_requested.store(true, Ordering::Release);
        self.started = false;
        log::info!("Ticker stopped");
        Ok(())
    }

    /// Brings the ticker back to a clean stopped state
    ///
    /// Joins the audio thread and clears all flags and the latched error.
    /// Never fails; an audio thread that does not finish in time is
    /// detached.
    pub fn reset(&mut self) {
        if let Err(error) = self.stop_audio_thread() {
            log::warn!("Detaching audio thread: {}", error);
            self.thread = None;
            // the detached thread keeps the old shared state
            self.shared = Arc::new(Shared::new());
        }

        self.started = false;
        self.shared.clear_error();
        self.shared.stop_requested.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);

        let mut staging = self.staging();
        staging.swap = SwapState::Idle;
        staging.statistics = Statistics::default();
        staging.finished = true;
        if staging.backend.is_none() {
            staging.backend = Some(Box::new(DummyBackend::new()));
        }
    }

    /// Requests the audio thread to stop and joins it
    fn stop_audio_thread(&mut self) -> TickerResult<()> {
        self.shared.stop_requested.store(true, Ordering::Release);
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };

        let timeout = self.config.join_timeout;
        let deadline = Instant::now() + timeout;
        let finished = {
            let mut staging = self.shared.staging.lock();
            while !staging.finished {
                if self.shared.cond.wait_until(&mut staging, deadline).timed_out() {
                    break;
                }
            }
            staging.finished
        };

        if !finished {
            self.thread = Some(handle);
            return Err(GMetronomeError::ThreadJoin(format!(
                "audio thread did not finish within {:?}",
                timeout
            )));
        }
        let joined = handle
            .join()
            .map_err(|_| GMetronomeError::ThreadJoin("audio thread panicked".to_string()));
        self.shared.running.store(false, Ordering::Release);
        joined
    }

    // Queries

    /// Latest snapshot exported by the audio thread
    pub fn statistics(&self) -> Statistics {
        self.staging().statistics
    }

    pub fn state(&self) -> TickerState {
        let mut state = TickerState::empty();
        state.set(TickerState::STARTED, self.started);
        state.set(
            TickerState::RUNNING,
            self.shared.running.load(Ordering::Acquire),
        );
        state.set(
            TickerState::ERROR,
            self.shared.error_flag.load(Ordering::Acquire),
        );
        state
    }

    pub fn tempo_mode(&self) -> TempoMode {
        self.statistics().mode
    }

    fn staging(&self) -> MutexGuard<'_, Staging> {
        self.shared.staging.lock()
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{BackendId, BackendState};

    #[test]
    fn test_new_ticker_is_idle() {
        let ticker = Ticker::new();
        assert!(ticker.state().is_empty());
        assert_eq!(ticker.tempo_mode(), TempoMode::Constant);
    }

    #[test]
    fn test_direct_swap_when_idle() {
        let ticker = Ticker::new();
        let old = ticker.get_backend(Duration::from_millis(10)).unwrap();
        assert_eq!(old.id(), BackendId::Dummy);
        assert_eq!(old.state(), BackendState::Config);

        // the slot is never left empty
        assert!(ticker.staging().backend.is_some());
    }

    #[test]
    fn test_settings_are_staged() {
        let ticker = Ticker::new();
        ticker.set_tempo(90.0);
        ticker.set_meter(Meter::new(3, 2));
        ticker.set_sound(Accent::Off, SoundParameters::default());
        ticker.set_sound_mid(SoundParameters::default());

        assert_eq!(ticker.shared.tempo.take(), Some(90.0));
        let staging = ticker.staging();
        assert!(staging.meter_pending);
        assert_eq!(staging.meter.beats(), 3);
        assert_eq!(staging.sounds_pending, [false, true, false]);
    }

    #[test]
    fn test_stop_and_reset_without_thread() {
        let mut ticker = Ticker::new();
        ticker.stop().unwrap();
        ticker.reset();
        ticker.reset();
        assert!(ticker.state().is_empty());
    }
}
