// Audio thread - the real-time producer loop
//
// Owns the generator and the active backend while it runs. Settings are
// imported without blocking: scalars through their staging atomics, the
// rest with `try_lock`, so a contended lock just delays an import by one
// cycle. The only rendezvous with the control thread is a backend swap.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::error::{GMetronomeError, TickerResult};
use super::staging::{Shared, StageValue, Staged, SwapState};
use super::state::Statistics;
use crate::audio::backend::{self, Backend, BackendState, DummyBackend};
use crate::config::TickerConfig;
use crate::sequencer::generator::Generator;
use crate::sequencer::meter::Accent;

struct AudioThread {
    shared: Arc<Shared>,
    config: TickerConfig,
    backend: Box<dyn Backend>,
    generator: Generator,
}

/// Entry point of the audio thread
///
/// Never unwinds: errors and panics of the loop are latched in `shared`.
/// The backend is closed and parked back in the staging slot on exit.
pub(super) fn run(shared: Arc<Shared>, config: TickerConfig, backend: Box<dyn Backend>) {
    log::info!("Audio thread started with {} backend", backend.id());

    let mut thread = AudioThread {
        generator: Generator::new(config.generator, config.spec),
        shared: Arc::clone(&shared),
        config,
        backend,
    };

    let error = match panic::catch_unwind(AssertUnwindSafe(|| thread.run())) {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(error),
        Err(payload) => Some(GMetronomeError::AudioThread(panic_message(&*payload))),
    };
    if let Some(error) = error {
        log::error!("Audio thread failed: {}", error);
        shared.latch_error(error);
    }

    let mut backend = thread.backend;
    backend::close_quietly(backend.as_mut());

    let mut staging = shared.staging.lock();
    staging.backend = Some(backend);
    staging.finished = true;
    shared.cond.notify_all();
    drop(staging);

    log::info!("Audio thread finished");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with unknown payload".to_string()
    }
}

/// Pending value of a slot, or its current value when importing everything
fn fetch<T: StageValue>(slot: &Staged<T>, all: bool) -> Option<T> {
    slot.take().or_else(|| all.then(|| slot.get()))
}

impl AudioThread {
    fn run(&mut self) -> TickerResult<()> {
        self.open_backend()?;
        self.import_settings(true);
        self.generator.start();
        self.export_statistics(false);
        self.backend.start()?;

        while !self.shared.stop_requested.load(Ordering::Acquire) {
            self.handle_swap()?;
            self.import_settings(false);

            let chunk = self.generator.cycle();
            if !chunk.is_empty() {
                self.backend.write(chunk)?;
            }

            self.export_statistics(false);
        }

        self.generator.stop();
        self.export_statistics(true);
        self.backend.stop()?;
        Ok(())
    }

    /// Opens the backend and prepares the generator for the negotiated spec
    fn open_backend(&mut self) -> TickerResult<()> {
        if self.backend.state() != BackendState::Config {
            backend::close_quietly(self.backend.as_mut());
        }
        self.backend.configure(self.config.spec)?;
        let spec = self.backend.open()?;
        if !spec.is_valid() {
            backend::close_quietly(self.backend.as_mut());
            return Err(GMetronomeError::UnsupportedSpec(spec));
        }
        self.generator.prepare(spec);
        log::info!("Opened {} backend ({})", self.backend.id(), spec);
        Ok(())
    }

    /// Exchanges the backend if the control thread requested it
    fn handle_swap(&mut self) -> TickerResult<()> {
        let replacement = {
            let Some(mut staging) = self.shared.staging.try_lock() else {
                return Ok(());
            };
            match std::mem::replace(&mut staging.swap, SwapState::Idle) {
                SwapState::Requested(replacement) => {
                    staging.swap = SwapState::InProgress;
                    replacement
                }
                other => {
                    staging.swap = other;
                    return Ok(());
                }
            }
        };

        let replacement = replacement.unwrap_or_else(|| Box::new(DummyBackend::new()));
        let mut old = std::mem::replace(&mut self.backend, replacement);
        backend::close_quietly(old.as_mut());
        log::info!("Swapped {} backend for {}", old.id(), self.backend.id());

        match self.shared.staging.try_lock_for(self.config.swap_timeout) {
            Some(mut staging) => match std::mem::replace(&mut staging.swap, SwapState::Idle) {
                SwapState::InProgress => {
                    staging.swap = SwapState::Completed(old);
                    self.shared.cond.notify_all();
                }
                other => staging.swap = other,
            },
            None => return Err(GMetronomeError::SwapTimeout(self.config.swap_timeout)),
        }

        self.open_backend()?;
        self.generator.start();
        self.export_statistics(false);
        self.backend.start()?;
        Ok(())
    }

    /// Hands staged settings to the generator
    ///
    /// With `all` every setting is applied, pending or not, and the lock is
    /// waited for. Otherwise only pending ones are, and lock-guarded
    /// settings are skipped if the lock is contended.
    fn import_settings(&mut self, all: bool) {
        let shared = &self.shared;

        if let Some(mode) = fetch(&shared.trainer, all) {
            self.generator.set_trainer_mode(mode);
        }
        if let Some(accel) = fetch(&shared.accel, all) {
            self.generator.set_accel(accel);
        }
        if let Some(target) = fetch(&shared.target_tempo, all) {
            self.generator.set_target_tempo(target);
        }
        if let Some(step) = fetch(&shared.step, all) {
            self.generator.set_step(step);
        }
        if let Some(hold) = fetch(&shared.hold, all) {
            self.generator.set_hold(hold);
        }
        if let Some(tempo) = fetch(&shared.tempo, all) {
            self.generator.set_tempo(tempo);
        }

        let mut staging = if all {
            shared.staging.lock()
        } else {
            match shared.staging.try_lock() {
                Some(staging) => staging,
                None => return,
            }
        };

        if staging.meter_pending || all {
            staging.meter_pending = false;
            log::debug!("Importing meter {}", staging.meter);
            self.generator.set_meter(staging.meter.clone());
        }

        // a correction requested before ticking started is stale
        if let Some(sync) = staging.sync.take()
            && !all
        {
            log::debug!("Importing sync request {:?}", sync);
            self.generator
                .synchronize(sync.beat_dev, sync.tempo_dev, sync.time);
        }

        let mut sounds_changed = false;
        for (slot, accent) in Accent::AUDIBLE.into_iter().enumerate() {
            if staging.sounds_pending[slot] || all {
                staging.sounds_pending[slot] = false;
                sounds_changed |= self.generator.set_sound(accent, staging.sounds[slot]);
            }
        }
        drop(staging);

        if sounds_changed || all {
            self.generator.update_sounds();
        }
    }

    fn export_statistics(&self, blocking: bool) {
        let statistics = Statistics::new(self.generator.statistics(), self.backend.latency());
        let staging = if blocking {
            Some(self.shared.staging.lock())
        } else {
            self.shared.staging.try_lock()
        };
        if let Some(mut staging) = staging {
            staging.statistics = statistics;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(&*payload), "panic with unknown payload");
    }

    #[test]
    fn test_fetch() {
        let slot = Staged::new(2.0);
        assert_eq!(fetch(&slot, false), None);
        assert_eq!(fetch(&slot, true), Some(2.0));
        slot.stage(3.0);
        assert_eq!(fetch(&slot, false), Some(3.0));
        assert_eq!(fetch(&slot, false), None);
    }
}
