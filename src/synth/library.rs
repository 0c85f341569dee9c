// Sound library - per-accent cache of rendered click buffers
//
// Buffers are rendered lazily: parameter or stream spec changes only mark
// an entry dirty, the next `get`/`update` renders it.

use std::time::Duration;

use super::sound::SoundParameters;
use super::synthesizer::Synthesizer;
use crate::audio::spec::StreamSpec;
use crate::sequencer::meter::Accent;

#[derive(Debug, Clone)]
struct Entry {
    params: SoundParameters,
    buffer: Vec<u8>,
    need_update: bool,
}

impl Entry {
    fn new(params: SoundParameters) -> Self {
        Self {
            params,
            buffer: Vec::new(),
            need_update: true,
        }
    }
}

pub struct SoundLibrary {
    synth: Synthesizer,
    entries: [Entry; 3],
    synthesis_count: usize,
}

impl SoundLibrary {
    pub fn new(spec: StreamSpec, sound_duration: Duration) -> Self {
        Self {
            synth: Synthesizer::new(spec, sound_duration),
            entries: Accent::AUDIBLE.map(|accent| Entry::new(SoundParameters::for_accent(accent))),
            synthesis_count: 0,
        }
    }

    fn slot(accent: Accent) -> Option<usize> {
        match accent {
            Accent::Off => None,
            Accent::Weak => Some(0),
            Accent::Mid => Some(1),
            Accent::Strong => Some(2),
        }
    }

    pub fn spec(&self) -> StreamSpec {
        self.synth.spec()
    }

    /// Length of every sound in frames
    pub fn frames(&self) -> usize {
        self.synth.frames()
    }

    /// Adapts the library to a new stream spec
    ///
    /// Returns `true` if the spec differed and all entries were marked dirty.
    pub fn reconfigure(&mut self, spec: StreamSpec) -> bool {
        if spec == self.synth.spec() {
            return false;
        }
        self.synth.reconfigure(spec);
        for entry in &mut self.entries {
            entry.need_update = true;
        }
        true
    }

    /// Sets the parameters of an accent's sound
    ///
    /// Returns `true` if the parameters changed and the entry was marked
    /// dirty. `Accent::Off` has no sound and is ignored.
    pub fn adjust(&mut self, accent: Accent, params: SoundParameters) -> bool {
        let Some(slot) = Self::slot(accent) else {
            return false;
        };
        let params = params.clamped();
        let entry = &mut self.entries[slot];
        if entry.params == params {
            return false;
        }
        entry.params = params;
        entry.need_update = true;
        true
    }

    pub fn params(&self, accent: Accent) -> Option<&SoundParameters> {
        Self::slot(accent).map(|slot| &self.entries[slot].params)
    }

    pub fn is_dirty(&self, accent: Accent) -> bool {
        Self::slot(accent).is_some_and(|slot| self.entries[slot].need_update)
    }

    /// Number of renders performed so far
    pub fn synthesis_count(&self) -> usize {
        self.synthesis_count
    }

    /// Renders the accent's buffer if it is dirty
    pub fn update(&mut self, accent: Accent) {
        if let Some(slot) = Self::slot(accent) {
            self.update_slot(slot);
        }
    }

    /// Renders all dirty buffers
    pub fn update_all(&mut self) {
        for slot in 0..self.entries.len() {
            self.update_slot(slot);
        }
    }

    fn update_slot(&mut self, slot: usize) {
        let entry = &mut self.entries[slot];
        if !entry.need_update {
            return;
        }
        self.synth.render(&entry.params, &mut entry.buffer);
        entry.need_update = false;
        self.synthesis_count += 1;
    }

    /// Up-to-date sound buffer of an accent (empty for `Accent::Off`)
    pub fn get(&mut self, accent: Accent) -> &[u8] {
        match Self::slot(accent) {
            Some(slot) => {
                self.update_slot(slot);
                &self.entries[slot].buffer
            }
            None => &[],
        }
    }
}
