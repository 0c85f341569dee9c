// Sound parameters - synthesis knobs of one accent's click
//
// A click is the mix of a tonal part (fundamental plus harmonics, optionally
// detuned) and a percussive noise part. Each part has its own
// attack/hold/decay envelope.

use serde::{Deserialize, Serialize};

use crate::sequencer::meter::Accent;

/// Curvature of an envelope segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EnvelopeShape {
    #[default]
    Linear,
    /// Slow start, fast end
    Keen,
    /// Fast start, slow end
    Round,
}

impl EnvelopeShape {
    /// Level of a rising segment at progress `x` in [0, 1]
    #[inline]
    pub fn rise(self, x: f32) -> f32 {
        let x = x.clamp(0.0, 1.0);
        match self {
            EnvelopeShape::Linear => x,
            EnvelopeShape::Keen => x * x,
            EnvelopeShape::Round => 1.0 - (1.0 - x) * (1.0 - x),
        }
    }

    /// Level of a falling segment at progress `x` in [0, 1]
    #[inline]
    pub fn fall(self, x: f32) -> f32 {
        self.rise(1.0 - x)
    }
}

/// Attack/hold/decay envelope (times in seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub attack: f32,
    pub attack_shape: EnvelopeShape,
    pub hold: f32,
    pub decay: f32,
    pub decay_shape: EnvelopeShape,
}

impl Envelope {
    pub const MAX_TIME: f32 = 0.06;

    /// Envelope level at `t` seconds after onset
    #[inline]
    pub fn level(&self, t: f32) -> f32 {
        if t < 0.0 {
            return 0.0;
        }
        if t < self.attack {
            return self.attack_shape.rise(t / self.attack);
        }
        let t = t - self.attack;
        if t < self.hold {
            return 1.0;
        }
        let t = t - self.hold;
        if t < self.decay {
            return self.decay_shape.fall(t / self.decay);
        }
        0.0
    }

    fn clamped(self) -> Self {
        Self {
            attack: self.attack.clamp(0.0, Self::MAX_TIME),
            hold: self.hold.clamp(0.0, Self::MAX_TIME),
            decay: self.decay.clamp(0.0, Self::MAX_TIME),
            ..self
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: 0.0,
            attack_shape: EnvelopeShape::Keen,
            hold: 0.0,
            decay: 0.05,
            decay_shape: EnvelopeShape::Keen,
        }
    }
}

/// Complete parameter set of a click sound
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundParameters {
    /// Fundamental frequency in Hz (20 - 20000)
    pub tone_pitch: f32,
    /// Harmonic content: 0.0 = pure sine, 1.0 = bright (0.0 - 1.0)
    pub tone_timbre: f32,
    /// Detune of the second oscillator in cents (0 - 100)
    pub tone_detune: f32,
    pub tone_envelope: Envelope,

    /// Low-pass cutoff of the noise in Hz (20 - 20000)
    pub percussion_cutoff: f32,
    pub percussion_envelope: Envelope,

    /// -1.0 = tone only, 1.0 = noise only
    pub mix: f32,
    /// Stereo balance: -1.0 = left, 1.0 = right
    pub pan: f32,
    /// Output gain (0.0 - 1.0)
    pub volume: f32,
}

impl SoundParameters {
    /// Default sound of an accent level
    pub fn for_accent(accent: Accent) -> Self {
        let base = Self::default();
        match accent {
            Accent::Strong => Self {
                tone_pitch: 1760.0,
                tone_timbre: 0.6,
                volume: 0.9,
                ..base
            },
            Accent::Mid => Self {
                tone_pitch: 1320.0,
                tone_timbre: 0.4,
                volume: 0.75,
                ..base
            },
            Accent::Weak => Self {
                tone_pitch: 880.0,
                tone_timbre: 0.2,
                volume: 0.6,
                ..base
            },
            Accent::Off => Self {
                volume: 0.0,
                ..base
            },
        }
    }

    /// Copy with every knob clamped into its valid range
    pub fn clamped(&self) -> Self {
        Self {
            tone_pitch: self.tone_pitch.clamp(20.0, 20000.0),
            tone_timbre: self.tone_timbre.clamp(0.0, 1.0),
            tone_detune: self.tone_detune.clamp(0.0, 100.0),
            tone_envelope: self.tone_envelope.clamped(),
            percussion_cutoff: self.percussion_cutoff.clamp(20.0, 20000.0),
            percussion_envelope: self.percussion_envelope.clamped(),
            mix: self.mix.clamp(-1.0, 1.0),
            pan: self.pan.clamp(-1.0, 1.0),
            volume: self.volume.clamp(0.0, 1.0),
        }
    }

    /// Gains of the tone and noise parts derived from `mix`
    pub fn part_gains(&self) -> (f32, f32) {
        let noise = (self.mix + 1.0) * 0.5;
        (1.0 - noise, noise)
    }

    pub fn is_silent(&self) -> bool {
        self.volume <= 0.0
    }
}

impl Default for SoundParameters {
    fn default() -> Self {
        Self {
            tone_pitch: 1000.0,
            tone_timbre: 0.3,
            tone_detune: 0.0,
            tone_envelope: Envelope {
                attack: 0.001,
                attack_shape: EnvelopeShape::Round,
                hold: 0.004,
                decay: 0.045,
                decay_shape: EnvelopeShape::Keen,
            },
            percussion_cutoff: 6000.0,
            percussion_envelope: Envelope {
                attack: 0.0,
                attack_shape: EnvelopeShape::Linear,
                hold: 0.0,
                decay: 0.015,
                decay_shape: EnvelopeShape::Keen,
            },
            mix: -0.6,
            pan: 0.0,
            volume: 0.75,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    #[test]
    fn test_shapes_meet_endpoints() {
        for shape in [EnvelopeShape::Linear, EnvelopeShape::Keen, EnvelopeShape::Round] {
            assert!(shape.rise(0.0).abs() < EPSILON);
            assert!((shape.rise(1.0) - 1.0).abs() < EPSILON);
            assert!((shape.fall(0.0) - 1.0).abs() < EPSILON);
            assert!(shape.fall(1.0).abs() < EPSILON);
        }
        assert!(EnvelopeShape::Keen.rise(0.5) < EnvelopeShape::Linear.rise(0.5));
        assert!(EnvelopeShape::Round.rise(0.5) > EnvelopeShape::Linear.rise(0.5));
    }

    #[test]
    fn test_envelope_segments() {
        let env = Envelope {
            attack: 0.01,
            attack_shape: EnvelopeShape::Linear,
            hold: 0.01,
            decay: 0.02,
            decay_shape: EnvelopeShape::Linear,
        };
        assert!((env.level(0.005) - 0.5).abs() < EPSILON);
        assert!((env.level(0.015) - 1.0).abs() < EPSILON);
        assert!((env.level(0.03) - 0.5).abs() < 1e-5);
        assert_eq!(env.level(0.05), 0.0);
        assert_eq!(env.level(-1.0), 0.0);
    }

    #[test]
    fn test_clamped() {
        let params = SoundParameters {
            tone_pitch: 5.0,
            mix: 3.0,
            volume: -1.0,
            ..SoundParameters::default()
        }
        .clamped();
        assert_eq!(params.tone_pitch, 20.0);
        assert_eq!(params.mix, 1.0);
        assert!(params.is_silent());
    }

    #[test]
    fn test_part_gains() {
        let params = SoundParameters {
            mix: -1.0,
            ..SoundParameters::default()
        };
        assert_eq!(params.part_gains(), (1.0, 0.0));

        let params = SoundParameters {
            mix: 0.0,
            ..SoundParameters::default()
        };
        assert_eq!(params.part_gains(), (0.5, 0.5));
    }

    #[test]
    fn test_accent_defaults_differ() {
        let strong = SoundParameters::for_accent(Accent::Strong);
        let weak = SoundParameters::for_accent(Accent::Weak);
        assert!(strong.tone_pitch > weak.tone_pitch);
        assert!(SoundParameters::for_accent(Accent::Off).is_silent());
    }
}
