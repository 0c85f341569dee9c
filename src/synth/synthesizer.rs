// Synthesizer - renders click sounds into PCM byte buffers
//
// Sounds are rendered once into a buffer of fixed duration and replayed by
// the generator, so nothing here runs in the per-chunk audio path.

use std::f32::consts::PI;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::sound::SoundParameters;
use crate::audio::spec::StreamSpec;

/// Number of harmonics of the tonal part
const HARMONICS: usize = 6;

/// Seed of the noise table (fixed, so renders are reproducible)
const NOISE_SEED: u64 = 0x6d65_7472_6f6e;

pub struct Synthesizer {
    spec: StreamSpec,
    duration: Duration,
    frames: usize,
    /// White noise in [-1, 1], one value per frame
    noise: Vec<f32>,
}

impl Synthesizer {
    pub fn new(spec: StreamSpec, duration: Duration) -> Self {
        let mut synth = Self {
            spec,
            duration,
            frames: 0,
            noise: Vec::new(),
        };
        synth.prepare_tables();
        synth
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    /// Length of every rendered sound in frames
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Length of every rendered sound in bytes
    pub fn buffer_size(&self) -> usize {
        self.spec.frames_to_bytes(self.frames)
    }

    /// Switches to another stream spec and rebuilds the precomputed tables
    pub fn reconfigure(&mut self, spec: StreamSpec) {
        self.spec = spec;
        self.prepare_tables();
    }

    fn prepare_tables(&mut self) {
        self.frames = self.spec.duration_to_frames(self.duration);

        let mut rng = StdRng::seed_from_u64(NOISE_SEED);
        self.noise = (0..self.frames).map(|_| rng.gen_range(-1.0..=1.0)).collect();
    }

    /// Renders `params` into `out`, replacing its contents
    pub fn render(&self, params: &SoundParameters, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.buffer_size());

        let rate = self.spec.rate as f32;
        let channels = self.spec.channels as usize;
        let (tone_gain, noise_gain) = params.part_gains();
        let (left, right) = pan_gains(params.pan);

        let weights = harmonic_weights(params.tone_timbre);
        let detune_ratio = 2f32.powf(params.tone_detune / 1200.0);
        let omega = 2.0 * PI * params.tone_pitch / rate;
        let nyquist = PI;

        // one-pole low-pass for the noise part
        let alpha = 1.0 - (-2.0 * PI * params.percussion_cutoff / rate).exp();
        let mut lowpass = 0.0f32;

        for frame in 0..self.frames {
            let t = frame as f32 / rate;

            let mut tone = 0.0;
            for (k, weight) in weights.iter().enumerate() {
                let w = omega * (k + 1) as f32;
                if w >= nyquist {
                    break;
                }
                let phase = w * frame as f32;
                tone += weight * if params.tone_detune > 0.0 {
                    0.5 * (phase.sin() + (phase * detune_ratio).sin())
                } else {
                    phase.sin()
                };
            }
            let tone = tone * params.tone_envelope.level(t);

            lowpass += alpha * (self.noise[frame] - lowpass);
            let noise = lowpass * params.percussion_envelope.level(t);

            let sample = (tone_gain * tone + noise_gain * noise) * params.volume;

            match channels {
                1 => self.spec.format.encode(sample, out),
                _ => {
                    self.spec.format.encode(sample * left, out);
                    self.spec.format.encode(sample * right, out);
                    for _ in 2..channels {
                        self.spec.format.encode(sample, out);
                    }
                }
            }
        }
    }
}

/// Normalised amplitudes of the harmonics for a timbre in [0, 1]
fn harmonic_weights(timbre: f32) -> [f32; HARMONICS] {
    let mut weights = [0.0; HARMONICS];
    let mut sum = 0.0;
    for (k, weight) in weights.iter_mut().enumerate() {
        *weight = timbre.powi(k as i32) / (k + 1) as f32;
        sum += *weight;
    }
    for weight in weights.iter_mut() {
        *weight /= sum;
    }
    weights
}

/// Left/right gains of a balance in [-1, 1]
fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spec::SampleFormat;

    fn peak(spec: StreamSpec, bytes: &[u8]) -> f32 {
        let size = spec.format.sample_size();
        bytes
            .chunks_exact(size)
            .map(|s| spec.format.decode(s).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn test_buffer_size_matches_duration() {
        let spec = StreamSpec::new(SampleFormat::S16LE, 48000, 2);
        let synth = Synthesizer::new(spec, Duration::from_millis(60));
        assert_eq!(synth.frames(), 2880);

        let mut out = Vec::new();
        synth.render(&SoundParameters::default(), &mut out);
        assert_eq!(out.len(), 2880 * 4);
        assert_eq!(out.len(), synth.buffer_size());
    }

    #[test]
    fn test_render_is_deterministic() {
        let spec = StreamSpec::new(SampleFormat::F32LE, 44100, 1);
        let synth = Synthesizer::new(spec, Duration::from_millis(60));
        let params = SoundParameters {
            mix: 0.0,
            ..SoundParameters::default()
        };

        let mut a = Vec::new();
        let mut b = Vec::new();
        synth.render(&params, &mut a);
        synth.render(&params, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_volume_bounds_output() {
        let spec = StreamSpec::new(SampleFormat::F32LE, 48000, 1);
        let synth = Synthesizer::new(spec, Duration::from_millis(60));

        let mut out = Vec::new();
        synth.render(
            &SoundParameters {
                volume: 0.5,
                ..SoundParameters::default()
            },
            &mut out,
        );
        let level = peak(spec, &out);
        assert!(level > 0.05);
        assert!(level <= 0.5 + 1e-6);

        synth.render(
            &SoundParameters {
                volume: 0.0,
                ..SoundParameters::default()
            },
            &mut out,
        );
        assert_eq!(peak(spec, &out), 0.0);
    }

    #[test]
    fn test_hard_pan() {
        let spec = StreamSpec::new(SampleFormat::F32LE, 48000, 2);
        let synth = Synthesizer::new(spec, Duration::from_millis(60));

        let mut out = Vec::new();
        synth.render(
            &SoundParameters {
                pan: -1.0,
                ..SoundParameters::default()
            },
            &mut out,
        );

        let right_peak = out
            .chunks_exact(8)
            .map(|frame| spec.format.decode(&frame[4..]).abs())
            .fold(0.0, f32::max);
        assert_eq!(right_peak, 0.0);
    }

    #[test]
    fn test_harmonic_weights_normalised() {
        for timbre in [0.0, 0.3, 1.0] {
            let sum: f32 = harmonic_weights(timbre).iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
        assert_eq!(harmonic_weights(0.0)[1], 0.0);
    }

    #[test]
    fn test_reconfigure_resizes() {
        let mut synth = Synthesizer::new(StreamSpec::default(), Duration::from_millis(60));
        synth.reconfigure(StreamSpec::new(SampleFormat::S16LE, 24000, 1));
        assert_eq!(synth.frames(), 1440);
        assert_eq!(synth.buffer_size(), 2880);
    }
}
