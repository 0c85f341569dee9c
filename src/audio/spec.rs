// Stream specification and frame/byte/time conversions

use std::fmt;
use std::time::Duration;

/// Sample encoding of a PCM byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    S16LE,
    /// 32-bit float little endian
    F32LE,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn sample_size(self) -> usize {
        match self {
            SampleFormat::S16LE => 2,
            SampleFormat::F32LE => 4,
        }
    }

    /// Encodes one sample in [-1.0, 1.0] and appends it to `out`
    #[inline]
    pub fn encode(self, sample: f32, out: &mut Vec<u8>) {
        let clamped = sample.clamp(-1.0, 1.0);
        match self {
            SampleFormat::S16LE => {
                let value = (clamped * i16::MAX as f32) as i16;
                out.extend_from_slice(&value.to_le_bytes());
            }
            SampleFormat::F32LE => out.extend_from_slice(&clamped.to_le_bytes()),
        }
    }

    /// Decodes the sample at the start of `bytes`
    #[inline]
    pub fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::S16LE => {
                let value = i16::from_le_bytes([bytes[0], bytes[1]]);
                value as f32 / i16::MAX as f32
            }
            SampleFormat::F32LE => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

/// Format, rate and channel count of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamSpec {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u16,
}

impl StreamSpec {
    pub fn new(format: SampleFormat, rate: u32, channels: u16) -> Self {
        Self {
            format,
            rate,
            channels,
        }
    }

    /// A spec the generator can produce audio for
    pub fn is_valid(&self) -> bool {
        self.rate > 0 && self.channels > 0
    }

    /// Size of one frame (one sample per channel) in bytes
    pub fn frame_size(&self) -> usize {
        self.format.sample_size() * self.channels as usize
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.frame_size()
    }

    /// Duration of `frames` frames in seconds
    pub fn frames_to_secs(&self, frames: usize) -> f64 {
        frames as f64 / self.rate as f64
    }

    /// Saturates at `Duration::MAX` for specs without a rate
    pub fn frames_to_duration(&self, frames: usize) -> Duration {
        Duration::try_from_secs_f64(self.frames_to_secs(frames)).unwrap_or(Duration::MAX)
    }

    /// Number of frames (rounded) that cover `secs` seconds
    pub fn secs_to_frames(&self, secs: f64) -> usize {
        (secs * self.rate as f64).round() as usize
    }

    pub fn duration_to_frames(&self, duration: Duration) -> usize {
        self.secs_to_frames(duration.as_secs_f64())
    }

    pub fn duration_to_bytes(&self, duration: Duration) -> usize {
        self.frames_to_bytes(self.duration_to_frames(duration))
    }

    pub fn bytes_to_duration(&self, bytes: usize) -> Duration {
        self.frames_to_duration(self.bytes_to_frames(bytes))
    }
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self::new(SampleFormat::S16LE, 48000, 2)
    }
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} Hz {} ch", self.format, self.rate, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        assert_eq!(StreamSpec::new(SampleFormat::S16LE, 44100, 2).frame_size(), 4);
        assert_eq!(StreamSpec::new(SampleFormat::F32LE, 44100, 1).frame_size(), 4);
        assert_eq!(StreamSpec::new(SampleFormat::F32LE, 44100, 2).frame_size(), 8);
    }

    #[test]
    fn test_conversions() {
        let spec = StreamSpec::new(SampleFormat::S16LE, 48000, 2);

        // 10ms = 480 frames = 1920 bytes
        assert_eq!(spec.duration_to_frames(Duration::from_millis(10)), 480);
        assert_eq!(spec.duration_to_bytes(Duration::from_millis(10)), 1920);
        assert_eq!(spec.bytes_to_frames(1920), 480);
        assert_eq!(spec.bytes_to_duration(1920).as_micros(), 10_000);
        assert!((spec.frames_to_secs(24000) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_validity() {
        assert!(StreamSpec::default().is_valid());
        assert!(!StreamSpec::new(SampleFormat::S16LE, 0, 2).is_valid());
        assert!(!StreamSpec::new(SampleFormat::S16LE, 48000, 0).is_valid());
    }

    #[test]
    fn test_sample_codec() {
        for format in [SampleFormat::S16LE, SampleFormat::F32LE] {
            let mut bytes = Vec::new();
            format.encode(0.5, &mut bytes);
            format.encode(2.0, &mut bytes);
            assert_eq!(bytes.len(), 2 * format.sample_size());

            let size = format.sample_size();
            assert!((format.decode(&bytes[..size]) - 0.5).abs() < 1e-3);
            assert!((format.decode(&bytes[size..]) - 1.0).abs() < 1e-3);
        }
    }
}
