//! Audio payloads received from the talk server.
//!
//! [`AudioData`] owns interleaved PCM bytes. [`AudioBuffer`] is the shared,
//! growing view a session hands out while a talk is streaming: the talk task
//! appends to it, readers only ever copy out of it.

pub mod export;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ipc::AudioChunk;

pub use export::{export_ogg, export_wave, ExportError, ExportFormat, OggSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioFormat {
    #[default]
    Unknown,
    U8,
    S16,
    S24,
    S32,
    F32,
    RawFile,
}

impl AudioFormat {
    /// Bytes per sample, zero for formats without a fixed sample size
    pub fn sample_size(self) -> usize {
        match self {
            AudioFormat::U8 => 1,
            AudioFormat::S16 => 2,
            AudioFormat::S24 => 3,
            AudioFormat::S32 | AudioFormat::F32 => 4,
            AudioFormat::Unknown | AudioFormat::RawFile => 0,
        }
    }

    pub fn bits(self) -> u16 {
        (self.sample_size() * 8) as u16
    }

    pub fn is_pcm(self) -> bool {
        self.sample_size() > 0
    }

    fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            AudioFormat::U8 => (bytes[0] as f32 - 128.0) / 128.0,
            AudioFormat::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32767.0,
            AudioFormat::S24 => {
                // sign-extend through the top byte of an i32
                let v = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                v as f32 / 8_388_607.0
            }
            AudioFormat::S32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    / 2_147_483_647.0
            }
            AudioFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            AudioFormat::Unknown | AudioFormat::RawFile => 0.0,
        }
    }

    fn encode(self, sample: f32, out: &mut Vec<u8>) {
        let s = sample.clamp(-1.0, 1.0);
        match self {
            AudioFormat::U8 => out.push((s * 127.0 + 128.0).round() as u8),
            AudioFormat::S16 => out.extend_from_slice(&((s * 32767.0) as i16).to_le_bytes()),
            AudioFormat::S24 => {
                let v = (s * 8_388_607.0) as i32;
                out.extend_from_slice(&v.to_le_bytes()[..3]);
            }
            AudioFormat::S32 => {
                out.extend_from_slice(&((s as f64 * 2_147_483_647.0) as i32).to_le_bytes())
            }
            AudioFormat::F32 => out.extend_from_slice(&sample.to_le_bytes()),
            AudioFormat::Unknown | AudioFormat::RawFile => {}
        }
    }
}

/// Owned interleaved audio samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioData {
    pub format: AudioFormat,
    pub frequency: i32,
    pub channels: i32,
    pub data: Vec<u8>,
}

impl AudioData {
    /// Number of samples across all channels
    pub fn sample_length(&self) -> usize {
        match self.format.sample_size() {
            0 => 0,
            size => self.data.len() / size,
        }
    }

    pub fn duration(&self) -> f64 {
        let rate = self.frequency as f64 * self.channels as f64;
        if rate <= 0.0 {
            return 0.0;
        }
        self.sample_length() as f64 / rate
    }

    pub fn sample(&self, index: usize) -> f32 {
        let size = self.format.sample_size();
        let start = index * size;
        match self.data.get(start..start + size) {
            Some(bytes) if size > 0 => self.format.decode(bytes),
            _ => 0.0,
        }
    }

    /// Converts samples `[pos, pos + dst.len())` to float.
    /// Returns the number of samples written to `dst`.
    pub fn read_samples(&self, dst: &mut [f32], pos: usize) -> usize {
        let available = self.sample_length().saturating_sub(pos);
        let count = available.min(dst.len());
        for (i, out) in dst.iter_mut().take(count).enumerate() {
            *out = self.sample(pos + i);
        }
        count
    }

    pub fn to_f32(&self) -> Vec<f32> {
        let mut samples = vec![0.0; self.sample_length()];
        self.read_samples(&mut samples, 0);
        samples
    }

    /// Appends a streamed chunk.
    ///
    /// Empty or non-PCM chunks are ignored. The first PCM chunk fixes the
    /// buffer's format; later chunks with matching channels and frequency are
    /// converted into it, mismatching ones are dropped. A trailing partial
    /// sample is dropped so later samples stay aligned.
    pub fn append(&mut self, chunk: &AudioChunk) {
        if self.format == AudioFormat::RawFile || !chunk.format.is_pcm() {
            return;
        }
        let size = chunk.format.sample_size();
        let whole = &chunk.data[..chunk.data.len() / size * size];
        if whole.is_empty() {
            return;
        }

        if self.format == AudioFormat::Unknown {
            self.format = chunk.format;
            self.frequency = chunk.frequency;
            self.channels = chunk.channels;
            self.data = whole.to_vec();
            return;
        }

        if self.channels != chunk.channels || self.frequency != chunk.frequency {
            return;
        }

        if self.format == chunk.format {
            self.data.extend_from_slice(whole);
            return;
        }

        self.data
            .reserve(whole.len() / size * self.format.sample_size());
        for bytes in whole.chunks_exact(size) {
            let sample = chunk.format.decode(bytes);
            self.format.encode(sample, &mut self.data);
        }
    }

    /// Fills `dst` with `dst.len() / channels` frames at `frequency`, starting at
    /// source frame `pos`, using linear interpolation. Frames past the end of the
    /// data are silent. Returns the source position following the last frame.
    pub fn resample(&self, dst: &mut [f32], frequency: i32, channels: i32, pos: f64) -> f64 {
        dst.fill(0.0);
        if channels <= 0 || frequency <= 0 || self.channels <= 0 || self.frequency <= 0 {
            return pos;
        }

        let dst_channels = channels as usize;
        let src_channels = self.channels as usize;
        let src_frames = self.sample_length() / src_channels;
        let step = self.frequency as f64 / frequency as f64;
        let frames = dst.len() / dst_channels;

        let frame_sample = |frame: usize, channel: usize| -> f32 {
            if frame >= src_frames {
                return 0.0;
            }
            self.sample(frame * src_channels + channel)
        };

        for i in 0..frames {
            let src_pos = pos + i as f64 * step;
            let base = src_pos.floor();
            let frac = (src_pos - base) as f32;
            let frame = base as usize;

            for c in 0..dst_channels {
                let value = |f: usize| -> f32 {
                    if dst_channels == 1 && src_channels > 1 {
                        (0..src_channels).map(|sc| frame_sample(f, sc)).sum::<f32>()
                            / src_channels as f32
                    } else {
                        frame_sample(f, c.min(src_channels - 1))
                    }
                };
                let a = value(frame);
                let b = value(frame + 1);
                dst[i * dst_channels + c] = a + (b - a) * frac;
            }
        }

        pos + frames as f64 * step
    }
}

#[derive(Debug, Default)]
struct BufferState {
    data: AudioData,
    complete: bool,
    sealed: bool,
}

/// Shared view of the audio produced by one talk.
///
/// Clones observe the same storage. `sample_length` only ever grows, until
/// the owning talk finishes or is stopped.
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    state: Arc<RwLock<BufferState>>,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that already holds finished audio
    pub fn from_data(data: AudioData) -> Self {
        Self {
            state: Arc::new(RwLock::new(BufferState {
                data,
                complete: true,
                sealed: false,
            })),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.state.read().data.format
    }

    pub fn channels(&self) -> i32 {
        self.state.read().data.channels
    }

    pub fn frequency(&self) -> i32 {
        self.state.read().data.frequency
    }

    pub fn sample_length(&self) -> usize {
        self.state.read().data.sample_length()
    }

    /// True once no more samples will be appended
    pub fn is_complete(&self) -> bool {
        let state = self.state.read();
        state.complete || state.sealed
    }

    /// True when a stop cut the talk short
    pub fn is_sealed(&self) -> bool {
        self.state.read().sealed
    }

    pub fn read_samples(&self, dst: &mut [f32], pos: usize) -> usize {
        self.state.read().data.read_samples(dst, pos)
    }

    pub fn resample(&self, dst: &mut [f32], frequency: i32, channels: i32, pos: f64) -> f64 {
        self.state.read().data.resample(dst, frequency, channels, pos)
    }

    /// Copy of the samples received so far
    pub fn snapshot(&self) -> AudioData {
        self.state.read().data.clone()
    }

    pub(crate) fn append(&self, chunk: &AudioChunk) {
        let mut state = self.state.write();
        if state.complete || state.sealed {
            return;
        }
        state.data.append(chunk);
    }

    pub(crate) fn finish(&self) {
        self.state.write().complete = true;
    }

    pub(crate) fn seal(&self) {
        self.state.write().sealed = true;
    }

    pub fn ptr_eq(&self, other: &AudioBuffer) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16_chunk(samples: &[i16], channels: i32) -> AudioChunk {
        AudioChunk {
            format: AudioFormat::S16,
            frequency: 16000,
            channels,
            data: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }

    #[test]
    fn test_sample_length_and_duration() {
        let mut data = AudioData::default();
        data.append(&s16_chunk(&[0; 32000], 2));

        assert_eq!(data.format, AudioFormat::S16);
        assert_eq!(data.sample_length(), 32000);
        assert!((data.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_append_ignores_mismatched_chunks() {
        let mut data = AudioData::default();
        data.append(&s16_chunk(&[1, 2], 1));
        data.append(&s16_chunk(&[3, 4], 2));
        data.append(&AudioChunk {
            format: AudioFormat::RawFile,
            frequency: 16000,
            channels: 1,
            data: vec![1, 2, 3],
        });

        assert_eq!(data.sample_length(), 2);
    }

    #[test]
    fn test_append_drops_partial_trailing_sample() {
        let mut data = AudioData::default();
        let mut odd = s16_chunk(&[i16::MAX, 0], 1);
        odd.data.push(0x7f);
        data.append(&odd);
        data.append(&s16_chunk(&[i16::MAX], 1));
        data.append(&AudioChunk {
            data: vec![0x01],
            ..s16_chunk(&[], 1)
        });

        assert_eq!(data.data.len(), 6);
        assert_eq!(data.to_f32(), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_append_converts_format() {
        let mut data = AudioData::default();
        data.append(&s16_chunk(&[16384], 1));
        data.append(&AudioChunk {
            format: AudioFormat::F32,
            frequency: 16000,
            channels: 1,
            data: (-0.5f32).to_le_bytes().to_vec(),
        });

        assert_eq!(data.format, AudioFormat::S16);
        assert_eq!(data.sample_length(), 2);
        assert!((data.sample(1) + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_read_samples_clamps_to_available() {
        let mut data = AudioData::default();
        data.append(&s16_chunk(&[0, 32767, -32767], 1));

        let mut dst = [9.0f32; 8];
        assert_eq!(data.read_samples(&mut dst, 1), 2);
        assert!((dst[0] - 1.0).abs() < 1e-6);
        assert!((dst[1] + 1.0).abs() < 1e-6);
        assert_eq!(dst[2], 9.0);
        assert_eq!(data.read_samples(&mut dst, 10), 0);
    }

    #[test]
    fn test_sample_decoding() {
        assert_eq!(AudioFormat::U8.decode(&[128]), 0.0);
        assert!((AudioFormat::S24.decode(&[0xff, 0xff, 0x7f]) - 1.0).abs() < 1e-6);
        assert!(AudioFormat::S24.decode(&[0x00, 0x00, 0x80]) < -0.99);

        let mut out = Vec::new();
        AudioFormat::S24.encode(-0.5, &mut out);
        assert_eq!(out.len(), 3);
        assert!((AudioFormat::S24.decode(&out) + 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_resample_upmix_and_rate() {
        let data = AudioData {
            format: AudioFormat::F32,
            frequency: 8000,
            channels: 1,
            data: [0.0f32, 1.0].iter().flat_map(|s| s.to_le_bytes()).collect(),
        };

        // double rate, stereo; the last frame interpolates towards silence
        let mut dst = [0.0f32; 8];
        let next = data.resample(&mut dst, 16000, 2, 0.0);

        assert_eq!(next, 2.0);
        assert_eq!(&dst[0..2], &[0.0, 0.0]);
        assert_eq!(&dst[2..4], &[0.5, 0.5]);
        assert_eq!(&dst[4..6], &[1.0, 1.0]);
        assert_eq!(&dst[6..8], &[0.5, 0.5]);
    }

    #[test]
    fn test_resample_downmix() {
        let data = AudioData {
            format: AudioFormat::F32,
            frequency: 8000,
            channels: 2,
            data: [0.2f32, 0.6].iter().flat_map(|s| s.to_le_bytes()).collect(),
        };

        let mut dst = [0.0f32; 1];
        data.resample(&mut dst, 8000, 1, 0.0);
        assert!((dst[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_buffer_stops_growing_when_sealed() {
        let buffer = AudioBuffer::new();
        let view = buffer.clone();

        buffer.append(&s16_chunk(&[1, 2, 3], 1));
        assert_eq!(view.sample_length(), 3);
        assert!(!view.is_complete());

        buffer.seal();
        buffer.append(&s16_chunk(&[4, 5], 1));
        assert_eq!(view.sample_length(), 3);
        assert!(view.is_complete());
        assert!(view.is_sealed());
        assert!(view.ptr_eq(&buffer));
    }
}
