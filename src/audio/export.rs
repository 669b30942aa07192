use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::num::{NonZeroU32, NonZeroU8};
use std::path::Path;
use thiserror::Error;
use vorbis_rs::{VorbisBitrateManagementStrategy, VorbisEncoderBuilder};

use super::{AudioData, AudioFormat};

// Frames handed to the Vorbis encoder per block
const OGG_BLOCK_FRAMES: usize = 4096;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No completed talk to export")]
    Incomplete,

    #[error("Audio format {0:?} cannot be exported")]
    UnsupportedFormat(AudioFormat),

    #[error("Invalid audio layout: {channels} channels at {frequency} Hz")]
    InvalidLayout { channels: i32, frequency: i32 },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("WAV encoding failed: {0}")]
    Wave(#[from] hound::Error),

    #[error("Ogg Vorbis encoding failed: {0}")]
    Vorbis(String),

    #[error("Export directory unavailable: {0}")]
    Directory(String),

    #[error("Export task was abandoned")]
    Abandoned,
}

/// Container used for exported talks and cache artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Wave,
    #[default]
    Ogg,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Wave => ".wav",
            ExportFormat::Ogg => ".ogg",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wav" | "wave" => Ok(ExportFormat::Wave),
            "ogg" => Ok(ExportFormat::Ogg),
            other => Err(anyhow::anyhow!("Unknown export format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OggSettings {
    /// Vorbis VBR quality in `[0, 1]`
    pub quality: f32,
}

impl Default for OggSettings {
    fn default() -> Self {
        Self { quality: 1.0 }
    }
}

impl OggSettings {
    pub fn new(quality: f32) -> Self {
        Self {
            quality: quality.clamp(0.0, 1.0),
        }
    }
}

fn layout(audio: &AudioData) -> Result<(NonZeroU8, NonZeroU32), ExportError> {
    let invalid = || ExportError::InvalidLayout {
        channels: audio.channels,
        frequency: audio.frequency,
    };
    let channels = u8::try_from(audio.channels)
        .ok()
        .and_then(NonZeroU8::new)
        .ok_or_else(invalid)?;
    let frequency = u32::try_from(audio.frequency)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(invalid)?;
    Ok((channels, frequency))
}

fn create_file(path: &Path) -> Result<BufWriter<File>, ExportError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| ExportError::Io {
            path: path.display().to_string(),
            source,
        })
}

/// Writes `audio` as a PCM WAV file in its native sample format
pub fn export_wave(audio: &AudioData, path: &Path) -> Result<(), ExportError> {
    if !audio.format.is_pcm() {
        return Err(ExportError::UnsupportedFormat(audio.format));
    }
    let (channels, frequency) = layout(audio)?;

    let spec = hound::WavSpec {
        channels: channels.get() as u16,
        sample_rate: frequency.get(),
        bits_per_sample: audio.format.bits(),
        sample_format: if audio.format == AudioFormat::F32 {
            hound::SampleFormat::Float
        } else {
            hound::SampleFormat::Int
        },
    };

    let mut writer = hound::WavWriter::new(create_file(path)?, spec)?;
    let size = audio.format.sample_size();
    for bytes in audio.data.chunks_exact(size) {
        match audio.format {
            AudioFormat::U8 => writer.write_sample((bytes[0] as i16 - 128) as i8)?,
            AudioFormat::S16 => writer.write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))?,
            AudioFormat::S24 => {
                writer.write_sample(i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8)?
            }
            AudioFormat::S32 => {
                writer.write_sample(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))?
            }
            AudioFormat::F32 => {
                writer.write_sample(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))?
            }
            AudioFormat::Unknown | AudioFormat::RawFile => {}
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Encodes `audio` as Ogg Vorbis with quality-based VBR
pub fn export_ogg(audio: &AudioData, path: &Path, settings: &OggSettings) -> Result<(), ExportError> {
    if !audio.format.is_pcm() {
        return Err(ExportError::UnsupportedFormat(audio.format));
    }
    let (channels, frequency) = layout(audio)?;
    let channel_count = channels.get() as usize;

    let interleaved = audio.to_f32();
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (channel, sample) in planar.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    let vorbis_err = |e: vorbis_rs::VorbisError| ExportError::Vorbis(e.to_string());
    let mut encoder = VorbisEncoderBuilder::new(frequency, channels, create_file(path)?)
        .map_err(vorbis_err)?
        .bitrate_management_strategy(VorbisBitrateManagementStrategy::QualityVbr {
            target_quality: OggSettings::new(settings.quality).quality,
        })
        .build()
        .map_err(vorbis_err)?;

    let frames = planar.first().map(Vec::len).unwrap_or(0);
    let mut start = 0;
    while start < frames {
        let end = (start + OGG_BLOCK_FRAMES).min(frames);
        let block: Vec<&[f32]> = planar.iter().map(|c| &c[start..end]).collect();
        encoder.encode_audio_block(&block).map_err(vorbis_err)?;
        start = end;
    }
    encoder.finish().map_err(vorbis_err)?;
    Ok(())
}
