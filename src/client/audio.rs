use anyhow::{Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::time::Duration;
use tracing::debug;

use crate::cache::CachedClip;
use crate::synthesis::{Feed, PlaybackFeeder, PlaybackSink};

// Frames pulled from the feeder per refill
const BLOCK_FRAMES: usize = 1024;

/// rodio source that streams a talk while it is still being synthesized.
/// Emits silence whenever the feeder has nothing new yet.
struct FeederSource {
    feeder: PlaybackFeeder,
    channels: u16,
    sample_rate: u32,
    block: Vec<f32>,
    len: usize,
    index: usize,
}

impl FeederSource {
    fn new(feeder: PlaybackFeeder, channels: u16, sample_rate: u32) -> Self {
        Self {
            feeder,
            channels,
            sample_rate,
            block: vec![0.0; BLOCK_FRAMES * channels as usize],
            len: 0,
            index: 0,
        }
    }

    fn refill(&mut self) -> bool {
        match self.feeder.fill(&mut self.block) {
            Feed::Samples(n) => self.len = n,
            Feed::Pending => {
                // ~10ms of silence before asking again
                let frames = (self.sample_rate as usize / 100).max(1);
                self.len = (frames * self.channels as usize).min(self.block.len());
                self.block[..self.len].fill(0.0);
            }
            Feed::Finished => return false,
        }
        self.index = 0;
        true
    }
}

impl Iterator for FeederSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.index >= self.len && !self.refill() {
            return None;
        }
        let sample = self.block[self.index];
        self.index += 1;
        Some(sample)
    }
}

impl Source for FeederSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Plays talks on the default output device
pub struct RodioSink {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Option<Sink>,
}

impl RodioSink {
    pub fn new() -> Result<Self> {
        let (stream, handle) =
            OutputStream::try_default().context("Failed to create audio output stream")?;
        Ok(Self {
            _stream: stream,
            handle,
            sink: None,
        })
    }

    fn fresh_sink(&mut self) -> Result<&Sink> {
        if let Some(old) = self.sink.take() {
            old.stop();
        }
        let sink = Sink::try_new(&self.handle).context("Failed to create audio sink")?;
        let sink: &Sink = self.sink.insert(sink);
        Ok(sink)
    }
}

impl PlaybackSink for RodioSink {
    fn feed(&mut self, feeder: PlaybackFeeder) -> Result<()> {
        let (channels, frequency) = (feeder.channels(), feeder.frequency());
        if channels <= 0 || frequency <= 0 {
            debug!("Nothing to play");
            return Ok(());
        }
        let channels = u16::try_from(channels).context("Unsupported channel count")?;
        let source = FeederSource::new(feeder, channels, frequency as u32);

        let sink = self.fresh_sink()?;
        sink.append(source);
        sink.play();
        Ok(())
    }

    fn play_clip(&mut self, clip: &CachedClip) -> Result<()> {
        let file = File::open(&clip.path)
            .with_context(|| format!("Failed to open {}", clip.path.display()))?;
        let source = Decoder::new(BufReader::new(file)).context("Failed to decode audio")?;

        let sink = self.fresh_sink()?;
        sink.append(source);
        sink.play();
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.sink.as_ref().is_some_and(|sink| !sink.empty())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }
}

/// Sink that discards audio, for headless runs
#[derive(Debug, Default)]
pub struct SilentSink;

impl PlaybackSink for SilentSink {
    fn feed(&mut self, _feeder: PlaybackFeeder) -> Result<()> {
        Ok(())
    }

    fn play_clip(&mut self, _clip: &CachedClip) -> Result<()> {
        Ok(())
    }

    fn is_playing(&self) -> bool {
        false
    }

    fn stop(&mut self) {}
}
