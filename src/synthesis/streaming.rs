use anyhow::Result;

use crate::audio::AudioBuffer;
use crate::cache::CachedClip;

/// Outcome of one pull from a [`PlaybackFeeder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// Number of samples written to the destination
    Samples(usize),
    /// Nothing new yet; the talk is still streaming
    Pending,
    /// Every sample of a completed buffer was delivered
    Finished,
}

/// Reads a growing talk buffer on behalf of a player.
///
/// The player asks for more audio whenever its queue runs dry. While the talk
/// is still streaming the feeder answers [`Feed::Pending`] and the player asks
/// again later, so a player that drains faster than the server produces simply
/// re-arms. Once the buffer is complete the remaining samples are handed out
/// and the feeder reports [`Feed::Finished`].
#[derive(Debug, Clone)]
pub struct PlaybackFeeder {
    buffer: AudioBuffer,
    position: usize,
    frame_position: f64,
}

impl PlaybackFeeder {
    /// Starts delivering from sample 0
    pub fn new(buffer: AudioBuffer) -> Self {
        Self {
            buffer,
            position: 0,
            frame_position: 0.0,
        }
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    /// Samples delivered so far by [`PlaybackFeeder::fill`]
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn channels(&self) -> i32 {
        self.buffer.channels()
    }

    pub fn frequency(&self) -> i32 {
        self.buffer.frequency()
    }

    /// True once the buffer is complete and everything was delivered
    pub fn is_exhausted(&self) -> bool {
        self.buffer.is_complete() && self.position >= self.buffer.sample_length()
    }

    /// Copies the next interleaved samples in the buffer's own layout
    pub fn fill(&mut self, dst: &mut [f32]) -> Feed {
        if dst.is_empty() {
            return Feed::Pending;
        }
        // completeness is read first so samples appended in between are not lost
        let complete = self.buffer.is_complete();
        let written = self.buffer.read_samples(dst, self.position);
        if written > 0 {
            self.position += written;
            return Feed::Samples(written);
        }
        if complete {
            Feed::Finished
        } else {
            Feed::Pending
        }
    }

    /// Like [`PlaybackFeeder::fill`], converted to the player's rate and
    /// channel count. Only whole destination frames whose source frames have
    /// already arrived are written.
    pub fn fill_resampled(&mut self, dst: &mut [f32], frequency: i32, channels: i32) -> Feed {
        let src_channels = self.buffer.channels();
        let src_frequency = self.buffer.frequency();
        if channels <= 0 || frequency <= 0 || src_channels <= 0 || src_frequency <= 0 {
            return if self.buffer.is_complete() {
                Feed::Finished
            } else {
                Feed::Pending
            };
        }

        let complete = self.buffer.is_complete();
        let src_frames = (self.buffer.sample_length() / src_channels as usize) as f64;
        let step = src_frequency as f64 / frequency as f64;
        // interpolation reads one frame ahead, which may not have arrived yet
        let readable = if complete { src_frames } else { src_frames - 1.0 };
        let remaining = readable - self.frame_position;
        if remaining <= 0.0 {
            return if complete { Feed::Finished } else { Feed::Pending };
        }

        let available = (remaining / step).ceil() as usize;
        let frames = available.min(dst.len() / channels as usize);
        if frames == 0 {
            return Feed::Pending;
        }

        let len = frames * channels as usize;
        self.frame_position =
            self.buffer
                .resample(&mut dst[..len], frequency, channels, self.frame_position);
        self.position = (self.frame_position as usize) * src_channels as usize;
        Feed::Samples(len)
    }
}

/// The player the talk controller hands audio to.
///
/// Implementations decide how audio is rendered; the controller only starts
/// playback, asks whether it is still running and stops it.
pub trait PlaybackSink {
    /// Starts playing a talk's buffer, streaming or complete
    fn feed(&mut self, feeder: PlaybackFeeder) -> Result<()>;

    /// Plays a previously exported artifact
    fn play_clip(&mut self, clip: &CachedClip) -> Result<()>;

    fn is_playing(&self) -> bool;

    fn stop(&mut self);
}

/// Fans one talk out to several players, each reading at its own position.
/// Every player is tried; the last failure is reported.
impl<P: PlaybackSink> PlaybackSink for Vec<P> {
    fn feed(&mut self, feeder: PlaybackFeeder) -> Result<()> {
        let mut result = Ok(());
        for sink in self.iter_mut() {
            if let Err(e) = sink.feed(PlaybackFeeder::new(feeder.buffer().clone())) {
                result = Err(e);
            }
        }
        result
    }

    fn play_clip(&mut self, clip: &CachedClip) -> Result<()> {
        let mut result = Ok(());
        for sink in self.iter_mut() {
            if let Err(e) = sink.play_clip(clip) {
                result = Err(e);
            }
        }
        result
    }

    fn is_playing(&self) -> bool {
        self.iter().any(|sink| sink.is_playing())
    }

    fn stop(&mut self) {
        for sink in self.iter_mut() {
            sink.stop();
        }
    }
}
