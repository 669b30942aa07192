//! RemoteTalk client - streaming speech synthesis against a remote talk server

pub mod audio;

pub mod cache;

pub mod client;

pub mod config;

pub mod ipc;

pub mod paths;

pub mod synthesis;

pub mod voice;

pub use audio::{AudioBuffer, AudioData, AudioFormat, ExportError, ExportFormat, OggSettings};
pub use cache::{CacheKey, CacheStore, CachedClip, DirCacheStore};
pub use client::{AsyncHandle, HttpTransport, Session, TalkTransport};
pub use ipc::{AudioChunk, ServerStatus, TalkParams, TalkRequest, MAX_PARAMS, SERVER_NOT_FOUND};
pub use synthesis::{
    Feed, PlaybackFeeder, PlaybackSink, TalkController, TalkError, TalkOutcome, TalkPhase,
    TalkSettings,
};
pub use voice::{clamp_cast_index, find_cast, Cast};
