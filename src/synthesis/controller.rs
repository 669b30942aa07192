use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::{ExportError, ExportFormat, OggSettings};
use crate::cache::{CacheKey, CacheStore};
use crate::client::{AsyncHandle, Session};
use crate::ipc::{TalkParams, TalkRequest};
use crate::synthesis::streaming::{PlaybackFeeder, PlaybackSink};
use crate::voice::{cast_at, clamp_cast_index, Cast};

pub const DEFAULT_SAMPLE_GRANULARITY: usize = 8192;

#[derive(Debug, Clone, PartialEq)]
pub struct TalkSettings {
    /// Buffered samples needed before a still-streaming talk starts playing
    pub sample_granularity: usize,
    pub use_cache: bool,
    pub export_audio: bool,
    pub export_format: ExportFormat,
    pub ogg: OggSettings,
    /// Report export failures at warn level
    pub logging: bool,
}

impl Default for TalkSettings {
    fn default() -> Self {
        Self {
            sample_granularity: DEFAULT_SAMPLE_GRANULARITY,
            use_cache: true,
            export_audio: false,
            export_format: ExportFormat::default(),
            ogg: OggSettings::default(),
            logging: false,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkError {
    #[error("A talk is already in progress")]
    Busy,

    #[error("The previous talk is still being stopped")]
    StopPending,

    #[error("Session is not bound to a server")]
    SessionUnbound,
}

/// How an accepted talk is being served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TalkOutcome {
    /// Played straight from an exported artifact; no request was made
    CacheHit(PathBuf),
    /// Sent to the server
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkPhase {
    Idle,
    Playing,
    Requesting,
    Streaming,
    Exporting,
    Stopping,
}

/// Request/streaming state machine over one [`Session`].
///
/// Nothing here blocks: [`TalkController::tick`] polls every outstanding
/// handle and must be called regularly, e.g. once per frame.
pub struct TalkController<C: CacheStore, P: PlaybackSink> {
    session: Session,
    cache: C,
    sink: P,
    settings: TalkSettings,

    status: AsyncHandle<bool>,
    talk: AsyncHandle<bool>,
    stop: AsyncHandle<bool>,
    export: AsyncHandle<Result<PathBuf, ExportError>>,

    host: String,
    server_params: TalkParams,
    casts: Vec<Cast>,
    server_ready: bool,
    server_talking: bool,

    fed: bool,
    stop_requested: bool,
    cache_key: Option<CacheKey>,

    exported_files: Vec<PathBuf>,
    last_export_error: Option<ExportError>,
}

impl<C: CacheStore, P: PlaybackSink> TalkController<C, P> {
    /// Takes over `session` and starts probing the server
    pub fn new(session: Session, cache: C, sink: P, settings: TalkSettings) -> Self {
        let mut controller = Self {
            session,
            cache,
            sink,
            settings,
            status: AsyncHandle::released(),
            talk: AsyncHandle::released(),
            stop: AsyncHandle::released(),
            export: AsyncHandle::released(),
            host: String::new(),
            server_params: TalkParams::default(),
            casts: Vec::new(),
            server_ready: false,
            server_talking: false,
            fed: false,
            stop_requested: false,
            cache_key: None,
            exported_files: Vec::new(),
            last_export_error: None,
        };
        controller.status = controller.session.refresh_status();
        controller
    }

    /// Starts a talk, either from the cache or through the server.
    ///
    /// Rejected while another talk, its export or a stop is outstanding.
    pub fn talk(&mut self, request: TalkRequest) -> Result<TalkOutcome, TalkError> {
        if self.stop.is_valid() {
            return Err(TalkError::StopPending);
        }
        if self.talk.is_valid() || self.export.is_valid() {
            return Err(TalkError::Busy);
        }

        // talk() itself reveals reachability, so don't wait for the probe
        if !self.session.has_status() && !self.status.is_valid() {
            self.status = self.session.refresh_status();
        }

        let mut request = request;
        request.params.cast = clamp_cast_index(request.params.cast, &self.casts);
        request.params.mute = true;

        self.cache_key = None;
        if self.settings.use_cache || self.settings.export_audio {
            self.cache_key = self.cache_key_for(&request);
        }

        if self.settings.use_cache {
            if let Some(clip) = self.cache_key.as_ref().and_then(|key| self.cache.load(key)) {
                debug!("Cache hit: {}", clip.path.display());
                if let Err(e) = self.sink.play_clip(&clip) {
                    warn!("Failed to play {}: {:#}", clip.path.display(), e);
                }
                return Ok(TalkOutcome::CacheHit(clip.path));
            }
        }

        let handle = self.session.talk(&request);
        if !handle.is_valid() {
            return Err(TalkError::SessionUnbound);
        }

        debug!(
            "Talk requested: cast {} ({} chars)",
            request.params.cast,
            request.text.chars().count()
        );
        self.talk = handle;
        self.server_talking = true;
        self.fed = false;
        self.stop_requested = false;
        Ok(TalkOutcome::Requested)
    }

    /// Asks the server to cancel the running talk.
    ///
    /// A no-op when nothing is outstanding or a stop is already pending.
    pub fn stop(&mut self) {
        if !self.talk.is_valid() || self.stop.is_valid() {
            return;
        }
        self.stop = self.session.stop();
        self.stop_requested = true;
    }

    /// Advances the state machine by polling every outstanding operation
    pub fn tick(&mut self) {
        self.poll_status();
        self.poll_talk();
        self.poll_stop();
        self.poll_export();
    }

    fn poll_status(&mut self) {
        if !self.status.is_finished() {
            return;
        }
        self.status.release();

        self.host = self.session.host();
        self.server_params = self.session.server_params();
        self.casts = self.session.casts();
        self.server_ready = self.session.is_reachable();
        debug!("Server {}: {} casts", self.host, self.casts.len());
    }

    fn poll_talk(&mut self) {
        if !self.talk.is_valid() {
            return;
        }
        let finished = self.talk.is_finished();

        if !self.fed {
            let buffer = self.session.pull_buffer();
            if buffer.sample_length() > self.settings.sample_granularity || finished {
                if let Err(e) = self.sink.feed(PlaybackFeeder::new(buffer)) {
                    warn!("Failed to start playback: {:#}", e);
                }
                self.fed = true;
            }
        }

        if finished {
            let buffer = self.session.pull_buffer();
            let succeeded = self.talk.take().unwrap_or(false);
            self.talk.release();
            // a pending stop still owns the server
            if !self.stop.is_valid() {
                self.server_talking = false;
            }
            debug!(
                "Talk finished ({} samples, success: {})",
                buffer.sample_length(),
                succeeded
            );

            if self.settings.export_audio && succeeded && !self.stop_requested {
                if let Some(key) = self.cache_key.clone() {
                    self.start_export(&key);
                }
            }
        }
    }

    fn poll_stop(&mut self) {
        if !self.stop.is_finished() {
            return;
        }
        self.stop.release();

        // the buffer is sealed by now; whatever the talk still delivers is discarded
        if self.talk.is_valid() {
            self.talk.release();
        }
        self.server_talking = false;
        debug!("Talk stopped");
    }

    fn poll_export(&mut self) {
        if !self.export.is_finished() {
            return;
        }
        let result = self.export.take().unwrap_or(Err(ExportError::Abandoned));
        self.export.release();

        match result {
            Ok(path) => {
                info!("Exported {}", path.display());
                self.exported_files.push(path);
            }
            Err(e) => self.record_export_error(e),
        }
    }

    fn start_export(&mut self, key: &CacheKey) {
        if let Err(e) = self.cache.prepare() {
            self.record_export_error(ExportError::Directory(format!("{:#}", e)));
            return;
        }
        let path = self.cache.artifact_path(key);
        self.export =
            self.session
                .export_to_file(path, self.settings.export_format, self.settings.ogg);
    }

    fn record_export_error(&mut self, error: ExportError) {
        if self.settings.logging {
            warn!("Export failed: {}", error);
        } else {
            debug!("Export failed: {}", error);
        }
        self.last_export_error = Some(error);
    }

    fn cache_key_for(&self, request: &TalkRequest) -> Option<CacheKey> {
        if request.text.is_empty() {
            return None;
        }
        let cast = cast_at(&self.casts, request.params.cast)?;
        Some(CacheKey::new(
            &cast.name,
            &request.text,
            self.settings.export_format,
        ))
    }

    /// Points the controller at another server.
    /// Outstanding operations are dropped and the new server is probed.
    pub fn set_server(&mut self, address: &str, port: u16) {
        let session = Session::connect(self.session.runtime().clone(), address, port);
        self.replace_session(session);
    }

    /// Reconnects to the current server, discarding everything learned so far
    pub fn refresh_client(&mut self) {
        let session = self.session.renew();
        self.replace_session(session);
    }

    fn replace_session(&mut self, session: Session) {
        if self.server_talking && !self.stop.is_valid() {
            // fire and forget: the handle is dropped with the old session
            let _ = self.session.stop();
        }
        self.status.release();
        self.talk.release();
        self.stop.release();
        self.export.release();

        self.host.clear();
        self.casts.clear();
        self.server_params = TalkParams::default();
        self.server_ready = false;
        self.server_talking = false;
        self.fed = false;
        self.stop_requested = false;
        self.cache_key = None;

        self.session = session;
        self.status = self.session.refresh_status();
    }

    pub fn phase(&self) -> TalkPhase {
        if self.stop.is_valid() {
            TalkPhase::Stopping
        } else if self.talk.is_valid() {
            if self.fed || self.session.pull_buffer().sample_length() > 0 {
                TalkPhase::Streaming
            } else {
                TalkPhase::Requesting
            }
        } else if self.export.is_valid() {
            TalkPhase::Exporting
        } else if self.sink.is_playing() {
            TalkPhase::Playing
        } else {
            TalkPhase::Idle
        }
    }

    pub fn is_server_ready(&self) -> bool {
        self.server_ready
    }

    pub fn is_server_talking(&self) -> bool {
        self.server_talking
    }

    pub fn is_playing(&self) -> bool {
        self.sink.is_playing()
    }

    /// Ready for the next talk with nothing left to play
    pub fn is_idling(&self) -> bool {
        self.server_ready && !self.server_talking && !self.is_playing()
    }

    /// True while a status probe is outstanding
    pub fn is_refreshing(&self) -> bool {
        self.status.is_valid()
    }

    pub fn is_exporting(&self) -> bool {
        self.export.is_valid()
    }

    /// Host label of the server, `"Server Not Found"` when it did not answer
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn casts(&self) -> &[Cast] {
        &self.casts
    }

    pub fn server_params(&self) -> &TalkParams {
        &self.server_params
    }

    /// Name of the cast a talk with `index` would use
    pub fn cast_name(&self, index: i32) -> Option<&str> {
        cast_at(&self.casts, clamp_cast_index(index, &self.casts)).map(|c| c.name.as_str())
    }

    /// Samples received for the current or last talk
    pub fn sample_length(&self) -> usize {
        self.session.pull_buffer().sample_length()
    }

    pub fn settings(&self) -> &TalkSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut TalkSettings {
        &mut self.settings
    }

    /// Paths of artifacts exported since the last call
    pub fn take_exported_files(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.exported_files)
    }

    pub fn last_export_error(&self) -> Option<&ExportError> {
        self.last_export_error.as_ref()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut P {
        &mut self.sink
    }
}
