use futures_util::StreamExt;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::audio::{export_ogg, export_wave, AudioBuffer, ExportError, ExportFormat, OggSettings};
use crate::client::handle::AsyncHandle;
use crate::client::transport::{HttpTransport, TalkTransport};
use crate::ipc::{ServerStatus, TalkParams, TalkRequest, SERVER_NOT_FOUND};
use crate::voice::Cast;

// Server metadata filled in by the status probe
#[derive(Debug, Clone, Default)]
struct SessionInfo {
    host: String,
    params: TalkParams,
    casts: Vec<Cast>,
    refreshed: bool,
}

impl SessionInfo {
    fn from_status(status: ServerStatus, fallback_host: &str) -> Self {
        let host = if status.host.is_empty() {
            fallback_host.to_string()
        } else {
            status.host
        };
        let casts = status
            .casts
            .into_iter()
            .map(|info| Cast::from_info(info, &host))
            .collect();
        Self {
            host,
            params: status.params,
            casts,
            refreshed: true,
        }
    }
}

/// One connection identity to a talk server.
///
/// The transport is created lazily on first use; a server that does not exist
/// (yet) is only reported through the status probe. Every remote operation
/// runs on the tokio runtime and is observed through an [`AsyncHandle`].
pub struct Session {
    address: String,
    port: u16,
    runtime: Handle,
    transport: Option<Arc<dyn TalkTransport>>,
    info: Arc<RwLock<SessionInfo>>,
    buffer: AudioBuffer,
}

impl Session {
    /// Session for `address:port`; never fails
    pub fn connect(runtime: Handle, address: &str, port: u16) -> Self {
        Self {
            address: address.to_string(),
            port,
            runtime,
            transport: None,
            info: Arc::new(RwLock::new(SessionInfo::default())),
            buffer: AudioBuffer::new(),
        }
    }

    /// Session over an already established transport
    pub fn with_transport(
        runtime: Handle,
        address: &str,
        port: u16,
        transport: Arc<dyn TalkTransport>,
    ) -> Self {
        let mut session = Self::connect(runtime, address, port);
        session.transport = Some(transport);
        session
    }

    /// Fresh session to the same server: cast list, metadata and buffer are
    /// discarded, the transport is shared
    pub fn renew(&self) -> Self {
        Self {
            address: self.address.clone(),
            port: self.port,
            runtime: self.runtime.clone(),
            transport: self.transport.clone(),
            info: Arc::new(RwLock::new(SessionInfo::default())),
            buffer: AudioBuffer::new(),
        }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn bind(&mut self) -> Option<Arc<dyn TalkTransport>> {
        if self.transport.is_none() {
            match HttpTransport::new(&self.address, self.port) {
                Ok(transport) => self.transport = Some(Arc::new(transport)),
                Err(e) => warn!("Session {}:{} is unbound: {:#}", self.address, self.port, e),
            }
        }
        self.transport.clone()
    }

    /// Starts a status probe. Completion yields whether the server answered;
    /// host, server parameters and casts are updated before the handle finishes.
    pub fn refresh_status(&mut self) -> AsyncHandle<bool> {
        let fallback_host = format!("{}:{}", self.address, self.port);
        let Some(transport) = self.bind() else {
            *self.info.write() = SessionInfo::from_status(ServerStatus::not_found(), &fallback_host);
            return AsyncHandle::ready(false);
        };

        let info = Arc::clone(&self.info);
        AsyncHandle::spawn(&self.runtime, async move {
            let status = match transport.status().await {
                Ok(status) => status,
                Err(e) => {
                    debug!("Status probe for {} failed: {:#}", fallback_host, e);
                    ServerStatus::not_found()
                }
            };
            let reachable = status.is_reachable();
            *info.write() = SessionInfo::from_status(status, &fallback_host);
            reachable
        })
    }

    /// Asks whether the server can take a talk right now
    pub fn check_ready(&mut self) -> AsyncHandle<bool> {
        let Some(transport) = self.bind() else {
            return AsyncHandle::invalid();
        };
        AsyncHandle::spawn(&self.runtime, async move {
            transport.ready().await.unwrap_or_else(|e| {
                debug!("Ready probe failed: {:#}", e);
                false
            })
        })
    }

    /// Starts synthesis. The handle finishes with `true` once the server has
    /// streamed the whole talk; samples appear in [`Session::pull_buffer`]
    /// while it is still running.
    pub fn talk(&mut self, request: &TalkRequest) -> AsyncHandle<bool> {
        let Some(transport) = self.bind() else {
            return AsyncHandle::invalid();
        };

        let buffer = AudioBuffer::new();
        self.buffer = buffer.clone();
        let request = request.clone();

        AsyncHandle::spawn(&self.runtime, async move {
            let result = stream_talk(transport.as_ref(), &request, &buffer).await;
            buffer.finish();
            match result {
                Ok(()) => {
                    debug!("Talk finished with {} samples", buffer.sample_length());
                    true
                }
                Err(e) => {
                    warn!("Talk failed: {:#}", e);
                    false
                }
            }
        })
    }

    /// Requests cancellation of the running synthesis. Once the handle
    /// finishes, the current buffer no longer grows but stays readable.
    pub fn stop(&mut self) -> AsyncHandle<bool> {
        let Some(transport) = self.bind() else {
            return AsyncHandle::invalid();
        };

        let buffer = self.buffer.clone();
        AsyncHandle::spawn(&self.runtime, async move {
            let stopped = transport.stop().await.unwrap_or_else(|e| {
                warn!("Stop request failed: {:#}", e);
                false
            });
            buffer.seal();
            stopped
        })
    }

    /// Current state of the in-progress or last talk's audio. Reading it has
    /// no side effects, so any number of readers may pull in the same tick.
    pub fn pull_buffer(&self) -> AudioBuffer {
        self.buffer.clone()
    }

    /// Writes the last completed talk to `path`
    pub fn export_to_file(
        &self,
        path: PathBuf,
        format: ExportFormat,
        settings: OggSettings,
    ) -> AsyncHandle<Result<PathBuf, ExportError>> {
        let buffer = self.buffer.clone();
        if !buffer.is_complete() {
            return AsyncHandle::ready(Err(ExportError::Incomplete));
        }

        AsyncHandle::spawn_blocking(&self.runtime, move || {
            let audio = buffer.snapshot();
            match format {
                ExportFormat::Wave => export_wave(&audio, &path)?,
                ExportFormat::Ogg => export_ogg(&audio, &path, &settings)?,
            }
            Ok(path)
        })
    }

    /// Host label of the server, `"Server Not Found"` when unreachable and
    /// empty before the first status probe completed
    pub fn host(&self) -> String {
        self.info.read().host.clone()
    }

    pub fn server_params(&self) -> TalkParams {
        self.info.read().params
    }

    pub fn casts(&self) -> Vec<Cast> {
        self.info.read().casts.clone()
    }

    /// True once any status probe has completed
    pub fn has_status(&self) -> bool {
        self.info.read().refreshed
    }

    pub fn is_reachable(&self) -> bool {
        let info = self.info.read();
        info.refreshed && info.host != SERVER_NOT_FOUND
    }
}

async fn stream_talk(
    transport: &dyn TalkTransport,
    request: &TalkRequest,
    buffer: &AudioBuffer,
) -> anyhow::Result<()> {
    let mut chunks = transport.talk(request).await?;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if chunk.is_terminator() || buffer.is_sealed() {
            break;
        }
        buffer.append(&chunk);
    }
    Ok(())
}
