use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

use remotetalk_client::cache::{CacheStore, CachedClip};
use remotetalk_client::client::{ChunkStream, Session, TalkTransport};
use remotetalk_client::ipc::{AudioChunk, CastInfo, ServerStatus, TalkParams, TalkRequest};
use remotetalk_client::synthesis::{PlaybackFeeder, PlaybackSink, TalkController, TalkSettings};
use remotetalk_client::AudioFormat;

pub const FAKE_HOST: &str = "FakeTalk";

#[allow(dead_code)]
pub fn status_with_casts(names: &[&str]) -> ServerStatus {
    ServerStatus {
        host: FAKE_HOST.to_string(),
        params: TalkParams::default(),
        casts: names
            .iter()
            .enumerate()
            .map(|(id, name)| CastInfo {
                id: id as i32,
                name: name.to_string(),
                param_names: Vec::new(),
            })
            .collect(),
    }
}

/// Silent 16kHz mono chunk
pub fn chunk(samples: usize) -> AudioChunk {
    AudioChunk {
        format: AudioFormat::S16,
        frequency: 16000,
        channels: 1,
        data: vec![0; samples * 2],
    }
}

/// Sender side of one scripted talk. Dropping it (or calling `finish`)
/// ends the talk's audio stream.
pub struct TalkScript {
    tx: mpsc::UnboundedSender<AudioChunk>,
}

#[allow(dead_code)]
impl TalkScript {
    pub fn send_samples(&self, samples: usize) {
        let _ = self.tx.send(chunk(samples));
    }

    pub fn finish(self) {}
}

/// In-memory talk server.
///
/// `status = None` behaves like a server that cannot be reached. Talks without
/// a queued script stream 256 samples and finish immediately.
pub struct FakeTransport {
    status: Option<ServerStatus>,
    talk_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    requests: Mutex<Vec<TalkRequest>>,
    scripts: Mutex<VecDeque<mpsc::UnboundedReceiver<AudioChunk>>>,
    stop_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

#[allow(dead_code)]
impl FakeTransport {
    pub fn new(status: Option<ServerStatus>) -> Arc<Self> {
        Arc::new(Self {
            status,
            talk_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            scripts: Mutex::new(VecDeque::new()),
            stop_gate: Mutex::new(None),
        })
    }

    /// Queues the audio of the next talk, to be delivered by the test
    pub fn script_talk(&self) -> TalkScript {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().push_back(rx);
        TalkScript { tx }
    }

    /// Holds the next stop request until the returned sender fires
    pub fn gate_stop(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.stop_gate.lock() = Some(rx);
        tx
    }

    pub fn talk_calls(&self) -> usize {
        self.talk_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TalkRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TalkTransport for FakeTransport {
    async fn status(&self) -> Result<ServerStatus> {
        self.status
            .clone()
            .ok_or_else(|| anyhow!("connection refused"))
    }

    async fn ready(&self) -> Result<bool> {
        Ok(self.status.is_some())
    }

    async fn talk(&self, request: &TalkRequest) -> Result<ChunkStream> {
        self.talk_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let script = self.scripts.lock().pop_front();
        match script {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (Ok(chunk), rx))
            })
            .boxed()),
            None => Ok(stream::iter(vec![Ok(chunk(256))]).boxed()),
        }
    }

    async fn stop(&self) -> Result<bool> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.stop_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(true)
    }
}

/// Player that records what it was asked to play
#[derive(Default)]
pub struct RecordingSink {
    pub fed_lengths: Vec<usize>,
    pub feeders: Vec<PlaybackFeeder>,
    pub clips: Vec<PathBuf>,
    pub stops: usize,
    /// Report playback as running until `finish_playback`
    pub hold: bool,
    playing: bool,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn holding() -> Self {
        Self {
            hold: true,
            ..Default::default()
        }
    }

    pub fn finish_playback(&mut self) {
        self.playing = false;
    }
}

impl PlaybackSink for RecordingSink {
    fn feed(&mut self, feeder: PlaybackFeeder) -> Result<()> {
        self.fed_lengths.push(feeder.buffer().sample_length());
        self.feeders.push(feeder);
        self.playing = self.hold;
        Ok(())
    }

    fn play_clip(&mut self, clip: &CachedClip) -> Result<()> {
        self.clips.push(clip.path.clone());
        self.playing = self.hold;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn stop(&mut self) {
        self.stops += 1;
        self.playing = false;
    }
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

#[allow(dead_code)]
pub fn controller<C: CacheStore>(
    runtime: &tokio::runtime::Runtime,
    transport: &Arc<FakeTransport>,
    cache: C,
    sink: RecordingSink,
    settings: TalkSettings,
) -> TalkController<C, RecordingSink> {
    let session = Session::with_transport(
        runtime.handle().clone(),
        "127.0.0.1",
        8081,
        transport.clone(),
    );
    TalkController::new(session, cache, sink, settings)
}

/// Ticks until `done` holds; false after five seconds
pub fn tick_until<C, F>(controller: &mut TalkController<C, RecordingSink>, mut done: F) -> bool
where
    C: CacheStore,
    F: FnMut(&TalkController<C, RecordingSink>) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        controller.tick();
        if done(controller) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Ticks a few times without expecting progress
#[allow(dead_code)]
pub fn settle<C: CacheStore>(controller: &mut TalkController<C, RecordingSink>) {
    for _ in 0..10 {
        controller.tick();
        std::thread::sleep(Duration::from_millis(5));
    }
}
