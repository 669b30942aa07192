use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use std::time::Duration;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tokio_util::io::StreamReader;

use crate::ipc::{AudioChunk, ServerStatus, TalkRequest};

/// Stream of audio chunks produced by one talk
pub type ChunkStream = BoxStream<'static, Result<AudioChunk>>;

/// Operations offered by a remote talk server
#[async_trait]
pub trait TalkTransport: Send + Sync {
    /// Host label, server-side default parameters and casts
    async fn status(&self) -> Result<ServerStatus>;

    async fn ready(&self) -> Result<bool>;

    /// Starts synthesis and streams the produced audio back
    async fn talk(&self, request: &TalkRequest) -> Result<ChunkStream>;

    /// Asks the server to cancel the running synthesis
    async fn stop(&self) -> Result<bool>;
}

/// HTTP transport for the RemoteTalk server protocol
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(address: &str, port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: format!("http://{}:{}", address, port),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.url(path)))?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl TalkTransport for HttpTransport {
    async fn status(&self) -> Result<ServerStatus> {
        let body = self.get_text("/params").await?;
        let status: ServerStatus =
            serde_json::from_str(&body).context("Invalid /params response")?;
        Ok(status)
    }

    async fn ready(&self) -> Result<bool> {
        Ok(self.get_text("/ready").await?.trim() == "1")
    }

    async fn talk(&self, request: &TalkRequest) -> Result<ChunkStream> {
        let response = self
            .client
            .get(self.url("/talk"))
            .query(&request.query_pairs())
            .send()
            .await
            .context("Failed to send talk request")?
            .error_for_status()?;

        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other);
        let frames = FramedRead::new(StreamReader::new(body), LengthDelimitedCodec::new());

        let chunks = frames
            .map(|frame| {
                let frame = frame.map_err(|e| anyhow!("Failed to receive audio frame: {}", e))?;
                AudioChunk::decode(&frame)
            })
            .take_while(|chunk| {
                let more = !matches!(chunk, Ok(c) if c.is_terminator());
                futures_util::future::ready(more)
            });

        Ok(chunks.boxed())
    }

    async fn stop(&self) -> Result<bool> {
        Ok(self.get_text("/stop").await?.trim() == "ok")
    }
}
