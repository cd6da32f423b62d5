//! Model service transports.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use crate::config::ServicesConfig;
use crate::error::{Error, Result};
use crate::types::ReplyRequest;

use super::sse::{extract_fragment, SseDecoder, SseEvent};

/// Text fragments extracted from a streamed reply, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The model service, reachable atomically or as a stream.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Complete reply in one request.
    async fn generate(&self, request: &ReplyRequest) -> Result<String>;

    /// Open a streamed reply. The stream ends when the upstream closes it;
    /// dropping it cancels the request.
    async fn generate_stream(&self, request: &ReplyRequest) -> Result<FragmentStream>;
}

#[derive(Debug, Deserialize)]
struct AtomicResponse {
    #[serde(default)]
    text: Option<String>,
}

/// HTTP client for the atomic and SSE reply endpoints.
pub struct HttpModelService {
    http_client: reqwest::Client,
    stream_client: reqwest::Client,
    url: String,
    stream_url: String,
}

impl HttpModelService {
    pub fn new(config: &ServicesConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;
        // Streams are bounded by the reply policy, not a whole-request timeout.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            stream_client,
            url: config.model_url.clone(),
            stream_url: config.model_stream_url.clone(),
        })
    }
}

#[async_trait]
impl ModelService for HttpModelService {
    async fn generate(&self, request: &ReplyRequest) -> Result<String> {
        let response = self
            .http_client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::ModelService(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::ModelService(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::ModelService(format!(
                "model service error ({}): {}",
                status,
                upstream_error_message(&body)
            )));
        }

        let parsed: AtomicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::ModelService(format!("malformed reply: {}", e)))?;
        match parsed.text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(Error::ModelService(
                "model service returned an empty reply".to_string(),
            )),
        }
    }

    async fn generate_stream(&self, request: &ReplyRequest) -> Result<FragmentStream> {
        let response = self
            .stream_client
            .post(&self.stream_url)
            .header("accept", "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| Error::ModelService(format!("stream request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ModelService(format!(
                "stream error ({}): {}",
                status,
                upstream_error_message(&body)
            )));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(fragments(bytes))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct FragmentState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl FragmentState {
    fn queue(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Data(payload) => match extract_fragment(&payload) {
                    Ok(Some(fragment)) => self.pending.push_back(Ok(fragment)),
                    Ok(None) => {}
                    Err(e) => self.pending.push_back(Err(e)),
                },
                SseEvent::Done => {}
                SseEvent::Error(message) => {
                    self.pending.push_back(Err(Error::ModelService(message)));
                }
            }
        }
    }
}

/// Turn raw SSE bytes into text fragments. The first error ends the stream.
fn fragments(bytes: ByteStream) -> FragmentStream {
    let state = FragmentState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(&chunk);
                    state.queue(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((
                        Err(Error::ModelService(format!("stream read failed: {}", e))),
                        state,
                    ));
                }
                None => {
                    let events = state.decoder.finish();
                    state.queue(events);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Error text from an upstream error body: `error.message`, `error`, or the
/// whole body.
fn upstream_error_message(body: &str) -> String {
    let trimmed = body.trim();
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) else {
        return trimmed.to_string();
    };
    match map.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(inner)) => inner
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| trimmed.to_string()),
        _ => trimmed.to_string(),
    }
}
