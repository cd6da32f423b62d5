//! Reply acquisition: streaming first, atomic as the fallback.
//!
//! A streamed reply is abandoned when
//! - no text arrives within the first-byte timeout of the request,
//! - no new text arrives within the stall timeout once text has started,
//! - the stream fails to read or decode, or ends without any text.
//!
//! The atomic request that follows is a full replacement of the same logical
//! request; partial streamed text is never kept or concatenated.

pub mod model;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use crate::config::StreamingConfig;
use crate::error::{Error, Result};
use crate::types::ReplyRequest;
use crate::view::ChatView;

pub use model::{FragmentStream, HttpModelService, ModelService};
pub use sse::{extract_fragment, Accumulator, SseDecoder, SseEvent};

/// How a reply was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Streaming,
    Atomic,
}

/// The model's reply text and the transport that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub transport: Transport,
}

/// Transport selection and stream abort bounds.
#[derive(Debug, Clone)]
pub struct ReplyPolicy {
    pub streaming: bool,
    pub first_byte_timeout: Duration,
    pub stall_timeout: Duration,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self::from_config(&StreamingConfig::default())
    }
}

impl ReplyPolicy {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            streaming: config.enabled,
            first_byte_timeout: config.first_byte_timeout(),
            stall_timeout: config.stall_timeout(),
        }
    }

    pub fn atomic_only() -> Self {
        Self {
            streaming: false,
            ..Self::default()
        }
    }
}

/// Why a streamed reply was abandoned.
#[derive(Debug, Error)]
pub enum StreamAbort {
    #[error("no text within {0:?}")]
    FirstByteTimeout(Duration),

    #[error("stream stalled for {0:?}")]
    Stalled(Duration),

    #[error("stream ended without text")]
    Empty,

    #[error("{0}")]
    Failed(Error),
}

/// Obtains the next model message for a transcript.
pub struct ReplyAcquirer {
    service: Arc<dyn ModelService>,
    policy: ReplyPolicy,
}

impl ReplyAcquirer {
    pub fn new(service: Arc<dyn ModelService>, policy: ReplyPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> &ReplyPolicy {
        &self.policy
    }

    /// Acquire a reply, falling back to the atomic transport once if the
    /// stream aborts. Fails only when the atomic request fails.
    pub async fn acquire(
        &self,
        request: &ReplyRequest,
        view: &mut dyn ChatView,
    ) -> Result<Reply> {
        if self.policy.streaming {
            match self.stream_reply(request, view).await {
                Ok(text) => {
                    return Ok(Reply {
                        text,
                        transport: Transport::Streaming,
                    })
                }
                Err(abort) => {
                    tracing::warn!(reason = %abort, "Streaming reply abandoned, falling back to atomic");
                    view.stream_discarded(&abort.to_string());
                }
            }
        }

        let text = self.service.generate(request).await?;
        tracing::debug!(chars = text.chars().count(), "Atomic reply received");
        Ok(Reply {
            text,
            transport: Transport::Atomic,
        })
    }

    async fn stream_reply(
        &self,
        request: &ReplyRequest,
        view: &mut dyn ChatView,
    ) -> std::result::Result<String, StreamAbort> {
        let first_byte_deadline = Instant::now() + self.policy.first_byte_timeout;

        let opened = timeout_at(first_byte_deadline, self.service.generate_stream(request)).await;
        let mut stream = match opened {
            Err(_) => return Err(StreamAbort::FirstByteTimeout(self.policy.first_byte_timeout)),
            Ok(Err(e)) => return Err(StreamAbort::Failed(e)),
            Ok(Ok(stream)) => stream,
        };
        view.stream_started();

        let mut accumulator = Accumulator::new();
        let mut last_progress = Instant::now();
        loop {
            let deadline = if accumulator.is_empty() {
                first_byte_deadline
            } else {
                last_progress + self.policy.stall_timeout
            };

            match timeout_at(deadline, stream.next()).await {
                Err(_) if accumulator.is_empty() => {
                    return Err(StreamAbort::FirstByteTimeout(self.policy.first_byte_timeout))
                }
                Err(_) => return Err(StreamAbort::Stalled(self.policy.stall_timeout)),
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(StreamAbort::Failed(e)),
                Ok(Some(Ok(fragment))) => {
                    if accumulator.apply(&fragment) {
                        last_progress = Instant::now();
                        view.stream_progress(accumulator.text());
                    }
                }
            }
        }

        if accumulator.is_empty() {
            return Err(StreamAbort::Empty);
        }
        tracing::debug!(
            chars = accumulator.text().chars().count(),
            "Streaming reply complete"
        );
        Ok(accumulator.into_text())
    }
}
