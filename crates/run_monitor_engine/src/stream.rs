use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use monitor_logging::{monitor_debug, monitor_warn};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use run_monitor_core::{parse_event, EventKind, EventParseError, ProgressEvent, RunId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::settings::EngineSettings;
use crate::sse::SseDecoder;
use crate::types::StreamError;

/// One item delivered by an [`EventStream`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Event(ProgressEvent),
    /// A known event whose payload failed validation.
    Invalid {
        kind: EventKind,
        timestamp: Option<DateTime<Utc>>,
        reason: String,
    },
    /// The stream failed. Nothing follows this item.
    ConnectionError(StreamError),
}

#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Subscribes to the progress events of `run_id`. Resolves once the
    /// subscription is established or refused.
    async fn open(&self, run_id: &RunId) -> Result<EventStream, StreamError>;
}

/// Receiving half of a subscription. Dropping it closes the subscription.
#[derive(Debug)]
pub struct EventStream {
    items: mpsc::Receiver<StreamItem>,
    cancel: CancellationToken,
}

/// Producing half handed to whatever pumps the subscription.
#[derive(Debug, Clone)]
pub struct StreamSender {
    items: mpsc::Sender<StreamItem>,
    cancel: CancellationToken,
}

impl EventStream {
    pub fn channel(capacity: usize) -> (StreamSender, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        (
            StreamSender {
                items: tx,
                cancel: cancel.clone(),
            },
            EventStream { items: rx, cancel },
        )
    }

    /// Next item, or `None` once the stream has ended or been closed.
    pub async fn next(&mut self) -> Option<StreamItem> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            item = self.items.recv() => item,
        }
    }

    /// Idempotent.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.items.close();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl StreamSender {
    /// Returns `false` when the consumer has closed the stream.
    pub async fn send(&self, item: StreamItem) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.items.send(item) => sent.is_ok(),
        }
    }

    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// SSE subscription at `GET /api/bots/{slug}/runs/{run_id}/events`.
#[derive(Debug, Clone)]
pub struct ReqwestEventSource {
    settings: EngineSettings,
    client: reqwest::Client,
}

impl ReqwestEventSource {
    pub fn new(settings: EngineSettings) -> Result<Self, StreamError> {
        // No overall timeout: the body stays open for the whole run.
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| StreamError::Transport(err.to_string()))?;
        Ok(Self { settings, client })
    }
}

#[async_trait::async_trait]
impl EventSource for ReqwestEventSource {
    async fn open(&self, run_id: &RunId) -> Result<EventStream, StreamError> {
        let url = self
            .settings
            .bot_endpoint(&["runs", run_id.as_str(), "events"])
            .map_err(|err| StreamError::InvalidUrl(err.to_string()))?;
        monitor_debug!("subscribing to {}", url);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|err| StreamError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::HttpStatus(status.as_u16()));
        }

        let (sender, stream) = EventStream::channel(self.settings.stream_buffer);
        let run_id = run_id.clone();
        tokio::spawn(async move {
            pump(response, sender, run_id).await;
        });
        Ok(stream)
    }
}

enum Flow {
    Continue,
    Stop,
}

async fn pump(response: reqwest::Response, sender: StreamSender, run_id: RunId) {
    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            _ = sender.closed() => {
                monitor_debug!("event stream for run {} closed by consumer", run_id);
                return;
            }
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                let messages = match decoder.feed(&bytes) {
                    Ok(messages) => messages,
                    Err(err) => {
                        fail(&sender, &run_id, err).await;
                        return;
                    }
                };
                for data in messages {
                    if let Flow::Stop = forward(&sender, &run_id, &data).await {
                        return;
                    }
                }
            }
            Some(Err(err)) => {
                fail(&sender, &run_id, StreamError::Transport(err.to_string())).await;
                return;
            }
            None => {
                if let Some(data) = decoder.finish() {
                    if let Flow::Stop = forward(&sender, &run_id, &data).await {
                        return;
                    }
                }
                fail(&sender, &run_id, StreamError::Ended).await;
                return;
            }
        }
    }
}

/// Parses one message and hands it on. Stops after a terminal event, a
/// malformed frame, or when the consumer is gone.
async fn forward(sender: &StreamSender, run_id: &RunId, data: &str) -> Flow {
    let item = match parse_event(data) {
        Ok(event) => event,
        Err(EventParseError::Invalid {
            kind,
            timestamp,
            reason,
        }) => {
            let sent = sender
                .send(StreamItem::Invalid {
                    kind,
                    timestamp,
                    reason,
                })
                .await;
            return if sent { Flow::Continue } else { Flow::Stop };
        }
        Err(EventParseError::Malformed(reason)) => {
            fail(sender, run_id, StreamError::Malformed(reason)).await;
            return Flow::Stop;
        }
    };

    let terminal = matches!(item.kind, EventKind::RunFinished | EventKind::RunError);
    if !sender.send(StreamItem::Event(item)).await || terminal {
        return Flow::Stop;
    }
    Flow::Continue
}

async fn fail(sender: &StreamSender, run_id: &RunId, err: StreamError) {
    if sender.is_closed() {
        return;
    }
    monitor_warn!("event stream for run {} failed: {}", run_id, err);
    sender.send(StreamItem::ConnectionError(err)).await;
}
