//! Server-sent event framing for the streaming transport.

use actix_web::web::Bytes;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;

use super::pipeline::GeneratedCarnet;
use super::progress::{Phase, PipelineEvent, ProgressSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Start { total_users: usize },
    Progress { progress: u8, phase: Phase },
    Completed { pdf_url: String, pdf_path: String },
    Error { message: String },
}

impl SseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SseEvent::Start { .. } => "start",
            SseEvent::Progress { .. } => "progress",
            SseEvent::Completed { .. } => "completed",
            SseEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SseEvent::Completed { .. } | SseEvent::Error { .. })
    }

    fn data(&self) -> serde_json::Value {
        match self {
            SseEvent::Start { total_users } => json!({ "total_users": total_users }),
            SseEvent::Progress { progress, phase } => {
                json!({ "progress": progress, "phase": phase })
            }
            SseEvent::Completed { pdf_url, pdf_path } => {
                json!({ "pdf_url": pdf_url, "pdf_path": pdf_path })
            }
            SseEvent::Error { message } => json!({ "message": message }),
        }
    }

    /// `event: <name>\ndata: <json>\n\n`
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.name(), self.data()))
    }
}

impl From<PipelineEvent> for SseEvent {
    fn from(event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::Started { total_users } => SseEvent::Start { total_users },
            PipelineEvent::Progress { progress, phase } => SseEvent::Progress { progress, phase },
        }
    }
}

impl From<&GeneratedCarnet> for SseEvent {
    fn from(carnet: &GeneratedCarnet) -> Self {
        SseEvent::Completed {
            pdf_url: carnet.pdf_url.clone(),
            pdf_path: carnet.pdf_path.clone(),
        }
    }
}

/// Forwards pipeline events to the response body.
///
/// Sending after the client went away is a no-op; the pipeline keeps running.
pub struct ChannelSink {
    tx: UnboundedSender<SseEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<SseEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: SseEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, event: PipelineEvent) {
        if !self.send(event.into()) {
            log::debug!("SSE client disconnected, dropping progress event");
        }
    }
}
