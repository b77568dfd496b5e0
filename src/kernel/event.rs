use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::error::IngestError;
use super::time::Tick;

/// Which side of the session produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OriginTag {
    User,
    Assistant,
    System,
    Tool,
}

/// Whether a message may be coalesced with its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MessageKind {
    /// Streamed fragment of a larger piece of content. Mergeable.
    #[default]
    Chunk,
    /// Standalone event (tool call, status change). Never merged.
    Control,
}

/// One decoded event from the transport. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub origin: OriginTag,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: Instant,
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    pub fn new(id: impl Into<String>, origin: OriginTag, content: impl Into<String>, timestamp: Instant) -> Self {
        Self {
            id: id.into(),
            origin,
            kind: MessageKind::Chunk,
            content: content.into(),
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    pub fn control(id: impl Into<String>, origin: OriginTag, content: impl Into<String>, timestamp: Instant) -> Self {
        Self {
            kind: MessageKind::Control,
            ..Self::new(id, origin, content, timestamp)
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Ingestion-boundary check. Anything that passes is safe to buffer.
    pub fn validate(&self, max_content_bytes: usize) -> Result<(), IngestError> {
        if self.id.trim().is_empty() {
            return Err(IngestError::EmptyId);
        }
        if self.content.len() > max_content_bytes {
            return Err(IngestError::ContentTooLarge {
                id: self.id.clone(),
                len: self.content.len(),
                limit: max_content_bytes,
            });
        }
        Ok(())
    }

    pub fn is_mergeable(&self) -> bool {
        self.kind == MessageKind::Chunk
    }
}

/// One Batcher emission. Never empty.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Emission sequence number, starting at 1 per batcher.
    pub seq: u64,
    pub messages: Vec<Arc<Message>>,
    pub emitted_at: Instant,
    pub trigger: BatchTrigger,
    /// Inbound messages folded into this batch (before merge).
    pub source_count: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Why a batch was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchTrigger {
    Interval,
    Size,
    Flush,
}

/// Result of a single accepted `ingest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Accepted, but the oldest buffered message was overwritten to make room.
    AcceptedWithEviction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub accepted: usize,
    pub evicted: usize,
    pub rejected: Vec<IngestError>,
}

/// What one cadence step did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: Tick,
    pub budget: usize,
    pub drained: usize,
    pub batches: usize,
    pub rendered: usize,
}
