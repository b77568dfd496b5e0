//! Bounded virtual window over the delivered-message log.
//!
//! # Relative indexing
//! Offsets are always relative to the oldest *currently retained* message.
//! When an append pushes the log past `max_retained`, the head is evicted
//! and every offset shifts: `scroll_to(0)` after an eviction addresses a
//! newer message than it did before. `oldest_retained_seq` reports the
//! absolute sequence number of offset 0 so callers can detect the shift.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

use super::config::WindowConfig;
use super::error::ConfigError;
use super::event::{Batch, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WindowMetrics {
    pub retained: usize,
    pub viewport_size: usize,
    pub offset: usize,
    pub total_appended: u64,
    pub retention_evicted: u64,
    pub oldest_retained_seq: u64,
}

#[derive(Debug)]
pub struct VirtualWindow {
    log: VecDeque<Arc<Message>>,
    viewport_size: usize,
    max_retained: usize,
    follow_tail: bool,
    offset: usize,
    base_seq: u64,
    total_appended: u64,
    retention_evicted: u64,
}

impl VirtualWindow {
    pub fn new(config: &WindowConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            log: VecDeque::with_capacity(config.max_retained.min(65_536)),
            viewport_size: config.viewport_size,
            max_retained: config.max_retained,
            follow_tail: config.follow_tail,
            offset: 0,
            base_seq: 0,
            total_appended: 0,
            retention_evicted: 0,
        })
    }

    /// Replace the whole log, keeping the newest `max_retained` entries.
    pub fn update_messages(&mut self, full: Vec<Arc<Message>>) {
        let excess = full.len().saturating_sub(self.max_retained);
        self.retention_evicted += excess as u64;
        self.base_seq = excess as u64;
        self.total_appended = full.len() as u64;
        self.log = full.into_iter().skip(excess).collect();
        self.reposition();
    }

    /// Append to the tail, evicting from the head past the retention cap.
    /// Returns how many messages were evicted.
    pub fn append_messages(&mut self, msgs: &[Arc<Message>]) -> usize {
        self.log.extend(msgs.iter().cloned());
        self.total_appended += msgs.len() as u64;

        let excess = self.log.len().saturating_sub(self.max_retained);
        if excess > 0 {
            self.log.drain(..excess);
            self.base_seq += excess as u64;
            self.retention_evicted += excess as u64;
        }
        self.reposition();
        excess
    }

    pub fn append_batch(&mut self, batch: &Batch) -> usize {
        self.append_messages(&batch.messages)
    }

    fn reposition(&mut self) {
        self.offset = if self.follow_tail {
            self.max_offset()
        } else {
            self.offset.min(self.max_offset())
        };
    }

    /// Clamp `offset` into `[0, max(0, total - viewport)]` and move there.
    /// Returns the clamped offset.
    pub fn scroll_to(&mut self, offset: i64) -> usize {
        self.offset = clamp_offset(offset, self.log.len(), self.viewport_size);
        self.offset
    }

    pub fn scroll_to_bottom(&mut self) -> usize {
        self.offset = self.max_offset();
        self.offset
    }

    pub fn is_at_bottom(&self) -> bool {
        self.offset == self.max_offset()
    }

    pub fn set_follow_tail(&mut self, follow: bool) {
        self.follow_tail = follow;
        self.reposition();
    }

    /// `min(viewport, total - offset)` contiguous messages starting at the
    /// current offset.
    pub fn visible_slice(&self) -> Vec<Arc<Message>> {
        self.copy_range(self.offset, self.viewport_size)
    }

    /// Ad hoc query: clamps like `scroll_to` but with `size` as the viewport,
    /// and leaves the window position untouched.
    pub fn slice(&self, offset: i64, size: usize) -> Vec<Arc<Message>> {
        let start = clamp_offset(offset, self.log.len(), size);
        self.copy_range(start, size)
    }

    fn copy_range(&self, start: usize, size: usize) -> Vec<Arc<Message>> {
        self.log.iter().skip(start).take(size).cloned().collect()
    }

    pub fn max_offset(&self) -> usize {
        self.log.len().saturating_sub(self.viewport_size)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn viewport_size(&self) -> usize {
        self.viewport_size
    }

    pub fn oldest_retained_seq(&self) -> u64 {
        self.base_seq
    }

    pub fn retention_evicted(&self) -> u64 {
        self.retention_evicted
    }

    pub fn metrics(&self) -> WindowMetrics {
        WindowMetrics {
            retained: self.log.len(),
            viewport_size: self.viewport_size,
            offset: self.offset,
            total_appended: self.total_appended,
            retention_evicted: self.retention_evicted,
            oldest_retained_seq: self.base_seq,
        }
    }
}

fn clamp_offset(offset: i64, total: usize, viewport: usize) -> usize {
    let max = total.saturating_sub(viewport);
    if offset <= 0 {
        0
    } else {
        (offset as u64).min(max as u64) as usize
    }
}

/// Read side for presentation code. Every call copies what it returns under
/// a short lock, so callers never hold a reference into the live log.
#[derive(Debug, Clone)]
pub struct WindowHandle {
    inner: Arc<RwLock<VirtualWindow>>,
}

impl WindowHandle {
    pub fn new(window: VirtualWindow) -> Self {
        Self { inner: Arc::new(RwLock::new(window)) }
    }

    pub fn visible_slice(&self, offset: i64, size: usize) -> Vec<Arc<Message>> {
        self.inner.read().slice(offset, size)
    }

    pub fn current_slice(&self) -> Vec<Arc<Message>> {
        self.inner.read().visible_slice()
    }

    pub fn scroll_to(&self, offset: i64) -> usize {
        self.inner.write().scroll_to(offset)
    }

    pub fn scroll_to_bottom(&self) -> usize {
        self.inner.write().scroll_to_bottom()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn metrics(&self) -> WindowMetrics {
        self.inner.read().metrics()
    }

    /// Mutable access for the consumer context. Keep the guard short.
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, VirtualWindow> {
        self.inner.write()
    }
}
