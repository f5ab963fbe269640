//! Bounded packet queue between the demuxer and one decode worker
//!
//! One mutex guards the FIFO together with its counters, so `put`, `get` and
//! `flush` are linearizable. Consumers block on a condition variable that is
//! also signalled at shutdown.

use crate::error::{PlayerError, Result};
use crate::pipeline::types::{MediaKind, Packet};
use crate::utils::{SignalOfStop, lock};
use log::trace;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

/// Entry stored in the queue
#[derive(Debug, Clone)]
pub enum QueueEntry {
    Media(Packet),
    /// Marks a seek discontinuity; decoders reset their state on it
    Flush,
}

/// Result of a [`PacketQueue::get`]
#[derive(Debug)]
pub enum Dequeue {
    Packet(Packet),
    Flush,
    /// Only returned by non-blocking gets
    Empty,
    /// The session is shutting down
    Quit,
}

#[derive(Default)]
struct QueueInner {
    entries: VecDeque<QueueEntry>,
    /// Payload bytes of the media packets currently queued
    size: usize,
}

pub struct PacketQueue {
    kind: MediaKind,
    inner: Mutex<QueueInner>,
    cond: Condvar,
    sos: SignalOfStop,
}

impl PacketQueue {
    pub fn new(kind: MediaKind, sos: SignalOfStop) -> Self {
        Self {
            kind,
            inner: Mutex::new(QueueInner::default()),
            cond: Condvar::new(),
            sos,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Append a media packet and wake one consumer
    pub fn put(&self, packet: Packet) -> Result<()> {
        let size = packet.size();
        self.push(QueueEntry::Media(packet), size)
    }

    /// Append the flush sentinel; it carries no payload and is never size-accounted
    pub fn put_flush(&self) -> Result<()> {
        self.push(QueueEntry::Flush, 0)
    }

    fn push(&self, entry: QueueEntry, size: usize) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner
            .entries
            .try_reserve(1)
            .map_err(|_| PlayerError::ResourceExhausted("queueing a packet"))?;
        inner.entries.push_back(entry);
        inner.size += size;
        self.cond.notify_one();
        Ok(())
    }

    /// Remove the head entry.
    ///
    /// With `block` set, waits until an entry arrives or the quit flag is
    /// raised; `Empty` is only returned by non-blocking calls.
    pub fn get(&self, block: bool) -> Dequeue {
        let mut inner = lock(&self.inner);
        loop {
            if self.sos.cancelled() {
                return Dequeue::Quit;
            }

            match inner.entries.pop_front() {
                Some(QueueEntry::Media(packet)) => {
                    inner.size -= packet.size();
                    return Dequeue::Packet(packet);
                }
                Some(QueueEntry::Flush) => return Dequeue::Flush,
                None if !block => return Dequeue::Empty,
                None => {
                    inner = self
                        .cond
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Release every buffered entry and zero the counters
    pub fn flush(&self) {
        let mut inner = lock(&self.inner);
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.size = 0;
        trace!("{} queue: flushed {} entries", self.kind, dropped);
    }

    /// Number of queued entries, sentinels included
    pub fn count(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Queued payload bytes
    pub fn size(&self) -> usize {
        lock(&self.inner).size
    }

    /// Wake every waiting consumer so it can observe the quit flag
    pub fn wake(&self) {
        let _inner = lock(&self.inner);
        self.cond.notify_all();
    }
}

impl std::fmt::Debug for PacketQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("PacketQueue")
            .field("kind", &self.kind)
            .field("count", &inner.entries.len())
            .field("size", &inner.size)
            .finish()
    }
}
