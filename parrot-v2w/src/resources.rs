//! Resource accounting for conversions
//!
//! Every resource a pipeline acquires holds a [`ResourceGuard`]. Dropping the
//! guard records the release, so the ledger can tell whether a conversion
//! released everything it took, and (with a journal) in which order.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Kinds of per-conversion resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    SourceFormat,
    DecoderContext,
    SinkContext,
    SinkIo,
    EncoderContext,
    Resampler,
    FrameBuffers,
    PacketBuffers,
}

impl ResourceKind {
    /// All kinds, in pipeline acquisition order
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::SourceFormat,
        ResourceKind::DecoderContext,
        ResourceKind::SinkContext,
        ResourceKind::SinkIo,
        ResourceKind::EncoderContext,
        ResourceKind::Resampler,
        ResourceKind::FrameBuffers,
        ResourceKind::PacketBuffers,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::SourceFormat => "source format",
            ResourceKind::DecoderContext => "decoder context",
            ResourceKind::SinkContext => "sink context",
            ResourceKind::SinkIo => "sink I/O",
            ResourceKind::EncoderContext => "encoder context",
            ResourceKind::Resampler => "resampler",
            ResourceKind::FrameBuffers => "frame buffers",
            ResourceKind::PacketBuffers => "packet buffers",
        };
        f.write_str(name)
    }
}

/// One journal record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEntry {
    Acquired(ResourceKind),
    Released(ResourceKind),
}

struct LedgerInner {
    acquired: [AtomicUsize; 8],
    released: [AtomicUsize; 8],
    journal: Option<Mutex<Vec<LedgerEntry>>>,
}

/// Shared acquisition/release counters
#[derive(Clone)]
pub struct ResourceLedger {
    inner: Arc<LedgerInner>,
}

impl ResourceLedger {
    /// Counters only
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Counters plus an ordered journal of every acquire/release
    pub fn with_journal() -> Self {
        Self::build(Some(Mutex::new(Vec::new())))
    }

    fn build(journal: Option<Mutex<Vec<LedgerEntry>>>) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                acquired: std::array::from_fn(|_| AtomicUsize::new(0)),
                released: std::array::from_fn(|_| AtomicUsize::new(0)),
                journal,
            }),
        }
    }

    /// Record an acquisition; the returned guard records the release
    pub fn acquire(&self, kind: ResourceKind) -> ResourceGuard {
        self.inner.acquired[kind.index()].fetch_add(1, Ordering::SeqCst);
        self.record(LedgerEntry::Acquired(kind));
        trace!(resource = %kind, "Resource acquired");
        ResourceGuard {
            kind,
            ledger: self.clone(),
        }
    }

    fn release(&self, kind: ResourceKind) {
        self.inner.released[kind.index()].fetch_add(1, Ordering::SeqCst);
        self.record(LedgerEntry::Released(kind));
        trace!(resource = %kind, "Resource released");
    }

    fn record(&self, entry: LedgerEntry) {
        if let Some(journal) = &self.inner.journal {
            journal
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(entry);
        }
    }

    /// Acquisitions of `kind` so far
    pub fn acquired(&self, kind: ResourceKind) -> usize {
        self.inner.acquired[kind.index()].load(Ordering::SeqCst)
    }

    /// Releases of `kind` so far
    pub fn released(&self, kind: ResourceKind) -> usize {
        self.inner.released[kind.index()].load(Ordering::SeqCst)
    }

    /// Resources acquired and not yet released, over all kinds
    pub fn outstanding(&self) -> usize {
        ResourceKind::ALL
            .iter()
            .map(|k| self.acquired(*k) - self.released(*k))
            .sum()
    }

    /// True when every acquisition has exactly one release
    pub fn is_balanced(&self) -> bool {
        self.outstanding() == 0
    }

    /// Snapshot of the journal (empty when the ledger has none)
    pub fn journal(&self) -> Vec<LedgerEntry> {
        match &self.inner.journal {
            Some(journal) => journal
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            None => Vec::new(),
        }
    }
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLedger")
            .field("outstanding", &self.outstanding())
            .field("journal", &self.inner.journal.is_some())
            .finish()
    }
}

/// Releases its resource in the ledger when dropped
#[derive(Debug)]
pub struct ResourceGuard {
    kind: ResourceKind,
    ledger: ResourceLedger,
}

impl ResourceGuard {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.ledger.release(self.kind);
    }
}
