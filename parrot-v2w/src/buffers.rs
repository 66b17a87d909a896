//! Reusable sample and payload buffers
//!
//! A conversion moves thousands of small frames and packets. Their backing
//! `Vec`s are taken from a pool and handed back once written, so steady-state
//! processing does not allocate.

use crate::resources::{ResourceGuard, ResourceKind, ResourceLedger};
use std::collections::VecDeque;

/// Buffers kept per pool when no limit is given
pub const DEFAULT_POOL_SIZE: usize = 16;

/// A pool of reusable `Vec<T>` buffers
#[derive(Debug)]
pub struct BufferPool<T> {
    /// Cleared buffers ready for reuse
    available: VecDeque<Vec<T>>,
    /// Maximum number of buffers to keep
    max_size: usize,
    /// Buffers allocated by this pool (statistics)
    total_allocated: usize,
}

impl<T> BufferPool<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            available: VecDeque::with_capacity(max_size),
            max_size,
            total_allocated: 0,
        }
    }

    /// Take an empty buffer with at least `capacity` reserved
    pub fn acquire(&mut self, capacity: usize) -> Vec<T> {
        match self.available.pop_front() {
            Some(mut buffer) => {
                buffer.reserve(capacity);
                buffer
            }
            None => {
                self.total_allocated += 1;
                Vec::with_capacity(capacity)
            }
        }
    }

    /// Return a buffer; it is dropped if the pool is full
    pub fn release(&mut self, mut buffer: Vec<T>) {
        if self.available.len() < self.max_size {
            buffer.clear();
            self.available.push_back(buffer);
        }
    }

    /// Buffers ready for reuse
    pub fn available(&self) -> usize {
        self.available.len()
    }

    /// Buffers allocated over the pool's lifetime
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }

    /// Drop all pooled buffers
    pub fn clear(&mut self) {
        self.available.clear();
    }
}

/// The frame and packet pools owned by one pipeline
///
/// Field order matters: packet buffers are acquired last and released first.
#[derive(Debug)]
pub struct PipelineBuffers {
    pub packets: BufferPool<u8>,
    _packet_guard: ResourceGuard,
    pub frames: BufferPool<i16>,
    _frame_guard: ResourceGuard,
}

impl PipelineBuffers {
    pub fn new(ledger: &ResourceLedger, max_size: usize) -> Self {
        let frame_guard = ledger.acquire(ResourceKind::FrameBuffers);
        let packet_guard = ledger.acquire(ResourceKind::PacketBuffers);
        Self {
            packets: BufferPool::new(max_size),
            _packet_guard: packet_guard,
            frames: BufferPool::new(max_size),
            _frame_guard: frame_guard,
        }
    }
}
