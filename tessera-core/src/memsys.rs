//! Shared pool of fixed-size I/O buffers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DEFAULT_BUF_SIZE: usize = 128 * 1024;
pub const DEFAULT_MAX_FREE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemsysConfig {
    #[serde(default = "default_buf_size")]
    pub buf_size: usize,
    #[serde(default = "default_max_free")]
    pub max_free: usize,
}

fn default_buf_size() -> usize {
    DEFAULT_BUF_SIZE
}

fn default_max_free() -> usize {
    DEFAULT_MAX_FREE
}

impl Default for MemsysConfig {
    fn default() -> Self {
        Self {
            buf_size: DEFAULT_BUF_SIZE,
            max_free: DEFAULT_MAX_FREE,
        }
    }
}

pub struct BufferPool {
    buf_size: usize,
    max_free: usize,
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
}

impl BufferPool {
    pub fn new(config: MemsysConfig) -> Arc<Self> {
        Arc::new(Self {
            buf_size: config.buf_size.max(1),
            max_free: config.max_free,
            free: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
        })
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// Buffers currently handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Hands out an exclusively owned buffer; it returns to the pool when dropped.
    pub fn alloc(self: &Arc<Self>) -> PooledBuf {
        let buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buf_size]);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        PooledBuf {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buf: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        let mut free = self.free.lock();
        if free.len() < self.max_free {
            free.push(buf);
        }
    }
}

pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}
