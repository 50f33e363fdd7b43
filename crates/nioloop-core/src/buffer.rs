//! Pooled buffer management.
//!
//! A `BufferProvider` hands out `PooledBuf`s. A buffer has exactly one
//! owner at any time; handing it to another thread moves it, so the
//! single-writer rule is enforced by the type system rather than by a
//! reference count. The buffer goes home to its pool when it is released
//! or dropped, whichever comes first, and only once.
//!
//! # Layout
//!
//! ```text
//!  0          read_pos        write_pos        limit       capacity
//!  |  consumed  |   readable    |   writable     |  unused   |
//! ```
//!
//! # Implementors of `BufferProvider`
//!
//! - `SizeClassPool` (default): power-of-two size classes with bounded
//!   free lists; oversize requests fall back to plain heap allocations
//!   that are still counted as outstanding.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::error::Result;

/// Takes back the storage of a released buffer.
pub trait Recycle: Send + Sync {
    fn recycle(&self, storage: Vec<u8>);
}

/// An exclusively owned, explicitly released byte buffer.
pub struct PooledBuf {
    storage: Vec<u8>,
    limit: usize,
    read_pos: usize,
    write_pos: usize,
    home: Option<Arc<dyn Recycle>>,
}

impl PooledBuf {
    /// Wrap `storage` as a buffer with `limit` writable bytes.
    ///
    /// Fresh storage is zero-extended to its full capacity once so later
    /// reads can hand out `&mut [u8]` without re-initializing. Recycled
    /// storage already has full length and is taken as is.
    pub fn from_storage(mut storage: Vec<u8>, limit: usize, home: Option<Arc<dyn Recycle>>) -> Self {
        let cap = storage.capacity().max(limit);
        storage.resize(cap, 0);
        Self {
            storage,
            limit,
            read_pos: 0,
            write_pos: 0,
            home,
        }
    }

    /// A buffer that belongs to no pool.
    pub fn unpooled(capacity: usize) -> Self {
        Self::from_storage(Vec::with_capacity(capacity), capacity, None)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes written but not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes that can still be written before `limit`.
    #[inline]
    pub fn writable(&self) -> usize {
        self.limit - self.write_pos
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.write_pos == self.limit
    }

    /// Readable view.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.read_pos..self.write_pos]
    }

    /// Bytes already stepped over with `advance`.
    #[inline]
    pub fn consumed(&self) -> &[u8] {
        &self.storage[..self.read_pos]
    }

    /// Writable region; follow with `commit(n)`.
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.write_pos..self.limit]
    }

    /// Mark `n` bytes of the writable region as filled.
    #[inline]
    pub fn commit(&mut self, n: usize) {
        assert!(n <= self.writable(), "commit past limit");
        self.write_pos += n;
    }

    /// Copy as much of `src` as fits; returns bytes copied.
    pub fn put_slice(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.writable());
        self.storage[self.write_pos..self.write_pos + n].copy_from_slice(&src[..n]);
        self.write_pos += n;
        n
    }

    /// Consume `n` readable bytes.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advance past write position");
        self.read_pos += n;
    }

    /// Reset positions for reuse; keeps storage and limit.
    #[inline]
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Return the buffer to its pool now.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            home.recycle(std::mem::take(&mut self.storage));
        }
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl io::Write for PooledBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() && self.is_full() {
            return Err(io::ErrorKind::WriteZero.into());
        }
        Ok(self.put_slice(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuf")
            .field("capacity", &self.capacity())
            .field("limit", &self.limit)
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .field("pooled", &self.home.is_some())
            .finish()
    }
}

/// Hands out buffers and tracks how many are outstanding.
///
/// **Contract:**
/// - `acquire(n)` returns a buffer whose `limit()` is exactly `n`.
/// - `in_use()` drops back to its baseline once every acquired buffer
///   has been released or dropped.
pub trait BufferProvider: Send + Sync {
    fn acquire(&self, min_size: usize) -> Result<PooledBuf>;

    /// Buffers acquired and not yet returned.
    fn in_use(&self) -> usize;

    /// Buffers parked in free lists.
    fn pool_size(&self) -> usize;
}
