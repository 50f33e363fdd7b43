//! `SizeClassPool`: default `BufferProvider` implementation.
//!
//! Buffers are grouped in power-of-two size classes from `MIN_CLASS` up
//! to a configurable maximum. Released storage goes back on its class's
//! free list (capped per class); larger requests are plain heap
//! allocations that are counted while outstanding and freed on release.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use nioloop_core::buffer::{BufferProvider, PooledBuf, Recycle};
use nioloop_core::error::Result;

/// Smallest size class.
pub const MIN_CLASS: usize = 64;

/// Default largest pooled class.
pub const DEFAULT_MAX_CLASS: usize = 1024 * 1024;

/// Default free-list length per class.
pub const DEFAULT_PER_CLASS: usize = 256;

struct Classes {
    /// `free[i]` holds storage of capacity `MIN_CLASS << i`.
    free: Vec<Mutex<Vec<Vec<u8>>>>,
    max_class: usize,
    per_class: usize,
    /// Buffers handed out and not yet returned.
    in_use: AtomicUsize,
    /// Total fresh allocations (diagnostics).
    allocated: AtomicUsize,
}

impl Classes {
    /// Free-list index for a request, or `None` if it is oversize.
    fn index_for(&self, size: usize) -> Option<usize> {
        let class = size.max(MIN_CLASS).checked_next_power_of_two()?;
        if class > self.max_class {
            return None;
        }
        Some((class / MIN_CLASS).trailing_zeros() as usize)
    }
}

impl Recycle for Classes {
    /// Storage goes back at full length; the next `acquire` reuses it
    /// without touching its bytes.
    fn recycle(&self, storage: Vec<u8>) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        let cap = storage.capacity();
        // Only exact class capacities go back; anything else is oversize.
        if !cap.is_power_of_two() {
            return;
        }
        if let Some(i) = self.index_for(cap) {
            if MIN_CLASS << i == cap {
                let mut list = self.free[i].lock();
                if list.len() < self.per_class {
                    list.push(storage);
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct SizeClassPool {
    classes: Arc<Classes>,
}

impl SizeClassPool {
    /// `max_class` is rounded up to a power of two, at least `MIN_CLASS`.
    pub fn new(max_class: usize, per_class: usize) -> Self {
        let max_class = max_class.max(MIN_CLASS).next_power_of_two();
        let n = (max_class / MIN_CLASS).trailing_zeros() as usize + 1;
        Self {
            classes: Arc::new(Classes {
                free: (0..n).map(|_| Mutex::new(Vec::new())).collect(),
                max_class,
                per_class,
                in_use: AtomicUsize::new(0),
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    pub fn max_class(&self) -> usize {
        self.classes.max_class
    }

    /// Fresh allocations since creation, pooled and oversize.
    pub fn allocated(&self) -> usize {
        self.classes.allocated.load(Ordering::Relaxed)
    }
}

impl Default for SizeClassPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLASS, DEFAULT_PER_CLASS)
    }
}

impl BufferProvider for SizeClassPool {
    fn acquire(&self, min_size: usize) -> Result<PooledBuf> {
        let classes = &self.classes;
        let storage = match classes.index_for(min_size) {
            Some(i) => match classes.free[i].lock().pop() {
                Some(v) => v,
                None => {
                    classes.allocated.fetch_add(1, Ordering::Relaxed);
                    Vec::with_capacity(MIN_CLASS << i)
                }
            },
            None => {
                classes.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(min_size)
            }
        };
        classes.in_use.fetch_add(1, Ordering::Relaxed);
        let home: Arc<dyn Recycle> = classes.clone();
        Ok(PooledBuf::from_storage(storage, min_size, Some(home)))
    }

    fn in_use(&self) -> usize {
        self.classes.in_use.load(Ordering::Relaxed)
    }

    fn pool_size(&self) -> usize {
        self.classes.free.iter().map(|l| l.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_requested_size() {
        let pool = SizeClassPool::new(4096, 4);
        let buf = pool.acquire(100).unwrap();
        assert_eq!(buf.limit(), 100);
        assert!(buf.capacity() >= 128);
        assert_eq!(pool.in_use(), 1);
        drop(buf);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.pool_size(), 1);
    }

    #[test]
    fn test_reuse_same_class() {
        let pool = SizeClassPool::new(4096, 4);
        pool.acquire(200).unwrap().release();
        let _b = pool.acquire(150).unwrap();
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.pool_size(), 0);
    }

    #[test]
    fn test_recycled_storage_is_not_zeroed_again() {
        let pool = SizeClassPool::new(4096, 4);
        let mut buf = pool.acquire(100).unwrap();
        buf.put_slice(b"abc");
        buf.release();

        let mut again = pool.acquire(120).unwrap();
        assert_eq!(pool.allocated(), 1);
        assert_eq!(again.capacity(), 128);
        assert_eq!(again.remaining(), 0);
        assert_eq!(again.writable(), 120);
        // old bytes are still there: nothing re-initialized the storage
        assert_eq!(&again.spare_mut()[..3], b"abc");
    }

    #[test]
    fn test_oversize_is_counted_but_not_pooled() {
        let pool = SizeClassPool::new(1024, 4);
        let big = pool.acquire(10_000).unwrap();
        assert_eq!(big.limit(), 10_000);
        assert_eq!(pool.in_use(), 1);
        drop(big);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.pool_size(), 0);
    }

    #[test]
    fn test_free_list_is_capped() {
        let pool = SizeClassPool::new(1024, 2);
        let bufs: Vec<_> = (0..5).map(|_| pool.acquire(64).unwrap()).collect();
        assert_eq!(pool.in_use(), 5);
        drop(bufs);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.pool_size(), 2);
    }

    #[test]
    fn test_in_use_returns_to_baseline_across_threads() {
        let pool = SizeClassPool::default();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        let mut b = pool.acquire(1 + i % 3000).unwrap();
                        b.put_slice(b"x");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.in_use(), 0);
    }
}
