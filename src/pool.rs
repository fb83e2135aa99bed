//! Buffer & Object Pools (POOL) — reusable byte buffers to keep chunked
//! upload paths allocation-light (spec.md §4.2).

use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;

/// The four size buckets pooled buffers are grouped into. Acquiring a
/// buffer for a requested size rounds up to the nearest bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    /// 32 KiB — ZMP's duplex pipe window.
    Small,
    /// 256 KiB — general chunked read/write staging.
    Medium,
    /// 5 MiB — exactly `MIN_CHUNK_BYTES`, one multipart part.
    Chunk,
    /// 16 MiB — oversized parts from clients that choose a larger chunk size.
    Large,
}

const SMALL_BYTES: usize = 32 * 1024;
const MEDIUM_BYTES: usize = 256 * 1024;
const CHUNK_BYTES: usize = crate::types::MIN_CHUNK_BYTES as usize;
const LARGE_BYTES: usize = 16 * 1024 * 1024;

impl Bucket {
    fn for_size(size: usize) -> Option<Bucket> {
        if size <= SMALL_BYTES {
            Some(Bucket::Small)
        } else if size <= MEDIUM_BYTES {
            Some(Bucket::Medium)
        } else if size <= CHUNK_BYTES {
            Some(Bucket::Chunk)
        } else if size <= LARGE_BYTES {
            Some(Bucket::Large)
        } else {
            None
        }
    }

    fn capacity(self) -> usize {
        match self {
            Bucket::Small => SMALL_BYTES,
            Bucket::Medium => MEDIUM_BYTES,
            Bucket::Chunk => CHUNK_BYTES,
            Bucket::Large => LARGE_BYTES,
        }
    }

    fn index(self) -> usize {
        match self {
            Bucket::Small => 0,
            Bucket::Medium => 1,
            Bucket::Chunk => 2,
            Bucket::Large => 3,
        }
    }
}

/// A buffer checked out of the pool. Returned to its bucket's free list on
/// drop, zeroed so no previous upload's bytes leak into the next caller.
pub struct BufferHandle {
    buf: Option<BytesMut>,
    bucket: Bucket,
    pool: Arc<BufferPool>,
}

impl BufferHandle {
    pub fn as_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            let mut bucket_lists = self.pool.buckets[self.bucket.index()].lock();
            if bucket_lists.len() < self.pool.max_per_bucket {
                bucket_lists.push(buf);
            }
        }
    }
}

/// Four size-bucketed free lists of `BytesMut`, guarded individually so
/// acquiring a small buffer never contends with releasing a large one.
pub struct BufferPool {
    buckets: [Mutex<Vec<BytesMut>>; 4],
    max_per_bucket: usize,
}

impl BufferPool {
    pub fn new(max_per_bucket: usize) -> Self {
        Self {
            buckets: [Mutex::new(Vec::new()), Mutex::new(Vec::new()), Mutex::new(Vec::new()), Mutex::new(Vec::new())],
            max_per_bucket,
        }
    }

    /// Acquire a zeroed buffer with capacity for at least `size` bytes. When
    /// `size` exceeds the largest bucket, allocates a one-off buffer that is
    /// not returned to any pool.
    pub fn acquire(self: &Arc<Self>, size: usize) -> BufferHandle {
        let Some(bucket) = Bucket::for_size(size) else {
            return BufferHandle {
                buf: Some(BytesMut::zeroed(size)),
                bucket: Bucket::Large,
                pool: self.clone(),
            };
        };

        let mut free_list = self.buckets[bucket.index()].lock();
        let buf = free_list.pop().unwrap_or_else(|| BytesMut::zeroed(bucket.capacity()));
        drop(free_list);

        BufferHandle { buf: Some(buf), bucket, pool: self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new(4))
    }

    #[test]
    fn acquired_buffer_is_zeroed_and_sized() {
        let pool = pool();
        let mut handle = pool.acquire(1024);
        assert!(handle.as_mut().capacity() >= 1024);
        assert!(handle.as_mut().iter().all(|b| *b == 0));
    }

    #[test]
    fn released_buffer_is_reused() {
        let pool = pool();
        {
            let mut handle = pool.acquire(100);
            handle.as_mut().extend_from_slice(b"not zero");
        }
        let handle = pool.acquire(100);
        assert!(handle.buf.as_ref().unwrap().is_empty());
    }

    #[test]
    fn oversized_request_bypasses_pool() {
        let pool = pool();
        let handle = pool.acquire(64 * 1024 * 1024);
        assert_eq!(handle.buf.as_ref().unwrap().len(), 64 * 1024 * 1024);
    }

    #[test]
    fn concurrent_acquire_and_release_does_not_panic() {
        let pool = pool();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let pool = pool.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        let mut handle = pool.acquire(1024);
                        handle.as_mut().extend_from_slice(b"x");
                    }
                });
            }
        });
    }
}
