use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Pool of fixed-size receive buffers, leased one per connection.
///
/// `acquire` never blocks: an empty free list allocates a fresh buffer, so
/// the accept path cannot stall on pool exhaustion. A lease comes back when
/// its [`PooledBuf`] drops. The free list is capped so a connection burst
/// does not pin memory forever; surplus buffers just drop.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    buf_size: usize,
    max_retained: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    pub fn new(buf_size: usize, max_retained: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buf_size: buf_size.max(1),
                max_retained,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    /// Lease one buffer. Contents are whatever the previous lessee left
    /// behind; callers only read the region a socket read just filled.
    pub fn acquire(&self) -> PooledBuf {
        let recycled = self.inner.free.lock().expect("buffer pool lock").pop();
        let buf =
            recycled.unwrap_or_else(|| vec![0u8; self.inner.buf_size].into_boxed_slice());
        PooledBuf {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    fn release(&self, buf: Box<[u8]>) {
        let mut free = self.inner.free.lock().expect("buffer pool lock");
        if free.len() < self.inner.max_retained {
            free.push(buf);
        }
    }

    #[cfg(test)]
    fn free_count(&self) -> usize {
        self.inner.free.lock().expect("buffer pool lock").len()
    }
}

/// Exclusive lease on one pool buffer; dropping returns it exactly once.
pub struct PooledBuf {
    buf: Option<Box<[u8]>>,
    pool: BufferPool,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
