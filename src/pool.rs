//! Reusable frame buffer pools
//!
//! Raw frame and audio quantum buffers are large and allocated at a steady
//! rate, so they come from fixed-shape pools. A checkout hands back a
//! move-only [`PooledFrame`] whose `Drop` returns the buffer, so release
//! happens exactly once by construction. The mutex only guards the free-list
//! push/pop; buffer contents are touched outside it.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

struct PoolInner<T> {
    free: Mutex<Vec<Box<[T]>>>,
    frame_len: usize,
    /// Largest number of buffers ever live at once
    high_water: Mutex<usize>,
    outstanding: Mutex<usize>,
}

/// Pool of same-shaped buffers of `T`
pub struct FrameBufferPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for FrameBufferPool<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

/// Pool for 16-bit audio quanta
pub type AudioFramePool = FrameBufferPool<i16>;

impl<T: Copy + Default> FrameBufferPool<T> {
    /// New pool producing buffers of `frame_len` elements, pre-filled with
    /// `initial` buffers
    pub fn new(frame_len: usize, initial: usize) -> Self {
        let free = (0..initial)
            .map(|_| vec![T::default(); frame_len].into_boxed_slice())
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                frame_len,
                high_water: Mutex::new(0),
                outstanding: Mutex::new(0),
            }),
        }
    }

    /// Element count of each buffer
    pub fn frame_len(&self) -> usize {
        self.inner.frame_len
    }

    /// Check a buffer out, allocating a fresh one if the free list is empty
    pub fn checkout(&self) -> PooledFrame<T> {
        let buf = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![T::default(); self.inner.frame_len].into_boxed_slice());

        let mut outstanding = self.inner.outstanding.lock();
        *outstanding += 1;
        let mut hw = self.inner.high_water.lock();
        if *outstanding > *hw {
            *hw = *outstanding;
        }

        PooledFrame { buf: Some(buf), pool: Arc::clone(&self.inner) }
    }

    /// Buffers currently checked out
    pub fn outstanding(&self) -> usize {
        *self.inner.outstanding.lock()
    }

    /// Largest simultaneous checkout count seen
    pub fn high_water(&self) -> usize {
        *self.inner.high_water.lock()
    }

    /// Buffers sitting on the free list
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// A checked-out buffer. Returns to its pool on drop.
pub struct PooledFrame<T> {
    buf: Option<Box<[T]>>,
    pool: Arc<PoolInner<T>>,
}

impl<T> Deref for PooledFrame<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl<T> DerefMut for PooledFrame<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl<T> Drop for PooledFrame<T> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.free.lock().push(buf);
            *self.pool.outstanding.lock() -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_and_return_on_drop() {
        let pool: FrameBufferPool<u8> = FrameBufferPool::new(16, 2);
        assert_eq!(pool.available(), 2);

        let frame = pool.checkout();
        assert_eq!(frame.len(), 16);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.outstanding(), 1);

        drop(frame);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_grows_past_initial_then_stabilizes() {
        let pool: FrameBufferPool<i16> = FrameBufferPool::new(320, 1);
        let a = pool.checkout();
        let b = pool.checkout();
        let c = pool.checkout();
        assert_eq!(pool.high_water(), 3);
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.available(), 3);

        // Steady-state reuse keeps the high-water mark bounded
        for _ in 0..100 {
            let f = pool.checkout();
            drop(f);
        }
        assert_eq!(pool.high_water(), 3);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_buffer_contents_are_writable() {
        let pool: FrameBufferPool<u16> = FrameBufferPool::new(4, 1);
        let mut frame = pool.checkout();
        frame[0] = 42;
        frame[3] = 7;
        assert_eq!(&frame[..], &[42, 0, 0, 7]);
    }

    #[test]
    fn test_pool_clone_shares_free_list() {
        let pool: FrameBufferPool<u8> = FrameBufferPool::new(8, 1);
        let other = pool.clone();
        let f = pool.checkout();
        assert_eq!(other.available(), 0);
        drop(f);
        assert_eq!(other.available(), 1);
    }
}
