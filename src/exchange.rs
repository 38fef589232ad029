//! Double-buffered frame exchange between decode tasks and the consumer
//!
//! Decode tasks run ahead of the consumer's tick. Each stream hands frames
//! over through a two-slot exchange: `submit` swaps the new frame into the
//! back slot under a short mutex, dropping whatever unconsumed frame was
//! there (newest wins, by design — a stalling consumer sees the latest frame,
//! not a growing queue). `poll` bumps the front reference to the back frame
//! only when the back actually changed, so repeated polls without new traffic
//! are a pointer compare. Any heavy per-frame mapping happens after the lock
//! is released.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::osc::{self, OscMessage};

/// Producer handle: decode tasks submit frames through this
pub struct FrameProducer<T> {
    back: Arc<Mutex<Option<Arc<T>>>>,
}

impl<T> Clone for FrameProducer<T> {
    fn clone(&self) -> Self {
        Self { back: Arc::clone(&self.back) }
    }
}

impl<T> FrameProducer<T> {
    /// Swap `frame` into the back slot, dropping the previous occupant
    pub fn submit(&self, frame: T) {
        let mut back = self.back.lock();
        *back = Some(Arc::new(frame));
    }
}

/// Consumer side of the exchange. Owned by the tick loop; not `Sync`.
pub struct FrameExchange<T> {
    back: Arc<Mutex<Option<Arc<T>>>>,
    front: Option<Arc<T>>,
    new_frame: bool,
}

impl<T> FrameExchange<T> {
    /// Create a linked producer/consumer pair
    pub fn channel() -> (FrameProducer<T>, FrameExchange<T>) {
        let back = Arc::new(Mutex::new(None));
        let producer = FrameProducer { back: Arc::clone(&back) };
        let consumer = FrameExchange { back, front: None, new_frame: false };
        (producer, consumer)
    }

    /// Advance the front to the back frame if it changed. Returns whether a
    /// new frame became current.
    pub fn poll(&mut self) -> bool {
        let candidate = {
            let back = self.back.lock();
            back.clone()
        };
        self.new_frame = match (&self.front, &candidate) {
            (Some(front), Some(cand)) => !Arc::ptr_eq(front, cand),
            (None, Some(_)) => true,
            _ => false,
        };
        if self.new_frame {
            self.front = candidate;
        }
        self.new_frame
    }

    /// Whether the last `poll` produced a new frame
    pub fn is_new_frame(&self) -> bool {
        self.new_frame
    }

    /// Current front frame. Stable until the next `poll`.
    pub fn frame(&self) -> Option<&T> {
        self.front.as_deref()
    }
}

/// OSC variant: compressed payloads on the back slot, decoded messages on
/// the front. Decompression runs after the ref-bump, outside the lock.
pub struct OscExchange {
    inner: FrameExchange<bytes::Bytes>,
    current: OscMessage,
}

impl OscExchange {
    /// Create a linked producer/consumer pair for the OSC channel
    pub fn channel() -> (FrameProducer<bytes::Bytes>, OscExchange) {
        let (producer, inner) = FrameExchange::channel();
        (producer, OscExchange { inner, current: OscMessage::default() })
    }

    /// Poll and decode. A malformed payload decodes to the empty message.
    pub fn poll(&mut self) -> bool {
        if self.inner.poll() {
            if let Some(payload) = self.inner.frame() {
                self.current = osc::decode_payload(payload);
            }
            true
        } else {
            false
        }
    }

    /// Whether the last `poll` produced a new message
    pub fn is_new_message(&self) -> bool {
        self.inner.is_new_frame()
    }

    /// The most recently decoded message
    pub fn message(&self) -> &OscMessage {
        &self.current
    }
}
