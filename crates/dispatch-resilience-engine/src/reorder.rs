//! Ordered-output buffer (spec section 4.7).
//!
//! Reorders arrival-order results by original input index. Holds a cursor
//! (`next_expected`) and a sparse map of results that arrived ahead of it.
//! Backpressure: a result that arrives ahead of the cursor consumes a
//! watermark permit; once the watermark is exhausted, the next out-of-order
//! arrival blocks until the cursor catches up and frees one.

use crate::item::ResultEnvelope;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Reorders [`ResultEnvelope`]s by `index` as they arrive out of order.
pub(crate) struct OrderedBuffer<R, E> {
    next_expected: u64,
    pending: BTreeMap<u64, (ResultEnvelope<R, E>, Option<OwnedSemaphorePermit>)>,
    watermark: Arc<Semaphore>,
}

impl<R, E> OrderedBuffer<R, E> {
    /// Creates a new buffer starting at index 0 with the given watermark
    /// (the default, per spec section 4.7, is `inputQueueCapacity`).
    pub(crate) fn new(watermark: usize) -> Self {
        Self {
            next_expected: 0,
            pending: BTreeMap::new(),
            watermark: Arc::new(Semaphore::new(watermark.max(1))),
        }
    }

    /// Submits one arrival. If it is the next expected index (or becomes
    /// eligible once buffered predecessors drain), returns every now-ready
    /// envelope in index order. Otherwise blocks until a watermark permit
    /// frees up, buffers the envelope, and returns an empty vec.
    pub(crate) async fn submit(&mut self, envelope: ResultEnvelope<R, E>) -> Vec<ResultEnvelope<R, E>> {
        if envelope.index == self.next_expected {
            let mut ready = vec![envelope];
            self.next_expected += 1;
            while let Some(&index) = self.pending.keys().next() {
                if index != self.next_expected {
                    break;
                }
                let (next, _permit) = self.pending.remove(&index).unwrap();
                ready.push(next);
                self.next_expected += 1;
            }
            return ready;
        }

        // Out-of-order arrival: ahead of the cursor. Acquire a watermark
        // permit (blocking the producer if the buffer is already full of
        // ahead-of-cursor results) and stash it.
        let permit = Arc::clone(&self.watermark)
            .acquire_owned()
            .await
            .expect("watermark semaphore is never closed");
        self.pending.insert(envelope.index, (envelope, Some(permit)));
        Vec::new()
    }

    /// Number of results currently buffered ahead of the cursor.
    pub(crate) fn buffered_len(&self) -> usize {
        self.pending.len()
    }
}
