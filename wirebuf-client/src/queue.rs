//! Ordered buffer queues with lock-free depth inspection.
//!
//! A connection keeps one queue per lifecycle role: send, in-flight
//! (waiting-for-reply) and retry. Buffers move between queues as they
//! progress; a buffer is a member of at most one queue at a time. The
//! application thread enqueues while the I/O thread drains, so membership is
//! guarded by a lock while the depth counters are atomics the timeout
//! scanner can read without contending.

use crate::buf::{dispatch, Disposition, MessageBuf, SharedBuf};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wirebuf_protocol::ErrorCode;

/// Ordered multiset of message buffers (FIFO unless explicitly reordered).
#[derive(Debug, Default)]
pub struct BufQueue {
    bufs: Mutex<VecDeque<SharedBuf>>,
    cnt: AtomicUsize,
    msg_cnt: AtomicUsize,
}

impl BufQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers currently queued.
    pub fn cnt(&self) -> usize {
        self.cnt.load(Ordering::Acquire)
    }

    /// Number of aggregated logical messages across queued buffers.
    pub fn msg_cnt(&self) -> usize {
        self.msg_cnt.load(Ordering::Acquire)
    }

    /// Appends a buffer.
    pub fn enqueue(&self, buf: SharedBuf) {
        let msgs = buf.lock().msg_cnt;
        self.bufs.lock().push_back(buf);
        self.cnt.fetch_add(1, Ordering::AcqRel);
        self.msg_cnt.fetch_add(msgs, Ordering::AcqRel);
    }

    /// Prepends a buffer, used when a retried request must go out before
    /// newly enqueued ones.
    pub fn enqueue_front(&self, buf: SharedBuf) {
        let msgs = buf.lock().msg_cnt;
        self.bufs.lock().push_front(buf);
        self.cnt.fetch_add(1, Ordering::AcqRel);
        self.msg_cnt.fetch_add(msgs, Ordering::AcqRel);
    }

    /// Removes a specific buffer, wherever it sits in the queue. Buffers
    /// complete out of order, so removal is by identity, not position.
    pub fn dequeue(&self, buf: &SharedBuf) -> bool {
        let removed = {
            let mut bufs = self.bufs.lock();
            match bufs.iter().position(|b| Arc::ptr_eq(b, buf)) {
                Some(pos) => bufs.remove(pos),
                None => None,
            }
        };
        match removed {
            Some(removed) => {
                self.note_removed(&removed);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the oldest buffer.
    pub fn pop_front(&self) -> Option<SharedBuf> {
        let buf = self.bufs.lock().pop_front()?;
        self.note_removed(&buf);
        Some(buf)
    }

    /// Removes and returns the first buffer matching `pred`.
    pub fn remove_first_where(&self, pred: impl Fn(&MessageBuf) -> bool) -> Option<SharedBuf> {
        let removed = {
            let mut bufs = self.bufs.lock();
            let pos = bufs.iter().position(|b| pred(&b.lock()))?;
            bufs.remove(pos)
        };
        let buf = removed?;
        self.note_removed(&buf);
        Some(buf)
    }

    /// Removes and returns every buffer matching `pred`, preserving order.
    pub fn drain_where(&self, pred: impl Fn(&MessageBuf) -> bool) -> Vec<SharedBuf> {
        let drained: Vec<SharedBuf> = {
            let mut bufs = self.bufs.lock();
            let mut kept = VecDeque::with_capacity(bufs.len());
            let mut out = Vec::new();
            for buf in bufs.drain(..) {
                if pred(&buf.lock()) {
                    out.push(buf);
                } else {
                    kept.push_back(buf);
                }
            }
            *bufs = kept;
            out
        };
        for buf in &drained {
            self.note_removed(buf);
        }
        drained
    }

    /// Moves all entries of `src` onto the back of this queue, e.g. when
    /// merging a retry set back into the send queue.
    pub fn concat(&self, src: &BufQueue) {
        let moved: Vec<SharedBuf> = src.bufs.lock().drain(..).collect();
        for buf in &moved {
            src.note_removed(buf);
        }
        for buf in moved {
            self.enqueue(buf);
        }
    }

    /// Drains the queue, invoking every buffer's completion callback with
    /// `err` so callers observe a uniform failure rather than silent loss.
    /// Returns the number of buffers purged.
    pub fn purge(&self, err: ErrorCode) -> usize {
        let drained: Vec<SharedBuf> = {
            let mut bufs = self.bufs.lock();
            bufs.drain(..).collect()
        };
        let purged = drained.len();
        if purged > 0 {
            tracing::debug!(purged, %err, "purging buffer queue");
        }
        for buf in drained {
            self.note_removed(&buf);
            let mut mb = buf.lock();
            mb.err = err;
            // Retry is not an available disposition during a purge.
            if dispatch(&mut mb, err) == Disposition::Retry {
                tracing::debug!(corr_id = mb.corr_id, "retry ignored during purge");
            }
        }
        purged
    }

    /// Purge variant for a discarded transport connection: clears the
    /// reconnect-transient state each buffer carries (send timestamp,
    /// connection id) before failing it with [`ErrorCode::Transport`]. The
    /// buffer's own business data is untouched.
    pub fn connection_reset(&self) -> usize {
        let drained: Vec<SharedBuf> = {
            let mut bufs = self.bufs.lock();
            bufs.drain(..).collect()
        };
        let purged = drained.len();
        if purged > 0 {
            tracing::debug!(purged, "connection reset, failing queued buffers");
        }
        for buf in drained {
            self.note_removed(&buf);
            let mut mb = buf.lock();
            mb.ts_sent = None;
            mb.conn_id = 0;
            mb.err = ErrorCode::Transport;
            if dispatch(&mut mb, ErrorCode::Transport) == Disposition::Retry {
                tracing::debug!(corr_id = mb.corr_id, "retry ignored during connection reset");
            }
        }
        purged
    }

    fn note_removed(&self, buf: &SharedBuf) {
        let msgs = buf.lock().msg_cnt;
        self.cnt.fetch_sub(1, Ordering::AcqRel);
        self.msg_cnt.fetch_sub(msgs, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::Disposition;
    use std::sync::atomic::AtomicUsize;
    use wirebuf_protocol::ApiKey;

    fn request() -> SharedBuf {
        MessageBuf::new_request(ApiKey::Fetch, 0, 1, 64, None).shared()
    }

    #[test]
    fn test_enqueue_dequeue_counts() {
        let q = BufQueue::new();
        let bufs: Vec<SharedBuf> = (0..5).map(|_| request()).collect();
        for buf in &bufs {
            q.enqueue(Arc::clone(buf));
        }
        assert_eq!(q.cnt(), 5);

        // Dequeue out of order, by identity.
        assert!(q.dequeue(&bufs[3]));
        assert!(q.dequeue(&bufs[0]));
        assert_eq!(q.cnt(), 3);

        // Already removed.
        assert!(!q.dequeue(&bufs[3]));
        assert_eq!(q.cnt(), 3);
    }

    #[test]
    fn test_msg_cnt_tracks_aggregated_messages() {
        let q = BufQueue::new();
        let a = request();
        a.lock().msg_cnt = 10;
        let b = request();
        b.lock().msg_cnt = 5;

        q.enqueue(Arc::clone(&a));
        q.enqueue(Arc::clone(&b));
        assert_eq!(q.msg_cnt(), 15);

        q.dequeue(&a);
        assert_eq!(q.msg_cnt(), 5);
    }

    #[test]
    fn test_pop_front_is_fifo() {
        let q = BufQueue::new();
        let a = request();
        a.lock().corr_id = 1;
        let b = request();
        b.lock().corr_id = 2;
        q.enqueue(a);
        q.enqueue(b);

        assert_eq!(q.pop_front().unwrap().lock().corr_id, 1);
        assert_eq!(q.pop_front().unwrap().lock().corr_id, 2);
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn test_enqueue_front_reorders() {
        let q = BufQueue::new();
        let a = request();
        a.lock().corr_id = 1;
        let b = request();
        b.lock().corr_id = 2;
        q.enqueue(a);
        q.enqueue_front(b);

        assert_eq!(q.pop_front().unwrap().lock().corr_id, 2);
    }

    #[test]
    fn test_concat_moves_everything() {
        let dst = BufQueue::new();
        let src = BufQueue::new();
        dst.enqueue(request());
        src.enqueue(request());
        src.enqueue(request());

        dst.concat(&src);
        assert_eq!(dst.cnt(), 3);
        assert_eq!(src.cnt(), 0);
    }

    #[test]
    fn test_purge_invokes_callback_exactly_once_each() {
        let q = BufQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let buf = request();
            let calls = Arc::clone(&calls);
            buf.lock().set_callback(Box::new(move |err, response, _, _| {
                assert_eq!(err, ErrorCode::Purged);
                assert!(response.is_none());
                calls.fetch_add(1, Ordering::SeqCst);
                Disposition::Complete
            }));
            q.enqueue(buf);
        }

        assert_eq!(q.purge(ErrorCode::Purged), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(q.cnt(), 0);

        // A second purge finds nothing.
        assert_eq!(q.purge(ErrorCode::Purged), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_connection_reset_clears_transient_state() {
        let q = BufQueue::new();
        let buf = request();
        {
            let mut mb = buf.lock();
            mb.ts_sent = Some(std::time::Instant::now());
            mb.conn_id = 3;
            mb.offset = 999; // business data survives
        }
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            buf.lock().set_callback(Box::new(move |err, _, request, _| {
                assert_eq!(err, ErrorCode::Transport);
                let request = request.unwrap();
                assert!(request.ts_sent.is_none());
                assert_eq!(request.conn_id, 0);
                assert_eq!(request.offset, 999);
                seen.fetch_add(1, Ordering::SeqCst);
                Disposition::Complete
            }));
        }
        q.enqueue(Arc::clone(&buf));

        assert_eq!(q.connection_reset(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_first_where_by_corr_id() {
        let q = BufQueue::new();
        for id in 1..=3 {
            let buf = request();
            buf.lock().corr_id = id;
            q.enqueue(buf);
        }

        let found = q.remove_first_where(|mb| mb.corr_id == 2).unwrap();
        assert_eq!(found.lock().corr_id, 2);
        assert_eq!(q.cnt(), 2);
        assert!(q.remove_first_where(|mb| mb.corr_id == 99).is_none());
    }

    #[test]
    fn test_drain_where_preserves_rest() {
        let q = BufQueue::new();
        for id in 1..=4 {
            let buf = request();
            buf.lock().corr_id = id;
            q.enqueue(buf);
        }

        let even = q.drain_where(|mb| mb.corr_id % 2 == 0);
        assert_eq!(even.len(), 2);
        assert_eq!(q.cnt(), 2);
        assert_eq!(q.pop_front().unwrap().lock().corr_id, 1);
        assert_eq!(q.pop_front().unwrap().lock().corr_id, 3);
    }
}
