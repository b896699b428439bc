//! Request lifecycle management: correlation, timeouts and retries.
//!
//! A connection keeps its outbound buffers on three queues. `outbufs` holds
//! requests awaiting transmission, `waitresps` holds in-flight requests
//! keyed by correlation id, and `retrybufs` holds requests admitted for
//! retry until their backoff expires. The I/O path only touches `outbufs`
//! and `waitresps`; the retry queue is served exclusively by the periodic
//! scanner, and it deliberately survives a connection reset so retried
//! requests are redispatched after reconnect.

use crate::buf::{dispatch, Disposition, MessageBuf, SharedBuf};
use crate::queue::BufQueue;
use crate::recv::ResponseAssembler;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::time::{Duration, Instant};
use wirebuf_protocol::{ErrorCode, ProtocolError, MAX_RESPONSE_SIZE};

/// Lifecycle configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Default per-transmit timeout for requests that carry no explicit
    /// relative or absolute timeout.
    pub socket_timeout: Duration,
    /// Delay imposed before a retried request is redispatched.
    pub retry_backoff: Duration,
    /// Retry admission ceiling.
    pub max_retries: u32,
    /// Client id encoded into every request header.
    pub client_id: Option<String>,
}

impl LifecycleConfig {
    pub fn new() -> Self {
        Self {
            socket_timeout: Duration::from_secs(60),
            retry_backoff: Duration::from_millis(100),
            max_retries: 2,
            client_id: None,
        }
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters returned by a scanner pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Buffers that hit their effective deadline.
    pub timed_out: usize,
    /// Retry buffers whose backoff expired and were moved back to the send
    /// queue.
    pub redispatched: usize,
}

/// Per-connection request lifecycle manager.
pub struct RequestLifecycle {
    config: LifecycleConfig,
    /// Requests awaiting transmission.
    pub outbufs: BufQueue,
    /// In-flight requests awaiting their response.
    pub waitresps: BufQueue,
    /// Requests admitted for retry, waiting out their backoff.
    pub retrybufs: BufQueue,
    next_corr_id: AtomicI32,
    /// Current reply destination version; buffers stamped with an older
    /// version are delivered as outdated.
    version: AtomicI64,
    assembler: Mutex<ResponseAssembler>,
}

impl RequestLifecycle {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            outbufs: BufQueue::new(),
            waitresps: BufQueue::new(),
            retrybufs: BufQueue::new(),
            next_corr_id: AtomicI32::new(1),
            version: AtomicI64::new(0),
            assembler: Mutex::new(ResponseAssembler::new(MAX_RESPONSE_SIZE)),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn client_id(&self) -> Option<&str> {
        self.config.client_id.as_deref()
    }

    /// Current reply destination version.
    pub fn version(&self) -> i64 {
        self.version.load(Ordering::Acquire)
    }

    /// Bumps the reply destination version, invalidating replies stamped
    /// with older versions.
    pub fn bump_version(&self) -> i64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Admits a request to the send queue: assigns its correlation id,
    /// back-fills the header and computes the initial effective deadline so
    /// the scanner covers it while it waits to be sent.
    pub fn enqueue_request(&self, buf: SharedBuf, now: Instant) -> i32 {
        let corr_id = self.next_corr_id.fetch_add(1, Ordering::AcqRel);
        {
            let mut mb = buf.lock();
            mb.finalize(corr_id);
            mb.ts_enq = Some(now);
            mb.calc_timeout(now, self.config.socket_timeout);
        }
        tracing::debug!(corr_id, depth = self.outbufs.cnt() + 1, "request enqueued");
        self.outbufs.enqueue(buf);
        corr_id
    }

    /// Transport boundary: hands over the next request to transmit. The
    /// effective deadline is recomputed for this attempt and the buffer
    /// moves to the waiting-for-reply set.
    pub fn next_to_send(&self, now: Instant) -> Option<SharedBuf> {
        let buf = self.outbufs.pop_front()?;
        {
            let mut mb = buf.lock();
            mb.calc_timeout(now, self.config.socket_timeout);
            mb.ts_sent = Some(now);
        }
        self.waitresps.enqueue(SharedBuf::clone(&buf));
        Some(buf)
    }

    /// Transport boundary: receives bytes from the socket. Complete
    /// responses are correlated and dispatched; partial frames are retained
    /// until more bytes arrive. Returns the number of responses dispatched.
    ///
    /// Responses assembled before a malformed frame in the same read are
    /// still delivered; only then is the error propagated.
    pub fn feed(&self, data: Bytes, now: Instant) -> Result<usize, ProtocolError> {
        let mut out = Vec::new();
        let res = self.assembler.lock().feed(data, &mut out);
        let dispatched = out.len();
        for resp in out {
            self.handle_response(resp, now);
        }
        res.map(|()| dispatched)
    }

    fn handle_response(&self, resp: MessageBuf, now: Instant) {
        let corr_id = resp.corr_id;
        let Some(req) = self.waitresps.remove_first_where(|mb| mb.corr_id == corr_id) else {
            tracing::warn!(corr_id, "response with unknown correlation id, discarding");
            return;
        };

        let err = resp.err;
        let disposition = {
            let mut mb = req.lock();
            if let Some(sent) = mb.ts_sent {
                mb.rtt = Some(now.saturating_duration_since(sent));
            }
            mb.response = Some(Box::new(resp));
            if mb.version_outdated(self.version()) {
                tracing::debug!(corr_id, "reply destination outdated, degenerate delivery");
                mb.err = ErrorCode::Outdated;
                dispatch(&mut mb, ErrorCode::Outdated);
                Disposition::Complete
            } else {
                mb.err = err;
                dispatch(&mut mb, err)
            }
        };
        if disposition == Disposition::Retry {
            self.retry_or_fail(req, err, now);
        }
    }

    /// The callback asked for a retry. If admission is denied the request
    /// must still reach a terminal completion, so the callback is dispatched
    /// once more with the original error; a second `Retry` disposition is
    /// ignored.
    fn retry_or_fail(&self, buf: SharedBuf, err: ErrorCode, now: Instant) {
        if self.retry(SharedBuf::clone(&buf), now) {
            return;
        }
        let mut mb = buf.lock();
        mb.err = err;
        if dispatch(&mut mb, err) == Disposition::Retry {
            tracing::debug!(corr_id = mb.corr_id, "retry denied, completing with error");
        }
    }

    /// Retry admission. The callback decided the error was worth another
    /// attempt; this enforces the retry ceiling and the never-retry
    /// sentinel, then parks the buffer on the retry queue with backoff.
    pub fn retry(&self, buf: SharedBuf, now: Instant) -> bool {
        {
            let mut mb = buf.lock();
            if mb.retries == MessageBuf::NO_RETRIES || mb.retries >= self.config.max_retries {
                tracing::debug!(
                    corr_id = mb.corr_id,
                    retries = mb.retries,
                    "retry not admitted"
                );
                return false;
            }
            mb.retries += 1;
            mb.flags.set_retried();
            mb.ts_retry = Some(now + self.config.retry_backoff);
            mb.ts_sent = None;
            mb.response = None;
            mb.err = ErrorCode::NoError;
            tracing::debug!(
                corr_id = mb.corr_id,
                retries = mb.retries,
                backoff_ms = self.config.retry_backoff.as_millis() as u64,
                "request admitted for retry"
            );
        }
        self.retrybufs.enqueue(buf);
        true
    }

    /// Periodic scanner pass: fails requests whose effective deadline has
    /// passed and redispatches retry buffers whose backoff expired.
    pub fn scan(&self, now: Instant) -> ScanStats {
        let mut stats = ScanStats::default();

        for queue in [&self.waitresps, &self.outbufs] {
            let expired = queue.drain_where(|mb| mb.ts_timeout.is_some_and(|t| t <= now));
            for buf in expired {
                stats.timed_out += 1;
                let disposition = {
                    let mut mb = buf.lock();
                    tracing::debug!(corr_id = mb.corr_id, "request timed out");
                    mb.err = ErrorCode::Timeout;
                    dispatch(&mut mb, ErrorCode::Timeout)
                };
                if disposition == Disposition::Retry {
                    self.retry_or_fail(buf, ErrorCode::Timeout, now);
                }
            }
        }

        let due = self
            .retrybufs
            .drain_where(|mb| mb.ts_retry.map_or(true, |t| t <= now));
        for buf in due {
            stats.redispatched += 1;
            buf.lock().ts_retry = None;
            self.outbufs.enqueue(buf);
        }

        if stats != ScanStats::default() {
            tracing::debug!(
                timed_out = stats.timed_out,
                redispatched = stats.redispatched,
                "scanner pass"
            );
        }
        stats
    }

    /// The transport connection was discarded. Send and in-flight buffers
    /// are failed uniformly; retry buffers are deliberately retained and
    /// redispatched after reconnect.
    pub fn connection_reset(&self) -> usize {
        let purged = self.outbufs.connection_reset() + self.waitresps.connection_reset();
        self.assembler.lock().reset();
        tracing::debug!(
            purged,
            retained = self.retrybufs.cnt(),
            "transport connection reset"
        );
        purged
    }

    /// System teardown: every queued buffer observes [`ErrorCode::Destroy`]
    /// exactly once, including retry buffers.
    pub fn destroy(&self) -> usize {
        self.outbufs.purge(ErrorCode::Destroy)
            + self.waitresps.purge(ErrorCode::Destroy)
            + self.retrybufs.purge(ErrorCode::Destroy)
    }
}
