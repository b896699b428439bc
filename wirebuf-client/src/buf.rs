//! The message buffer: one request or response unit on the wire, together
//! with the lifecycle state the connection needs to track it.

use crate::counter::CompletionCounter;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wirebuf_protocol::header::API_VERSION_OFFSET;
use wirebuf_protocol::{
    ApiKey, ErrorCode, RequestHeader, ResponseHeader, WireBuf, CORR_ID_OFFSET, SIZE_PREFIX_LEN,
};

/// Shared handle to a message buffer.
///
/// Every owner (outbound queue, in-flight set, timeout scanner, caller)
/// holds a clone; the buffer and its payload are released exactly once when
/// the last clone drops.
pub type SharedBuf = Arc<Mutex<MessageBuf>>;

/// Opaque context carried alongside the response callback.
pub type Opaque = Box<dyn Any + Send>;

/// What the response callback decided about the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The request is done; release the buffer.
    Complete,
    /// The error is worth another attempt; re-enqueue with backoff, subject
    /// to retry admission.
    Retry,
}

/// Response callback: `(error, response, request, opaque)`.
///
/// Any of the three trailing arguments may be absent depending on the
/// failure stage. A callback receiving [`ErrorCode::Destroy`] must perform
/// only minimal cleanup and must not assume it runs on its originating
/// thread.
pub type ResponseCallback = Box<
    dyn FnMut(
            ErrorCode,
            Option<&mut MessageBuf>,
            Option<&mut MessageBuf>,
            Option<&mut Opaque>,
        ) -> Disposition
        + Send,
>;

/// Direction and progress flags for a message buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufFlags(u32);

impl BufFlags {
    const REQUEST: u32 = 1 << 0;
    const RESPONSE: u32 = 1 << 1;
    const RETRIED: u32 = 1 << 2;

    pub fn request() -> Self {
        Self(Self::REQUEST)
    }

    pub fn response() -> Self {
        Self(Self::RESPONSE)
    }

    pub fn is_request(&self) -> bool {
        self.0 & Self::REQUEST != 0
    }

    pub fn is_response(&self) -> bool {
        self.0 & Self::RESPONSE != 0
    }

    pub fn is_retried(&self) -> bool {
        self.0 & Self::RETRIED != 0
    }

    pub fn set_retried(&mut self) {
        self.0 |= Self::RETRIED;
    }
}

/// Reply destination: the logical sink a completed request's response is
/// delivered to, stamped with the version the sink had when the request was
/// issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyDest {
    pub version: i64,
}

impl ReplyDest {
    pub fn new(version: i64) -> Self {
        Self { version }
    }

    /// A non-zero stamp older than the sink's current version means the
    /// consumer no longer cares about this reply.
    pub fn is_outdated(&self, current: i64) -> bool {
        self.version != 0 && self.version < current
    }
}

/// Request-kind-specific payload, selected by the API key at construction.
pub enum RequestPayload {
    None,
    Metadata {
        /// Requested topics.
        topics: Vec<String>,
        /// Full/all topics requested.
        all_topics: bool,
        /// Textual reason, for diagnostics.
        reason: String,
        /// Decremented once when this request completes; fires the dependent
        /// action on the completer that reaches zero.
        completion: Option<Arc<CompletionCounter>>,
    },
}

impl RequestPayload {
    fn for_api_key(api_key: ApiKey) -> Self {
        match api_key {
            ApiKey::Metadata => RequestPayload::Metadata {
                topics: Vec::new(),
                all_topics: false,
                reason: String::new(),
                completion: None,
            },
            _ => RequestPayload::None,
        }
    }
}

impl fmt::Debug for RequestPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestPayload::None => write!(f, "None"),
            RequestPayload::Metadata {
                topics, all_topics, ..
            } => f
                .debug_struct("Metadata")
                .field("topics", topics)
                .field("all_topics", all_topics)
                .finish(),
        }
    }
}

/// One request or response unit on the wire.
pub struct MessageBuf {
    /// Backing byte store and read cursor.
    pub wire: WireBuf,
    /// Correlation identifier, assigned per request and echoed by the
    /// response. Unique among buffers awaiting response on one connection.
    pub corr_id: i32,
    pub flags: BufFlags,
    /// Connection id, recorded when the buffer is partially sent.
    pub conn_id: i32,
    /// Receive side: total expected frame length.
    pub expected_size: i32,
    pub reqhdr: RequestHeader,
    /// Decoded response header, copied out of the buffer for convenience.
    pub reshdr: Option<ResponseHeader>,
    pub replyq: ReplyDest,
    pub(crate) cb: Option<ResponseCallback>,
    pub(crate) opaque: Option<Opaque>,
    /// Response buffer, linked once received.
    pub response: Option<Box<MessageBuf>>,
    /// Retries so far. [`MessageBuf::NO_RETRIES`] marks a request that must
    /// never be retried.
    pub retries: u32,
    /// Feature bits the peer must support for this request.
    pub features: u32,
    pub ts_enq: Option<Instant>,
    /// Time of transmission; cleared on retry.
    pub ts_sent: Option<Instant>,
    pub(crate) rtt: Option<Duration>,
    /// Earliest redispatch time while on the retry queue.
    pub ts_retry: Option<Instant>,
    /// Effective deadline watched by the timeout scanner.
    pub ts_timeout: Option<Instant>,
    /// Per-transmit relative timeout, reused on every retry.
    /// Mutually exclusive with `abs_timeout`.
    pub rel_timeout: Option<Duration>,
    /// Fixed deadline spanning all retries.
    /// Mutually exclusive with `rel_timeout`.
    pub abs_timeout: Option<Instant>,
    /// Used by offset-commit-style requests.
    pub offset: i64,
    /// Parse error recorded on the buffer, if any.
    pub err: ErrorCode,
    pub payload: RequestPayload,
    /// Number of aggregated logical messages carried by this buffer.
    pub msg_cnt: usize,
}

impl MessageBuf {
    /// Retry count sentinel: never retry this request. Used for
    /// idempotency-sensitive requests.
    pub const NO_RETRIES: u32 = u32::MAX;

    /// Creates an outbound request buffer with its header already encoded
    /// (size and correlation id as placeholders).
    pub fn new_request(
        api_key: ApiKey,
        api_version: i16,
        seg_hint: usize,
        size_hint: usize,
        client_id: Option<&str>,
    ) -> Self {
        let reqhdr = RequestHeader::new(api_key, api_version);
        let mut wire = WireBuf::new(seg_hint, size_hint);
        reqhdr.write_to(&mut wire, client_id);
        Self {
            wire,
            corr_id: 0,
            flags: BufFlags::request(),
            conn_id: 0,
            expected_size: 0,
            reqhdr,
            reshdr: None,
            replyq: ReplyDest::default(),
            cb: None,
            opaque: None,
            response: None,
            retries: 0,
            features: 0,
            ts_enq: None,
            ts_sent: None,
            rtt: None,
            ts_retry: None,
            ts_timeout: None,
            rel_timeout: None,
            abs_timeout: None,
            offset: 0,
            err: ErrorCode::NoError,
            payload: RequestPayload::for_api_key(api_key),
            msg_cnt: 0,
        }
    }

    /// Creates an inbound response buffer expecting `expected_size` bytes
    /// past the frame size prefix.
    pub fn new_response(seg_hint: usize, expected_size: i32) -> Self {
        Self {
            wire: WireBuf::new(seg_hint, 0),
            corr_id: 0,
            flags: BufFlags::response(),
            conn_id: 0,
            expected_size,
            reqhdr: RequestHeader::new(ApiKey::Produce, 0),
            reshdr: None,
            replyq: ReplyDest::default(),
            cb: None,
            opaque: None,
            response: None,
            retries: 0,
            features: 0,
            ts_enq: None,
            ts_sent: None,
            rtt: None,
            ts_retry: None,
            ts_timeout: None,
            rel_timeout: None,
            abs_timeout: None,
            offset: 0,
            err: ErrorCode::NoError,
            payload: RequestPayload::None,
            msg_cnt: 0,
        }
    }

    /// Wraps the buffer for shared ownership.
    pub fn shared(self) -> SharedBuf {
        Arc::new(Mutex::new(self))
    }

    pub fn set_callback(&mut self, cb: ResponseCallback) {
        self.cb = Some(cb);
    }

    pub fn set_opaque(&mut self, opaque: Opaque) {
        self.opaque = Some(opaque);
    }

    /// Sets the API version actually negotiated with the peer, along with
    /// the feature bits it implies, rewriting the encoded header field.
    pub fn set_api_version(&mut self, api_version: i16, features: u32) {
        self.reqhdr.api_version = api_version;
        self.features = features;
        self.wire.update_i16(API_VERSION_OFFSET, api_version);
    }

    /// Sets a relative timeout, reapplied at every send attempt.
    /// Clears any absolute timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.rel_timeout = Some(timeout);
        self.abs_timeout = None;
    }

    /// Sets an absolute deadline spanning all retries, for requests that are
    /// semantically meaningless past a point. Clears any relative timeout.
    pub fn set_abs_timeout(&mut self, timeout: Duration, now: Instant) {
        self.abs_timeout = Some(now + timeout);
        self.rel_timeout = None;
    }

    /// Computes the effective deadline for the next transmission attempt and
    /// stores it as the active timeout watched by the scanner.
    pub fn calc_timeout(&mut self, now: Instant, default_rel: Duration) {
        self.ts_timeout = Some(match self.abs_timeout {
            Some(abs) => abs,
            None => now + self.rel_timeout.unwrap_or(default_rel),
        });
    }

    /// Whether the reply destination's version stamp is older than
    /// `current`, making any delivery degenerate.
    pub fn version_outdated(&self, current: i64) -> bool {
        self.replyq.is_outdated(current)
    }

    /// Round-trip time, available once the response has been matched.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// Back-fills the correlation id and total size into the encoded header.
    /// Called once when the request is admitted to the send queue.
    pub fn finalize(&mut self, corr_id: i32) {
        self.corr_id = corr_id;
        self.reqhdr.corr_id = corr_id;
        self.wire.update_i32(CORR_ID_OFFSET, corr_id);
        let body = self.wire.len() - SIZE_PREFIX_LEN;
        self.wire.update_i32(0, body as i32);
    }
}

impl fmt::Debug for MessageBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuf")
            .field("corr_id", &self.corr_id)
            .field("flags", &self.flags)
            .field("api_key", &self.reqhdr.api_key)
            .field("retries", &self.retries)
            .field("err", &self.err)
            .field("len", &self.wire.len())
            .finish()
    }
}

/// Runs the buffer's response callback, if any.
///
/// The callback and opaque context are taken out for the duration of the
/// call so the request buffer itself can be passed mutably. On a `Retry`
/// disposition the callback is put back for the next completion.
pub(crate) fn dispatch(req: &mut MessageBuf, err: ErrorCode) -> Disposition {
    let mut cb = req.cb.take();
    let mut opaque = req.opaque.take();
    let mut response = req.response.take();

    let disposition = match cb.as_mut() {
        Some(cb) => cb(err, response.as_deref_mut(), Some(req), opaque.as_mut()),
        None => Disposition::Complete,
    };

    req.opaque = opaque;
    req.response = response;
    if disposition == Disposition::Retry {
        req.cb = cb;
    }
    disposition
}
