//! # wirebuf-client
//!
//! Client-side request/response buffer management for wirebuf.
//!
//! This crate provides:
//! - Message buffers pairing wire bytes with lifecycle state
//! - Ordered buffer queues with lock-free depth counters
//! - Incremental response frame reassembly
//! - A request lifecycle manager handling correlation, timeouts and retries

pub mod buf;
pub mod counter;
pub mod lifecycle;
pub mod queue;
pub mod recv;

pub use buf::{
    BufFlags, Disposition, MessageBuf, Opaque, ReplyDest, RequestPayload, ResponseCallback,
    SharedBuf,
};
pub use counter::CompletionCounter;
pub use lifecycle::{LifecycleConfig, RequestLifecycle, ScanStats};
pub use queue::BufQueue;
pub use recv::ResponseAssembler;
