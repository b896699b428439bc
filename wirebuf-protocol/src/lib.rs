//! # wirebuf-protocol
//!
//! Binary wire protocol primitives for wirebuf.
//!
//! This crate provides:
//! - A segmented, zero-copy-oriented byte buffer with a read cursor
//! - An exact-width big-endian codec with varints and length-prefixed
//!   string/bytes representations
//! - A streaming CRC32C checksum bracketed around buffer writes
//! - A one-shot aligned scratch arena for flattening parsed fields
//! - Protocol error types and completion error codes

pub mod arena;
pub mod buf;
pub mod checksum;
pub mod error;
pub mod header;
pub mod varint;

pub use arena::Arena;
pub use buf::{WireBuf, WireBytes, WireStr, NULL_LEN};
pub use checksum::StreamingCrc;
pub use error::{ErrorCode, ProtocolError};
pub use header::{
    ApiKey, RequestHeader, ResponseHeader, API_VERSION_OFFSET, CORR_ID_OFFSET,
    RESPONSE_HEADER_SIZE, SIZE_PREFIX_LEN,
};
pub use varint::MAX_VARINT_SIZE;

/// Maximum accepted response frame size (100 MB).
pub const MAX_RESPONSE_SIZE: i32 = 100_000_000;
