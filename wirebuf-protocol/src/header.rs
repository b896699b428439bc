//! Request and response protocol headers.
//!
//! Wire layout:
//!
//! ```text
//! request:  size (i32, back-filled) | api_key (i16) | api_version (i16)
//!           | corr_id (i32, back-filled) | client_id (string)
//! response: size (i32, frame prefix) | corr_id (i32)
//! ```

use crate::buf::WireBuf;
use crate::error::ProtocolError;

/// Size of the request frame length prefix.
pub const SIZE_PREFIX_LEN: usize = 4;

/// Offset of the API version within a request buffer (after size prefix and
/// api key).
pub const API_VERSION_OFFSET: usize = 6;

/// Offset of the correlation id within a request buffer
/// (size prefix + api key + api version).
pub const CORR_ID_OFFSET: usize = 8;

/// Response header size: frame size prefix plus correlation id.
pub const RESPONSE_HEADER_SIZE: usize = 8;

/// Request kinds understood by this client. The key selects the
/// request-specific payload variant at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ApiKey {
    Produce = 0,
    Fetch = 1,
    Metadata = 3,
    OffsetCommit = 8,
    Heartbeat = 12,
}

impl ApiKey {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(ApiKey::Produce),
            1 => Some(ApiKey::Fetch),
            3 => Some(ApiKey::Metadata),
            8 => Some(ApiKey::OffsetCommit),
            12 => Some(ApiKey::Heartbeat),
            _ => None,
        }
    }
}

/// Request header. Encoded into the output buffer when the request is
/// created; size and correlation id are back-filled on finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub api_key: ApiKey,
    pub api_version: i16,
    pub corr_id: i32,
}

impl RequestHeader {
    pub fn new(api_key: ApiKey, api_version: i16) -> Self {
        Self {
            api_key,
            api_version,
            corr_id: 0,
        }
    }

    /// Writes the header (with a zero size placeholder) and client id.
    pub fn write_to(&self, buf: &mut WireBuf, client_id: Option<&str>) {
        buf.write_i32(0);
        buf.write_i16(self.api_key.as_i16());
        buf.write_i16(self.api_version);
        buf.write_i32(self.corr_id);
        buf.write_str(client_id);
    }
}

/// Decoded response header. The size prefix is consumed by receive framing
/// before the header is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub size: i32,
    pub corr_id: i32,
}

impl ResponseHeader {
    /// Parses the correlation id from a response buffer positioned just
    /// after the size prefix.
    pub fn read_from(buf: &mut WireBuf, size: i32) -> Result<Self, ProtocolError> {
        let corr_id = buf.read_i32()?;
        Ok(Self { size, corr_id })
    }
}
