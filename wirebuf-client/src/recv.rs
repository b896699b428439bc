//! Transport receive boundary: reassembling response frames.
//!
//! The transport owns the socket and hands over whatever bytes it read.
//! The assembler collects the 4-byte size frame prefix, then accumulates
//! segments zero-copy until the full frame has arrived, at which point the
//! response header is parsed and a complete response buffer is emitted.
//! Anything short of that stays in a partial state across calls.

use crate::buf::MessageBuf;
use bytes::{Buf, Bytes};
use wirebuf_protocol::{ProtocolError, ResponseHeader, SIZE_PREFIX_LEN};

/// Incremental response frame reassembly.
#[derive(Debug)]
pub struct ResponseAssembler {
    prefix: [u8; SIZE_PREFIX_LEN],
    prefix_len: usize,
    partial: Option<MessageBuf>,
    max_size: i32,
}

impl ResponseAssembler {
    /// `max_size` bounds accepted frame sizes; larger (or non-positive)
    /// prefixes fail the parse rather than allocating unboundedly.
    pub fn new(max_size: i32) -> Self {
        Self {
            prefix: [0; SIZE_PREFIX_LEN],
            prefix_len: 0,
            partial: None,
            max_size,
        }
    }

    /// Returns whether a response is partially assembled.
    pub fn is_partial(&self) -> bool {
        self.prefix_len > 0 || self.partial.is_some()
    }

    /// Discards any partially assembled response. Used when the transport
    /// connection is torn down and the byte stream loses continuity.
    pub fn reset(&mut self) {
        self.prefix_len = 0;
        self.partial = None;
    }

    /// Feeds received bytes, appending complete responses to `out`.
    pub fn feed(
        &mut self,
        mut data: Bytes,
        out: &mut Vec<MessageBuf>,
    ) -> Result<(), ProtocolError> {
        while !data.is_empty() {
            if self.partial.is_none() {
                let need = SIZE_PREFIX_LEN - self.prefix_len;
                let take = need.min(data.len());
                self.prefix[self.prefix_len..self.prefix_len + take]
                    .copy_from_slice(&data[..take]);
                self.prefix_len += take;
                data.advance(take);
                if self.prefix_len < SIZE_PREFIX_LEN {
                    return Ok(());
                }
                self.prefix_len = 0;

                let size = i32::from_be_bytes(self.prefix);
                if size < SIZE_PREFIX_LEN as i32 || size > self.max_size {
                    tracing::warn!(size, max = self.max_size, "invalid response frame size");
                    return Err(ProtocolError::Parse {
                        offset: 0,
                        message: format!("invalid response frame size {size}"),
                    });
                }
                self.partial = Some(MessageBuf::new_response(2, size));
                continue;
            }

            let complete = if let Some(partial) = self.partial.as_mut() {
                let need = partial.expected_size as usize - partial.wire.len();
                let take = need.min(data.len());
                partial.wire.push(data.split_to(take));
                partial.wire.len() == partial.expected_size as usize
            } else {
                false
            };

            if complete {
                if let Some(mut resp) = self.partial.take() {
                    let hdr = ResponseHeader::read_from(&mut resp.wire, resp.expected_size)?;
                    resp.corr_id = hdr.corr_id;
                    resp.reshdr = Some(hdr);
                    out.push(resp);
                }
            }
        }
        Ok(())
    }
}
