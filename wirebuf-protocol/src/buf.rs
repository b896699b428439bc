//! Segmented wire buffer with a read cursor and exact-width codec.
//!
//! A [`WireBuf`] owns a growable byte store made of committed segments plus
//! an open write tail. Segments written here stay rewritable for header
//! back-fill until something shares them; zero-copy views and transport
//! hand-offs promote them to refcounted shared segments. The read cursor is
//! an offset/remaining view that never mutates stored content. All
//! multi-byte integers are big-endian on the wire.
//!
//! Read operations re-validate the remaining length and fail the parse (not
//! the program) on shortfall, leaving the cursor where it was. Write
//! operations assume pre-reserved capacity and are unchecked apart from the
//! checksum side effect.

use crate::arena::Arena;
use crate::checksum::StreamingCrc;
use crate::error::{ProtocolError, DEFAULT_MITIGATION};
use crate::varint::{self, MAX_VARINT_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use std::ops::Range;

/// Length prefix value denoting a null string or byte array.
pub const NULL_LEN: i32 = -1;

/// A committed segment. Segments written through this buffer stay owned
/// (and rewritable via [`WireBuf::update`]) until a zero-copy view or a
/// transport hand-off shares them; foreign segments arrive shared.
#[derive(Debug)]
enum Seg {
    Owned(BytesMut),
    Shared(Bytes),
}

impl Seg {
    fn len(&self) -> usize {
        match self {
            Seg::Owned(b) => b.len(),
            Seg::Shared(b) => b.len(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Seg::Owned(b) => b,
            Seg::Shared(b) => b,
        }
    }

    /// Converts to shared in place, once refcounted views are needed.
    fn freeze(&mut self) -> &Bytes {
        if let Seg::Owned(b) = self {
            *self = Seg::Shared(std::mem::take(b).freeze());
        }
        match self {
            Seg::Shared(b) => b,
            Seg::Owned(_) => unreachable!(),
        }
    }
}

/// Owned segmented byte store with a separate read cursor.
#[derive(Debug, Default)]
pub struct WireBuf {
    /// Committed segments.
    segments: Vec<Seg>,
    /// Open write segment.
    tail: BytesMut,
    /// Absolute offset where `tail` begins.
    tail_start: usize,
    /// Total committed length across segments and tail.
    len: usize,
    /// Absolute read offset. Never exceeds `len`.
    reader: usize,
    /// Active streaming checksum, if bracketed by `crc_init`/`crc_finalize`.
    crc: Option<StreamingCrc>,
    /// Underflow mitigation hint, dependent on request type.
    mitigation: Option<&'static str>,
}

impl WireBuf {
    /// Creates a buffer with a hint of how many segments and bytes it will
    /// hold.
    pub fn new(seg_hint: usize, size_hint: usize) -> Self {
        Self {
            segments: Vec::with_capacity(seg_hint),
            tail: BytesMut::with_capacity(size_hint),
            ..Default::default()
        }
    }

    /// Total number of committed bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes available to read from the cursor position.
    pub fn remaining(&self) -> usize {
        self.len - self.reader
    }

    /// Current cursor position.
    pub fn offset(&self) -> usize {
        self.reader
    }

    /// Moves the cursor back to the start of the buffer.
    pub fn rewind(&mut self) {
        self.reader = 0;
    }

    /// Moves the cursor to an absolute position within the committed bytes.
    pub fn seek(&mut self, pos: usize) -> Result<(), ProtocolError> {
        if pos > self.len {
            return Err(self.underflow(pos - self.reader));
        }
        self.reader = pos;
        Ok(())
    }

    /// Sets the human-readable hint carried by subsequent underflow errors.
    pub fn set_mitigation(&mut self, hint: &'static str) {
        self.mitigation = Some(hint);
    }

    fn underflow(&self, wanted: usize) -> ProtocolError {
        tracing::debug!(
            offset = self.reader,
            size = self.len,
            wanted,
            remaining = self.remaining(),
            mitigation = self.mitigation.unwrap_or(DEFAULT_MITIGATION),
            "protocol read buffer underflow"
        );
        ProtocolError::Underflow {
            offset: self.reader,
            wanted,
            remaining: self.remaining(),
            mitigation: self.mitigation,
        }
    }

    fn check_len(&self, wanted: usize) -> Result<(), ProtocolError> {
        if wanted > self.remaining() {
            return Err(self.underflow(wanted));
        }
        Ok(())
    }

    fn close_tail(&mut self) {
        if !self.tail.is_empty() {
            let seg = self.tail.split();
            self.tail_start += seg.len();
            self.segments.push(Seg::Owned(seg));
        }
    }

    /// Returns the slice of the containing segment starting at absolute
    /// offset `of`. Caller guarantees `of < self.len`.
    fn chunk_at(&self, of: usize) -> &[u8] {
        let mut base = 0;
        for seg in &self.segments {
            if of < base + seg.len() {
                return &seg.as_slice()[of - base..];
            }
            base += seg.len();
        }
        &self.tail[of - self.tail_start..]
    }

    fn copy_at(&self, mut of: usize, dst: &mut [u8]) {
        let mut copied = 0;
        while copied < dst.len() {
            let chunk = self.chunk_at(of);
            let n = chunk.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&chunk[..n]);
            copied += n;
            of += n;
        }
    }

    // ------------------------------------------------------------------
    // Write interface
    // ------------------------------------------------------------------

    /// Appends `data` at the current write position, folding it into the
    /// active checksum. Returns the offset of the written bytes.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let of = self.len;
        if let Some(crc) = &mut self.crc {
            crc.update(data);
        }
        self.tail.put_slice(data);
        self.len += data.len();
        of
    }

    /// Appends a foreign segment without copying, folding it into the active
    /// checksum.
    pub fn push(&mut self, seg: Bytes) {
        if seg.is_empty() {
            return;
        }
        if let Some(crc) = &mut self.crc {
            crc.update(&seg);
        }
        self.close_tail();
        self.len += seg.len();
        self.tail_start += seg.len();
        self.segments.push(Seg::Shared(seg));
    }

    /// Overwrites previously written bytes at `of`.
    ///
    /// Must not be called while a checksum is in progress: the overwrite
    /// would silently desynchronize the accumulator from the final byte
    /// content. Any region written through this buffer may be rewritten
    /// until it is shared (by a zero-copy view or a `chunks` hand-off);
    /// foreign segments appended with `push` are always shared.
    pub fn update(&mut self, of: usize, data: &[u8]) {
        assert!(
            self.crc.is_none(),
            "update during checksum calculation desynchronizes the checksum"
        );
        assert!(
            of + data.len() <= self.len,
            "update past committed bytes: {}..{} > {}",
            of,
            of + data.len(),
            self.len
        );
        if of >= self.tail_start {
            let rel = of - self.tail_start;
            self.tail[rel..rel + data.len()].copy_from_slice(data);
            return;
        }
        let mut base = 0;
        for seg in &mut self.segments {
            let seg_len = seg.len();
            if of < base + seg_len {
                let rel = of - base;
                assert!(
                    rel + data.len() <= seg_len,
                    "update straddles a segment boundary at {of}"
                );
                match seg {
                    Seg::Owned(bytes) => {
                        bytes[rel..rel + data.len()].copy_from_slice(data);
                    }
                    Seg::Shared(_) => panic!("update of a shared segment at {of}"),
                }
                return;
            }
            base += seg_len;
        }
        unreachable!("committed segments cover {}..{}", 0, self.tail_start);
    }

    pub fn write_i8(&mut self, v: i8) -> usize {
        self.write(&v.to_be_bytes())
    }

    pub fn write_i16(&mut self, v: i16) -> usize {
        self.write(&v.to_be_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> usize {
        self.write(&v.to_be_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> usize {
        self.write(&v.to_be_bytes())
    }

    /// Writes a varint-encoded signed value.
    pub fn write_varint(&mut self, v: i64) -> usize {
        let mut tmp = [0u8; MAX_VARINT_SIZE];
        let n = varint::encode(v, &mut tmp);
        self.write(&tmp[..n])
    }

    /// Writes a length-prefixed string (2-byte signed length, -1 = null).
    pub fn write_str(&mut self, s: Option<&str>) -> usize {
        match s {
            None => self.write_i16(NULL_LEN as i16),
            Some(s) => {
                let of = self.write_i16(s.len() as i16);
                self.write(s.as_bytes());
                of
            }
        }
    }

    /// Writes a length-prefixed byte array (4-byte signed length, -1 = null).
    pub fn write_kbytes(&mut self, b: Option<&[u8]>) -> usize {
        match b {
            None => self.write_i32(NULL_LEN),
            Some(b) => {
                let of = self.write_i32(b.len() as i32);
                self.write(b);
                of
            }
        }
    }

    /// Writes a byte array with a varint length prefix (newer protocol
    /// versions).
    pub fn write_kbytes_varint(&mut self, b: Option<&[u8]>) -> usize {
        match b {
            None => self.write_varint(NULL_LEN as i64),
            Some(b) => {
                let of = self.write_varint(b.len() as i64);
                self.write(b);
                of
            }
        }
    }

    pub fn update_i8(&mut self, of: usize, v: i8) {
        self.update(of, &v.to_be_bytes());
    }

    pub fn update_i16(&mut self, of: usize, v: i16) {
        self.update(of, &v.to_be_bytes());
    }

    pub fn update_i32(&mut self, of: usize, v: i32) {
        self.update(of, &v.to_be_bytes());
    }

    pub fn update_u32(&mut self, of: usize, v: u32) {
        self.update(of, &v.to_be_bytes());
    }

    pub fn update_i64(&mut self, of: usize, v: i64) {
        self.update(of, &v.to_be_bytes());
    }

    // ------------------------------------------------------------------
    // Checksum bracket
    // ------------------------------------------------------------------

    /// Starts folding all subsequent writes into a checksum.
    pub fn crc_init(&mut self) {
        assert!(self.crc.is_none(), "checksum already in progress");
        self.crc = Some(StreamingCrc::new());
    }

    /// Stops checksum calculation and returns the computed value.
    pub fn crc_finalize(&mut self) -> u32 {
        match self.crc.take() {
            Some(crc) => crc.finalize(),
            None => 0,
        }
    }

    pub fn crc_active(&self) -> bool {
        self.crc.is_some()
    }

    // ------------------------------------------------------------------
    // Read interface
    // ------------------------------------------------------------------

    /// Reads `dst.len()` bytes, advancing the cursor.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<(), ProtocolError> {
        self.check_len(dst.len())?;
        self.copy_at(self.reader, dst);
        self.reader += dst.len();
        Ok(())
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        let mut tmp = [0u8; 1];
        self.read(&mut tmp)?;
        Ok(i8::from_be_bytes(tmp))
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        let mut tmp = [0u8; 2];
        self.read(&mut tmp)?;
        Ok(i16::from_be_bytes(tmp))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let mut tmp = [0u8; 4];
        self.read(&mut tmp)?;
        Ok(i32::from_be_bytes(tmp))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        let mut tmp = [0u8; 8];
        self.read(&mut tmp)?;
        Ok(i64::from_be_bytes(tmp))
    }

    /// Reads a varint-encoded signed value.
    pub fn read_varint(&mut self) -> Result<i64, ProtocolError> {
        let avail = self.remaining().min(MAX_VARINT_SIZE);
        let mut tmp = [0u8; MAX_VARINT_SIZE];
        self.copy_at(self.reader, &mut tmp[..avail]);
        match varint::decode(&tmp[..avail]) {
            Some((v, n)) => {
                self.reader += n;
                Ok(v)
            }
            None => Err(self.underflow(avail + 1)),
        }
    }

    /// Copies `dst.len()` bytes at cursor-relative offset `of` without
    /// disturbing the cursor.
    pub fn peek(&self, of: usize, dst: &mut [u8]) -> Result<(), ProtocolError> {
        self.check_len(of + dst.len())?;
        self.copy_at(self.reader + of, dst);
        Ok(())
    }

    pub fn peek_i8(&self, of: usize) -> Result<i8, ProtocolError> {
        let mut tmp = [0u8; 1];
        self.peek(of, &mut tmp)?;
        Ok(i8::from_be_bytes(tmp))
    }

    pub fn peek_i64(&self, of: usize) -> Result<i64, ProtocolError> {
        let mut tmp = [0u8; 8];
        self.peek(of, &mut tmp)?;
        Ok(i64::from_be_bytes(tmp))
    }

    /// Advances the cursor by `n` bytes without copying.
    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.check_len(n)?;
        self.reader += n;
        Ok(())
    }

    /// Advances the cursor up to absolute position `pos`.
    pub fn skip_to(&mut self, pos: usize) -> Result<(), ProtocolError> {
        self.skip(pos.saturating_sub(self.reader))
    }

    /// Skips a length-prefixed string.
    pub fn skip_str(&mut self) -> Result<(), ProtocolError> {
        let start = self.reader;
        let len = self.read_i16()?;
        if len > 0 {
            if let Err(e) = self.skip(len as usize) {
                self.reader = start;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Returns a zero-copy view of the next `len` bytes if they lie within a
    /// single segment, advancing the cursor. The view stays valid
    /// independently of the buffer because segments are refcounted.
    fn contig_view(&mut self, len: usize) -> Option<Bytes> {
        if len == 0 {
            return Some(Bytes::new());
        }
        self.close_tail();
        let mut base = 0;
        for seg in &mut self.segments {
            let seg_len = seg.len();
            if self.reader < base + seg_len {
                let rel = self.reader - base;
                if rel + len <= seg_len {
                    let view = seg.freeze().slice(rel..rel + len);
                    self.reader += len;
                    return Some(view);
                }
                return None;
            }
            base += seg_len;
        }
        None
    }

    /// Reads a length-prefixed string (2-byte signed length) as a zero-copy
    /// view. A -1 length yields a null string.
    ///
    /// The contiguity-seeking accessor is the sole allocation-avoidance
    /// mechanism here: if the span straddles a segment boundary the parse
    /// fails rather than copying.
    pub fn read_str(&mut self) -> Result<WireStr, ProtocolError> {
        let start = self.reader;
        let res = self.read_str_inner();
        if res.is_err() {
            self.reader = start;
        }
        res
    }

    fn read_str_inner(&mut self) -> Result<WireStr, ProtocolError> {
        let len = self.read_i16()?;
        if len < 0 {
            return Ok(WireStr::null());
        }
        let len = len as usize;
        let at = self.reader;
        let view = match self.contig_view(len) {
            Some(view) => view,
            None => return Err(self.underflow(len)),
        };
        if std::str::from_utf8(&view).is_err() {
            return Err(ProtocolError::InvalidUtf8 { offset: at });
        }
        Ok(WireStr { data: Some(view) })
    }

    /// Reads a length-prefixed byte array (4-byte signed length) as a
    /// zero-copy view. -1 is null; 0 is empty but non-null.
    pub fn read_kbytes(&mut self) -> Result<WireBytes, ProtocolError> {
        let start = self.reader;
        let res = (|| {
            let len = self.read_i32()?;
            self.read_kbytes_body(len as i64)
        })();
        if res.is_err() {
            self.reader = start;
        }
        res
    }

    /// Reads a byte array with a varint length prefix (newer protocol
    /// versions).
    pub fn read_kbytes_varint(&mut self) -> Result<WireBytes, ProtocolError> {
        let start = self.reader;
        let res = (|| {
            let len = self.read_varint()?;
            self.read_kbytes_body(len)
        })();
        if res.is_err() {
            self.reader = start;
        }
        res
    }

    fn read_kbytes_body(&mut self, len: i64) -> Result<WireBytes, ProtocolError> {
        if len < 0 {
            return Ok(WireBytes::null());
        }
        let len = len as usize;
        match self.contig_view(len) {
            Some(view) => Ok(WireBytes { data: Some(view) }),
            None => Err(self.underflow(len)),
        }
    }

    /// Reads a length-prefixed string into `arena` with a trailing NUL,
    /// returning the arena handle, or `None` for a null string.
    pub fn read_str_arena(
        &mut self,
        arena: &mut Arena,
    ) -> Result<Option<Range<usize>>, ProtocolError> {
        let start = self.reader;
        let s = self.read_str()?;
        let Some(s) = s.as_str() else {
            return Ok(None);
        };
        match arena.write_str(s) {
            Some(range) => Ok(Some(range)),
            None => {
                self.reader = start;
                Err(ProtocolError::Parse {
                    offset: start,
                    message: format!("not enough room in arena for {} bytes", s.len() + 1),
                })
            }
        }
    }

    /// Hands the committed content to the transport as refcounted segments.
    /// All segments become shared; no region may be rewritten afterwards.
    pub fn chunks(&mut self) -> Vec<Bytes> {
        self.close_tail();
        self.segments
            .iter_mut()
            .map(|seg| seg.freeze().clone())
            .collect()
    }
}

/// Zero-copy view of a wire string. Null is distinct from empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireStr {
    data: Option<Bytes>,
}

impl WireStr {
    pub fn null() -> Self {
        Self { data: None }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the string content, or `None` for a null string.
    pub fn as_str(&self) -> Option<&str> {
        self.data
            .as_deref()
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// Zero-copy view of a wire byte array. Null is distinct from empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireBytes {
    data: Option<Bytes>,
}

impl WireBytes {
    pub fn null() -> Self {
        Self { data: None }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the content bytes; empty for both null and empty arrays.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrip() {
        let mut buf = WireBuf::new(1, 64);
        buf.write_i8(-5);
        buf.write_i16(-1234);
        buf.write_i32(-123_456_789);
        buf.write_i64(-1_234_567_890_123);

        assert_eq!(buf.read_i8().unwrap(), -5);
        assert_eq!(buf.read_i16().unwrap(), -1234);
        assert_eq!(buf.read_i32().unwrap(), -123_456_789);
        assert_eq!(buf.read_i64().unwrap(), -1_234_567_890_123);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_big_endian_byte_order() {
        // Verified against the raw bytes, independent of host endianness.
        let mut buf = WireBuf::new(1, 16);
        buf.write_i32(0x01020304);
        let chunks = buf.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0][..], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_underflow_leaves_cursor_unchanged() {
        let mut buf = WireBuf::new(1, 16);
        buf.write_i16(7);

        let err = buf.read_i64().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Underflow {
                wanted: 8,
                remaining: 2,
                ..
            }
        ));
        assert_eq!(buf.offset(), 0);
        // The shorter read still succeeds afterwards.
        assert_eq!(buf.read_i16().unwrap(), 7);
    }

    #[test]
    fn test_underflow_carries_mitigation() {
        let mut buf = WireBuf::new(1, 4);
        buf.set_mitigation("enable api.version.request");
        let err = buf.read_i32().unwrap_err();
        assert!(err.to_string().contains("enable api.version.request"));
    }

    #[test]
    fn test_varint_roundtrip_through_buffer() {
        let mut buf = WireBuf::new(1, 64);
        for v in [0i64, -1, 1, 300, -300, i64::MIN, i64::MAX] {
            buf.write_varint(v);
        }
        for v in [0i64, -1, 1, 300, -300, i64::MIN, i64::MAX] {
            assert_eq!(buf.read_varint().unwrap(), v);
        }
    }

    #[test]
    fn test_varint_underflow() {
        let mut buf = WireBuf::new(1, 4);
        // Continuation bit set on every byte, terminator never arrives.
        buf.write(&[0x80, 0x80]);
        let err = buf.read_varint().unwrap_err();
        assert!(matches!(err, ProtocolError::Underflow { .. }));
        assert_eq!(buf.offset(), 0);
    }

    #[test]
    fn test_str_null_empty_content() {
        let mut buf = WireBuf::new(1, 64);
        buf.write_str(None);
        buf.write_str(Some(""));
        buf.write_str(Some("metadata"));

        let s = buf.read_str().unwrap();
        assert!(s.is_null());
        assert_eq!(s.len(), 0);

        let s = buf.read_str().unwrap();
        assert!(!s.is_null());
        assert_eq!(s.len(), 0);
        assert_eq!(s.as_str(), Some(""));

        let s = buf.read_str().unwrap();
        assert_eq!(s.as_str(), Some("metadata"));
    }

    #[test]
    fn test_kbytes_null_empty_content() {
        let mut buf = WireBuf::new(1, 64);
        buf.write_kbytes(None);
        buf.write_kbytes(Some(b""));
        buf.write_kbytes(Some(b"\x00\x01\x02"));

        let b = buf.read_kbytes().unwrap();
        assert!(b.is_null());
        assert_eq!(b.len(), 0);

        let b = buf.read_kbytes().unwrap();
        assert!(!b.is_null());
        assert_eq!(b.len(), 0);

        let b = buf.read_kbytes().unwrap();
        assert_eq!(b.as_bytes(), b"\x00\x01\x02");
    }

    #[test]
    fn test_kbytes_varint_prefix() {
        let mut buf = WireBuf::new(1, 64);
        buf.write_kbytes_varint(Some(b"payload"));
        buf.write_kbytes_varint(None);

        let b = buf.read_kbytes_varint().unwrap();
        assert_eq!(b.as_bytes(), b"payload");
        let b = buf.read_kbytes_varint().unwrap();
        assert!(b.is_null());
    }

    #[test]
    fn test_str_view_survives_further_reads() {
        let mut buf = WireBuf::new(1, 64);
        buf.write_str(Some("first"));
        buf.write_i32(42);

        let s = buf.read_str().unwrap();
        assert_eq!(buf.read_i32().unwrap(), 42);
        // The view is backed by a refcounted segment, not the cursor.
        assert_eq!(s.as_str(), Some("first"));
    }

    #[test]
    fn test_contiguity_failure_across_segments() {
        let mut buf = WireBuf::new(2, 8);
        // Length prefix says 8 bytes, but the content straddles a pushed
        // segment boundary.
        buf.write_i16(8);
        buf.write(b"spli");
        buf.push(Bytes::from_static(b"tted"));

        let start = buf.offset();
        let err = buf.read_str().unwrap_err();
        assert!(matches!(err, ProtocolError::Underflow { wanted: 8, .. }));
        assert_eq!(buf.offset(), start);
    }

    #[test]
    fn test_skip_and_skip_to() {
        let mut buf = WireBuf::new(1, 32);
        buf.write(b"0123456789");

        buf.skip(4).unwrap();
        assert_eq!(buf.offset(), 4);
        buf.skip_to(7).unwrap();
        assert_eq!(buf.offset(), 7);
        // skip_to behind the cursor is a no-op.
        buf.skip_to(2).unwrap();
        assert_eq!(buf.offset(), 7);

        let err = buf.skip(100).unwrap_err();
        assert!(matches!(err, ProtocolError::Underflow { .. }));
        assert_eq!(buf.offset(), 7);
    }

    #[test]
    fn test_skip_str() {
        let mut buf = WireBuf::new(1, 32);
        buf.write_str(Some("ignored"));
        buf.write_str(None);
        buf.write_i16(99);

        buf.skip_str().unwrap();
        buf.skip_str().unwrap();
        assert_eq!(buf.read_i16().unwrap(), 99);
    }

    #[test]
    fn test_peek_does_not_move_cursor() {
        let mut buf = WireBuf::new(1, 32);
        buf.write_i8(1);
        buf.write_i64(777);

        assert_eq!(buf.peek_i8(0).unwrap(), 1);
        assert_eq!(buf.peek_i64(1).unwrap(), 777);
        assert_eq!(buf.offset(), 0);
        assert!(matches!(
            buf.peek_i64(2),
            Err(ProtocolError::Underflow { .. })
        ));
    }

    #[test]
    fn test_read_across_segment_boundary() {
        // Copying reads span segments transparently.
        let mut buf = WireBuf::new(2, 4);
        buf.write(&0x0102030405060708i64.to_be_bytes()[..4]);
        buf.push(Bytes::from_static(&[0x05, 0x06, 0x07, 0x08]));
        assert_eq!(buf.read_i64().unwrap(), 0x0102030405060708);
    }

    #[test]
    fn test_checksum_bracket() {
        let mut buf = WireBuf::new(1, 64);
        buf.write(b"not covered");
        buf.crc_init();
        buf.write(b"hello ");
        buf.write(b"world");
        let split = buf.crc_finalize();
        assert_eq!(split, crc32c::crc32c(b"hello world"));

        buf.crc_init();
        buf.write(b"hello world");
        assert_eq!(buf.crc_finalize(), split);
    }

    #[test]
    fn test_checksum_covers_pushed_segments() {
        let mut buf = WireBuf::new(2, 16);
        buf.crc_init();
        buf.write(b"head");
        buf.push(Bytes::from_static(b"tail"));
        assert_eq!(buf.crc_finalize(), crc32c::crc32c(b"headtail"));
    }

    #[test]
    #[should_panic(expected = "desynchronizes the checksum")]
    fn test_update_during_checksum_asserts() {
        let mut buf = WireBuf::new(1, 16);
        let of = buf.write_i32(0);
        buf.crc_init();
        buf.update_i32(of, 1);
    }

    #[test]
    fn test_update_reaches_closed_segments() {
        // A zero-copy push closes the tail, but the header region written
        // before it must still accept back-fill.
        let mut buf = WireBuf::new(2, 32);
        let size_of = buf.write_i32(0);
        buf.write_i32(0x5EED);
        buf.push(Bytes::from_static(b"zero-copy payload"));

        buf.update_i32(size_of, buf.len() as i32 - 4);
        assert_eq!(buf.read_i32().unwrap(), buf.len() as i32 - 4);
        assert_eq!(buf.read_i32().unwrap(), 0x5EED);
    }

    #[test]
    #[should_panic(expected = "shared segment")]
    fn test_update_within_pushed_segment_panics() {
        let mut buf = WireBuf::new(2, 16);
        buf.write_i32(0);
        buf.push(Bytes::from_static(b"foreign"));
        buf.update_i8(5, 1);
    }

    #[test]
    fn test_update_backfills_length_field() {
        let mut buf = WireBuf::new(1, 32);
        let size_of = buf.write_i32(0);
        buf.write(b"body");
        buf.update_i32(size_of, buf.len() as i32 - 4);

        assert_eq!(buf.read_i32().unwrap(), 4);
    }

    #[test]
    fn test_read_str_arena() {
        let mut arena = Arena::new(64, false);
        let mut buf = WireBuf::new(1, 64);
        buf.write_str(Some("topic-a"));
        buf.write_str(None);

        let handle = buf.read_str_arena(&mut arena).unwrap().unwrap();
        assert_eq!(arena.get_str(&handle), Some("topic-a"));
        assert!(buf.read_str_arena(&mut arena).unwrap().is_none());
    }

    #[test]
    fn test_read_str_arena_exhausted() {
        let mut arena = Arena::new(4, false);
        let mut buf = WireBuf::new(1, 64);
        buf.write_str(Some("too long for the arena"));

        let err = buf.read_str_arena(&mut arena).unwrap_err();
        assert!(matches!(err, ProtocolError::Parse { .. }));
        assert_eq!(buf.offset(), 0);
    }

    #[test]
    fn test_rewind_and_seek() {
        let mut buf = WireBuf::new(1, 16);
        buf.write_i32(5);
        buf.write_i32(6);

        assert_eq!(buf.read_i32().unwrap(), 5);
        buf.rewind();
        assert_eq!(buf.read_i32().unwrap(), 5);
        buf.seek(4).unwrap();
        assert_eq!(buf.read_i32().unwrap(), 6);
        assert!(buf.seek(100).is_err());
    }

    #[test]
    fn test_chunks_hand_off_all_bytes() {
        let mut buf = WireBuf::new(2, 8);
        buf.write(b"ab");
        buf.push(Bytes::from_static(b"cd"));
        buf.write(b"ef");

        let total: Vec<u8> = buf
            .chunks()
            .iter()
            .flat_map(|c| c.iter().copied())
            .collect();
        assert_eq!(total, b"abcdef");
        assert_eq!(buf.len(), 6);
    }
}
