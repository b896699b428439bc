//! One-shot scratch arena with aligned allocation.
//!
//! Used to flatten many small variable-length fields out of one response
//! buffer into a single contiguous block that is freed in one go, instead of
//! one heap allocation per field.

use std::ops::Range;

/// Scratch allocator over a pre-sized block.
///
/// Allocations are handed out as offset ranges into the block rather than
/// raw pointers, so several live allocations can coexist under safe
/// borrowing: resolve a range to bytes with [`Arena::get`] when needed.
#[derive(Debug)]
pub struct Arena {
    buf: Vec<u8>,
    of: usize,
    failed: bool,
    assert_on_fail: bool,
}

impl Arena {
    /// Creates an arena with `size` bytes pre-allocated.
    ///
    /// With `assert_on_fail`, exhaustion panics: the caller asserts that its
    /// sizing computation covers everything it will write, and running out
    /// is a programming-contract violation. Without it, exhaustion sets a
    /// sticky failure flag and every subsequent allocation is a no-op, so a
    /// caller can make one final [`Arena::failed`] check instead of checking
    /// every call.
    pub fn new(size: usize, assert_on_fail: bool) -> Self {
        Self {
            buf: vec![0; size],
            of: 0,
            failed: false,
            assert_on_fail,
        }
    }

    /// Allocates `size` bytes, 8-byte aligned relative to the block start.
    ///
    /// The internal offset always advances by `size` rounded up to 8 so any
    /// fixed-width value subsequently placed at a returned offset is
    /// aligned.
    pub fn alloc(&mut self, size: usize) -> Option<Range<usize>> {
        if self.failed {
            return None;
        }
        if self.of + size > self.buf.len() {
            if self.assert_on_fail {
                panic!(
                    "arena exhausted: requested {} + {} > {}",
                    self.of,
                    size,
                    self.buf.len()
                );
            }
            self.failed = true;
            return None;
        }
        let start = self.of;
        self.of += (size + 7) & !7;
        Some(start..start + size)
    }

    /// Allocates and copies `data` into the arena.
    pub fn write(&mut self, data: &[u8]) -> Option<Range<usize>> {
        let range = self.alloc(data.len())?;
        self.buf[range.clone()].copy_from_slice(data);
        Some(range)
    }

    /// Writes `s` with a trailing NUL terminator. The returned range covers
    /// the string bytes only.
    pub fn write_str(&mut self, s: &str) -> Option<Range<usize>> {
        let range = self.alloc(s.len() + 1)?;
        self.buf[range.start..range.start + s.len()].copy_from_slice(s.as_bytes());
        self.buf[range.start + s.len()] = 0;
        Some(range.start..range.start + s.len())
    }

    /// Returns whether a previous allocation failed.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Resolves an allocation handle to its bytes.
    pub fn get(&self, range: &Range<usize>) -> &[u8] {
        &self.buf[range.clone()]
    }

    /// Resolves a [`Arena::write_str`] handle back to a string.
    ///
    /// Returns `None` if the range does not hold valid UTF-8, which only
    /// happens if the handle did not come from `write_str`.
    pub fn get_str(&self, range: &Range<usize>) -> Option<&str> {
        std::str::from_utf8(&self.buf[range.clone()]).ok()
    }
}
