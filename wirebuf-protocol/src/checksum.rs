//! Streaming CRC32C accumulator.

/// Incremental CRC32C over a sequence of writes.
///
/// Folding `b1` then `b2` yields the same checksum as folding the
/// concatenation `b1 || b2` in one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingCrc {
    state: u32,
}

impl StreamingCrc {
    pub fn new() -> Self {
        Self { state: 0 }
    }

    /// Folds `data` into the running checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.state = crc32c::crc32c_append(self.state, data);
    }

    /// Returns the computed checksum.
    pub fn finalize(self) -> u32 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_one_shot() {
        let mut crc = StreamingCrc::new();
        crc.update(b"hello world");
        assert_eq!(crc.finalize(), crc32c::crc32c(b"hello world"));
    }

    #[test]
    fn test_split_equals_concatenation() {
        let mut split = StreamingCrc::new();
        split.update(b"hello ");
        split.update(b"world");

        let mut whole = StreamingCrc::new();
        whole.update(b"hello world");

        assert_eq!(split.finalize(), whole.finalize());
    }

    #[test]
    fn test_empty_update_is_identity() {
        let mut crc = StreamingCrc::new();
        crc.update(b"abc");
        let before = crc;
        crc.update(b"");
        assert_eq!(crc.finalize(), before.finalize());
    }
}
