use bytes::Bytes;

/// Size of the frame length prefix.
pub const LEN_PREFIX: usize = 2;

/// Split one socket read into its coalesced frames.
///
/// The wire carries `[u16 length LE][body]`, possibly repeated within a
/// single read. Decoding stops at a zero length, a truncated prefix, or a
/// body that would run past `buf`; the remainder of the read is dropped
/// rather than treated as corruption. A frame split across two reads is
/// lost, not reassembled, matching the protocol as deployed, where
/// peers write whole frames per send.
pub fn split_coalesced(buf: &[u8]) -> FrameSplit<'_> {
    FrameSplit { buf, offset: 0 }
}

/// Iterator over the complete frames of one receive buffer.
pub struct FrameSplit<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl Iterator for FrameSplit<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let rest = &self.buf[self.offset..];
        if rest.len() < LEN_PREFIX {
            return None;
        }
        let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
        if len == 0 || LEN_PREFIX + len > rest.len() {
            return None;
        }
        // Owned copy: the receive buffer is reused for the next read.
        let body = Bytes::copy_from_slice(&rest[LEN_PREFIX..LEN_PREFIX + len]);
        self.offset += LEN_PREFIX + len;
        Some(body)
    }
}
