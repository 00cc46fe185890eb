use bytes::{Bytes, BytesMut};

/// Accumulates frames of arbitrary size and hands them back in exact lengths.
///
/// Read streams use it to serve `read_chunk` from backend frames that do not
/// line up with the requested length; write streams use it to cut incoming
/// bytes into fixed-size backend chunks.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, frame: &[u8]) {
        self.pending.extend_from_slice(frame);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Split off exactly `len` bytes if that many are buffered
    pub fn take(&mut self, len: usize) -> Option<Bytes> {
        if self.pending.len() < len {
            return None;
        }
        Some(self.pending.split_to(len).freeze())
    }

    /// Drain everything buffered
    pub fn take_all(&mut self) -> Bytes {
        self.pending.split().freeze()
    }
}
