/// Owned, resizable byte buffer with explicit drop-first-N semantics.
///
/// Backs the sliding recognition window: audio is appended at the tail and
/// evicted from the head as it is consumed or aged out. `drop_front` is
/// O(remaining), not O(total ever buffered).
#[derive(Debug, Default)]
pub struct PcmBuffer {
    data: Vec<u8>,
}

impl PcmBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Removes the first `n` bytes (clamped to the buffer length) and
    /// returns how many were actually dropped.
    pub fn drop_front(&mut self, n: usize) -> usize {
        let n = n.min(self.data.len());
        self.data.drain(..n);
        n
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
