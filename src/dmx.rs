//! DMX512 channel buffer.
//!
//! The node core treats the buffer type as an external collaborator; this is
//! a minimal concrete implementation so the node can be built and tested
//! standalone. A host application is free to substitute its own buffer type
//! wherever `DmxBuffer` appears, as long as it implements the same handful
//! of operations.

/// Maximum channel count of a single DMX512 universe.
pub const DMX_UNIVERSE_SIZE: usize = 512;

/// A single DMX512 universe: up to 512 one-byte channel values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DmxBuffer {
    data: Vec<u8>,
}

impl DmxBuffer {
    /// An empty buffer (zero channels set).
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Build a buffer from a slice, truncating to [`DMX_UNIVERSE_SIZE`].
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.set(data);
        buf
    }

    /// Number of channels currently held.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Copy the held channels into `out`, returning the number copied.
    pub fn get(&self, out: &mut [u8]) -> usize {
        let n = self.data.len().min(out.len());
        out[..n].copy_from_slice(&self.data[..n]);
        n
    }

    /// Replace the buffer contents, truncating to [`DMX_UNIVERSE_SIZE`].
    pub fn set(&mut self, data: &[u8]) {
        let n = data.len().min(DMX_UNIVERSE_SIZE);
        self.data.clear();
        self.data.extend_from_slice(&data[..n]);
    }

    /// Per-channel highest-takes-precedence merge: `self[i] = max(self[i], other[i])`.
    /// The merged buffer grows to the longer of the two inputs, with the
    /// shorter one treated as zero-filled past its end.
    pub fn htp_merge(&mut self, other: &DmxBuffer) {
        if other.data.len() > self.data.len() {
            self.data.resize(other.data.len(), 0);
        }
        for (i, &b) in other.data.iter().enumerate() {
            if b > self.data[i] {
                self.data[i] = b;
            }
        }
    }

    /// Raw channel slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl From<&[u8]> for DmxBuffer {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl From<Vec<u8>> for DmxBuffer {
    fn from(mut data: Vec<u8>) -> Self {
        data.truncate(DMX_UNIVERSE_SIZE);
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn htp_merge_takes_channel_max() {
        let mut a = DmxBuffer::from_slice(&[10, 200, 0]);
        let b = DmxBuffer::from_slice(&[50, 100, 50]);
        a.htp_merge(&b);
        assert_eq!(a.as_slice(), &[50, 200, 50]);
    }

    #[test]
    fn set_truncates_to_universe_size() {
        let mut buf = DmxBuffer::new();
        buf.set(&[1u8; 600]);
        assert_eq!(buf.size(), DMX_UNIVERSE_SIZE);
    }

    #[test]
    fn get_copies_available_bytes_only() {
        let buf = DmxBuffer::from_slice(&[1, 2, 3]);
        let mut out = [0u8; 5];
        let n = buf.get(&mut out);
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
    }
}
