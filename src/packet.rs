//! Compressed input packets.

use bytes::BytesMut;

/// Zeroed bytes kept after every staged payload.
///
/// Optimized bitstream readers fetch 32 or 64 bits at once and may read past
/// the end of the payload.
pub const PACKET_PADDING: usize = 64;

/// One unit of encoded bitstream passed to
/// [`Decoder::send_packet`](crate::Decoder::send_packet).
///
/// The packet only borrows the caller's bytes for the duration of the call.
/// An empty packet is the flush signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    data: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Wrap encoded data (no copying is needed).
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// The flush signal: drain buffered frames without new input.
    #[must_use]
    pub fn flush() -> Packet<'static> {
        Packet { data: &[] }
    }

    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if this packet asks the decoder to drain.
    #[must_use]
    pub fn is_flush(&self) -> bool {
        self.data.is_empty()
    }
}

impl<'a> From<&'a [u8]> for Packet<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}

impl<'a> From<&'a Vec<u8>> for Packet<'a> {
    fn from(data: &'a Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Decoder-owned copy of the packet being submitted.
///
/// The buffer is reused across calls and always ends with
/// [`PACKET_PADDING`] zero bytes.
#[derive(Debug)]
pub struct StagedPacket {
    buf: BytesMut,
    len: usize,
}

impl StagedPacket {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(capacity + PACKET_PADDING);
        buf.resize(PACKET_PADDING, 0);
        Self { buf, len: 0 }
    }

    /// Replace the staged payload with `data`.
    pub(crate) fn stage(&mut self, data: &[u8]) {
        self.buf.clear();
        self.buf.reserve(data.len() + PACKET_PADDING);
        self.buf.extend_from_slice(data);
        self.buf.resize(data.len() + PACKET_PADDING, 0);
        self.len = data.len();
    }

    pub(crate) fn clear(&mut self) {
        self.stage(&[]);
    }

    /// The payload, without padding.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The payload followed by the zeroed padding.
    ///
    /// This is the view to hand to bitstream readers that fetch past the end
    /// of the payload, such as C decoders behind FFI.
    #[must_use]
    pub fn padded(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_packet() {
        assert!(Packet::flush().is_flush());
        assert!(!Packet::new(&[0x00, 0x00, 0x01, 0x65]).is_flush());
    }

    #[test]
    fn test_staging_pads_and_reuses() {
        let mut staged = StagedPacket::with_capacity(16);
        staged.stage(&[1, 2, 3, 4, 5]);
        assert_eq!(staged.data(), &[1, 2, 3, 4, 5]);
        assert_eq!(staged.padded().len(), 5 + PACKET_PADDING);
        assert!(staged.padded()[5..].iter().all(|&b| b == 0));

        // Shorter payload must not leave stale bytes in the padding.
        staged.stage(&[9, 9]);
        assert_eq!(staged.data(), &[9, 9]);
        assert!(staged.padded()[2..].iter().all(|&b| b == 0));

        staged.clear();
        assert!(staged.is_empty());
        assert_eq!(staged.padded().len(), PACKET_PADDING);
    }
}
