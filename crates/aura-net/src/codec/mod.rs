pub mod envelope;

pub use envelope::EnvelopeCodec;

use bytes::{BufMut, BytesMut};

/// First byte of every envelope
pub const ENVELOPE_MAGIC: u8 = 0x88;
/// Magic + total length + flag
pub const HEADER_LEN: usize = 6;
pub const LENGTH_OFFSET: usize = 1;
pub const FLAG_OFFSET: usize = 5;

pub const FLAG_NORMAL: u8 = 0x00;
/// Ping, the first payload word gets echoed back
pub const FLAG_PING: u8 = 0x01;
/// No encryption for this envelope
pub const FLAG_CLEARTEXT: u8 = 0x03;

/// Sent raw in reply to the first packet of a connection
pub const HANDSHAKE_SUCCESS: [u8; 7] = [0x88, 0x07, 0x00, 0x00, 0x00, 0x00, 0x07];
/// Sent raw right after accepting a connection, reads "Aura"
pub const SERVER_SEED: u32 = 0x4175_7261;
pub const PING_XOR: u32 = 0x98BA_DCFE;

pub const MAX_PACKET_LEN: usize = u16::MAX as usize;

/// Resolves the total length of an envelope from its partially received header
pub trait FrameLengthResolver: Send + 'static {
    /// Bytes required before `frame_len` can be called
    const MIN_HEADER_LEN: usize;

    fn frame_len(buf: &[u8]) -> usize;
}

/// Magic, little endian u32 total length, flag
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFraming;

impl FrameLengthResolver for DefaultFraming {
    const MIN_HEADER_LEN: usize = LENGTH_OFFSET + 4;

    fn frame_len(buf: &[u8]) -> usize {
        peek_length(buf, 0)
    }
}

/// Wraps the packet in an envelope with a normal flag, ready to be encrypted
pub fn build_envelope(packet: &[u8]) -> BytesMut {
    let len = HEADER_LEN + packet.len();
    let mut buf = BytesMut::with_capacity(len);
    buf.put_u8(ENVELOPE_MAGIC);
    buf.put_u32_le(len as u32);
    buf.put_u8(FLAG_NORMAL);
    buf.put_slice(packet);
    buf
}

/// Reads the total envelope length of the envelope starting at `ptr`.
///
/// # Panics
/// If less than 5 bytes are available from `ptr`
pub fn peek_length(buf: &[u8], ptr: usize) -> usize {
    let p = ptr + LENGTH_OFFSET;
    u32::from_le_bytes([buf[p], buf[p + 1], buf[p + 2], buf[p + 3]]) as usize
}

/// Xors the first payload word of a ping envelope with `PING_XOR`,
/// returns false if the payload is too short
pub fn echo_ping(envelope: &mut [u8]) -> bool {
    let Some(word) = envelope.get_mut(HEADER_LEN..HEADER_LEN + 4) else {
        return false;
    };

    let v = u32::from_le_bytes([word[0], word[1], word[2], word[3]]) ^ PING_XOR;
    word.copy_from_slice(&v.to_le_bytes());
    true
}
