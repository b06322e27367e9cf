use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, NetOpcode, PacketResult, OPCODE_LEN};

/// Application packet: a big endian opcode followed by the fields.
///
/// The field layout belongs to the handlers, this type only splits off the opcode.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PacketData(Bytes);

impl PacketData {
    pub fn new(op: impl NetOpcode, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(OPCODE_LEN + payload.len());
        buf.put_u32(op.into());
        buf.put_slice(payload);
        Self(buf.freeze())
    }

    pub fn from_data(data: Bytes) -> Self {
        Self(data)
    }

    pub fn opcode(&self) -> PacketResult<u32> {
        match &self.0[..] {
            [a, b, c, d, ..] => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
            _ => Err(Error::MissingOpcode(self.0.len())),
        }
    }

    pub fn typed_opcode<Op: NetOpcode>(&self) -> PacketResult<Op> {
        Op::from_raw(self.opcode()?)
    }

    /// Fields after the opcode, empty if the packet is too short
    pub fn payload(&self) -> &[u8] {
        self.0.get(OPCODE_LEN..).unwrap_or_default()
    }

    /// Whole packet, opcode included
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for PacketData {
    fn from(data: Bytes) -> Self {
        Self::from_data(data)
    }
}

impl fmt::Debug for PacketData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PacketData");
        match self.opcode() {
            Ok(op) => s.field("opcode", &format_args!("{op:08X}")),
            Err(_) => s.field("opcode", &None::<u32>),
        };
        s.field("payload", &pretty_hex::simple_hex(&self.payload()))
            .finish()
    }
}
