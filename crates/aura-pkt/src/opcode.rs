use crate::{Error, PacketResult};

/// Typed opcode, converts from and to the raw `u32` on the wire
pub trait NetOpcode: TryFrom<u32> + Into<u32> + Copy + Send + Sync {
    fn from_raw(op: u32) -> PacketResult<Self> {
        Self::try_from(op).map_err(|_| Error::InvalidOpcode(op))
    }
}

impl NetOpcode for u32 {}
