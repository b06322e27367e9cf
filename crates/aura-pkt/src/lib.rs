pub mod error;
pub mod opcode;
pub mod packet;
pub mod packet_buf;

pub use error::Error;
pub use opcode::NetOpcode;
pub use packet::PacketData;
pub use packet_buf::PacketBuf;

pub type PacketResult<T> = Result<T, error::Error>;

/// Length of the big endian opcode which starts every packet
pub const OPCODE_LEN: usize = 4;
