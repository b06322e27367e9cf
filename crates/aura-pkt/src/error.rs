use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Packet of {0} bytes is too short for an opcode")]
    MissingOpcode(usize),
    #[error("Invalid opcode: {0:08X}")]
    InvalidOpcode(u32),
}
