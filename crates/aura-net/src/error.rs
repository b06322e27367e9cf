use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("IO")]
    IO(#[from] io::Error),
    #[error("Packet: {0}")]
    Packet(#[from] aura_pkt::Error),
    #[error("Config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("Envelope of length {0} is not valid.")]
    FrameSize(usize),
}
