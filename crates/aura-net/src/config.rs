use std::{
    net::{Ipv4Addr, SocketAddr},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{codec::MAX_PACKET_LEN, NetResult};

/// Initial size of the receive buffer, the largest known packet is about 3700 bytes
pub const DEFAULT_RECV_BUFFER_LEN: usize = 4096;

/// Network settings of a server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetConfig {
    /// Address the server listens on
    pub bind_addr: SocketAddr,
    /// Receive buffer size, only applied when the connection is created
    pub recv_buffer_len: usize,
    /// Envelopes announcing a larger length end the connection
    pub max_packet_len: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 11000)),
            recv_buffer_len: DEFAULT_RECV_BUFFER_LEN,
            max_packet_len: MAX_PACKET_LEN,
        }
    }
}

impl NetConfig {
    pub fn from_toml_str(s: &str) -> NetResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> NetResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
