use std::{cell::OnceCell, io, net::SocketAddr};

use aura_pkt::{PacketBuf, PacketData};
use bytes::BytesMut;
use futures::{SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream},
    net::TcpStream,
};
use tokio_util::{codec::Framed, sync::CancellationToken};

use crate::{
    codec::{build_envelope, DefaultFraming, EnvelopeCodec, FrameLengthResolver, HEADER_LEN},
    crypto::AuraCipher,
    NetConfig, NetResult,
};

/// Address reported when the peer address can't be resolved
pub const ADDR_UNKNOWN: &str = "?";

/// Byte stream a connection runs on
pub trait AuraTransport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl AuraTransport for TcpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

impl AuraTransport for DuplexStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "in-memory transport has no address",
        ))
    }
}

/// Connection state, `Dead` is final
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Handshake was not completed yet
    BeingChecked,
    LoggingIn,
    LoggedIn,
    Dead,
}

/// A single client connection
pub struct AuraConn<T, R = DefaultFraming> {
    framed: Framed<T, EnvelopeCodec<R>>,
    state: ConnState,
    cipher: AuraCipher,
    addr: OnceCell<String>,
    kill: CancellationToken,
}

impl<T, R> AuraConn<T, R>
where
    T: AuraTransport,
    R: FrameLengthResolver,
{
    /// Create a new connection from the `io`, the receive buffer is sized once here
    pub fn new(io: T, cfg: &NetConfig) -> Self {
        Self {
            framed: Framed::with_capacity(
                io,
                EnvelopeCodec::new(cfg.max_packet_len),
                cfg.recv_buffer_len,
            ),
            state: ConnState::BeingChecked,
            cipher: AuraCipher::default(),
            addr: OnceCell::new(),
            kill: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is(&self, state: ConnState) -> bool {
        self.state == state
    }

    /// Updates the state, a dead connection stays dead
    pub fn set_state(&mut self, state: ConnState) {
        if self.state == ConnState::Dead {
            log::warn!("Tried to revive dead connection '{}'.", self.addr());
            return;
        }
        self.state = state;
    }

    pub fn cipher(&self) -> &AuraCipher {
        &self.cipher
    }

    /// Remote address, resolved on first access
    pub fn addr(&self) -> &str {
        self.addr.get_or_init(|| match self.framed.get_ref().peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => ADDR_UNKNOWN.to_string(),
        })
    }

    /// Token to kill the connection from outside its task.
    /// Cancelling it interrupts a pending send.
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_cancelled()
    }

    /// Reads the next complete envelope, still encrypted
    pub async fn read_envelope(&mut self) -> NetResult<BytesMut> {
        match self.framed.next().await {
            Some(Ok(envelope)) => Ok(envelope),
            Some(Err(e)) => Err(e),
            None => Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
        }
    }

    /// Sends the data without encryption.
    /// Failures are logged, they never change the connection state.
    /// A kill aborts the send, the connection is terminated by its task afterwards.
    pub async fn send_raw(&mut self, data: &[u8]) {
        if self.state == ConnState::Dead || self.kill.is_cancelled() {
            return;
        }

        log::trace!("out: {}", pretty_hex::simple_hex(&data));
        let res = tokio::select! {
            res = self.framed.send(data) => res,
            _ = self.kill.cancelled() => {
                log::debug!("Send to '{}' interrupted by kill.", self.addr());
                return;
            }
        };

        if let Err(err) = res {
            log::error!("Unable to send packet to '{}'. ({})", self.addr(), err);
        }
    }

    /// Encrypts the envelope after the 6 byte header and sends it
    pub async fn send(&mut self, envelope: &mut [u8]) {
        self.send_with_header(envelope, HEADER_LEN).await
    }

    /// Encrypts everything after `header_len` and sends the envelope
    pub async fn send_with_header(&mut self, envelope: &mut [u8], header_len: usize) {
        let header_len = header_len.min(envelope.len());
        let count = envelope.len() - header_len;
        self.cipher.encrypt(envelope, header_len, count);
        self.send_raw(envelope).await
    }

    /// Wraps the opcode prefixed packet in an envelope and sends it
    pub async fn send_packet(&mut self, packet: &[u8]) {
        let mut envelope = build_envelope(packet);
        self.send(&mut envelope).await
    }

    pub async fn send_packet_data(&mut self, packet: &PacketData) {
        self.send_packet(packet.as_slice()).await
    }

    /// Sends every packet of the buffer in its own envelope
    pub async fn send_packet_buffer(&mut self, buf: &PacketBuf) {
        for pkt in buf.packets() {
            self.send_packet(pkt).await;
        }
    }

    /// Closes the transport and marks the connection as dead.
    ///
    /// Returns false without touching the transport if the connection
    /// was already terminated.
    pub async fn terminate(&mut self) -> bool {
        if self.state == ConnState::Dead {
            log::warn!("Connection '{}' got terminated multiple times.", self.addr());
            return false;
        }

        if let Err(err) = self.framed.get_mut().shutdown().await {
            log::debug!("Shutdown of '{}' failed: {}", self.addr(), err);
        }
        self.state = ConnState::Dead;
        self.kill.cancel();
        true
    }
}

impl<T, R> Stream for AuraConn<T, R>
where
    T: AuraTransport,
    R: FrameLengthResolver,
{
    type Item = NetResult<BytesMut>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.get_mut().framed.poll_next_unpin(cx)
    }
}
