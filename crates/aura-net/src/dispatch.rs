use std::fmt::Debug;

use aura_pkt::PacketData;
use bytes::BytesMut;

use crate::{
    codec::{
        echo_ping, DefaultFraming, FrameLengthResolver, FLAG_OFFSET, FLAG_PING, HANDSHAKE_SUCCESS,
        HEADER_LEN, SERVER_SEED,
    },
    AuraConn, AuraTransport, ConnState, NetError,
};

/// Handles the complete envelopes of one connection for a protocol variant
#[async_trait::async_trait]
pub trait FrameHandler: Send + 'static {
    type Transport: AuraTransport;
    type Framing: FrameLengthResolver;

    /// Called once before the first envelope is read
    async fn on_connected(&mut self, conn: &mut AuraConn<Self::Transport, Self::Framing>);

    /// Handle one complete, still encrypted envelope
    async fn handle_frame(
        &mut self,
        conn: &mut AuraConn<Self::Transport, Self::Framing>,
        envelope: BytesMut,
    );

    /// Called once after the connection was terminated
    async fn on_terminated(&mut self, conn: &mut AuraConn<Self::Transport, Self::Framing>);
}

/// Application packet handler
#[async_trait::async_trait]
pub trait PacketHandler: Send + 'static {
    type Transport: AuraTransport;
    type Error: From<NetError> + Debug + Send;

    async fn on_connected(&mut self, _conn: &mut AuraConn<Self::Transport>) {}

    /// Handle a decrypted packet, `packet` still starts with the opcode
    async fn on_packet(
        &mut self,
        conn: &mut AuraConn<Self::Transport>,
        opcode: u32,
        packet: PacketData,
    ) -> Result<(), Self::Error>;

    /// Teardown after the connection was terminated, e.g. persisting state
    async fn cleanup(&mut self, _conn: &mut AuraConn<Self::Transport>) {}

    async fn on_disconnected(&mut self, _conn: &mut AuraConn<Self::Transport>) {}
}

/// Default protocol: seed on connect, ping echo, handshake, then
/// forwarding packets to the `PacketHandler`
#[derive(Debug, Default)]
pub struct ProtocolDispatcher<H> {
    handler: H,
}

impl<H: PacketHandler> ProtocolDispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_inner(self) -> H {
        self.handler
    }

    /// Decrypts the envelope and routes it
    pub async fn dispatch(&mut self, conn: &mut AuraConn<H::Transport>, mut envelope: BytesMut) {
        if conn.is(ConnState::Dead) {
            log::debug!("Dropping envelope for dead connection '{}'.", conn.addr());
            return;
        }

        log::trace!("in: {}", pretty_hex::simple_hex(&envelope));

        let len = envelope.len();
        if len < HEADER_LEN {
            log::warn!("Envelope from '{}' without header, dropped.", conn.addr());
            return;
        }
        conn.cipher()
            .decrypt(&mut envelope, HEADER_LEN, len - HEADER_LEN);

        if envelope[FLAG_OFFSET] == FLAG_PING {
            if echo_ping(&mut envelope) {
                conn.send_raw(&envelope).await;
            } else {
                log::warn!("Ping from '{}' without payload, dropped.", conn.addr());
            }
            return;
        }

        // First packet, skip the challenge and accept
        if conn.is(ConnState::BeingChecked) {
            conn.send_raw(&HANDSHAKE_SUCCESS).await;
            conn.set_state(ConnState::LoggingIn);
            return;
        }

        let packet = PacketData::from_data(envelope.split_off(HEADER_LEN).freeze());
        let opcode = match packet.opcode() {
            Ok(op) => op,
            Err(err) => {
                log::warn!("Invalid packet from '{}': {}", conn.addr(), err);
                return;
            }
        };

        if let Err(err) = self.handler.on_packet(conn, opcode, packet).await {
            log::error!(
                "There has been a problem while handling '{:08X}': {:?}",
                opcode,
                err
            );
        }
    }
}

#[async_trait::async_trait]
impl<H: PacketHandler> FrameHandler for ProtocolDispatcher<H> {
    type Transport = H::Transport;
    type Framing = DefaultFraming;

    async fn on_connected(&mut self, conn: &mut AuraConn<H::Transport>) {
        conn.send_raw(&SERVER_SEED.to_le_bytes()).await;
        self.handler.on_connected(conn).await;
    }

    async fn handle_frame(&mut self, conn: &mut AuraConn<H::Transport>, envelope: BytesMut) {
        self.dispatch(conn, envelope).await
    }

    async fn on_terminated(&mut self, conn: &mut AuraConn<H::Transport>) {
        self.handler.cleanup(conn).await;
        self.handler.on_disconnected(conn).await;
    }
}
