use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use futures::Stream;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_stream::{wrappers::TcpListenerStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{dispatch::FrameHandler, AuraConn, ConnState, NetConfig, NetError, NetResult};

pub type ClientId = usize;

/// Shareable handle to a running connection task
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub id: ClientId,
    ct: CancellationToken,
}

impl ConnHandle {
    pub fn new(id: ClientId, ct: CancellationToken) -> Self {
        Self { id, ct }
    }

    /// Terminates the connection, even while it waits on a send.
    /// The handler hooks still run inside the connection task.
    ///
    /// Returns false if the connection was already killed or terminated.
    pub fn kill(&self) -> bool {
        let alive = !self.ct.is_cancelled();
        self.ct.cancel();
        alive
    }

    pub fn is_killed(&self) -> bool {
        self.ct.is_cancelled()
    }
}

#[derive(Debug)]
struct ServerConnHandle {
    conn: ConnHandle,
    task: JoinHandle<()>,
}

// The task is detached, not aborted, so the terminate hooks still run
impl Drop for ServerConnHandle {
    fn drop(&mut self) {
        self.conn.kill();
    }
}

/// Creates the frame handler for every accepted connection
pub trait MakeFrameHandler: Send + Sync + 'static {
    type Handler: FrameHandler;

    fn make_handler(&self, handle: ConnHandle) -> Self::Handler;
}

impl<F, H> MakeFrameHandler for F
where
    F: Fn(ConnHandle) -> H + Send + Sync + 'static,
    H: FrameHandler,
{
    type Handler = H;

    fn make_handler(&self, handle: ConnHandle) -> H {
        self(handle)
    }
}

pub type HandlerConn<F> = AuraConn<<F as FrameHandler>::Transport, <F as FrameHandler>::Framing>;

/// Runs a connection until it dies or gets killed through its kill token,
/// then hands the handler back.
///
/// All reads, state changes and handler calls of the connection happen
/// inside this future, `on_terminated` runs exactly once at the end.
pub async fn drive_conn<F: FrameHandler>(mut conn: HandlerConn<F>, mut handler: F) -> F {
    let kill = conn.kill_token();
    handler.on_connected(&mut conn).await;

    while !conn.is(ConnState::Dead) {
        tokio::select! {
            biased;
            _ = kill.cancelled() => {
                log::info!("Killing connection '{}'.", conn.addr());
                break;
            }
            frame = conn.next() => match frame {
                Some(Ok(envelope)) => handler.handle_frame(&mut conn, envelope).await,
                Some(Err(err)) => {
                    log::info!("Connection '{}' failed: {}", conn.addr(), err);
                    break;
                }
                None => {
                    log::debug!("Connection '{}' closed by peer.", conn.addr());
                    break;
                }
            },
        }
    }

    if !conn.is(ConnState::Dead) {
        conn.terminate().await;
    }
    handler.on_terminated(&mut conn).await;
    handler
}

/// Accepts connections and spawns one task per connection.
///
/// Dropping the server kills every connection, `shutdown` also waits for them.
pub struct AuraServer<M: MakeFrameHandler> {
    cfg: NetConfig,
    make_handler: M,
    clients: HashMap<ClientId, ServerConnHandle>,
    next_id: AtomicUsize,
}

impl<M: MakeFrameHandler> std::fmt::Debug for AuraServer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuraServer")
            .field("cfg", &self.cfg)
            .field("clients", &self.clients.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl<M: MakeFrameHandler> AuraServer<M> {
    pub fn new(cfg: NetConfig, make_handler: M) -> Self {
        Self {
            cfg,
            make_handler,
            clients: HashMap::new(),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn cfg(&self) -> &NetConfig {
        &self.cfg
    }

    pub fn next_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn client(&self, id: ClientId) -> Option<&ConnHandle> {
        self.clients.get(&id).map(|c| &c.conn)
    }

    /// Number of tracked connections, finished ones are pruned on accept
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Spawns the task for a freshly accepted transport
    pub fn accept(&mut self, io: <M::Handler as FrameHandler>::Transport) -> ClientId {
        self.clients.retain(|_, c| !c.task.is_finished());

        let id = self.next_id();
        let conn = AuraConn::new(io, &self.cfg);
        let handle = ConnHandle::new(id, conn.kill_token());
        log::info!("Accepted connection {} from '{}'.", id, conn.addr());

        let handler = self.make_handler.make_handler(handle.clone());
        let task = tokio::spawn(async move {
            drive_conn(conn, handler).await;
        });

        self.clients.insert(id, ServerConnHandle { conn: handle, task });
        id
    }

    pub async fn serve(
        &mut self,
        mut io_stream: impl Stream<Item = NetResult<<M::Handler as FrameHandler>::Transport>>
            + Unpin,
    ) -> NetResult<()> {
        while let Some(io) = io_stream.next().await {
            match io {
                Ok(io) => {
                    self.accept(io);
                }
                Err(err) => {
                    log::error!("Error while accepting connection: {}", err);
                }
            }
        }

        Ok(())
    }

    /// Kills every connection and waits for the tasks to finish
    pub async fn shutdown(mut self) {
        for client in self.clients.values() {
            client.conn.kill();
        }

        for (_, mut client) in self.clients.drain() {
            if let Err(err) = (&mut client.task).await {
                log::error!("Connection task {} failed: {}", client.conn.id, err);
            }
        }
    }
}

impl<M> AuraServer<M>
where
    M: MakeFrameHandler,
    M::Handler: FrameHandler<Transport = TcpStream>,
{
    /// Binds the configured address and serves until the listener fails
    pub async fn serve_tcp(mut self) -> NetResult<()> {
        let listener = TcpListener::bind(self.cfg.bind_addr).await?;
        log::info!("Listening on {}", self.cfg.bind_addr);
        let stream = TcpListenerStream::new(listener).map(|io| io.map_err(NetError::from));
        self.serve(stream).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        marker::PhantomData,
        net::{IpAddr, Ipv4Addr, SocketAddr},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use aura_pkt::PacketData;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::{
        codec::{FLAG_PING, HANDSHAKE_SUCCESS, SERVER_SEED},
        conn::tests::read_decrypted,
        dispatch::{
            tests::{app_packet, client_envelope, RecordHandler, OP_ECHO},
            PacketHandler, ProtocolDispatcher,
        },
        AuraTransport,
    };

    const PORT: u16 = 11000;
    const OP_LOGIN: u32 = 0x4E22;

    impl AuraTransport for turmoil::net::TcpStream {
        fn peer_addr(&self) -> io::Result<SocketAddr> {
            turmoil::net::TcpStream::peer_addr(self)
        }
    }

    /// Counts the terminate hooks across connection tasks
    #[derive(Debug, Default, Clone)]
    struct Hooks {
        cleanups: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
    }

    impl Hooks {
        fn cleanups(&self) -> usize {
            self.cleanups.load(Ordering::SeqCst)
        }

        fn disconnects(&self) -> usize {
            self.disconnects.load(Ordering::SeqCst)
        }

        async fn wait_cleanup(&self) {
            while self.cleanups() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    }

    /// Echoes every packet back
    struct EchoHandler<T> {
        hooks: Hooks,
        _io: PhantomData<fn() -> T>,
    }

    impl<T> EchoHandler<T> {
        fn new(hooks: &Hooks) -> Self {
            Self {
                hooks: hooks.clone(),
                _io: PhantomData,
            }
        }
    }

    #[async_trait::async_trait]
    impl<T: AuraTransport> PacketHandler for EchoHandler<T> {
        type Transport = T;
        type Error = NetError;

        async fn on_packet(
            &mut self,
            conn: &mut AuraConn<T>,
            opcode: u32,
            packet: PacketData,
        ) -> NetResult<()> {
            if opcode == OP_LOGIN {
                conn.set_state(ConnState::LoggedIn);
            }
            conn.send_packet_data(&packet).await;
            Ok(())
        }

        async fn cleanup(&mut self, _conn: &mut AuraConn<T>) {
            self.hooks.cleanups.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_disconnected(&mut self, _conn: &mut AuraConn<T>) {
            self.hooks.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn read_n<R: tokio::io::AsyncRead + Unpin>(io: &mut R, n: usize) -> Vec<u8> {
        let mut buf = vec![0; n];
        io.read_exact(&mut buf).await.unwrap();
        buf
    }

    fn duplex_server() -> AuraServer<impl MakeFrameHandler<Handler = ProtocolDispatcher<RecordHandler>>>
    {
        AuraServer::new(NetConfig::default(), |_: ConnHandle| {
            ProtocolDispatcher::new(RecordHandler::default())
        })
    }

    fn echo_server(
        hooks: &Hooks,
    ) -> AuraServer<impl MakeFrameHandler<Handler = ProtocolDispatcher<EchoHandler<DuplexStream>>>>
    {
        let hooks = hooks.clone();
        AuraServer::new(NetConfig::default(), move |_: ConnHandle| {
            ProtocolDispatcher::new(EchoHandler::new(&hooks))
        })
    }

    #[tokio::test]
    async fn drive_until_peer_closes() {
        let (server_io, mut client) = duplex(4096);
        let conn = AuraConn::new(server_io, &NetConfig::default());
        let task = tokio::spawn(async move {
            let handler = ProtocolDispatcher::new(RecordHandler::default());
            drive_conn(conn, handler).await.into_inner()
        });

        assert_eq!(read_n(&mut client, 4).await, SERVER_SEED.to_le_bytes());
        client
            .write_all(&client_envelope(&app_packet(0x1, &[]), 0))
            .await
            .unwrap();
        assert_eq!(read_n(&mut client, 7).await, HANDSHAKE_SUCCESS);

        client
            .write_all(&client_envelope(&app_packet(OP_ECHO, b"abc"), 0))
            .await
            .unwrap();
        let env = read_decrypted(&mut client).await;
        assert_eq!(&env[6..], app_packet(OP_ECHO, b"abc"));
        drop(client);

        let handler = task.await.unwrap();
        assert_eq!(handler.packets, vec![(OP_ECHO, b"abc".to_vec())]);
        assert_eq!(handler.connected, 1);
        assert_eq!(handler.cleanups, 1);
        assert_eq!(handler.disconnects, 1);
    }

    #[tokio::test]
    async fn kill_through_handle() {
        let (server_io, mut client) = duplex(4096);
        let mut server = duplex_server();
        server
            .serve(futures::stream::iter([Ok::<_, NetError>(server_io)]))
            .await
            .unwrap();
        assert_eq!(server.client_count(), 1);

        assert_eq!(read_n(&mut client, 4).await, SERVER_SEED.to_le_bytes());
        let handle = server.client(0).unwrap().clone();
        assert!(handle.kill());
        assert!(!handle.kill());
        assert!(handle.is_killed());

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn kill_while_send_blocked() {
        let hooks = Hooks::default();
        // Room for the seed, but not for the handshake reply after it
        let (server_io, mut client) = duplex(8);
        let mut server = echo_server(&hooks);
        server.accept(server_io);

        client
            .write_all(&client_envelope(&app_packet(0x1, &[]), 0))
            .await
            .unwrap();
        // The client never reads, the connection task is stuck sending
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hooks.cleanups(), 0);

        let handle = server.client(0).unwrap().clone();
        assert!(handle.kill());
        tokio::time::timeout(Duration::from_millis(500), server.shutdown())
            .await
            .expect("killed connection must finish");

        assert_eq!(hooks.cleanups(), 1);
        assert_eq!(hooks.disconnects(), 1);
        assert!(!handle.kill());
    }

    #[tokio::test]
    async fn dropped_server_runs_hooks() {
        let hooks = Hooks::default();
        let (server_io, mut client) = duplex(1024);
        let mut server = echo_server(&hooks);
        server.accept(server_io);
        assert_eq!(read_n(&mut client, 4).await, SERVER_SEED.to_le_bytes());

        drop(server);
        tokio::time::timeout(Duration::from_millis(500), hooks.wait_cleanup())
            .await
            .expect("terminate hooks must run");
        assert_eq!(hooks.cleanups(), 1);
        assert_eq!(hooks.disconnects(), 1);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn accept_assigns_ids() {
        let mut server = duplex_server();
        let mut clients: Vec<DuplexStream> = Vec::new();
        for expected in 0..3 {
            let (server_io, client) = duplex(1024);
            assert_eq!(server.accept(server_io), expected);
            clients.push(client);
        }
        assert_eq!(server.client_count(), 3);
        assert!(server.client(3).is_none());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn finished_clients_pruned() {
        let mut server = duplex_server();
        let (server_io, client) = duplex(1024);
        server.accept(server_io);
        drop(client);

        while !server.clients[&0].task.is_finished() {
            tokio::task::yield_now().await;
        }

        let (server_io, _client) = duplex(1024);
        assert_eq!(server.accept(server_io), 1);
        assert_eq!(server.client_count(), 1);
        assert!(server.client(0).is_none());
    }

    #[test]
    fn tcp_session() {
        let mut sim = turmoil::Builder::new().build();
        let hooks = Hooks::default();
        let client_hooks = hooks.clone();

        sim.host("server", move || {
            let hooks = hooks.clone();
            async move {
                let listener = turmoil::net::TcpListener::bind((
                    IpAddr::from(Ipv4Addr::UNSPECIFIED),
                    PORT,
                ))
                .await?;
                let incoming = futures::stream::unfold(listener, |listener| async move {
                    let io = listener.accept().await.map(|(io, _)| io);
                    Some((io.map_err(NetError::from), listener))
                });

                let mut server = AuraServer::new(NetConfig::default(), move |_: ConnHandle| {
                    ProtocolDispatcher::new(EchoHandler::<turmoil::net::TcpStream>::new(&hooks))
                });
                server.serve(Box::pin(incoming)).await?;
                Ok(())
            }
        });

        sim.client("client", async move {
            let mut io = turmoil::net::TcpStream::connect(("server", PORT)).await?;
            assert_eq!(read_n(&mut io, 4).await, b"aruA");

            io.write_all(&client_envelope(&app_packet(0x1, &[]), 0))
                .await?;
            assert_eq!(read_n(&mut io, 7).await, HANDSHAKE_SUCCESS);

            let data: [&[u8]; 3] = [b"", &[1, 2, 3], &[0xAA; 40]];
            for payload in data {
                let pkt = app_packet(OP_LOGIN, payload);
                io.write_all(&client_envelope(&pkt, 0)).await?;
                let env = read_decrypted(&mut io).await;
                assert_eq!(&env[6..], pkt.as_slice());
            }

            io.write_all(&client_envelope(&[1, 2, 3, 4], FLAG_PING))
                .await?;
            let pong = read_n(&mut io, 10).await;
            assert_eq!(&pong[..6], &[0x88, 0x0A, 0, 0, 0, FLAG_PING]);
            let echoed = u32::from_le_bytes(pong[6..].try_into().unwrap());
            assert_eq!(echoed, u32::from_le_bytes([1, 2, 3, 4]) ^ 0x98BA_DCFE);

            drop(io);
            tokio::time::timeout(Duration::from_secs(1), client_hooks.wait_cleanup()).await?;
            assert_eq!(client_hooks.cleanups(), 1);
            assert_eq!(client_hooks.disconnects(), 1);
            Ok(())
        });

        sim.run().unwrap();
    }
}
