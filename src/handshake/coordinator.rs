use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use crate::config::ConnectionConfig;
use crate::connection::address::{update_address, AddressResolver};
use crate::connection::capabilities::ConnectionCapabilities;
use crate::connection::connection::{Connection, Direction};
use crate::error::HandshakeError;
use crate::handshake::handshaker::{HandshakeIo, NegotiatedHeaders};
use crate::handshake::responder::{HandshakeResponder, NodeRole};
use crate::message::codec::MessageCodec;

/// Drives connections from the socket level to message traffic: dialing (for outgoing
///  connections), the header exchange, and the switch to the framed message pipeline.
///
/// A failure at any stage closes the connection exactly once, with a reason that reflects the
///  failure.
pub struct HandshakeCoordinator {
    config: Arc<ConnectionConfig>,
    responder: Arc<dyn HandshakeResponder>,
    codec: Arc<dyn MessageCodec>,
    address_resolver: Option<Arc<dyn AddressResolver>>,
    role: RwLock<NodeRole>,
}

impl HandshakeCoordinator {
    pub fn new(
        config: Arc<ConnectionConfig>,
        responder: Arc<dyn HandshakeResponder>,
        codec: Arc<dyn MessageCodec>,
        address_resolver: Option<Arc<dyn AddressResolver>>,
        role: NodeRole,
    ) -> HandshakeCoordinator {
        HandshakeCoordinator {
            config,
            responder,
            codec,
            address_resolver,
            role: RwLock::new(role),
        }
    }

    pub fn role(&self) -> NodeRole {
        *self.role.read().unwrap()
    }

    /// applies to handshakes that start afterwards
    pub fn set_role(&self, role: NodeRole) {
        *self.role.write().unwrap() = role;
    }

    /// Dials the connection's remote address and performs the handshake
    #[tracing::instrument(skip(self, connection), fields(remote = ?connection.remote_addr()))]
    pub async fn connect(&self, connection: &Arc<Connection>) -> Result<(), HandshakeError> {
        match self.dial(connection).await {
            Ok(stream) => self.initialize(connection, stream).await,
            Err(e) => {
                connection.fail(&e);
                Err(e)
            }
        }
    }

    async fn dial(&self, connection: &Connection) -> Result<TcpStream, HandshakeError> {
        if connection.is_closed() {
            return Err(HandshakeError::Closed);
        }

        debug!("connecting to {:?}", connection.remote_addr());
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(connection.remote_addr())).await
            .map_err(|_| HandshakeError::Timeout)??;

        if is_connection_to_self(stream.local_addr()?, stream.peer_addr()?, self.config.listen_port) {
            warn!("{:?} is this node's own address", connection.remote_addr());
            return Err(HandshakeError::ConnectionToSelf);
        }
        Ok(stream)
    }

    /// Performs the handshake on an established stream (plain TCP, TLS or anything else), and
    ///  starts message traffic if it succeeds
    #[tracing::instrument(skip(self, connection, stream), fields(remote = ?connection.remote_addr()))]
    pub async fn initialize<S>(&self, connection: &Arc<Connection>, stream: S) -> Result<(), HandshakeError>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
    {
        let (stream, leftover, negotiated) = match self.shake(connection, stream).await {
            Ok(result) => result,
            Err(e) => {
                connection.fail(&e);
                return Err(e);
            }
        };

        let capabilities = ConnectionCapabilities::new(negotiated.read, negotiated.written);
        if let Some(resolver) = &self.address_resolver {
            update_address(resolver.as_ref(), connection.remote_addr(), capabilities.remote_reported_ip());
        }

        if connection.is_closed() {
            let e = HandshakeError::Closed;
            connection.fail(&e);
            return Err(e);
        }
        connection.start_messaging(stream, leftover, capabilities, self.codec.clone());
        Ok(())
    }

    async fn shake<S>(&self, connection: &Connection, stream: S) -> Result<(S, Bytes, NegotiatedHeaders), HandshakeError>
    where S: AsyncRead + AsyncWrite + Unpin
    {
        connection.begin_handshake()?;

        let role = self.role();
        let remote = connection.remote_addr();
        let mut io = HandshakeIo::new(stream, &self.config);

        let exchange = async {
            match connection.direction() {
                Direction::Outgoing => io.shake_outgoing(self.responder.as_ref(), role, remote).await,
                Direction::Incoming => io.shake_incoming(self.responder.as_ref(), role, remote).await,
            }
        };
        let negotiated = timeout(self.config.handshake_timeout, exchange).await
            .map_err(|_| HandshakeError::Timeout)??;

        let (stream, leftover) = io.into_parts();
        Ok((stream, leftover, negotiated))
    }
}

fn is_connection_to_self(local: SocketAddr, peer: SocketAddr, listen_port: u16) -> bool {
    local.ip() == peer.ip() && peer.port() == listen_port
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::time::Duration;
    use rstest::rstest;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;
    use crate::connection::address::MockAddressResolver;
    use crate::connection::connection::ConnectionState;
    use crate::error::CloseReason;
    use crate::handshake::responder::StandardResponder;
    use crate::message::codec::GnutellaCodec;
    use crate::message::message::{Message, MessageKind};
    use crate::test_util::message::{query, test_message};
    use crate::test_util::observer::{ChannelReceiver, TrackingListener};

    struct Peer {
        coordinator: HandshakeCoordinator,
        connection: Arc<Connection>,
        listener: Arc<TrackingListener>,
        received: UnboundedReceiver<Message>,
    }

    impl Peer {
        fn new(direction: Direction, remote: &str, role: NodeRole, deflate: bool, address_resolver: Option<Arc<dyn AddressResolver>>) -> Peer {
            let mut config = ConnectionConfig::default_config();
            config.accept_deflate = deflate;
            config.encode_deflate = deflate;
            let config = Arc::new(config);

            let (receiver, received) = ChannelReceiver::new();
            let listener = Arc::new(TrackingListener::new());
            let remote: SocketAddr = remote.parse().unwrap();

            Peer {
                coordinator: HandshakeCoordinator::new(
                    config.clone(),
                    Arc::new(StandardResponder::new(&config, None)),
                    Arc::new(GnutellaCodec::default()),
                    address_resolver,
                    role,
                ),
                connection: Connection::new(direction, remote, false, config, Arc::new(receiver), listener.clone()).unwrap(),
                listener,
                received,
            }
        }
    }

    #[rstest]
    #[case::plain(false)]
    #[case::deflate(true)]
    #[tokio::test]
    async fn test_handshake_and_message_exchange(#[case] deflate: bool) {
        let mut outgoing = Peer::new(Direction::Outgoing, "1.2.3.4:6346", NodeRole::Ultrapeer, deflate, None);
        let mut incoming = Peer::new(Direction::Incoming, "5.6.7.8:3333", NodeRole::Ultrapeer, deflate, None);

        let (a, b) = duplex(1024);
        let (out_result, in_result) = tokio::join!(
            outgoing.coordinator.initialize(&outgoing.connection, a),
            incoming.coordinator.initialize(&incoming.connection, b),
        );
        out_result.unwrap();
        in_result.unwrap();

        for peer in [&outgoing, &incoming] {
            assert_eq!(peer.connection.state(), ConnectionState::Initialized);
            assert!(peer.connection.is_open());
            assert!(peer.connection.connection_time().is_some());
            assert_eq!(peer.connection.is_read_deflated(), deflate);
            assert_eq!(peer.connection.is_write_deflated(), deflate);
        }

        let to_incoming: Vec<Message> = (0..10).map(|_| query(1)).collect();
        for m in &to_incoming {
            outgoing.connection.send(m.clone());
        }
        let to_outgoing = test_message(MessageKind::QueryReply, 3, 2);
        incoming.connection.send(to_outgoing.clone());

        // queries of equal priority may be sent newest first
        let mut received = Vec::new();
        for _ in 0..to_incoming.len() {
            received.push(incoming.received.recv().await.unwrap());
        }
        for expected in &to_incoming {
            assert!(received.contains(expected));
        }
        assert_eq!(outgoing.received.recv().await.unwrap(), to_outgoing);
        assert_eq!(outgoing.listener.wait_for_sent(10).await.len(), 10);

        if deflate {
            assert!(outgoing.connection.bandwidth().sent_saved_from_compression() > 0.0);
            assert!(incoming.connection.bandwidth().read_saved_from_compression() > 0.0);
        }

        outgoing.connection.close();
        assert_eq!(incoming.listener.wait_for_close().await, CloseReason::Framing("end of stream while awaiting header".to_string()));
        assert_eq!(outgoing.listener.close_reasons(), vec![CloseReason::Requested]);
    }

    #[tokio::test]
    async fn test_bad_greeting() {
        let incoming = Peer::new(Direction::Incoming, "5.6.7.8:3333", NodeRole::Ultrapeer, true, None);

        let (a, mut b) = duplex(1024);
        b.write_all(b"HELLO\r\n\r\n").await.unwrap();

        let result = incoming.coordinator.initialize(&incoming.connection, a).await;
        assert!(matches!(result, Err(HandshakeError::BadHandshake(_))));
        assert_eq!(incoming.connection.state(), ConnectionState::Failed);
        assert!(matches!(incoming.listener.close_reasons()[..], [CloseReason::BadHandshake(_)]));
    }

    #[tokio::test]
    async fn test_leaf_rejects_incoming() {
        let outgoing = Peer::new(Direction::Outgoing, "1.2.3.4:6346", NodeRole::Ultrapeer, true, None);
        let incoming = Peer::new(Direction::Incoming, "5.6.7.8:3333", NodeRole::Leaf, true, None);

        let (a, b) = duplex(1024);
        let (out_result, in_result) = tokio::join!(
            outgoing.coordinator.initialize(&outgoing.connection, a),
            incoming.coordinator.initialize(&incoming.connection, b),
        );

        assert!(matches!(out_result, Err(HandshakeError::NoGnutellaOk { code: 503, .. })));
        assert!(matches!(in_result, Err(HandshakeError::NoGnutellaOk { code: 503, .. })));

        let expected = CloseReason::NoGnutellaOk { code: 503, message: "I am a shielded leaf node".to_string() };
        assert_eq!(outgoing.listener.close_reasons(), vec![expected.clone()]);
        assert_eq!(incoming.listener.close_reasons(), vec![expected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let outgoing = Peer::new(Direction::Outgoing, "1.2.3.4:6346", NodeRole::Ultrapeer, true, None);

        // the peer never answers
        let (a, _b) = duplex(64 * 1024);
        let result = outgoing.coordinator.initialize(&outgoing.connection, a).await;

        assert!(matches!(result, Err(HandshakeError::Timeout)));
        assert_eq!(outgoing.listener.close_reasons(), vec![CloseReason::Transport("handshake timed out".to_string())]);
    }

    #[tokio::test]
    async fn test_closed_before_handshake() {
        let outgoing = Peer::new(Direction::Outgoing, "1.2.3.4:6346", NodeRole::Ultrapeer, true, None);
        outgoing.connection.close();

        let (a, _b) = duplex(1024);
        assert!(matches!(outgoing.coordinator.initialize(&outgoing.connection, a).await, Err(HandshakeError::Closed)));
        assert_eq!(outgoing.listener.close_reasons(), vec![CloseReason::Requested]);
    }

    #[tokio::test]
    async fn test_address_update() {
        let mut resolver = MockAddressResolver::new();
        resolver.expect_current_address().return_const(None);
        resolver.expect_is_local_duplicate().return_const(false);
        resolver.expect_set_external_address()
            .withf(|a| *a == "8.8.4.4".parse::<IpAddr>().unwrap())
            .times(1)
            .return_const(());

        let outgoing = Peer::new(Direction::Outgoing, "1.2.3.4:6346", NodeRole::Ultrapeer, true, Some(Arc::new(resolver)));
        // the incoming side reports the address it sees for us
        let incoming = Peer::new(Direction::Incoming, "8.8.4.4:5555", NodeRole::Ultrapeer, true, None);

        let (a, b) = duplex(1024);
        let (out_result, in_result) = tokio::join!(
            outgoing.coordinator.initialize(&outgoing.connection, a),
            incoming.coordinator.initialize(&incoming.connection, b),
        );
        out_result.unwrap();
        in_result.unwrap();

        assert_eq!(outgoing.connection.capabilities().unwrap().remote_reported_ip(), Some("8.8.4.4".parse().unwrap()));
        outgoing.connection.close();
        incoming.connection.close();
    }

    #[tokio::test]
    async fn test_connect_to_self() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut config = ConnectionConfig::default_config();
        config.listen_port = server_addr.port();
        let config = Arc::new(config);

        let listener = Arc::new(TrackingListener::new());
        let (receiver, _rx) = ChannelReceiver::new();
        let connection = Connection::new(Direction::Outgoing, server_addr, false, config.clone(), Arc::new(receiver), listener.clone()).unwrap();
        let coordinator = HandshakeCoordinator::new(config.clone(), Arc::new(StandardResponder::new(&config, None)), Arc::new(GnutellaCodec::default()), None, NodeRole::Ultrapeer);

        assert!(matches!(coordinator.connect(&connection).await, Err(HandshakeError::ConnectionToSelf)));
        assert_eq!(connection.state(), ConnectionState::Failed);
        assert_eq!(listener.close_reasons(), vec![CloseReason::Transport("connection to self".to_string())]);
    }

    #[tokio::test]
    async fn test_connect_and_handshake_over_tcp() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut outgoing = Peer::new(Direction::Outgoing, &server_addr.to_string(), NodeRole::Ultrapeer, true, None);
        let server_task = tokio::spawn(async move {
            let (socket, addr) = server.accept().await.unwrap();
            let incoming = Peer::new(Direction::Incoming, &addr.to_string(), NodeRole::Ultrapeer, true, None);
            incoming.coordinator.initialize(&incoming.connection, socket).await.unwrap();
            incoming.connection.send(query(2));
            incoming
        });

        outgoing.coordinator.connect(&outgoing.connection).await.unwrap();
        let incoming = server_task.await.unwrap();

        assert_eq!(outgoing.received.recv().await.unwrap().kind, MessageKind::Query);
        assert!(outgoing.connection.is_open());

        outgoing.connection.close();
        incoming.connection.close();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        drop(server);

        let outgoing = Peer::new(Direction::Outgoing, &addr.to_string(), NodeRole::Ultrapeer, true, None);
        assert!(matches!(outgoing.coordinator.connect(&outgoing.connection).await, Err(HandshakeError::Io(_))));
        assert!(matches!(outgoing.listener.close_reasons()[..], [CloseReason::Transport(_)]));
    }

    #[test]
    fn test_role() {
        let config = Arc::new(ConnectionConfig::default_config());
        let coordinator = HandshakeCoordinator::new(config.clone(), Arc::new(StandardResponder::new(&config, None)), Arc::new(GnutellaCodec::default()), None, NodeRole::Leaf);
        assert_eq!(coordinator.role(), NodeRole::Leaf);
        coordinator.set_role(NodeRole::Ultrapeer);
        assert_eq!(coordinator.role(), NodeRole::Ultrapeer);
    }

    #[tokio::test]
    async fn test_leftover_bytes_after_handshake() {
        let mut incoming = Peer::new(Direction::Incoming, "5.6.7.8:3333", NodeRole::Ultrapeer, false, None);

        let (a, mut b) = duplex(64 * 1024);
        let task = tokio::spawn(async move {
            b.write_all(b"GNUTELLA CONNECT/0.6\r\nUser-Agent: test\r\n\r\n").await.unwrap();
            let mut response = vec![0u8; 4096];
            let _ = b.read(&mut response).await.unwrap();

            // final response and the first message in a single write
            let mut data = b"GNUTELLA/0.6 200 OK\r\n\r\n".to_vec();
            data.extend_from_slice(&crate::test_util::message::serialized(&[query(1)]));
            b.write_all(&data).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            b
        });

        incoming.coordinator.initialize(&incoming.connection, a).await.unwrap();
        assert_eq!(incoming.received.recv().await.unwrap().kind, MessageKind::Query);

        let _b = task.await.unwrap();
        incoming.connection.close();
    }
}
