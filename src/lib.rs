//! The connection layer of a Gnutella 0.6 servent: the text based handshake, the framed
//!  message pipeline (optionally deflated), and a per-connection send scheduler that
//!  prioritizes and drops messages when the peer cannot keep up.
//!
//! A [Connection](connection::connection::Connection) is created per peer and handed to the
//!  [HandshakeCoordinator](handshake::coordinator::HandshakeCoordinator), which performs the
//!  handshake and starts message traffic. Received messages go to a
//!  [MessageReceiver](connection::observer::MessageReceiver), sent messages and the end of the
//!  connection are reported to a [ConnectionListener](connection::observer::ConnectionListener).

pub mod config;
pub mod connection;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod message;
pub mod queue;
pub mod stats;
pub mod test_util;
pub mod util;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
