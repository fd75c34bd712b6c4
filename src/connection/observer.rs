use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use crate::error::CloseReason;
use crate::message::message::Message;

/// Receives every message the frame reader deserializes, in wire order. The reader awaits
///  each call before it handles the next message, so a slow receiver applies back pressure to
///  the peer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageReceiver: Send + Sync + 'static {
    async fn on_message_received(&self, message: Message);
}

#[cfg_attr(test, automock)]
pub trait ConnectionListener: Send + Sync + 'static {
    /// called after a message was handed to the transport in its entirety
    fn on_message_sent(&self, message: &Message);

    /// called exactly once per connection, no matter how many times or from how many places
    ///  it is closed
    fn on_connection_closed(&self, reason: &CloseReason);
}
