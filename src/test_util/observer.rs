use std::sync::Mutex;
use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use crate::connection::observer::{ConnectionListener, MessageReceiver};
use crate::error::CloseReason;
use crate::message::message::Message;

/// Forwards received messages to a channel
pub struct ChannelReceiver {
    sender: UnboundedSender<Message>,
}

impl ChannelReceiver {
    pub fn new() -> (ChannelReceiver, UnboundedReceiver<Message>) {
        let (sender, receiver) = unbounded_channel();
        (ChannelReceiver { sender }, receiver)
    }
}

#[async_trait]
impl MessageReceiver for ChannelReceiver {
    async fn on_message_received(&self, message: Message) {
        // the test may have lost interest
        let _ = self.sender.send(message);
    }
}

#[derive(Default)]
pub struct TrackingListener {
    sent: Mutex<Vec<Message>>,
    close_reasons: Mutex<Vec<CloseReason>>,
    changed: Notify,
}

impl TrackingListener {
    pub fn new() -> TrackingListener {
        TrackingListener::default()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn close_reasons(&self) -> Vec<CloseReason> {
        self.close_reasons.lock().unwrap().clone()
    }

    pub async fn wait_for_sent(&self, num_messages: usize) -> Vec<Message> {
        loop {
            let changed = self.changed.notified();
            if self.sent.lock().unwrap().len() >= num_messages {
                return self.sent();
            }
            changed.await;
        }
    }

    pub async fn wait_for_close(&self) -> CloseReason {
        loop {
            let changed = self.changed.notified();
            if let Some(reason) = self.close_reasons.lock().unwrap().first() {
                return reason.clone();
            }
            changed.await;
        }
    }
}

impl ConnectionListener for TrackingListener {
    fn on_message_sent(&self, message: &Message) {
        self.sent.lock().unwrap().push(message.clone());
        self.changed.notify_waiters();
    }

    fn on_connection_closed(&self, reason: &CloseReason) {
        self.close_reasons.lock().unwrap().push(reason.clone());
        self.changed.notify_waiters();
    }
}
