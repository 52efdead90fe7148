//! Per-contact outbound message queue.
//!
//! Messages composed while a contact is offline are queued here; the
//! supervisor flushes the queue whenever a connection comes up.

use crate::connection::Connection;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tracing::debug;

/// Lazily-created message channel for one contact.
#[derive(Debug)]
pub struct Conversation {
    address: String,
    queue: Mutex<VecDeque<String>>,
}

impl Conversation {
    pub(crate) fn new(address: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            queue: Mutex::new(VecDeque::new()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queues a message for delivery on the next live connection.
    pub fn queue_message(&self, text: impl Into<String>) {
        self.queue.lock().unwrap().push_back(text.into());
    }

    /// Number of messages waiting to be delivered.
    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Delivers queued messages over `connection` in order, stopping at the
    /// first failure (the failed message is requeued at the front). Returns
    /// the number of messages delivered.
    pub async fn send_queued_messages<C: Connection>(&self, connection: &C) -> usize {
        let mut sent = 0;
        loop {
            let Some(message) = self.queue.lock().unwrap().pop_front() else {
                return sent;
            };
            if let Err(e) = connection.send_message(&message).await {
                debug!(contact = %self.address, error = %e, "queued message delivery failed");
                self.queue.lock().unwrap().push_front(message);
                return sent;
            }
            sent += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks;

    #[tokio::test]
    async fn test_flush_delivers_in_order() {
        let conversation = Conversation::new("ricochet:aaaaaaaaaaaaaaaa");
        conversation.queue_message("one");
        conversation.queue_message("two");

        let connection = mocks::Connection::outbound("aaaaaaaaaaaaaaaa");
        let sent = conversation.send_queued_messages(&connection).await;

        assert_eq!(sent, 2);
        assert_eq!(conversation.queued(), 0);
        assert_eq!(connection.sent_messages(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_flush_requeues_on_failure() {
        let conversation = Conversation::new("ricochet:aaaaaaaaaaaaaaaa");
        conversation.queue_message("one");
        conversation.queue_message("two");

        let connection = mocks::Connection::outbound("aaaaaaaaaaaaaaaa");
        connection.close();
        let sent = conversation.send_queued_messages(&connection).await;

        assert_eq!(sent, 0);
        assert_eq!(conversation.queued(), 2);
    }
}
