//! Fan-out of contact change events to subscribers.

use crate::types::ContactData;
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber.
const DEFAULT_CAPACITY: usize = 64;

/// A change to a contact, carrying a deep snapshot of the durable record.
///
/// For `Updated`, the originating state has already been written to the
/// config store by the time the event is observable.
#[derive(Clone, Debug)]
pub enum ContactEvent {
    Added(ContactData),
    Updated(ContactData),
    Removed { address: String },
}

impl ContactEvent {
    /// Address of the contact the event concerns.
    pub fn address(&self) -> &str {
        match self {
            ContactEvent::Added(data) | ContactEvent::Updated(data) => &data.address,
            ContactEvent::Removed { address } => address,
        }
    }
}

/// Broadcasts [`ContactEvent`]s to any number of subscribers.
///
/// Publishing never blocks and never runs subscriber code: subscribers
/// receive on their own tasks, so a subscriber may freely call back into a
/// contact without deadlocking.
#[derive(Clone, Debug)]
pub struct Publisher {
    sender: broadcast::Sender<ContactEvent>,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContactEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ContactEvent) {
        // Err means there are no subscribers right now
        let _ = self.sender.send(event);
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let publisher = Publisher::default();
        let mut first = publisher.subscribe();
        let mut second = publisher.subscribe();

        publisher.publish(ContactEvent::Removed {
            address: "ricochet:aaaaaaaaaaaaaaaa".into(),
        });

        for receiver in [&mut first, &mut second] {
            let event = receiver.recv().await.unwrap();
            assert_eq!(event.address(), "ricochet:aaaaaaaaaaaaaaaa");
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let publisher = Publisher::default();
        publisher.publish(ContactEvent::Removed {
            address: "ricochet:aaaaaaaaaaaaaaaa".into(),
        });
    }
}
