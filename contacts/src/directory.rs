//! The set of known contacts.
//!
//! Contacts live in a map keyed by address; background tasks refer to
//! contacts by address rather than holding strong handles, so removing a
//! contact from the directory lets its supervisor wind down.

use crate::{
    address,
    config::Store,
    connection::{Connection, Network},
    events::{ContactEvent, Publisher},
    identity::Identity,
    metrics::Metrics,
    record::Contact,
    types::ContactData,
};
use prometheus_client::registry::Registry;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid contact address: {0}")]
    InvalidAddress(#[from] address::Error),
    #[error("contact already exists: {0}")]
    AlreadyExists(String),
}

/// Configuration for a [`Directory`].
pub struct Config<N: Network> {
    /// The local identity.
    pub identity: Identity,
    /// Durable store the contact map is persisted in.
    pub store: Store,
    /// Overlay dialer and wire-protocol client.
    pub network: N,
    /// Registry the directory's metrics are registered in.
    pub registry: Arc<Mutex<Registry>>,
}

/// All known contacts, keyed by address.
pub struct Directory<N: Network> {
    identity: Arc<Identity>,
    store: Arc<Store>,
    events: Publisher,
    metrics: Metrics,
    network: N,
    contacts: Mutex<HashMap<String, Contact<N>>>,
}

impl<N: Network> Directory<N> {
    /// Builds the directory from the contacts persisted in the store.
    /// Fails if any stored contact carries an invalid address.
    pub fn new(cfg: Config<N>) -> Result<Self, Error> {
        let directory = Self {
            identity: Arc::new(cfg.identity),
            store: Arc::new(cfg.store),
            events: Publisher::default(),
            metrics: Metrics::new(cfg.registry),
            network: cfg.network,
            contacts: Mutex::new(HashMap::new()),
        };

        let stored: Vec<ContactData> = directory
            .store
            .snapshot()
            .contacts
            .into_values()
            .collect();
        for data in stored {
            let contact = directory.build(data)?;
            directory
                .contacts
                .lock()
                .unwrap()
                .insert(contact.address().to_string(), contact);
        }
        Ok(directory)
    }

    fn build(&self, data: ContactData) -> Result<Contact<N>, Error> {
        Ok(Contact::new(
            data,
            self.network.clone(),
            self.identity.clone(),
            self.store.clone(),
            self.events.clone(),
            self.metrics.clone(),
        )?)
    }

    /// Subscribes to contact change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ContactEvent> {
        self.events.subscribe()
    }

    pub fn contact(&self, address: &str) -> Option<Contact<N>> {
        self.contacts.lock().unwrap().get(address).cloned()
    }

    /// Looks a contact up by its bare onion hostname.
    pub fn contact_by_hostname(&self, hostname: &str) -> Option<Contact<N>> {
        self.contacts
            .lock()
            .unwrap()
            .values()
            .find(|contact| contact.hostname() == hostname)
            .cloned()
    }

    pub fn contacts(&self) -> Vec<Contact<N>> {
        self.contacts.lock().unwrap().values().cloned().collect()
    }

    /// Adds a new contact, persists it and publishes an `Added` event.
    pub fn add_contact(&self, data: ContactData) -> Result<Contact<N>, Error> {
        let mut contacts = self.contacts.lock().unwrap();
        if contacts.contains_key(&data.address) {
            return Err(Error::AlreadyExists(data.address));
        }
        let contact = self.build(data)?;
        let snapshot = contact.snapshot();
        contacts.insert(snapshot.address.clone(), contact.clone());
        drop(contacts);

        self.store
            .lock()
            .contacts
            .insert(snapshot.address.clone(), snapshot.clone());
        self.events.publish(ContactEvent::Added(snapshot));
        Ok(contact)
    }

    /// Removes a contact from the directory and the store. Once the last
    /// outside handle drops, the supervisor closes any active connection
    /// and exits.
    pub fn remove_contact(&self, address: &str) -> bool {
        let removed = self.contacts.lock().unwrap().remove(address).is_some();
        if removed {
            self.store.lock().contacts.remove(address);
            self.events.publish(ContactEvent::Removed {
                address: address.to_string(),
            });
        }
        removed
    }

    /// Assignment port: routes an accepted, authenticated inbound
    /// connection to the matching contact. Connections from peers not in
    /// the directory are closed.
    pub async fn assign_inbound(&self, connection: N::Connection) {
        let hostname = connection.remote_hostname();
        match self.contact_by_hostname(&hostname) {
            Some(contact) => contact.assign_connection(connection).await,
            None => {
                debug!(%hostname, "closing inbound connection from unknown peer");
                connection.close();
            }
        }
    }

    /// Enables connections for every contact.
    pub async fn start_connections(&self) {
        for contact in self.contacts() {
            contact.start_connection().await;
        }
    }

    /// Disables connections for every contact.
    pub async fn stop_connections(&self) {
        for contact in self.contacts() {
            contact.stop_connection().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::PrivateKey,
        mocks,
        types::{ContactStatus, RequestData},
    };
    use std::time::Duration;
    use tokio::time::timeout;

    const LOCAL: &str = "ricochet:bbbbbbbbbbbbbbbb";
    const REMOTE: &str = "ricochet:mmmmmmmmmmmmmmmm";
    const REMOTE_HOST: &str = "mmmmmmmmmmmmmmmm";

    fn directory_with(store: Store) -> Directory<mocks::Network> {
        Directory::new(Config {
            identity: Identity::new(PrivateKey::new([0u8; 32]), LOCAL).unwrap(),
            store,
            network: mocks::Network::new(),
            registry: Arc::new(Mutex::new(Registry::default())),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_loads_contacts_from_store() {
        let store = Store::ephemeral();
        {
            let mut config = store.lock();
            config
                .contacts
                .insert(REMOTE.into(), ContactData::new(REMOTE, "m"));
            let mut rejected = RequestData::new("me", "hi");
            rejected.when_rejected = Some(crate::types::now());
            config.contacts.insert(
                "ricochet:qqqqqqqqqqqqqqqq".into(),
                ContactData::with_request("ricochet:qqqqqqqqqqqqqqqq", "q", rejected),
            );
        }

        let directory = directory_with(store);
        assert_eq!(directory.contacts().len(), 2);
        assert_eq!(
            directory.contact(REMOTE).unwrap().status(),
            ContactStatus::Unknown
        );
        assert_eq!(
            directory
                .contact("ricochet:qqqqqqqqqqqqqqqq")
                .unwrap()
                .status(),
            ContactStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_invalid_stored_address_fails_load() {
        let store = Store::ephemeral();
        store
            .lock()
            .contacts
            .insert("ricochet:bad".into(), ContactData::new("ricochet:bad", "x"));
        let result = Directory::new(Config {
            identity: Identity::new(PrivateKey::new([0u8; 32]), LOCAL).unwrap(),
            store,
            network: mocks::Network::new(),
            registry: Arc::new(Mutex::new(Registry::default())),
        });
        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_add_contact_persists_and_publishes() {
        let directory = directory_with(Store::ephemeral());
        let mut events = directory.subscribe();

        let contact = directory.add_contact(ContactData::new(REMOTE, "m")).unwrap();
        assert_eq!(contact.hostname(), REMOTE_HOST);

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ContactEvent::Added(data) if data.address == REMOTE));
        assert!(directory.store.snapshot().contacts.contains_key(REMOTE));

        assert!(matches!(
            directory.add_contact(ContactData::new(REMOTE, "dup")),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_contact() {
        let directory = directory_with(Store::ephemeral());
        directory.add_contact(ContactData::new(REMOTE, "m")).unwrap();

        assert!(directory.remove_contact(REMOTE));
        assert!(directory.contact(REMOTE).is_none());
        assert!(!directory.store.snapshot().contacts.contains_key(REMOTE));
        assert!(!directory.remove_contact(REMOTE));
    }

    #[tokio::test]
    async fn test_assign_inbound_routes_by_hostname() {
        let directory = directory_with(Store::ephemeral());
        let contact = directory.add_contact(ContactData::new(REMOTE, "m")).unwrap();
        contact.start_connection().await;

        let connection = mocks::Connection::inbound(REMOTE_HOST);
        directory.assign_inbound(connection.clone()).await;

        timeout(Duration::from_secs(5), async {
            while contact.connection().is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("inbound connection was not adopted");
        assert_eq!(contact.status(), ContactStatus::Online);
    }

    #[tokio::test]
    async fn test_assign_inbound_closes_unknown_peers() {
        let directory = directory_with(Store::ephemeral());
        let connection = mocks::Connection::inbound("qqqqqqqqqqqqqqqq");
        directory.assign_inbound(connection.clone()).await;
        assert!(connection.is_closed());
    }
}
