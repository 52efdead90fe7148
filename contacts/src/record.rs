//! The contact record: durable attributes, the per-contact mutex, and the
//! public operations exposed for each contact.
//!
//! A [`Contact`] is a cheap handle over shared state. The connection
//! supervisor and outbound connector run as background tasks and reach the
//! same state through the handle; the supervisor task is spawned lazily by
//! the first call to [`Contact::start_connection`],
//! [`Contact::stop_connection`] or [`Contact::assign_connection`] and lives
//! until every external handle is dropped.
//!
//! Locking discipline: the per-contact mutex is never held across an await
//! point. Every mutation of the durable record is written through to the
//! config store while the mutex is held, and the corresponding event is
//! published only after the mutex is released, so subscribers may call back
//! into the contact freely.

use crate::{
    actors::supervisor::{self, Mailbox},
    address,
    config::Store,
    connection::{Connection, Network},
    conversation::Conversation,
    events::{ContactEvent, Publisher},
    identity::Identity,
    metrics::Metrics,
    types::{self, ContactData, ContactStatus},
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, Once};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Handle to one contact.
pub struct Contact<N: Network> {
    shared: Arc<Shared<N>>,
}

impl<N: Network> Clone for Contact<N> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// State a contact's handles, supervisor and connector share.
pub(crate) struct Shared<N: Network> {
    pub(crate) network: N,
    pub(crate) identity: Arc<Identity>,
    pub(crate) store: Arc<Store>,
    pub(crate) events: Publisher,
    pub(crate) metrics: Metrics,
    pub(crate) address: String,
    /// Bare onion hostname parsed out of `address` at construction.
    pub(crate) hostname: String,
    pub(crate) mailbox: Mailbox<N::Connection>,
    state: Mutex<State<N::Connection>>,
    spawn: Once,
    inbox: Mutex<Option<supervisor::Inbox<N::Connection>>>,
}

/// Mutable state behind the per-contact mutex.
pub(crate) struct State<C> {
    pub(crate) data: ContactData,
    /// Whether connections are administratively enabled.
    pub(crate) conn_enabled: bool,
    /// The active connection. Written only by the supervisor task.
    pub(crate) connection: Option<C>,
    /// When the active connection was installed; drives the age rule of
    /// connection replacement.
    pub(crate) time_connected: Instant,
    conversation: Option<Arc<Conversation>>,
}

/// What to do after a state mutation, once the mutex has been released.
pub(crate) struct StateChange<C> {
    pub(crate) snapshot: ContactData,
    pub(crate) flush: Option<(Arc<Conversation>, C)>,
}

impl<N: Network> Shared<N> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State<N::Connection>> {
        self.state.lock().unwrap()
    }

    pub(crate) fn persist(&self, data: &ContactData) {
        self.store
            .lock()
            .contacts
            .insert(data.address.clone(), data.clone());
    }

    /// Whether the supervisor should be running an outbound connector.
    pub(crate) fn should_make_outbound(&self) -> bool {
        let state = self.lock();
        state.data.status != ContactStatus::Rejected && state.conn_enabled
    }

    /// Applies a request status token to the record and persists it.
    /// Returns whether the request channel should remain open. The caller
    /// publishes the update event after releasing the mutex.
    pub(crate) fn apply_request_status(
        &self,
        state: &mut State<N::Connection>,
        status: &str,
    ) -> bool {
        let now = types::now();
        let keep_open = match status {
            "Pending" => {
                if let Some(request) = &mut state.data.request {
                    request.when_delivered = Some(now);
                }
                true
            }
            "Accepted" => {
                state.data.request = None;
                state.data.status = if state.connection.is_some() {
                    ContactStatus::Online
                } else {
                    ContactStatus::Unknown
                };
                false
            }
            "Rejected" => {
                if let Some(request) = &mut state.data.request {
                    request.when_rejected = Some(now);
                }
                false
            }
            "Error" => {
                if let Some(request) = &mut state.data.request {
                    request.when_rejected = Some(now);
                    request.remote_error = Some("error occurred".to_string());
                }
                false
            }
            other => {
                warn!(contact = %self.address, status = other, "unknown contact request status");
                return false;
            }
        };
        self.persist(&state.data);
        keep_open
    }

    /// Reconciles the durable record with the connection field after the
    /// supervisor changed it. Persists while the mutex is held; the caller
    /// publishes the returned change and flushes the conversation once the
    /// mutex is released.
    pub(crate) fn on_connection_state_changed(
        &self,
        state: &mut State<N::Connection>,
    ) -> StateChange<N::Connection> {
        if let Some(connection) = state.connection.clone() {
            if state.data.request.is_some() && connection.is_inbound() {
                // The peer only lets us in once it has accepted our request
                debug!(contact = %self.address, "contact request implicitly accepted by inbound connection");
                self.apply_request_status(state, "Accepted");
            } else {
                state.data.status = ContactStatus::Online;
            }
        } else if state.data.status == ContactStatus::Online {
            state.data.status = ContactStatus::Offline;
        }

        state.time_connected = Instant::now();
        state.data.last_connected = types::now();
        self.persist(&state.data);

        let snapshot = state.data.clone();
        let flush = match state.connection.clone() {
            Some(connection) => Some((self.conversation(state), connection)),
            None => None,
        };
        StateChange { snapshot, flush }
    }

    pub(crate) fn conversation(&self, state: &mut State<N::Connection>) -> Arc<Conversation> {
        state
            .conversation
            .get_or_insert_with(|| Conversation::new(self.address.clone()))
            .clone()
    }

    /// Hands out the supervisor's inbox. Some exactly once.
    pub(crate) fn take_inbox(&self) -> Option<supervisor::Inbox<N::Connection>> {
        self.inbox.lock().unwrap().take()
    }
}

impl<N: Network> Contact<N> {
    /// Builds a contact from its durable record, validating the address and
    /// normalizing the status from the stored request state.
    pub(crate) fn new(
        mut data: ContactData,
        network: N,
        identity: Arc<Identity>,
        store: Arc<Store>,
        events: Publisher,
        metrics: Metrics,
    ) -> Result<Self, address::Error> {
        let hostname = address::plain_host(&data.address)?.to_string();
        data.status = match &data.request {
            Some(request) if request.rejected() => ContactStatus::Rejected,
            Some(_) => ContactStatus::Request,
            None => ContactStatus::Unknown,
        };
        let address = data.address.clone();
        let (mailbox, inbox) = supervisor::mailbox(supervisor::MAILBOX_SIZE);
        Ok(Self {
            shared: Arc::new(Shared {
                network,
                identity,
                store,
                events,
                metrics,
                address,
                hostname,
                mailbox,
                state: Mutex::new(State {
                    data,
                    conn_enabled: false,
                    connection: None,
                    time_connected: Instant::now(),
                    conversation: None,
                }),
                spawn: Once::new(),
                inbox: Mutex::new(Some(inbox)),
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<Shared<N>>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<N>> {
        &self.shared
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// Bare onion hostname of the peer.
    pub fn hostname(&self) -> &str {
        &self.shared.hostname
    }

    pub fn status(&self) -> ContactStatus {
        self.shared.lock().data.status
    }

    pub fn nickname(&self) -> String {
        self.shared.lock().data.nickname.clone()
    }

    pub fn last_connected(&self) -> Option<DateTime<Utc>> {
        types::parse_time(&self.shared.lock().data.last_connected)
    }

    pub fn when_created(&self) -> Option<DateTime<Utc>> {
        types::parse_time(&self.shared.lock().data.when_created)
    }

    /// Whether an outbound contact request is outstanding.
    pub fn is_request(&self) -> bool {
        self.shared.lock().data.request.is_some()
    }

    /// Deep copy of the durable record.
    pub fn snapshot(&self) -> ContactData {
        self.shared.lock().data.clone()
    }

    /// The active connection, if any.
    pub fn connection(&self) -> Option<N::Connection> {
        self.shared.lock().connection.clone()
    }

    /// The lazily-created message channel for this contact.
    pub fn conversation(&self) -> Arc<Conversation> {
        let mut state = self.shared.lock();
        self.shared.conversation(&mut state)
    }

    pub(crate) fn request_details(&self) -> Option<(String, String)> {
        let state = self.shared.lock();
        state
            .data
            .request
            .as_ref()
            .map(|request| (request.from_nickname.clone(), request.text.clone()))
    }

    /// Applies a request status token received from the protocol
    /// ("Pending", "Accepted", "Rejected" or "Error"). Returns whether the
    /// request channel should remain open; false whenever no request is
    /// outstanding.
    pub fn update_contact_request(&self, status: &str) -> bool {
        let mut state = self.shared.lock();
        if state.data.request.is_none() {
            return false;
        }
        let keep_open = self.shared.apply_request_status(&mut state, status);
        let snapshot = state.data.clone();
        drop(state);
        self.shared.events.publish(ContactEvent::Updated(snapshot));
        keep_open
    }

    /// Enables inbound and outbound connections for this contact. Safe to
    /// call repeatedly.
    pub async fn start_connection(&self) {
        self.ensure_supervisor();
        self.shared.lock().conn_enabled = true;
        self.shared.mailbox.set_enabled(true).await;
    }

    /// Disables connections. Outbound attempts are cancelled and further
    /// offers are discarded; an already-active connection is left to
    /// terminate on its own. Safe to call repeatedly.
    pub async fn stop_connection(&self) {
        self.ensure_supervisor();
        self.shared.lock().conn_enabled = false;
        self.shared.mailbox.set_enabled(false).await;
    }

    /// Offers an authenticated connection (inbound or outbound) to this
    /// contact. The supervisor decides asynchronously whether to keep or
    /// close it.
    pub async fn assign_connection(&self, connection: N::Connection) {
        self.ensure_supervisor();
        self.shared.mailbox.assign(Some(connection)).await;
    }

    /// Restarts outbound connection attempts without supplying a
    /// connection, e.g. after overlay connectivity returns.
    pub async fn wake_connection(&self) {
        self.ensure_supervisor();
        self.shared.mailbox.assign(None).await;
    }

    fn ensure_supervisor(&self) {
        self.shared.spawn.call_once(|| {
            if let Some(inbox) = self.shared.take_inbox() {
                tokio::spawn(supervisor::Actor::new(&self.shared, inbox).run());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{identity::PrivateKey, mocks, types::RequestData};
    use prometheus_client::registry::Registry;

    const ADDRESS: &str = "ricochet:aaaaaaaaaaaaaaaa";

    fn test_contact(data: ContactData) -> (Contact<mocks::Network>, Arc<Store>) {
        let store = Arc::new(Store::ephemeral());
        let identity = Arc::new(
            Identity::new(PrivateKey::new([0u8; 32]), "ricochet:zzzzzzzzzzzzzzzz").unwrap(),
        );
        let metrics = Metrics::new(Arc::new(std::sync::Mutex::new(Registry::default())));
        let contact = Contact::new(
            data,
            mocks::Network::new(),
            identity,
            store.clone(),
            Publisher::default(),
            metrics,
        )
        .unwrap();
        (contact, store)
    }

    fn request_contact() -> (Contact<mocks::Network>, Arc<Store>) {
        test_contact(ContactData::with_request(
            ADDRESS,
            "alice",
            RequestData::new("me", "hello"),
        ))
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let store = Arc::new(Store::ephemeral());
        let identity = Arc::new(
            Identity::new(PrivateKey::new([0u8; 32]), "ricochet:zzzzzzzzzzzzzzzz").unwrap(),
        );
        let metrics = Metrics::new(Arc::new(std::sync::Mutex::new(Registry::default())));
        let result = Contact::new(
            ContactData::new("ricochet:nope", "x"),
            mocks::Network::new(),
            identity,
            store,
            Publisher::default(),
            metrics,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_status_normalized_from_request_state() {
        let mut data = ContactData::new(ADDRESS, "alice");
        data.status = ContactStatus::Online;
        let (contact, _) = test_contact(data);
        assert_eq!(contact.status(), ContactStatus::Unknown);

        let (contact, _) = request_contact();
        assert_eq!(contact.status(), ContactStatus::Request);

        let mut rejected = RequestData::new("me", "hello");
        rejected.when_rejected = Some(types::now());
        let (contact, _) = test_contact(ContactData::with_request(ADDRESS, "alice", rejected));
        assert_eq!(contact.status(), ContactStatus::Rejected);
    }

    #[tokio::test]
    async fn test_request_pending_keeps_channel_open() {
        let (contact, store) = request_contact();
        assert!(contact.update_contact_request("Pending"));
        let snapshot = contact.snapshot();
        assert!(snapshot.request.unwrap().when_delivered.is_some());
        assert_eq!(snapshot.status, ContactStatus::Request);
        // Persisted under the mutex, before the event
        assert!(
            store.snapshot().contacts[ADDRESS]
                .request
                .as_ref()
                .unwrap()
                .when_delivered
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_request_accepted_clears_request() {
        let (contact, store) = request_contact();
        assert!(!contact.update_contact_request("Accepted"));
        let snapshot = contact.snapshot();
        assert!(snapshot.request.is_none());
        // No connection is held, so acceptance lands on Unknown
        assert_eq!(snapshot.status, ContactStatus::Unknown);
        assert!(store.snapshot().contacts[ADDRESS].request.is_none());
    }

    #[tokio::test]
    async fn test_request_rejected_records_time() {
        let (contact, _) = request_contact();
        assert!(!contact.update_contact_request("Rejected"));
        let snapshot = contact.snapshot();
        let request = snapshot.request.unwrap();
        assert!(request.when_rejected.is_some());
        assert!(request.remote_error.is_none());
        // Remote rejection does not change the status field
        assert_eq!(snapshot.status, ContactStatus::Request);
    }

    #[tokio::test]
    async fn test_request_error_records_remote_error() {
        let (contact, _) = request_contact();
        assert!(!contact.update_contact_request("Error"));
        let request = contact.snapshot().request.unwrap();
        assert!(request.when_rejected.is_some());
        assert_eq!(request.remote_error.as_deref(), Some("error occurred"));
    }

    #[tokio::test]
    async fn test_unknown_token_changes_nothing() {
        let (contact, _) = request_contact();
        let before = contact.snapshot();
        assert!(!contact.update_contact_request("Banana"));
        assert_eq!(contact.snapshot(), before);
    }

    #[tokio::test]
    async fn test_request_never_returns_once_cleared() {
        let (contact, _) = request_contact();
        contact.update_contact_request("Accepted");
        assert!(contact.snapshot().request.is_none());
        for token in ["Pending", "Accepted", "Rejected", "Error"] {
            assert!(!contact.update_contact_request(token));
            assert!(contact.snapshot().request.is_none());
        }
    }

    #[tokio::test]
    async fn test_update_without_request_is_a_noop() {
        let (contact, _) = test_contact(ContactData::new(ADDRESS, "alice"));
        assert!(!contact.update_contact_request("Accepted"));
        assert_eq!(contact.status(), ContactStatus::Unknown);
    }

    #[tokio::test]
    async fn test_accessors() {
        let (contact, _) = test_contact(ContactData::new(ADDRESS, "alice"));
        assert_eq!(contact.address(), ADDRESS);
        assert_eq!(contact.hostname(), "aaaaaaaaaaaaaaaa");
        assert_eq!(contact.nickname(), "alice");
        assert!(contact.when_created().is_some());
        assert!(contact.last_connected().is_none());
        assert!(contact.connection().is_none());
        assert!(!contact.is_request());
    }

    #[tokio::test]
    async fn test_conversation_is_created_once() {
        let (contact, _) = test_contact(ContactData::new(ADDRESS, "alice"));
        let first = contact.conversation();
        first.queue_message("hi");
        let second = contact.conversation();
        assert_eq!(second.queued(), 1);
        assert_eq!(second.address(), ADDRESS);
    }
}
