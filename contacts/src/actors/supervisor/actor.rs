use super::{Inbox, Rejection, REPLACE_AFTER};
use crate::{
    actors::connector,
    connection::{Connection, ConnectionError, Network},
    events::ContactEvent,
    metrics,
    record::{Shared, State, StateChange},
    AUTH_HIDDEN_SERVICE,
};
use std::sync::{Arc, Weak};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, warn};

/// Per-contact supervisor task.
///
/// The supervisor is the only writer of the record's connection field and
/// the only task that runs protocol loops, so at most one loop is ever
/// attached to a contact: a replacement connection is not installed until
/// the previous loop has confirmed its exit.
pub(crate) struct Actor<N: Network> {
    shared: Weak<Shared<N>>,
    address: String,
    inbox: Inbox<N::Connection>,
    /// Mirror of the record's connection field, kept so the connection can
    /// be torn down even after the record itself is gone.
    current: Option<N::Connection>,
    /// Close notification from the active protocol loop.
    closed: Option<oneshot::Receiver<ConnectionError>>,
    /// Running outbound connector, cancelled whenever anything happens.
    outbound: Option<JoinHandle<()>>,
}

enum Event<C> {
    Offer(Option<Option<C>>),
    Closed(Result<ConnectionError, oneshot::error::RecvError>),
    Signal(Option<bool>),
}

impl<N: Network> Actor<N> {
    pub(crate) fn new(shared: &Arc<Shared<N>>, inbox: Inbox<N::Connection>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            address: shared.address.clone(),
            inbox,
            current: None,
            closed: None,
            outbound: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut enabled = false;
        loop {
            if !enabled {
                match self.wait_enabled().await {
                    Some(()) => enabled = true,
                    None => break,
                }
                continue;
            }

            // With no active connection, race an outbound attempt against
            // inbound offers. The connector delivers through the
            // assignment mailbox and is cancelled on the next event.
            if self.current.is_none() && self.outbound.is_none() {
                let Some(shared) = self.shared.upgrade() else {
                    break;
                };
                if shared.should_make_outbound() {
                    self.outbound = Some(connector::spawn(&shared));
                }
            }

            // The close branch pends forever while no protocol loop runs
            let event = tokio::select! {
                offer = self.inbox.assignments.recv() => Event::Offer(offer),
                result = wait_closed(&mut self.closed) => Event::Closed(result),
                signal = self.inbox.signal.recv() => Event::Signal(signal),
            };
            self.cancel_outbound();

            match event {
                Event::Offer(Some(Some(connection))) => {
                    if !self.adopt(connection).await {
                        break;
                    }
                }
                // Wake-up: restart outbound attempts
                Event::Offer(Some(None)) => {}
                Event::Offer(None) | Event::Signal(None) => break,
                Event::Closed(result) => {
                    if !self.connection_closed(result).await {
                        break;
                    }
                }
                Event::Signal(Some(false)) => {
                    debug!(contact = %self.address, "connections disabled");
                    enabled = false;
                }
                Event::Signal(Some(true)) => {}
            }
        }
        self.shutdown().await;
    }

    /// Discards offers until connections are enabled. Returns `None` when
    /// the mailboxes close and the supervisor should exit.
    async fn wait_enabled(&mut self) -> Option<()> {
        loop {
            tokio::select! {
                offer = self.inbox.assignments.recv() => match offer {
                    Some(Some(connection)) => {
                        debug!(
                            contact = %self.address,
                            "discarding connection offer while connections are disabled"
                        );
                        connection.close();
                    }
                    Some(None) => {}
                    None => return None,
                },
                signal = self.inbox.signal.recv() => match signal {
                    Some(true) => {
                        debug!(contact = %self.address, "connections enabled");
                        return Some(());
                    }
                    Some(false) => {}
                    None => return None,
                },
            }
        }
    }

    /// Arbitrates a connection offer and, if accepted, installs it and
    /// starts its protocol loop. Returns false when the record is gone and
    /// the supervisor should exit.
    async fn adopt(&mut self, connection: N::Connection) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            connection.close();
            return false;
        };

        let replacing = {
            let mut state = shared.lock();
            match Self::consider_using(&shared, &mut state, &connection) {
                Ok(()) => state.connection.is_some(),
                Err(rejection) => {
                    drop(state);
                    debug!(contact = %self.address, %rejection, "discarded new connection");
                    shared
                        .metrics
                        .offers_rejected
                        .get_or_create(&metrics::Peer::new(&self.address))
                        .inc();
                    return true;
                }
            }
        };

        // The displaced connection is already closed, but its protocol
        // loop may still be winding down. Installation must wait for its
        // close notification so at most one loop runs per contact.
        if replacing {
            if let Some(closed) = self.closed.take() {
                let _ = closed.await;
            }
        }

        let inbound = connection.is_inbound();
        let (closed_tx, closed_rx) = oneshot::channel();
        let change = {
            let mut state = shared.lock();
            state.connection = Some(connection.clone());
            shared.on_connection_state_changed(&mut state)
        };
        self.current = Some(connection.clone());
        self.closed = Some(closed_rx);
        tokio::spawn(protocol_loop(connection, closed_tx));
        shared
            .metrics
            .connections_installed
            .get_or_create(&metrics::PeerConnection::new(&self.address, inbound))
            .inc();
        self.finish_change(&shared, change).await;
        true
    }

    /// Handles the close notification from the active protocol loop.
    async fn connection_closed(
        &mut self,
        result: Result<ConnectionError, oneshot::error::RecvError>,
    ) -> bool {
        self.closed = None;
        self.current = None;
        match result {
            Ok(error) => {
                debug!(contact = %self.address, %error, "contact connection closed");
            }
            Err(_) => warn!(contact = %self.address, "protocol loop exited without a close reason"),
        }

        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let change = {
            let mut state = shared.lock();
            state.connection = None;
            shared.on_connection_state_changed(&mut state)
        };
        self.finish_change(&shared, change).await;
        true
    }

    /// Publishes a state change and flushes queued messages, with the
    /// contact mutex released. Holding the mutex here would deadlock any
    /// event subscriber that calls back into the contact.
    async fn finish_change(&self, shared: &Arc<Shared<N>>, change: StateChange<N::Connection>) {
        shared.events.publish(ContactEvent::Updated(change.snapshot));
        if let Some((conversation, connection)) = change.flush {
            let sent = conversation.send_queued_messages(&connection).await;
            if sent > 0 {
                debug!(contact = %self.address, sent, "sent queued messages");
            }
        }
    }

    /// Decides whether to adopt a candidate connection. On rejection the
    /// candidate has been closed; on acceptance the displaced connection
    /// (if any) has been closed but the connection field is untouched.
    fn consider_using(
        shared: &Shared<N>,
        state: &mut State<N::Connection>,
        candidate: &N::Connection,
    ) -> Result<(), Rejection> {
        let direction = if candidate.is_inbound() {
            "inbound"
        } else {
            "outbound"
        };
        debug!(contact = %shared.address, direction, "new connection offer");

        match Self::evaluate(shared, state, candidate) {
            Err(rejection) => {
                candidate.close();
                Err(rejection)
            }
            Ok(()) => {
                if let Some(existing) = &state.connection {
                    existing.close();
                }
                Ok(())
            }
        }
    }

    fn evaluate(
        shared: &Shared<N>,
        state: &State<N::Connection>,
        candidate: &N::Connection,
    ) -> Result<(), Rejection> {
        if let Some(existing) = &state.connection {
            if existing.id() == candidate.id() {
                return Err(Rejection::Duplicate);
            }
        }
        if !candidate.is_authenticated(AUTH_HIDDEN_SERVICE) {
            return Err(Rejection::NotAuthenticated);
        }
        let remote = candidate.remote_hostname();
        if remote != shared.hostname {
            return Err(Rejection::HostnameMismatch {
                expected: shared.hostname.clone(),
                actual: remote,
            });
        }
        if state.connection.is_some() && !Self::should_replace(shared, state, candidate) {
            return Err(Rejection::ExistingPreferred);
        }
        Ok(())
    }

    /// Whether `candidate` should displace the existing connection.
    fn should_replace(
        shared: &Shared<N>,
        state: &State<N::Connection>,
        candidate: &N::Connection,
    ) -> bool {
        let Some(existing) = &state.connection else {
            return true;
        };
        if existing.is_inbound() == candidate.is_inbound() {
            // Same direction: the newer connection always wins
            debug!(contact = %shared.address, "replacing same-direction connection");
            return true;
        }
        if state.time_connected.elapsed() > REPLACE_AFTER {
            debug!(contact = %shared.address, "replacing aged connection");
            return true;
        }
        // Both sides connected at once. The side with the lexicographically
        // smaller hostname keeps its outbound connection; evaluated from
        // either end, the same connection survives.
        let remote = candidate.remote_hostname();
        let prefer_outbound = shared.identity.hostname() < remote.as_str();
        if prefer_outbound != candidate.is_inbound() {
            debug!(contact = %shared.address, "replacing connection by hostname order");
            true
        } else {
            debug!(contact = %shared.address, "keeping existing connection by hostname order");
            false
        }
    }

    fn cancel_outbound(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            outbound.abort();
        }
    }

    /// Final teardown once the mailboxes close or the record is dropped.
    async fn shutdown(&mut self) {
        self.cancel_outbound();
        if let Some(connection) = self.current.take() {
            connection.close();
            if let Some(closed) = self.closed.take() {
                let _ = closed.await;
            }
            if let Some(shared) = self.shared.upgrade() {
                let change = {
                    let mut state = shared.lock();
                    state.connection = None;
                    shared.on_connection_state_changed(&mut state)
                };
                self.finish_change(&shared, change).await;
            }
        }
        debug!(contact = %self.address, "exiting contact connection loop");
    }
}

async fn wait_closed(
    closed: &mut Option<oneshot::Receiver<ConnectionError>>,
) -> Result<ConnectionError, oneshot::error::RecvError> {
    match closed.as_mut() {
        Some(receiver) => receiver.await,
        None => std::future::pending().await,
    }
}

/// Runs the protocol loop on the active connection and reports its exit.
/// Any exit is terminal for the connection; a success return means someone
/// broke the loop without closing, which nothing here does on purpose.
async fn protocol_loop<C: Connection>(connection: C, closed: oneshot::Sender<ConnectionError>) {
    debug!(peer = %connection.remote_hostname(), "contact connection ready");
    let error = match connection.process().await {
        Ok(()) => ConnectionError::UnexpectedInterrupt,
        Err(error) => error,
    };
    connection.close();
    let _ = closed.send(error);
}
