use super::{request, Backoff};
use crate::{
    connection::{Connection, Network},
    identity::Identity,
    metrics::{self, Metrics},
    record::{Contact, Shared},
    CONTACT_PORT,
};
use std::sync::{Arc, Weak};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

/// Spawns an outbound connector for `shared`'s contact.
pub(crate) fn spawn<N: Network>(shared: &Arc<Shared<N>>) -> JoinHandle<()> {
    tokio::spawn(Actor::new(shared).run())
}

struct Actor<N: Network> {
    /// Weak so a contact removed mid-dial does not stay alive for the
    /// lifetime of the retry loop; re-checked after every backoff.
    shared: Weak<Shared<N>>,
    network: N,
    identity: Arc<Identity>,
    metrics: Metrics,
    /// Assignment sender only, never the signal sender: the supervisor's
    /// inbox must close once the last contact handle drops, even while a
    /// connector is still retrying.
    assignments: mpsc::Sender<Option<N::Connection>>,
    address: String,
    hostname: String,
}

impl<N: Network> Actor<N> {
    fn new(shared: &Arc<Shared<N>>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            network: shared.network.clone(),
            identity: shared.identity.clone(),
            metrics: shared.metrics.clone(),
            assignments: shared.mailbox.assignments(),
            address: shared.address.clone(),
            hostname: shared.hostname.clone(),
        }
    }

    /// Whether any contact handle is still alive. The retry loop gives up
    /// once the record is gone.
    fn record_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    async fn run(self) {
        let dial_target = format!("{}.onion:{}", self.hostname, CONTACT_PORT);
        let mut is_request = match self.shared.upgrade() {
            Some(shared) => shared.lock().data.request.is_some(),
            None => return,
        };
        let mut backoff = Backoff::default();

        loop {
            let stream = loop {
                self.metrics
                    .dial_attempts
                    .get_or_create(&metrics::Peer::new(&self.address))
                    .inc();
                match self.network.dial(&dial_target).await {
                    Ok(stream) => break stream,
                    Err(error) => {
                        debug!(contact = %self.address, %error, "contact connection failure");
                        backoff.wait().await;
                        if !self.record_alive() {
                            return;
                        }
                    }
                }
            };
            debug!(contact = %self.address, "successful outbound connection to contact");

            let connection = match self
                .network
                .negotiate_outbound(stream, &self.hostname)
                .await
            {
                Ok(connection) => connection,
                Err(error) => {
                    debug!(contact = %self.address, %error, "outbound version negotiation failed");
                    backoff.wait().await;
                    if !self.record_alive() {
                        return;
                    }
                    continue;
                }
            };

            let known = match self
                .network
                .authenticate_as_client(&connection, self.identity.private_key())
                .await
            {
                Ok(known) => known,
                Err(error) => {
                    debug!(contact = %self.address, %error, "outbound authentication failed");
                    connection.close();
                    backoff.wait().await;
                    if !self.record_alive() {
                        return;
                    }
                    continue;
                }
            };

            if !known && !is_request {
                // The peer has forgotten us. Keep trying rather than move
                // to a permanent rejection: the peer may merely have lost
                // state.
                debug!(contact = %self.address, "peer does not recognize us as a contact");
                connection.close();
                backoff.wait().await;
                if !self.record_alive() {
                    return;
                }
                continue;
            } else if known && is_request {
                debug!(contact = %self.address, "contact request implicitly accepted by peer");
                let Some(shared) = self.shared.upgrade() else {
                    connection.close();
                    return;
                };
                Contact::from_shared(shared).update_contact_request("Accepted");
                is_request = false;
            }

            if is_request {
                // Blocks until the peer sends a final reply or the
                // connection dies; there is deliberately no timeout here.
                let Some(shared) = self.shared.upgrade() else {
                    connection.close();
                    return;
                };
                let contact = Contact::from_shared(shared);
                if let Err(error) = request::send_contact_request(&contact, &connection).await {
                    debug!(contact = %self.address, %error, "outbound contact request connection closed");
                    backoff.wait().await;
                    if !self.record_alive() {
                        return;
                    }
                    continue;
                }
                debug!(contact = %self.address, "outbound contact request accepted");
            }

            debug!(contact = %self.address, "assigning outbound connection to contact");
            let handoff = connection.clone();
            if self.assignments.send(Some(connection)).await.is_err() {
                handoff.close();
            }
            return;
        }
    }
}
