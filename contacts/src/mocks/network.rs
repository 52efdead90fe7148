use super::Connection;
use crate::{connection::NetworkError, identity::PrivateKey};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// Scriptable overlay dialer and wire-protocol client.
///
/// Every operation succeeds unless a failure has been queued; negotiation
/// hands out connections prepared with [`Network::prepare_connection`]
/// first, then plain outbound connections named after the dialed host.
#[derive(Clone)]
pub struct Network {
    inner: Arc<Inner>,
}

struct Inner {
    dials: AtomicUsize,
    dial_errors: Mutex<VecDeque<NetworkError>>,
    negotiate_errors: Mutex<VecDeque<NetworkError>>,
    auth_errors: Mutex<VecDeque<NetworkError>>,
    known: AtomicBool,
    prepared: Mutex<VecDeque<Connection>>,
    established: Mutex<Vec<Connection>>,
}

impl Network {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                dials: AtomicUsize::new(0),
                dial_errors: Mutex::new(VecDeque::new()),
                negotiate_errors: Mutex::new(VecDeque::new()),
                auth_errors: Mutex::new(VecDeque::new()),
                known: AtomicBool::new(true),
                prepared: Mutex::new(VecDeque::new()),
                established: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fails the next `count` dial attempts.
    pub fn fail_next_dials(&self, count: usize) {
        let mut errors = self.inner.dial_errors.lock().unwrap();
        for _ in 0..count {
            errors.push_back(NetworkError::DialFailed("unreachable".into()));
        }
    }

    /// Fails the next version negotiation with `error`.
    pub fn fail_next_negotiation(&self, error: NetworkError) {
        self.inner.negotiate_errors.lock().unwrap().push_back(error);
    }

    /// Fails the next client authentication with `error`.
    pub fn fail_next_authentication(&self, error: NetworkError) {
        self.inner.auth_errors.lock().unwrap().push_back(error);
    }

    /// Sets whether the peer reports us as a known contact.
    pub fn set_known(&self, known: bool) {
        self.inner.known.store(known, Ordering::Relaxed);
    }

    /// Hands `connection` out on the next successful negotiation.
    pub fn prepare_connection(&self, connection: Connection) {
        self.inner.prepared.lock().unwrap().push_back(connection);
    }

    /// Number of dial attempts so far.
    pub fn dials(&self) -> usize {
        self.inner.dials.load(Ordering::Relaxed)
    }

    /// Every connection handed out by negotiation, in order.
    pub fn established(&self) -> Vec<Connection> {
        self.inner.established.lock().unwrap().clone()
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::connection::Network for Network {
    type Stream = String;
    type Connection = Connection;

    async fn dial(&self, host_port: &str) -> Result<String, NetworkError> {
        self.inner.dials.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.inner.dial_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(host_port.to_string())
    }

    async fn negotiate_outbound(
        &self,
        _stream: String,
        hostname: &str,
    ) -> Result<Connection, NetworkError> {
        if let Some(error) = self.inner.negotiate_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let connection = self
            .inner
            .prepared
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Connection::outbound(hostname));
        self.inner
            .established
            .lock()
            .unwrap()
            .push(connection.clone());
        Ok(connection)
    }

    async fn authenticate_as_client(
        &self,
        _connection: &Connection,
        _key: &PrivateKey,
    ) -> Result<bool, NetworkError> {
        if let Some(error) = self.inner.auth_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.inner.known.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Network as _;

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let network = Network::new();
        network.fail_next_dials(1);

        assert!(network.dial("a.onion:9878").await.is_err());
        assert!(network.dial("a.onion:9878").await.is_ok());
        assert_eq!(network.dials(), 2);
    }

    #[tokio::test]
    async fn test_negotiation_prefers_prepared_connections() {
        let network = Network::new();
        let prepared = Connection::outbound("aaaaaaaaaaaaaaaa");
        network.prepare_connection(prepared.clone());

        let stream = network.dial("a.onion:9878").await.unwrap();
        let first = network
            .negotiate_outbound(stream, "aaaaaaaaaaaaaaaa")
            .await
            .unwrap();
        use crate::connection::Connection as _;
        assert_eq!(first.id(), prepared.id());

        let stream = network.dial("a.onion:9878").await.unwrap();
        let second = network
            .negotiate_outbound(stream, "aaaaaaaaaaaaaaaa")
            .await
            .unwrap();
        assert_ne!(second.id(), prepared.id());
        assert_eq!(network.established().len(), 2);
    }
}
