use crate::{connection::ConnectionError, AUTH_HIDDEN_SERVICE};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::{mpsc, Notify};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// In-memory connection whose behavior is scripted by the test.
///
/// `process` blocks until the connection is closed (an error) or
/// interrupted (a graceful break); the request channel yields whatever
/// tokens the test queued through [`Connection::respond_with`] or feeds
/// live through [`Connection::responder`].
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    inbound: bool,
    hostname: String,
    authenticated: AtomicBool,
    signal: Notify,
    flags: Mutex<Flags>,
    responses: Mutex<Option<mpsc::Receiver<String>>>,
    responder: mpsc::Sender<String>,
    open_error: Mutex<Option<ConnectionError>>,
    request: Mutex<Option<(String, String)>>,
    sent: Mutex<Vec<String>>,
}

#[derive(Default)]
struct Flags {
    closed: bool,
    interrupt_pending: bool,
    interrupted: bool,
}

impl Connection {
    fn new(hostname: &str, inbound: bool) -> Self {
        let (responder, responses) = mpsc::channel(8);
        Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                inbound,
                hostname: hostname.to_string(),
                authenticated: AtomicBool::new(true),
                signal: Notify::new(),
                flags: Mutex::new(Flags::default()),
                responses: Mutex::new(Some(responses)),
                responder,
                open_error: Mutex::new(None),
                request: Mutex::new(None),
                sent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A connection the peer initiated.
    pub fn inbound(hostname: &str) -> Self {
        Self::new(hostname, true)
    }

    /// A connection we initiated.
    pub fn outbound(hostname: &str) -> Self {
        Self::new(hostname, false)
    }

    /// Sets whether the connection carries hidden-service authentication.
    pub fn with_authenticated(self, authenticated: bool) -> Self {
        self.inner
            .authenticated
            .store(authenticated, Ordering::Relaxed);
        self
    }

    /// Queues response tokens the peer will send on the request channel.
    pub fn respond_with(self, tokens: &[&str]) -> Self {
        for token in tokens {
            self.inner
                .responder
                .try_send(token.to_string())
                .expect("response script too long");
        }
        self
    }

    /// Makes the next request-channel open fail with `error`.
    pub fn fail_channel_open(self, error: ConnectionError) -> Self {
        *self.inner.open_error.lock().unwrap() = Some(error);
        self
    }

    /// Sender feeding the request channel, for tests that reply live.
    pub fn responder(&self) -> mpsc::Sender<String> {
        self.inner.responder.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.flags.lock().unwrap().closed
    }

    /// Whether the protocol loop was ever broken gracefully.
    pub fn was_interrupted(&self) -> bool {
        self.inner.flags.lock().unwrap().interrupted
    }

    /// The nickname and message delivered on the request channel, if it
    /// was opened.
    pub fn request_sent(&self) -> Option<(String, String)> {
        self.inner.request.lock().unwrap().clone()
    }

    /// Chat messages delivered over this connection.
    pub fn sent_messages(&self) -> Vec<String> {
        self.inner.sent.lock().unwrap().clone()
    }
}

impl crate::connection::Connection for Connection {
    fn id(&self) -> u64 {
        self.inner.id
    }

    fn is_inbound(&self) -> bool {
        self.inner.inbound
    }

    fn remote_hostname(&self) -> String {
        self.inner.hostname.clone()
    }

    fn is_authenticated(&self, scheme: &str) -> bool {
        scheme == AUTH_HIDDEN_SERVICE && self.inner.authenticated.load(Ordering::Relaxed)
    }

    async fn process(&self) -> Result<(), ConnectionError> {
        loop {
            // Register for wakeups before checking the flags so a
            // concurrent close or interrupt is never missed
            let notified = self.inner.signal.notified();
            {
                let mut flags = self.inner.flags.lock().unwrap();
                if flags.closed {
                    return Err(ConnectionError::Closed);
                }
                if flags.interrupt_pending {
                    flags.interrupt_pending = false;
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    async fn open_request_channel(
        &self,
        nickname: &str,
        message: &str,
    ) -> Result<mpsc::Receiver<String>, ConnectionError> {
        if let Some(error) = self.inner.open_error.lock().unwrap().take() {
            return Err(error);
        }
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        *self.inner.request.lock().unwrap() = Some((nickname.to_string(), message.to_string()));
        self.inner
            .responses
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ConnectionError::ChannelOpenFailed("request channel already open".into()))
    }

    async fn send_message(&self, text: &str) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::SendFailed("connection closed".into()));
        }
        self.inner.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn interrupt(&self) {
        let mut flags = self.inner.flags.lock().unwrap();
        flags.interrupt_pending = true;
        flags.interrupted = true;
        drop(flags);
        self.inner.signal.notify_waiters();
    }

    fn close(&self) {
        self.inner.flags.lock().unwrap().closed = true;
        self.inner.signal.notify_waiters();
    }
}
