use tokio::sync::mpsc;

/// Handle for delivering work to a contact's supervisor.
pub(crate) struct Mailbox<C> {
    assignments: mpsc::Sender<Option<C>>,
    signal: mpsc::Sender<bool>,
}

impl<C> Clone for Mailbox<C> {
    fn clone(&self) -> Self {
        Self {
            assignments: self.assignments.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl<C> Mailbox<C> {
    /// Offers a connection to the supervisor. `None` is a wake-up that
    /// restarts outbound attempts. Returns false if the supervisor has
    /// exited.
    pub(crate) async fn assign(&self, offer: Option<C>) -> bool {
        self.assignments.send(offer).await.is_ok()
    }

    /// Enables or disables connections. Returns false if the supervisor
    /// has exited.
    pub(crate) async fn set_enabled(&self, enabled: bool) -> bool {
        self.signal.send(enabled).await.is_ok()
    }

    /// Sender half of the assignment channel alone. The connector holds
    /// this instead of the whole mailbox so the signal channel closes as
    /// soon as the record and its handles drop.
    pub(crate) fn assignments(&self) -> mpsc::Sender<Option<C>> {
        self.assignments.clone()
    }
}

/// Receiving half of a supervisor's mailboxes.
pub(crate) struct Inbox<C> {
    pub(crate) assignments: mpsc::Receiver<Option<C>>,
    pub(crate) signal: mpsc::Receiver<bool>,
}

/// Creates a connected mailbox pair.
pub(crate) fn mailbox<C>(size: usize) -> (Mailbox<C>, Inbox<C>) {
    let (assignments, assignments_rx) = mpsc::channel(size);
    let (signal, signal_rx) = mpsc::channel(size);
    (
        Mailbox { assignments, signal },
        Inbox {
            assignments: assignments_rx,
            signal: signal_rx,
        },
    )
}
