use crate::{
    connection::{Connection, ConnectionError, Network},
    record::Contact,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Error, Debug)]
pub(crate) enum RequestError {
    #[error("request channel open failed: {0}")]
    OpenFailed(ConnectionError),
    #[error("connection failed: {0}")]
    ConnectionFailed(ConnectionError),
    #[error("contact request answered {0:?}")]
    Refused(String),
}

/// Delivers our contact request over an authenticated outbound connection
/// and waits for a final reply. There is no timeout here: the wait ends
/// only with a reply, a dead connection, or cancellation of the calling
/// task. Returns `Ok` for an accepted request on a connection that is
/// still alive; in every other case the connection has been closed.
pub(crate) async fn send_contact_request<N: Network>(
    contact: &Contact<N>,
    connection: &N::Connection,
) -> Result<(), RequestError> {
    debug!(contact = %contact.address(), "sending contact request");

    // If the wait is abandoned (the connector was cancelled), the guard
    // closes the connection so the processor task below terminates too.
    let mut abandon = Abandon(Some(connection));

    // The protocol processor runs alongside the request channel; its exit
    // means the connection died under us.
    let (process_tx, mut process_rx) = oneshot::channel();
    let processor = connection.clone();
    tokio::spawn(async move {
        let _ = process_tx.send(processor.process().await);
    });

    let (nickname, message) = contact.request_details().unwrap_or_default();
    let mut responses = match connection.open_request_channel(&nickname, &message).await {
        Ok(responses) => responses,
        Err(error) => {
            connection.close();
            let _ = (&mut process_rx).await;
            return Err(RequestError::OpenFailed(error));
        }
    };

    loop {
        tokio::select! {
            result = &mut process_rx => {
                return Err(RequestError::ConnectionFailed(terminal(result, connection)));
            }
            token = responses.recv() => {
                let Some(token) = token else {
                    // Channel torn down without a final reply
                    connection.close();
                    let result = (&mut process_rx).await;
                    return Err(RequestError::ConnectionFailed(terminal(result, connection)));
                };
                if contact.update_contact_request(&token) {
                    // "Pending": delivery acknowledged, keep waiting
                    continue;
                }
                return if token == "Accepted" {
                    // Stop the processor gracefully and keep the connection
                    abandon.disarm();
                    connection.interrupt();
                    match (&mut process_rx).await {
                        Ok(Ok(())) => Ok(()),
                        result => Err(RequestError::ConnectionFailed(terminal(result, connection))),
                    }
                } else {
                    connection.close();
                    let _ = (&mut process_rx).await;
                    Err(RequestError::Refused(token))
                };
            }
        }
    }
}

/// Closes the held connection unless disarmed first.
struct Abandon<'a, C: Connection>(Option<&'a C>);

impl<C: Connection> Abandon<'_, C> {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl<C: Connection> Drop for Abandon<'_, C> {
    fn drop(&mut self) {
        if let Some(connection) = self.0 {
            connection.close();
        }
    }
}

/// Normalizes a processor exit into a connection error. A success return
/// here means the loop broke without anyone asking, which is terminal too.
fn terminal<C: Connection>(
    result: Result<Result<(), ConnectionError>, oneshot::error::RecvError>,
    connection: &C,
) -> ConnectionError {
    match result {
        Ok(Ok(())) => {
            connection.close();
            ConnectionError::UnexpectedInterrupt
        }
        Ok(Err(error)) => error,
        Err(_) => ConnectionError::Closed,
    }
}
