//! Durable contact data model.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Connection and acquaintance status of a contact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactStatus {
    /// Mutually acquainted but no live connection since startup.
    #[default]
    Unknown,
    /// A previous connection this session has been lost.
    Offline,
    /// A live authenticated connection is held.
    Online,
    /// An outbound contact request has not been answered yet.
    Request,
    /// The peer rejected our contact request.
    Rejected,
}

/// State of an outbound contact request. Present until the peer has
/// acknowledged us as a contact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    /// Nickname offered to the peer.
    pub from_nickname: String,
    /// Message text delivered with the request.
    pub text: String,
    /// When the peer acknowledged delivery, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_delivered: Option<String>,
    /// When the peer rejected the request, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_rejected: Option<String>,
    /// Error reported by the peer, if the request failed remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
}

impl RequestData {
    pub fn new(from_nickname: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from_nickname: from_nickname.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Whether the peer has rejected this request.
    pub fn rejected(&self) -> bool {
        self.when_rejected.is_some()
    }
}

/// Durable attributes of a contact, as persisted in the config store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactData {
    /// Canonical peer identifier (`ricochet:<host>`).
    pub address: String,
    /// Peer-chosen label.
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub status: ContactStatus,
    /// Outstanding outbound contact request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestData>,
    #[serde(default)]
    pub when_created: String,
    #[serde(default)]
    pub last_connected: String,
}

impl ContactData {
    /// A fresh contact created now.
    pub fn new(address: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            nickname: nickname.into(),
            when_created: now(),
            ..Default::default()
        }
    }

    /// A fresh contact with an outstanding request attached.
    pub fn with_request(
        address: impl Into<String>,
        nickname: impl Into<String>,
        request: RequestData,
    ) -> Self {
        let mut data = Self::new(address, nickname);
        data.request = Some(request);
        data.status = ContactStatus::Request;
        data
    }
}

/// Current time in the textual format used throughout the durable record.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a durable timestamp back into a point in time.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_rejected() {
        let mut request = RequestData::new("alice", "hi");
        assert!(!request.rejected());
        request.when_delivered = Some(now());
        assert!(!request.rejected());
        request.when_rejected = Some(now());
        assert!(request.rejected());
    }

    #[test]
    fn test_timestamps_round_trip() {
        let stamp = now();
        assert!(parse_time(&stamp).is_some());
        assert!(parse_time("").is_none());
        assert!(parse_time("yesterday").is_none());
    }

    #[test]
    fn test_with_request_starts_in_request_status() {
        let data =
            ContactData::with_request("ricochet:aaaaaaaaaaaaaaaa", "a", RequestData::new("me", ""));
        assert_eq!(data.status, ContactStatus::Request);
        assert!(data.request.is_some());
    }
}
