//! Local identity: the private key connections authenticate with and the
//! address peers know us by.

use crate::address;
use std::fmt;

/// Private key of the local onion service. Opaque to this crate; it is
/// passed through to the wire protocol's client authentication.
#[derive(Clone)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// The local identity.
#[derive(Clone, Debug)]
pub struct Identity {
    private_key: PrivateKey,
    address: String,
    hostname: String,
}

impl Identity {
    pub fn new(private_key: PrivateKey, address: impl Into<String>) -> Result<Self, address::Error> {
        let address = address.into();
        let hostname = address::plain_host(&address)?.to_string();
        Ok(Self {
            private_key,
            address,
            hostname,
        })
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Our own contact address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Our own bare onion hostname, as peers see it in connection
    /// identities. Used by the glare tie-break.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}
