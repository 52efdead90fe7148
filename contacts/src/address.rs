//! Parsing and validation of contact addresses.
//!
//! A contact address is the string `ricochet:` followed by the bare onion
//! hostname of the peer's service (16 base32 characters). The hostname
//! appears in two forms: the plain form used in authenticated connection
//! identities, and the `.onion` form used to dial through the overlay.

use thiserror::Error;

/// Scheme prefix of a contact address.
pub const ADDRESS_PREFIX: &str = "ricochet:";

/// Length of a bare onion hostname.
const HOST_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("address is missing the '{ADDRESS_PREFIX}' prefix")]
    MissingPrefix,
    #[error("invalid onion hostname: {0}")]
    InvalidHost(String),
}

/// Returns the bare onion hostname of `address`.
pub fn plain_host(address: &str) -> Result<&str, Error> {
    let host = address
        .strip_prefix(ADDRESS_PREFIX)
        .ok_or(Error::MissingPrefix)?;
    if host.len() != HOST_LEN || !host.bytes().all(is_base32) {
        return Err(Error::InvalidHost(host.to_string()));
    }
    Ok(host)
}

/// Returns the dialable `<host>.onion` form of `address`.
pub fn onion_host(address: &str) -> Result<String, Error> {
    Ok(format!("{}.onion", plain_host(address)?))
}

/// Whether `address` is a well-formed contact address.
pub fn is_valid(address: &str) -> bool {
    plain_host(address).is_ok()
}

/// Builds a contact address from a bare onion hostname.
pub fn from_plain_host(host: &str) -> Result<String, Error> {
    let address = format!("{ADDRESS_PREFIX}{host}");
    plain_host(&address)?;
    Ok(address)
}

fn is_base32(b: u8) -> bool {
    b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_host() {
        assert_eq!(
            plain_host("ricochet:qqkvo7nk3tjvd6wb"),
            Ok("qqkvo7nk3tjvd6wb")
        );
        assert_eq!(plain_host("qqkvo7nk3tjvd6wb"), Err(Error::MissingPrefix));
        assert!(matches!(
            plain_host("ricochet:tooshort"),
            Err(Error::InvalidHost(_))
        ));
        assert!(matches!(
            plain_host("ricochet:qqkvo7nk3tjvd6wb77"),
            Err(Error::InvalidHost(_))
        ));
        // 0, 1, 8 and 9 are not in the base32 alphabet
        assert!(matches!(
            plain_host("ricochet:qqkvo7nk3tjvd0wb"),
            Err(Error::InvalidHost(_))
        ));
        assert!(matches!(
            plain_host("ricochet:QQKVO7NK3TJVD6WB"),
            Err(Error::InvalidHost(_))
        ));
    }

    #[test]
    fn test_onion_host() {
        assert_eq!(
            onion_host("ricochet:qqkvo7nk3tjvd6wb").unwrap(),
            "qqkvo7nk3tjvd6wb.onion"
        );
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("ricochet:aaaaaaaaaaaaaaaa"));
        assert!(is_valid("ricochet:z234567z234567zz"));
        assert!(!is_valid(""));
        assert!(!is_valid("ricochet:"));
        assert!(!is_valid("onion:qqkvo7nk3tjvd6wb"));
    }

    #[test]
    fn test_from_plain_host() {
        assert_eq!(
            from_plain_host("qqkvo7nk3tjvd6wb").unwrap(),
            "ricochet:qqkvo7nk3tjvd6wb"
        );
        assert!(from_plain_host("nope").is_err());
    }
}
