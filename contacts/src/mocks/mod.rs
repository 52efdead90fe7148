//! Scriptable doubles for the [`crate::Network`] and [`crate::Connection`]
//! traits, used by this crate's tests and available to downstream crates.

mod connection;
pub use connection::Connection;

mod network;
pub use network::Network;
