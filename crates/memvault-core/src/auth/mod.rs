//! Access-token storage for the remote data source.
//!
//! Tokens live in the OS keychain via `keyring`, one entry per user id.

pub mod credentials;

pub use credentials::CredentialStore;
