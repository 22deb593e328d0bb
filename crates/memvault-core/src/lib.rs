//! Core library for memvault.
//!
//! Keeps a per-user offline replica of the remote memory records, searches
//! it when the network is gone, and runs an asset caching worker so the web
//! front end keeps loading offline. Front ends (the CLI, a web shell) wire
//! these pieces together.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod network;
pub mod search;
pub mod sync;
pub mod utils;
pub mod worker;

pub use config::Config;
