//! # frbridge-client
//!
//! Client library for the frbridge host transport.
//!
//! This crate provides:
//! - Async TCP connection with split read/write halves
//! - Streaming reassembly of export records into frames
//! - Override submission and injection enable/disable

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
