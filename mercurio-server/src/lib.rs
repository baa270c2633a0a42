//! MQTT broker library for the Mercurio implementation.
//!
//! This crate implements the protocol state machine ([`broker`]) that
//! drives each connection through MQTT's CONNECT/PUBLISH/SUBSCRIBE
//! handshakes, the subscription index ([`topic_tree`]) that decides who
//! receives each publish, the connection registry ([`registry`]) mapping
//! client-id to live channel, the interceptor fan-out ([`interceptor`]),
//! and the authenticator/authorizator contracts ([`auth`]) consumed by
//! the processor. [`server`] wires these into a TCP accept loop.

pub mod auth;
pub mod broker;
pub mod connection;
pub mod error;
pub mod interceptor;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod topic_tree;

pub use error::ServerError;
