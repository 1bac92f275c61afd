//! Client-side functionality for Cloudwright
//!
//! Talks to a running server over its Unix socket using the same JSON-RPC
//! framing as the server.

pub mod transport;

pub use transport::{ConnectionState, JsonRpcClient};
