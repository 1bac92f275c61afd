//! JSON-RPC 2.0 transport for the orchestrator
//!
//! A small JSON-RPC 2.0 implementation with LSP-style Content-Length framing,
//! served over stdio or a Unix domain socket.

pub mod methods;
pub mod protocol;
pub mod server;
pub mod transport;

pub use methods::{register_cloudwright_methods, ALL_METHODS};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::{serve_connection, JsonRpcServer, MethodHandler, MethodRegistry};
pub use transport::{FrameReader, FrameWriter, IpcConnection, TransportConfig};

pub const JSONRPC_VERSION: &str = "2.0";
