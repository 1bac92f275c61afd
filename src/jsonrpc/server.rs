//! JSON-RPC server implementation with method dispatch
//!
//! A [`MethodRegistry`] maps method names to async handlers. [`JsonRpcServer`]
//! reads framed requests from stdio or Unix socket connections and answers
//! each one independently, so a slow call never blocks the connection.

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::jsonrpc::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::jsonrpc::transport::{FrameReader, FrameWriter};

/// Method handler function signature
/// Takes JSON parameters and returns a JSON result
pub type MethodHandler = Arc<
    dyn Fn(Option<serde_json::Value>) -> BoxFuture<'static, Result<serde_json::Value, JsonRpcError>>
        + Send
        + Sync,
>;

/// Registered JSON-RPC methods
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: Arc<RwLock<HashMap<String, MethodHandler>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method handler
    pub async fn register_method<F, Fut>(&self, method_name: impl Into<String>, handler: F)
    where
        F: Fn(Option<serde_json::Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, JsonRpcError>> + Send + 'static,
    {
        let method_name = method_name.into();
        let wrapped_handler: MethodHandler = Arc::new(move |params| Box::pin(handler(params)));

        self.methods
            .write()
            .await
            .insert(method_name.clone(), wrapped_handler);
        debug!("Registered method: {}", method_name);
    }

    pub async fn registered_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Parse one raw message and dispatch it
    pub async fn process_message(&self, content: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(content) {
            Ok(request) => self.process_request(request).await,
            Err(e) => {
                warn!("Unparseable JSON-RPC message: {}", e);
                Some(JsonRpcResponse::parse_error(e.to_string()))
            }
        }
    }

    /// Process a JSON-RPC request and return a response (if needed)
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn process_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let request_id = request.id.clone();
        let is_notification = request.is_notification();

        if let Err(error) = request.validate() {
            if is_notification {
                warn!("Invalid notification: {}", error.message);
                return None;
            }
            return Some(JsonRpcResponse::error(error, request_id));
        }

        let handler = self.methods.read().await.get(&request.method).cloned();
        let Some(handler) = handler else {
            if is_notification {
                warn!("Method not found for notification: {}", request.method);
                return None;
            }
            return Some(JsonRpcResponse::method_not_found(&request.method, request_id));
        };

        match handler(request.params).await {
            Ok(result) if !is_notification => Some(JsonRpcResponse::success(result, request_id)),
            Ok(_) => None,
            Err(error) if !is_notification => {
                debug!(code = error.code, "Method returned an error: {}", error.message);
                Some(JsonRpcResponse::error(error, request_id))
            }
            Err(error) => {
                error!("Error in notification handler for {}: {}", request.method, error.message);
                None
            }
        }
    }
}

/// JSON-RPC server over framed byte streams
pub struct JsonRpcServer {
    registry: MethodRegistry,
    shutdown: CancellationToken,
}

impl JsonRpcServer {
    pub fn new(registry: MethodRegistry, shutdown: CancellationToken) -> Self {
        Self { registry, shutdown }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Serve a single client on stdin/stdout until end of input
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("Serving JSON-RPC over stdin/stdout");
        serve_connection(
            self.registry.clone(),
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            self.shutdown.clone(),
        )
        .await
    }

    /// Accept Unix socket clients until shutdown; each connection runs concurrently
    pub async fn serve_unix_socket(&self, path: &str) -> Result<()> {
        let socket_path = Path::new(path);
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .map_err(|e| anyhow!("Failed to remove existing socket file: {}", e))?;
        }

        let listener = tokio::net::UnixListener::bind(socket_path)
            .map_err(|e| anyhow!("Failed to bind to socket {}: {}", path, e))?;
        info!("Serving JSON-RPC on Unix socket {}", path);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, _addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    debug!("Client connected to {}", path);

                    let registry = self.registry.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        let (read_half, write_half) = stream.into_split();
                        if let Err(e) =
                            serve_connection(registry, BufReader::new(read_half), write_half, shutdown).await
                        {
                            debug!("Connection ended with error: {}", e);
                        }
                    });
                }
            }
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        info!("Unix socket server stopped");
        Ok(())
    }
}

/// Read framed requests from `reader` and write responses to `writer`.
///
/// Requests are dispatched concurrently; responses are written as they
/// complete and matched to requests by id.
pub async fn serve_connection<R, W>(
    registry: MethodRegistry,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(64);
    let writer_task = tokio::spawn(async move {
        let mut writer = FrameWriter::new(writer);
        while let Some(response) = rx.recv().await {
            if let Err(e) = writer.write_response(&response).await {
                error!("Failed to send response: {}", e);
                break;
            }
        }
    });

    let mut reader = FrameReader::new(reader);
    let result = loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            message = reader.read_message() => message,
        };

        match message {
            Ok(Some(content)) => {
                let registry = registry.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = registry.process_message(&content).await {
                        if tx.send(response).await.is_err() {
                            debug!("Connection closed before response was sent");
                        }
                    }
                });
            }
            Ok(None) => break Ok(()),
            Err(e) => {
                warn!("Framing error, closing connection: {}", e);
                // Framing is lost; report and stop reading.
                let _ = tx.send(JsonRpcResponse::parse_error(e.to_string())).await;
                break Err(e);
            }
        }
    };

    drop(tx);
    if let Err(e) = writer_task.await {
        error!("Response writer task failed: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::protocol::error_codes;
    use serde_json::json;

    async fn echo_registry() -> MethodRegistry {
        let registry = MethodRegistry::new();
        registry
            .register_method("test/echo", |params| async move {
                Ok(params.unwrap_or(serde_json::Value::Null))
            })
            .await;
        registry
    }

    #[tokio::test]
    async fn test_dispatch_and_unknown_method() {
        let registry = echo_registry().await;

        let response = registry
            .process_request(JsonRpcRequest::new("test/echo", Some(json!({"x": 1})), Some(json!(7))))
            .await
            .unwrap();
        assert_eq!(response.id, Some(json!(7)));
        assert_eq!(response.result.unwrap()["x"], 1);

        let response = registry
            .process_request(JsonRpcRequest::new("test/missing", None, Some(json!(8))))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let registry = echo_registry().await;
        assert!(registry
            .process_request(JsonRpcRequest::new("test/echo", None, None))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_parse_error() {
        let registry = echo_registry().await;
        let response = registry.process_message("{not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_connection_answers_framed_requests() {
        let registry = echo_registry().await;
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);

        let serve = tokio::spawn(serve_connection(
            registry,
            BufReader::new(server_read),
            server_write,
            CancellationToken::new(),
        ));

        let mut writer = FrameWriter::new(client_write);
        writer
            .write_request(&JsonRpcRequest::new("test/echo", Some(json!({"n": 3})), Some(json!(1))))
            .await
            .unwrap();

        let mut reader = FrameReader::new(BufReader::new(client_read));
        let content = reader.read_message().await.unwrap().unwrap();
        let response: JsonRpcResponse = serde_json::from_str(&content).unwrap();
        assert_eq!(response.result.unwrap()["n"], 3);

        writer.shutdown().await.unwrap();
        serve.await.unwrap().unwrap();
    }
}
