//! Transport layer for JSON-RPC communication
//!
//! Messages are framed LSP-style: a `Content-Length` header block, a blank
//! line, then exactly that many bytes of JSON. The same framing runs over
//! stdio and Unix domain sockets.

use anyhow::{anyhow, Result};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

use crate::jsonrpc::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Largest frame accepted from a peer
pub const MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

/// Reads Content-Length framed messages
pub struct FrameReader<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Next message body, or `None` on a clean end of stream
    pub async fn read_message(&mut self) -> Result<Option<String>> {
        let mut content_length = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                if saw_header {
                    return Err(anyhow!("Connection closed mid-frame"));
                }
                return Ok(None);
            }

            let line = line.trim_end();
            if line.is_empty() {
                if saw_header {
                    break;
                }
                // Tolerate blank lines between frames.
                continue;
            }
            saw_header = true;

            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = Some(value.trim().parse::<usize>()?);
                }
            }
            trace!("Received header: {}", line);
        }

        let content_length =
            content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
        if content_length > MAX_MESSAGE_BYTES {
            return Err(anyhow!(
                "Frame of {} bytes exceeds the {} byte limit",
                content_length,
                MAX_MESSAGE_BYTES
            ));
        }

        let mut buffer = vec![0u8; content_length];
        self.reader.read_exact(&mut buffer).await?;

        let content = String::from_utf8(buffer)?;
        debug!("Received message: {} bytes", content_length);
        trace!("Message content: {}", content);
        Ok(Some(content))
    }
}

/// Writes Content-Length framed messages
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_message(&mut self, content: &str) -> Result<()> {
        let content_bytes = content.as_bytes();

        self.writer
            .write_all(format!("Content-Length: {}\r\n\r\n", content_bytes.len()).as_bytes())
            .await?;
        self.writer.write_all(content_bytes).await?;
        self.writer.flush().await?;

        debug!("Sent message: {} bytes", content_bytes.len());
        trace!("Message content: {}", content);
        Ok(())
    }

    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> Result<()> {
        let content = serde_json::to_string(response)?;
        self.write_message(&content).await
    }

    pub async fn write_request(&mut self, request: &JsonRpcRequest) -> Result<()> {
        let content = serde_json::to_string(request)?;
        self.write_message(&content).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Client side of a Unix socket connection
pub struct IpcConnection {
    pub reader: FrameReader<BufReader<tokio::net::unix::OwnedReadHalf>>,
    pub writer: FrameWriter<tokio::net::unix::OwnedWriteHalf>,
}

impl IpcConnection {
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let stream = tokio::net::UnixStream::connect(path.as_ref())
            .await
            .map_err(|e| anyhow!("Failed to connect to {}: {}", path.as_ref().display(), e))?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: tokio::net::UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: FrameReader::new(BufReader::new(read_half)),
            writer: FrameWriter::new(write_half),
        }
    }

    /// Send one request and wait for the next response frame
    pub async fn call(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.writer.write_request(request).await?;
        let content = self
            .reader
            .read_message()
            .await?
            .ok_or_else(|| anyhow!("Server closed the connection"))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// Standard input/output with LSP message framing
    Stdio,
    /// Unix domain socket with specified path
    UnixSocket { path: String },
    /// HTTP/JSON API bound to an address
    Http { addr: String },
}

impl TransportConfig {
    /// Resolve from the `[server]` configuration section
    pub fn from_settings(server: &crate::config::settings::ServerSection) -> Result<Self> {
        match server.transport.as_str() {
            "stdio" => Ok(TransportConfig::Stdio),
            "socket" => {
                let path = server
                    .socket_path
                    .clone()
                    .ok_or_else(|| anyhow!("Socket path is required when using socket transport"))?;
                Ok(TransportConfig::UnixSocket { path })
            }
            "http" => Ok(TransportConfig::Http {
                addr: server.http_addr.clone(),
            }),
            other => Err(anyhow!("Unsupported transport type: {}", other)),
        }
    }

    pub fn description(&self) -> String {
        match self {
            TransportConfig::Stdio => "stdin/stdout".to_string(),
            TransportConfig::UnixSocket { path } => format!("Unix socket ({})", path),
            TransportConfig::Http { addr } => format!("HTTP ({})", addr),
        }
    }
}
