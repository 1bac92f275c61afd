//! JSON-RPC client for Unix socket communication

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tracing::debug;
use uuid::Uuid;

use crate::handlers::{AnalyzeRequirementsRequest, ConfirmProvisioningRequest, RequestIdParams};
use crate::jsonrpc::methods::{self, CREDENTIAL_FIELD};
use crate::jsonrpc::{IpcConnection, JsonRpcRequest};
use crate::orchestrator::{
    AnalysisResult, DeleteResult, ProvisionAccepted, StatusReport, TeardownReport,
};

/// One call per connection, framed the same way the server frames replies
pub struct JsonRpcClient {
    socket_path: String,
    credential: Option<String>,
}

impl JsonRpcClient {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            credential: None,
        }
    }

    /// Attach a bearer credential to every call
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Check that the socket exists and accepts connections
    pub async fn validate_connection(&self) -> bool {
        Path::new(&self.socket_path).exists() && UnixStream::connect(&self.socket_path).await.is_ok()
    }

    /// Call `method` and return the raw result value
    pub async fn call(&self, method: &str, mut params: Value) -> Result<Value> {
        if let (Some(credential), Value::Object(map)) = (&self.credential, &mut params) {
            map.insert(CREDENTIAL_FIELD.to_string(), Value::String(credential.clone()));
        }

        let request_id = Uuid::new_v4().to_string();
        let request = JsonRpcRequest::new(method, Some(params), Some(Value::String(request_id.clone())));

        let mut connection = IpcConnection::connect(&self.socket_path).await?;
        debug!(method, "Sending request {}", request_id);
        let response = connection.call(&request).await?;

        let response_id = response.id.as_ref().and_then(|v| v.as_str()).unwrap_or("");
        if response_id != request_id && response.error.is_none() {
            return Err(anyhow!(
                "Response ID mismatch: expected {}, got {}",
                request_id,
                response_id
            ));
        }

        response
            .into_result()
            .map_err(|error| anyhow!("JSON-RPC error {}: {}", error.code, error.message))
    }

    async fn call_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| anyhow!("Unexpected {} response: {}", method, e))
    }

    pub async fn analyze(&self, request: &AnalyzeRequirementsRequest) -> Result<AnalysisResult> {
        self.call_typed(methods::ANALYZE, serde_json::to_value(request)?).await
    }

    pub async fn provision(&self, request: &ConfirmProvisioningRequest) -> Result<ProvisionAccepted> {
        self.call_typed(methods::PROVISION, serde_json::to_value(request)?).await
    }

    pub async fn status(&self, request_id: &str) -> Result<StatusReport> {
        self.call_typed(methods::STATUS, id_params(request_id)?).await
    }

    pub async fn cancel(&self, request_id: &str) -> Result<StatusReport> {
        self.call_typed(methods::CANCEL, id_params(request_id)?).await
    }

    pub async fn retry(&self, request_id: &str) -> Result<ProvisionAccepted> {
        self.call_typed(methods::RETRY, id_params(request_id)?).await
    }

    pub async fn teardown(&self, request_id: &str) -> Result<TeardownReport> {
        self.call_typed(methods::TEARDOWN, id_params(request_id)?).await
    }

    pub async fn delete(&self, request_id: &str) -> Result<DeleteResult> {
        self.call_typed(methods::DELETE, id_params(request_id)?).await
    }
}

fn id_params(request_id: &str) -> Result<Value> {
    Ok(serde_json::to_value(RequestIdParams::new(request_id))?)
}

/// Remembers which server socket the CLI is connected to (`~/.cloudwright/connection`)
pub struct ConnectionState;

impl ConnectionState {
    pub fn state_file_path() -> Result<PathBuf> {
        let home_dir =
            dirs::home_dir().ok_or_else(|| anyhow!("Unable to determine home directory"))?;

        let state_dir = home_dir.join(".cloudwright");
        if !state_dir.exists() {
            std::fs::create_dir_all(&state_dir)?;
        }

        Ok(state_dir.join("connection"))
    }

    pub fn save(socket_path: &str) -> Result<()> {
        std::fs::write(Self::state_file_path()?, socket_path)?;
        Ok(())
    }

    pub fn load() -> Result<Option<String>> {
        let state_file = Self::state_file_path()?;
        if !state_file.exists() {
            return Ok(None);
        }

        let socket_path = std::fs::read_to_string(&state_file)?.trim().to_string();
        Ok(Some(socket_path).filter(|p| !p.is_empty()))
    }

    pub fn clear() -> Result<()> {
        let state_file = Self::state_file_path()?;
        if state_file.exists() {
            std::fs::remove_file(&state_file)?;
        }
        Ok(())
    }

    /// Client for an explicit socket, else the saved connection
    pub fn get_client(socket: Option<String>) -> Result<JsonRpcClient> {
        let socket_path = match socket {
            Some(path) => path,
            None => Self::load()?.ok_or_else(|| {
                anyhow!("Not connected to any server. Use 'cloudwright connect <socket_path>' or --socket.")
            })?,
        };
        Ok(JsonRpcClient::new(socket_path))
    }
}
