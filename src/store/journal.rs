use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::Request;
use crate::{CloudwrightResult, ResultExt};

/// Durable copy of request state, written through on every store mutation
#[async_trait]
pub trait RequestJournal: Send + Sync {
    async fn persist(&self, request: &Request) -> CloudwrightResult<()>;

    async fn remove(&self, request_id: &str) -> CloudwrightResult<()>;

    async fn load_all(&self) -> CloudwrightResult<Vec<Request>>;
}

/// One pretty-printed JSON file per request under a directory
pub struct FileJournal {
    dir: PathBuf,
}

impl FileJournal {
    pub async fn open(dir: impl AsRef<Path>) -> CloudwrightResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_store_context("journal")?;
        Ok(Self { dir })
    }

    fn path_for(&self, request_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", request_id))
    }
}

#[async_trait]
impl RequestJournal for FileJournal {
    async fn persist(&self, request: &Request) -> CloudwrightResult<()> {
        let path = self.path_for(&request.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", request.id));
        let body = serde_json::to_vec_pretty(request)?;

        // Write-then-rename so a crash never leaves a truncated file behind.
        tokio::fs::write(&tmp, body)
            .await
            .with_store_context(&request.id)?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_store_context(&request.id)?;
        debug!(request_id = %request.id, path = %path.display(), "Journaled request");
        Ok(())
    }

    async fn remove(&self, request_id: &str) -> CloudwrightResult<()> {
        match tokio::fs::remove_file(self.path_for(request_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err::<(), _>(e).with_store_context(request_id),
        }
    }

    async fn load_all(&self) -> CloudwrightResult<Vec<Request>> {
        let mut requests = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_store_context("journal")?;

        while let Some(entry) = entries.next_entry().await.with_store_context("journal")? {
            let path = entry.path();
            let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(true);
            if !is_json || is_tmp {
                continue;
            }

            let bytes = tokio::fs::read(&path).await.with_store_context("journal")?;
            match serde_json::from_slice::<Request>(&bytes) {
                Ok(request) => requests.push(request),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable journal entry"),
            }
        }

        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }
}
