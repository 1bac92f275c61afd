//! In-memory request store with per-request serialization and optional journaling.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::models::{validate_transition, Request, RequestState};
use crate::{CloudwrightError, CloudwrightResult};

pub mod journal;

pub use journal::{FileJournal, RequestJournal};

const MAX_REQUEST_ID_LEN: usize = 128;

/// Request ids double as journal file names, so only a safe alphabet is accepted
pub fn is_valid_request_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_REQUEST_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

type Entry = Arc<Mutex<Request>>;

/// Map of request id to lifecycle state.
///
/// Updates to one id are serialized by that entry's mutex; different ids never
/// contend beyond the short map lookup.
pub struct RequestStore {
    entries: RwLock<HashMap<String, Entry>>,
    /// (owner, context fingerprint) -> request id
    fingerprints: RwLock<HashMap<(String, String), String>>,
    journal: Option<Arc<dyn RequestJournal>>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fingerprints: RwLock::new(HashMap::new()),
            journal: None,
        }
    }

    pub fn with_journal(journal: Arc<dyn RequestJournal>) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new()
        }
    }

    pub fn is_journaled(&self) -> bool {
        self.journal.is_some()
    }

    pub async fn create(&self, request: Request) -> CloudwrightResult<Request> {
        if !is_valid_request_id(&request.id) {
            return Err(CloudwrightError::invalid_request(format!(
                "request id must be 1-{} characters of [A-Za-z0-9_-]",
                MAX_REQUEST_ID_LEN
            )));
        }

        // Reserve the id with the entry already locked, so readers of this id
        // wait for the journal while other ids never touch the map lock.
        let entry: Entry = Arc::new(Mutex::new(request.clone()));
        let guard = entry.clone().lock_owned().await;
        {
            let mut entries = self.entries.write().await;
            if entries.contains_key(&request.id) {
                return Err(CloudwrightError::invalid_request(format!(
                    "request id {} is already in use",
                    request.id
                )));
            }
            entries.insert(request.id.clone(), entry.clone());
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.persist(&request).await {
                self.unlink(&request.id, &entry).await;
                return Err(e);
            }
        }
        drop(guard);

        self.index_fingerprint(None, &request).await;
        debug!(request_id = %request.id, "Request created");
        Ok(request)
    }

    pub async fn get(&self, id: &str) -> CloudwrightResult<Request> {
        let entry = self.entry(id).await?;
        let request = entry.lock().await;
        Ok(request.clone())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Apply `mutator` to a copy of the request and commit it only if the result is a
    /// legal transition and the journal accepted it.
    pub async fn update<F>(&self, id: &str, mutator: F) -> CloudwrightResult<Request>
    where
        F: FnOnce(&mut Request) -> CloudwrightResult<()>,
    {
        let entry = self.entry(id).await?;
        let mut current = entry.lock().await;

        // A delete may have raced us between lookup and lock.
        let still_live = self
            .entries
            .read()
            .await
            .get(id)
            .map(|live| Arc::ptr_eq(live, &entry))
            .unwrap_or(false);
        if !still_live {
            return Err(CloudwrightError::RequestNotFound(id.to_string()));
        }

        let mut candidate = current.clone();
        mutator(&mut candidate)?;
        candidate.touch();

        validate_transition(&current, &candidate)
            .map_err(|message| CloudwrightError::invalid_transition(id, message))?;

        if let Some(journal) = &self.journal {
            journal.persist(&candidate).await?;
        }

        let previous_fingerprint = (current.context_fingerprint != candidate.context_fingerprint)
            .then(|| current.context_fingerprint.clone());
        if current.state != candidate.state {
            debug!(
                request_id = %id,
                from = %current.state,
                to = %candidate.state,
                "Request state changed"
            );
        }
        *current = candidate.clone();
        drop(current);

        if let Some(previous) = previous_fingerprint {
            self.index_fingerprint(Some(&previous), &candidate).await;
        }
        Ok(candidate)
    }

    pub async fn delete(&self, id: &str) -> CloudwrightResult<Request> {
        self.delete_if(id, |_| Ok(())).await
    }

    /// Remove the request only if `predicate` accepts its current state.
    ///
    /// The predicate runs under the entry lock, so no update can commit between
    /// the check and the removal.
    pub async fn delete_if<P>(&self, id: &str, predicate: P) -> CloudwrightResult<Request>
    where
        P: FnOnce(&Request) -> CloudwrightResult<()>,
    {
        let entry = self.entry(id).await?;
        let current = entry.lock().await;
        predicate(&*current)?;

        if !self.unlink(id, &entry).await {
            return Err(CloudwrightError::RequestNotFound(id.to_string()));
        }
        let request = current.clone();
        drop(current);

        if let Some(journal) = &self.journal {
            journal.remove(id).await?;
        }

        let key = (request.owner.clone(), request.context_fingerprint.clone());
        let mut fingerprints = self.fingerprints.write().await;
        if fingerprints.get(&key).map(|v| v == id).unwrap_or(false) {
            fingerprints.remove(&key);
        }

        debug!(request_id = %id, "Request deleted");
        Ok(request)
    }

    /// Unconfirmed request of `owner` whose conversation hashes to `fingerprint`
    pub async fn find_by_fingerprint(&self, owner: &str, fingerprint: &str) -> Option<Request> {
        let id = self
            .fingerprints
            .read()
            .await
            .get(&(owner.to_string(), fingerprint.to_string()))
            .cloned()?;

        let request = self.get(&id).await.ok()?;
        let unconfirmed = matches!(
            request.state,
            RequestState::Created | RequestState::Analyzing | RequestState::AwaitingConfirmation
        );
        (unconfirmed && request.context_fingerprint == fingerprint && request.owner == owner)
            .then_some(request)
    }

    /// Point-in-time copy of every request
    pub async fn snapshot(&self) -> Vec<Request> {
        let entries: Vec<Entry> = self.entries.read().await.values().cloned().collect();
        let mut requests = Vec::with_capacity(entries.len());
        for entry in entries {
            requests.push(entry.lock().await.clone());
        }
        requests
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Load journaled requests into an empty store, returning what was loaded
    pub async fn restore_from_journal(&self) -> CloudwrightResult<Vec<Request>> {
        let Some(journal) = &self.journal else {
            return Ok(Vec::new());
        };

        let requests = journal.load_all().await?;
        let mut restored = Vec::with_capacity(requests.len());
        for request in requests {
            if !is_valid_request_id(&request.id) {
                warn!(request_id = %request.id, "Ignoring journal entry with an invalid id");
                continue;
            }
            let mut entries = self.entries.write().await;
            if entries.contains_key(&request.id) {
                continue;
            }
            entries.insert(request.id.clone(), Arc::new(Mutex::new(request.clone())));
            drop(entries);
            self.index_fingerprint(None, &request).await;
            restored.push(request);
        }

        info!(count = restored.len(), "Restored requests from journal");
        Ok(restored)
    }

    async fn entry(&self, id: &str) -> CloudwrightResult<Entry> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CloudwrightError::RequestNotFound(id.to_string()))
    }

    /// Drop `id` from the map if it still maps to `entry`
    async fn unlink(&self, id: &str, entry: &Entry) -> bool {
        let mut entries = self.entries.write().await;
        let live = entries
            .get(id)
            .map(|live| Arc::ptr_eq(live, entry))
            .unwrap_or(false);
        if live {
            entries.remove(id);
        }
        live
    }

    async fn index_fingerprint(&self, previous: Option<&str>, request: &Request) {
        let mut fingerprints = self.fingerprints.write().await;
        if let Some(previous) = previous {
            let key = (request.owner.clone(), previous.to_string());
            if fingerprints.get(&key).map(|v| *v == request.id).unwrap_or(false) {
                fingerprints.remove(&key);
            }
        }
        fingerprints.insert(
            (request.owner.clone(), request.context_fingerprint.clone()),
            request.id.clone(),
        );
    }

    #[cfg(test)]
    async fn indexed_fingerprints(&self) -> usize {
        self.fingerprints.read().await.len()
    }
}

impl Default for RequestStore {
    fn default() -> Self {
        Self::new()
    }
}
