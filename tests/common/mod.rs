#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use cloudwright::analysis::{AnalysisOutcome, RequirementsAnalyzer, RuleBasedAnalyzer};
use cloudwright::auth::CallerIdentity;
use cloudwright::backend::{
    BackendError, ProvisioningBackend, ProvisioningHandle, ResourceObservation, SimulatedBackend,
};
use cloudwright::catalog::{Catalog, ResourceType};
use cloudwright::config::init_test_logging;
use cloudwright::config::settings::{BackendConfig, ServerConfig};
use cloudwright::models::{
    ConversationMessage, Request, RequestState, ResourceRecommendation, UserPreferences,
};
use cloudwright::orchestrator::{AnalyzeInput, Orchestrator, StatusReport};
use cloudwright::store::{RequestJournal, RequestStore};
use cloudwright::CloudwrightResult;

mock! {
    pub Backend {}

    #[async_trait]
    impl ProvisioningBackend for Backend {
        async fn provision(
            &self,
            recommendation: &ResourceRecommendation,
        ) -> Result<ProvisioningHandle, BackendError>;

        async fn poll(&self, handle: &ProvisioningHandle) -> Result<ResourceObservation, BackendError>;

        async fn teardown(&self, provider_id: &str) -> Result<(), BackendError>;
    }
}

mock! {
    pub Analyzer {}

    #[async_trait]
    impl RequirementsAnalyzer for Analyzer {
        async fn analyze(
            &self,
            conversation: &[ConversationMessage],
            preferences: &UserPreferences,
        ) -> CloudwrightResult<AnalysisOutcome>;
    }
}

/// Millisecond-scale timings so lifecycles finish quickly
pub fn fast_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.orchestrator.max_concurrent_requests = 10;
    config.orchestrator.provisioning_timeout_secs = 30;
    config.orchestrator.default_poll_interval_ms = 5;
    config.orchestrator.poll_intervals_ms.clear();
    config.orchestrator.backoff_initial_ms = 1;
    config.orchestrator.backoff_cap_ms = 5;
    config.backend = BackendConfig {
        readiness_polls: 1,
        ..BackendConfig::default()
    };
    config
}

/// Analyzer that always recommends `count` independent compute resources
pub struct FixedAnalyzer {
    pub count: usize,
}

impl FixedAnalyzer {
    pub fn names(count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("Server{}", i)).collect()
    }
}

#[async_trait]
impl RequirementsAnalyzer for FixedAnalyzer {
    async fn analyze(
        &self,
        _conversation: &[ConversationMessage],
        _preferences: &UserPreferences,
    ) -> CloudwrightResult<AnalysisOutcome> {
        Ok(AnalysisOutcome {
            recommendations: Self::names(self.count)
                .into_iter()
                .map(|name| {
                    ResourceRecommendation::new(ResourceType::Compute, name, "test server", 50.0)
                })
                .collect(),
            region: "us-ashburn-1".to_string(),
            notes: Vec::new(),
        })
    }
}

/// Fixed recommendations that take a while to produce
pub struct SlowAnalyzer {
    pub inner: FixedAnalyzer,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowAnalyzer {
    pub fn new(count: usize, delay: Duration) -> Self {
        Self {
            inner: FixedAnalyzer { count },
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequirementsAnalyzer for SlowAnalyzer {
    async fn analyze(
        &self,
        conversation: &[ConversationMessage],
        preferences: &UserPreferences,
    ) -> CloudwrightResult<AnalysisOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.analyze(conversation, preferences).await
    }
}

/// Journal that remembers every committed write, in order
#[derive(Default)]
pub struct RecordingJournal {
    pub writes: StdMutex<Vec<Request>>,
}

impl RecordingJournal {
    /// Committed states of one request, in write order
    pub fn states_of(&self, request_id: &str) -> Vec<RequestState> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.id == request_id)
            .map(|r| r.state)
            .collect()
    }

    pub fn progress_of(&self, request_id: &str) -> Vec<(RequestState, u32, u8)> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.id == request_id)
            .map(|r| (r.state, r.provisioning_attempt, r.progress))
            .collect()
    }
}

#[async_trait]
impl RequestJournal for RecordingJournal {
    async fn persist(&self, request: &Request) -> CloudwrightResult<()> {
        self.writes.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn remove(&self, _request_id: &str) -> CloudwrightResult<()> {
        Ok(())
    }

    async fn load_all(&self) -> CloudwrightResult<Vec<Request>> {
        Ok(Vec::new())
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub backend: Arc<SimulatedBackend>,
    pub caller: CallerIdentity,
}

impl Harness {
    /// Rule-based analyzer, simulated backend, in-memory store
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let catalog = Arc::new(Catalog::new(config.pricing.clone()));
        let analyzer = Arc::new(
            RuleBasedAnalyzer::new(catalog.clone(), config.analysis.clone()).unwrap(),
        );
        Self::build(config, analyzer, Arc::new(RequestStore::new()))
    }

    pub fn with_analyzer(config: ServerConfig, analyzer: Arc<dyn RequirementsAnalyzer>) -> Self {
        Self::build(config, analyzer, Arc::new(RequestStore::new()))
    }

    pub fn with_store(
        config: ServerConfig,
        analyzer: Arc<dyn RequirementsAnalyzer>,
        store: Arc<RequestStore>,
    ) -> Self {
        Self::build(config, analyzer, store)
    }

    fn build(
        config: ServerConfig,
        analyzer: Arc<dyn RequirementsAnalyzer>,
        store: Arc<RequestStore>,
    ) -> Self {
        let _ = init_test_logging();
        let catalog = Arc::new(Catalog::new(config.pricing.clone()));
        let backend = Arc::new(SimulatedBackend::new(config.backend.clone()));
        let orchestrator = Orchestrator::new(
            config.orchestrator.clone(),
            store,
            analyzer,
            backend.clone(),
            catalog,
        );
        Self {
            orchestrator,
            backend,
            caller: CallerIdentity::new("alice"),
        }
    }

    pub async fn analyze(&self, lines: &[&str]) -> CloudwrightResult<cloudwright::orchestrator::AnalysisResult> {
        self.orchestrator
            .analyze_requirements(&self.caller, input(None, lines))
            .await
    }

    pub async fn status(&self, request_id: &str) -> StatusReport {
        self.orchestrator
            .get_status(&self.caller, request_id)
            .await
            .unwrap()
    }

    /// Poll status until `state` is reached or fail after five seconds
    pub async fn wait_for(&self, request_id: &str, state: RequestState) -> StatusReport {
        wait_for_state(&self.orchestrator, &self.caller, request_id, state).await
    }
}

pub fn user_says(lines: &[&str]) -> Vec<ConversationMessage> {
    lines
        .iter()
        .map(|line| ConversationMessage::new("user", *line))
        .collect()
}

pub fn input(request_id: Option<&str>, lines: &[&str]) -> AnalyzeInput {
    AnalyzeInput {
        request_id: request_id.map(str::to_string),
        conversation: user_says(lines),
        preferences: None,
    }
}

pub async fn wait_for_state(
    orchestrator: &Orchestrator,
    caller: &CallerIdentity,
    request_id: &str,
    state: RequestState,
) -> StatusReport {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = orchestrator.get_status(caller, request_id).await.unwrap();
        if status.status == state {
            return status;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "request {} stuck in {} waiting for {}: {:?}",
                request_id, status.status, state, status.resources
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until no driver holds an admission permit
pub async fn wait_until_idle(orchestrator: &Orchestrator) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while orchestrator.in_flight() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "drivers never released their permits");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
