mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cloudwright::analysis::rules::{COMPUTE_NAME, DATABASE_NAME, STORAGE_NAME};
use cloudwright::analysis::AnalysisOutcome;
use cloudwright::auth::CallerIdentity;
use cloudwright::backend::{
    BackendError, ProvisioningHandle, ResourceObservation, ScriptedOutcome,
};
use cloudwright::catalog::{Catalog, ResourceType};
use cloudwright::models::{FailureReason, RequestState, ResourceRecommendation, ResourceStatus};
use cloudwright::orchestrator::{Orchestrator, TIMED_OUT_DETAIL};
use cloudwright::store::RequestStore;
use cloudwright::CloudwrightError;

use common::{
    fast_config, input, wait_for_state, wait_until_idle, FixedAnalyzer, Harness, MockAnalyzer,
    MockBackend, RecordingJournal,
};

const CONVERSATION: [&str; 5] = [
    "Hello, I need some cloud resources",
    "I'm launching a website for my bakery",
    "It will need a database for customer orders",
    "Roughly 50GB storage should be enough",
    "Please recommend what I need",
];

fn fixed(count: usize) -> Harness {
    Harness::with_analyzer(fast_config(), Arc::new(FixedAnalyzer { count }))
}

#[tokio::test]
async fn test_website_database_storage_conversation_completes() {
    let h = Harness::new();

    let analysis = h.analyze(&CONVERSATION).await.unwrap();
    assert_eq!(analysis.state, RequestState::AwaitingConfirmation);

    let count = |t: ResourceType| {
        analysis
            .recommendations
            .iter()
            .filter(|r| r.resource_type == t)
            .count()
    };
    assert!(count(ResourceType::Compute) >= 1);
    assert_eq!(count(ResourceType::Database), 1);
    assert_eq!(count(ResourceType::Storage), 1);
    assert!(analysis
        .recommendations
        .iter()
        .all(|r| r.estimated_monthly_cost >= 0.0));

    let confirmed = vec![
        COMPUTE_NAME.to_string(),
        DATABASE_NAME.to_string(),
        STORAGE_NAME.to_string(),
    ];
    let accepted = h
        .orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, confirmed)
        .await
        .unwrap();
    assert!(accepted.accepted);
    assert_eq!(accepted.attempt, 1);

    let status = h.wait_for(&analysis.request_id, RequestState::Completed).await;
    assert_eq!(status.progress, 100);
    assert_eq!(status.resources.len(), 3);
    assert!(status
        .resources
        .iter()
        .all(|r| r.status == ResourceStatus::Active && r.provider_id.is_some()));
    assert!(status.finished_at.is_some());
}

#[tokio::test]
async fn test_unknown_resource_leaves_request_untouched() {
    let h = Harness::new();
    let analysis = h.analyze(&CONVERSATION).await.unwrap();
    let before = h.status(&analysis.request_id).await;

    let err = h
        .orchestrator
        .confirm_and_provision(
            &h.caller,
            &analysis.request_id,
            vec![COMPUTE_NAME.to_string(), "MainframeCluster".to_string()],
        )
        .await
        .unwrap_err();

    match err {
        CloudwrightError::UnknownResource { resource, .. } => assert_eq!(resource, "MainframeCluster"),
        other => panic!("expected UnknownResource, got {:?}", other),
    }

    let after = h.status(&analysis.request_id).await;
    assert_eq!(after.status, RequestState::AwaitingConfirmation);
    assert!(after.resources.is_empty());
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(h.backend.provision_calls(COMPUTE_NAME).await, 0);
}

#[tokio::test]
async fn test_confirm_outside_awaiting_confirmation_is_rejected_without_mutation() {
    let h = fixed(1);
    let analysis = h.analyze(&["anything"]).await.unwrap();
    h.orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(1))
        .await
        .unwrap();
    let completed = h.wait_for(&analysis.request_id, RequestState::Completed).await;
    wait_until_idle(&h.orchestrator).await;

    let err = h
        .orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(1))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudwrightError::InvalidState { .. }));

    let after = h.status(&analysis.request_id).await;
    assert_eq!(after.status, RequestState::Completed);
    assert_eq!(after.provisioning_attempt, 1);
    assert_eq!(after.updated_at, completed.updated_at);
    assert_eq!(h.backend.provision_calls("Server1").await, 1);
}

#[tokio::test]
async fn test_identical_context_is_analyzed_once() {
    let mut analyzer = MockAnalyzer::new();
    analyzer.expect_analyze().times(1).returning(|_, _| {
        Ok(AnalysisOutcome {
            recommendations: vec![ResourceRecommendation::new(
                ResourceType::Compute,
                "WebServer",
                "server",
                50.0,
            )],
            region: "us-ashburn-1".to_string(),
            notes: vec![],
        })
    });
    let h = Harness::with_analyzer(fast_config(), Arc::new(analyzer));

    let first = h.analyze(&["a website please"]).await.unwrap();
    let second = h.analyze(&["a website please"]).await.unwrap();

    assert_eq!(first.request_id, second.request_id);
    assert_eq!(first.recommendations, second.recommendations);
    assert_eq!(h.orchestrator.store().len().await, 1);
}

#[tokio::test]
async fn test_other_callers_cannot_see_a_request() {
    let h = Harness::new();
    let analysis = h.analyze(&CONVERSATION).await.unwrap();

    let mallory = CallerIdentity::new("mallory");
    let err = h
        .orchestrator
        .get_status(&mallory, &analysis.request_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudwrightError::RequestNotFound(_)));

    let err = h
        .orchestrator
        .confirm_and_provision(&mallory, &analysis.request_id, vec![COMPUTE_NAME.to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CloudwrightError::RequestNotFound(_)));
}

#[tokio::test]
async fn test_insufficient_context_keeps_request_for_follow_up() {
    let h = Harness::new();

    let err = h.analyze(&["hello there"]).await.unwrap_err();
    let request_id = match &err {
        CloudwrightError::InsufficientContext { request_id, .. } => request_id.clone().unwrap(),
        other => panic!("expected InsufficientContext, got {:?}", other),
    };
    assert_eq!(h.status(&request_id).await.status, RequestState::Created);

    let analysis = h
        .orchestrator
        .analyze_requirements(
            &h.caller,
            input(Some(&request_id), &["hello there", "I need a blog with a database"]),
        )
        .await
        .unwrap();
    assert_eq!(analysis.request_id, request_id);
    assert_eq!(analysis.state, RequestState::AwaitingConfirmation);
}

#[tokio::test]
async fn test_all_resources_active_means_completed() {
    for n in [1usize, 3, 5] {
        let h = fixed(n);
        let analysis = h.analyze(&["anything"]).await.unwrap();
        h.orchestrator
            .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(n))
            .await
            .unwrap();

        let status = h.wait_for(&analysis.request_id, RequestState::Completed).await;
        assert_eq!(status.resources.len(), n, "n = {}", n);
        assert!(status.resources.iter().all(|r| r.status == ResourceStatus::Active));
    }
}

#[tokio::test]
async fn test_any_resource_error_means_failed() {
    for n in [1usize, 3, 5] {
        let h = fixed(n);
        h.backend
            .script(
                &format!("Server{}", n),
                [ScriptedOutcome::Reject(BackendError::QuotaExceeded(
                    "compute cores".into(),
                ))],
            )
            .await;

        let analysis = h.analyze(&["anything"]).await.unwrap();
        h.orchestrator
            .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(n))
            .await
            .unwrap();

        let status = h.wait_for(&analysis.request_id, RequestState::Failed).await;
        let failure = status.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::ResourceErrors);
        assert!(failure.detail.starts_with(&format!("1 of {} resources failed", n)));

        let failed: Vec<_> = status
            .resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Error)
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error_detail.as_deref().unwrap().contains("quota exceeded"));
        assert_eq!(
            status
                .resources
                .iter()
                .filter(|r| r.status == ResourceStatus::Active)
                .count(),
            n - 1
        );
    }
}

#[tokio::test]
async fn test_progress_never_decreases_while_provisioning() {
    let journal = Arc::new(RecordingJournal::default());
    let store = Arc::new(RequestStore::with_journal(journal.clone()));
    let h = Harness::with_store(fast_config(), Arc::new(FixedAnalyzer { count: 5 }), store);
    h.backend
        .script("Server3", [ScriptedOutcome::FlakyPolls(2)])
        .await;

    let analysis = h.analyze(&["anything"]).await.unwrap();
    h.orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(5))
        .await
        .unwrap();
    h.wait_for(&analysis.request_id, RequestState::Completed).await;

    let writes = journal.progress_of(&analysis.request_id);
    for pair in writes.windows(2) {
        let ((s1, a1, p1), (s2, a2, p2)) = (pair[0], pair[1]);
        if s1 == RequestState::Provisioning && s2 == RequestState::Provisioning && a1 == a2 {
            assert!(p2 >= p1, "progress went from {} to {}", p1, p2);
        }
    }
    assert_eq!(writes.last().unwrap().2, 100);
}

#[tokio::test]
async fn test_transient_backend_errors_are_retried() {
    let h = fixed(1);
    h.backend
        .script(
            "Server1",
            [
                ScriptedOutcome::Reject(BackendError::Unavailable("throttled".into())),
                ScriptedOutcome::Reject(BackendError::Unavailable("throttled".into())),
            ],
        )
        .await;

    let analysis = h.analyze(&["anything"]).await.unwrap();
    h.orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(1))
        .await
        .unwrap();

    h.wait_for(&analysis.request_id, RequestState::Completed).await;
    assert_eq!(h.backend.provision_calls("Server1").await, 3);
}

#[tokio::test]
async fn test_timeout_fails_pending_resources_and_tears_them_down() {
    let mut config = fast_config();
    config.orchestrator.provisioning_timeout_secs = 1;
    let h = Harness::with_analyzer(config, Arc::new(FixedAnalyzer { count: 2 }));
    h.backend.script("Server2", [ScriptedOutcome::Hang]).await;

    let analysis = h.analyze(&["anything"]).await.unwrap();
    h.orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(2))
        .await
        .unwrap();

    let status = h.wait_for(&analysis.request_id, RequestState::Failed).await;
    let server2 = status.resources.iter().find(|r| r.name == "Server2").unwrap();
    assert_ne!(server2.status, ResourceStatus::Pending);
    let hung_id = server2.provider_id.clone().unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let status = loop {
        let status = h.status(&analysis.request_id).await;
        let server2 = status.resources.iter().find(|r| r.name == "Server2").unwrap();
        if server2.status == ResourceStatus::Terminated {
            break status;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed-out resource never marked terminated");
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert!(h.backend.torn_down().await.contains(&hung_id));
    assert_eq!(status.status, RequestState::Failed);
    assert_eq!(status.failure.as_ref().unwrap().reason, FailureReason::Timeout);

    let server1 = status.resources.iter().find(|r| r.name == "Server1").unwrap();
    let server2 = status.resources.iter().find(|r| r.name == "Server2").unwrap();
    assert_eq!(server1.status, ResourceStatus::Active);
    assert_eq!(server2.error_detail.as_deref(), Some(TIMED_OUT_DETAIL));
    assert!(!h.backend.torn_down().await.contains(server1.provider_id.as_ref().unwrap()));

    // Cleaning up after a timeout is not a teardown of the request.
    wait_until_idle(&h.orchestrator).await;
    let accepted = h
        .orchestrator
        .retry_provisioning(&h.caller, &analysis.request_id)
        .await
        .unwrap();
    assert_eq!(accepted.resources, vec!["Server2".to_string()]);
    let status = h.wait_for(&analysis.request_id, RequestState::Completed).await;
    assert!(status.resources.iter().all(|r| r.status == ResourceStatus::Active));
}

#[tokio::test]
async fn test_cancel_before_provisioning() {
    let h = Harness::new();
    let analysis = h.analyze(&CONVERSATION).await.unwrap();

    let status = h
        .orchestrator
        .cancel_request(&h.caller, &analysis.request_id)
        .await
        .unwrap();
    assert_eq!(status.status, RequestState::Failed);
    assert_eq!(status.failure.unwrap().reason, FailureReason::Cancelled);

    let err = h
        .orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, vec![COMPUTE_NAME.to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CloudwrightError::InvalidState { .. }));

    let err = h
        .orchestrator
        .retry_provisioning(&h.caller, &analysis.request_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudwrightError::InvalidState { .. }));
}

#[tokio::test]
async fn test_retry_only_reprovisions_failed_resources() {
    let h = fixed(3);
    h.backend
        .script(
            "Server2",
            [ScriptedOutcome::Reject(BackendError::InvalidConfiguration(
                "shape not available".into(),
            ))],
        )
        .await;

    let analysis = h.analyze(&["anything"]).await.unwrap();
    h.orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(3))
        .await
        .unwrap();
    h.wait_for(&analysis.request_id, RequestState::Failed).await;
    wait_until_idle(&h.orchestrator).await;

    let accepted = h
        .orchestrator
        .retry_provisioning(&h.caller, &analysis.request_id)
        .await
        .unwrap();
    assert_eq!(accepted.attempt, 2);
    assert_eq!(accepted.resources, vec!["Server2".to_string()]);

    let status = h.wait_for(&analysis.request_id, RequestState::Completed).await;
    assert_eq!(status.provisioning_attempt, 2);
    assert!(status.resources.iter().all(|r| r.status == ResourceStatus::Active));
    assert_eq!(h.backend.provision_calls("Server1").await, 1);
    assert_eq!(h.backend.provision_calls("Server2").await, 2);
    assert_eq!(h.backend.provision_calls("Server3").await, 1);
}

#[tokio::test]
async fn test_teardown_terminates_created_resources() {
    let h = fixed(3);
    h.backend
        .script(
            "Server2",
            [ScriptedOutcome::Reject(BackendError::AuthorizationDenied(
                "policy".into(),
            ))],
        )
        .await;

    let analysis = h.analyze(&["anything"]).await.unwrap();
    h.orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(3))
        .await
        .unwrap();
    h.wait_for(&analysis.request_id, RequestState::Failed).await;

    let report = h
        .orchestrator
        .teardown_request(&h.caller, &analysis.request_id)
        .await
        .unwrap();
    let mut torn_down = report.torn_down.clone();
    torn_down.sort();
    assert_eq!(torn_down, vec!["Server1".to_string(), "Server3".to_string()]);
    assert!(report.failures.is_empty());
    assert_eq!(h.backend.torn_down().await.len(), 2);

    let status = h.status(&analysis.request_id).await;
    assert_eq!(status.status, RequestState::Failed);
    for resource in &status.resources {
        let expected = if resource.name == "Server2" {
            ResourceStatus::Error
        } else {
            ResourceStatus::Terminated
        };
        assert_eq!(resource.status, expected, "{}", resource.name);
    }

    let err = h
        .orchestrator
        .retry_provisioning(&h.caller, &analysis.request_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudwrightError::InvalidState { .. }));
}

#[tokio::test]
async fn test_teardown_requires_failed_request() {
    let h = Harness::new();
    let analysis = h.analyze(&CONVERSATION).await.unwrap();
    let err = h
        .orchestrator
        .teardown_request(&h.caller, &analysis.request_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudwrightError::InvalidState { .. }));
}

#[tokio::test]
async fn test_delete_rejects_provisioning_and_removes_finished() {
    let h = fixed(1);
    h.backend.script("Server1", [ScriptedOutcome::Hang]).await;

    let analysis = h.analyze(&["anything"]).await.unwrap();
    h.orchestrator
        .confirm_and_provision(&h.caller, &analysis.request_id, FixedAnalyzer::names(1))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .delete_request(&h.caller, &analysis.request_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudwrightError::InvalidState { .. }));

    let other = h.analyze(&["something else"]).await.unwrap();
    let deleted = h
        .orchestrator
        .delete_request(&h.caller, &other.request_id)
        .await
        .unwrap();
    assert!(deleted.deleted);
    assert!(matches!(
        h.orchestrator.get_status(&h.caller, &other.request_id).await,
        Err(CloudwrightError::RequestNotFound(_))
    ));
    h.orchestrator.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_never_removes_a_request_that_started_provisioning() {
    let h = fixed(1);

    for round in 0..25 {
        let line = format!("workload {}", round);
        let analysis = h.analyze(&[line.as_str()]).await.unwrap();
        let id = analysis.request_id.as_str();

        let (deleted, confirmed) = tokio::join!(
            h.orchestrator.delete_request(&h.caller, id),
            h.orchestrator
                .confirm_and_provision(&h.caller, id, FixedAnalyzer::names(1)),
        );

        match (deleted, confirmed) {
            (Ok(_), Err(err)) => {
                assert!(
                    matches!(err, CloudwrightError::RequestNotFound(_)),
                    "round {}: {:?}",
                    round,
                    err
                );
                assert!(!h.orchestrator.store().contains(id).await);
            }
            (Err(err), Ok(_)) => {
                assert!(matches!(err, CloudwrightError::InvalidState { .. }), "round {}: {:?}", round, err);
                h.wait_for(id, RequestState::Completed).await;
            }
            (deleted, confirmed) => panic!(
                "round {}: delete {:?} and confirm {:?} both took effect or both failed",
                round, deleted, confirmed
            ),
        }
    }
}

#[tokio::test]
async fn test_retention_sweep_evicts_only_old_terminal_requests() {
    let mut config = fast_config();
    config.orchestrator.request_retention_secs = 0;
    let h = Harness::with_analyzer(config, Arc::new(FixedAnalyzer { count: 1 }));

    let done = h.analyze(&["first"]).await.unwrap();
    h.orchestrator
        .cancel_request(&h.caller, &done.request_id)
        .await
        .unwrap();
    let waiting = h.analyze(&["second"]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.orchestrator.sweep_expired().await, 1);
    assert!(!h.orchestrator.store().contains(&done.request_id).await);
    assert!(h.orchestrator.store().contains(&waiting.request_id).await);
}

fn handle_for(rec: &ResourceRecommendation) -> ProvisioningHandle {
    ProvisioningHandle {
        provider_id: format!("ocid1.instance.oc1..{}", rec.name.to_lowercase()),
        name: rec.name.clone(),
        resource_type: rec.resource_type,
    }
}

fn mocked(backend: MockBackend, count: usize) -> (Orchestrator, CallerIdentity) {
    let config = fast_config();
    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        Arc::new(RequestStore::new()),
        Arc::new(FixedAnalyzer { count }),
        Arc::new(backend),
        Arc::new(Catalog::new(config.pricing.clone())),
    );
    (orchestrator, CallerIdentity::new("alice"))
}

#[tokio::test]
async fn test_backend_error_status_is_resubmitted_up_to_the_attempt_limit() {
    let mut backend = MockBackend::new();
    backend
        .expect_provision()
        .times(3)
        .returning(|rec| Ok(handle_for(rec)));
    backend.expect_poll().returning(|_| {
        Ok(ResourceObservation {
            status: ResourceStatus::Error,
            error_detail: Some("host capacity".to_string()),
            ..ResourceObservation::pending()
        })
    });
    backend
        .expect_teardown()
        .returning(|id| Err(BackendError::Unavailable(format!("{} busy", id))));

    let (orchestrator, caller) = mocked(backend, 1);
    let analysis = orchestrator
        .analyze_requirements(&caller, input(None, &["anything"]))
        .await
        .unwrap();
    orchestrator
        .confirm_and_provision(&caller, &analysis.request_id, FixedAnalyzer::names(1))
        .await
        .unwrap();

    let status = wait_for_state(&orchestrator, &caller, &analysis.request_id, RequestState::Failed).await;
    let resource = &status.resources[0];
    assert_eq!(resource.status, ResourceStatus::Error);
    assert_eq!(resource.error_detail.as_deref(), Some("host capacity"));

    let report = orchestrator
        .teardown_request(&caller, &analysis.request_id)
        .await
        .unwrap();
    assert!(report.torn_down.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].detail.contains("busy"));
}

#[tokio::test]
async fn test_transient_poll_errors_do_not_fail_the_resource() {
    let polls = Arc::new(AtomicU32::new(0));
    let mut backend = MockBackend::new();
    backend
        .expect_provision()
        .times(1)
        .returning(|rec| Ok(handle_for(rec)));
    let counter = polls.clone();
    backend.expect_poll().returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(BackendError::Unavailable("429".into()))
        } else {
            Ok(ResourceObservation {
                status: ResourceStatus::Active,
                ..ResourceObservation::pending()
            })
        }
    });

    let (orchestrator, caller) = mocked(backend, 1);
    let analysis = orchestrator
        .analyze_requirements(&caller, input(None, &["anything"]))
        .await
        .unwrap();
    orchestrator
        .confirm_and_provision(&caller, &analysis.request_id, FixedAnalyzer::names(1))
        .await
        .unwrap();

    wait_for_state(&orchestrator, &caller, &analysis.request_id, RequestState::Completed).await;
    assert!(polls.load(Ordering::SeqCst) >= 3);
}
