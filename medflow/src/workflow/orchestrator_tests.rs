use super::*;
use crate::test_utils::{test_config, workflow_data, ScriptedHandler, SleepHandler};
use crate::{MedflowError, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct OfflineStore;

impl StateStore for OfflineStore {
    fn get(&self, _key: &str) -> Result<Option<Value>> {
        Err(MedflowError::Storage("store offline".to_string()))
    }

    fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<()> {
        Err(MedflowError::Storage("store offline".to_string()))
    }

    fn keys(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(MedflowError::Storage("store offline".to_string()))
    }
}

struct RejectEverything;

impl Validator for RejectEverything {
    fn validate(&self, _workflow_type: &str, _data: &WorkflowData) -> ValidationOutcome {
        ValidationOutcome::missing(vec!["signature".to_string()])
    }
}

fn orchestrator_with(registry: HandlerRegistry) -> Orchestrator {
    Orchestrator::builder(registry).config(test_config()).build()
}

async fn wait_for_active(orchestrator: &Orchestrator, count: usize) -> Vec<WorkflowId> {
    for _ in 0..100 {
        let ids = orchestrator.active_workflow_ids();
        if ids.len() >= count {
            return ids;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} active workflows", count);
}

#[tokio::test]
async fn test_store_failures_do_not_fail_workflow() {
    let handler = ScriptedHandler::new("consent_handling").then_ok(json!({"ok": true}));
    let orchestrator = Orchestrator::builder(HandlerRegistry::builder().register(handler).build())
        .config(test_config())
        .state_store(Arc::new(OfflineStore))
        .build();

    let result = orchestrator
        .orchestrate(
            "consent_handling",
            workflow_data(&[("patient_id", json!("p")), ("consent_type", json!("x"))]),
            ContextMap::new(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.result, Some(json!({"ok": true})));
    assert!(orchestrator
        .get_status(&result.workflow_id.to_string())
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_metrics_track_outcomes() {
    let ok = ScriptedHandler::new("ok_type")
        .then_err(HandlerError::Transient("blip".into()))
        .then_ok(json!(1));
    let bad = ScriptedHandler::new("bad_type").then_err(HandlerError::Conflict("dup".into()));
    let orchestrator = orchestrator_with(HandlerRegistry::builder().register(ok).register(bad).build());

    orchestrator.orchestrate("ok_type", WorkflowData::new(), ContextMap::new()).await;
    orchestrator.orchestrate("bad_type", WorkflowData::new(), ContextMap::new()).await;
    orchestrator.orchestrate("lab_order", WorkflowData::new(), ContextMap::new()).await;
    orchestrator
        .orchestrate("record_creation", WorkflowData::new(), ContextMap::new())
        .await;

    let metrics = orchestrator.metrics();
    assert_eq!(metrics.started, 4);
    assert_eq!(metrics.completed, 1);
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.unsupported, 1);
    assert_eq!(metrics.validation_failures, 1);
    assert_eq!(metrics.attempts, 3);
    assert_eq!(metrics.retries, 1);
    assert!((metrics.success_rate() - 0.25).abs() < f64::EPSILON);
    assert_eq!(metrics.by_workflow_type["ok_type"].completed, 1);
    assert_eq!(metrics.by_workflow_type["bad_type"].failed, 1);

    // unregistered types share one summary however many distinct names arrive
    assert_eq!(metrics.by_workflow_type[UNREGISTERED_TYPE].failed, 2);
    for n in 0..20 {
        orchestrator
            .orchestrate(&format!("lab_order_{n}"), WorkflowData::new(), ContextMap::new())
            .await;
    }
    let metrics = orchestrator.metrics();
    assert_eq!(metrics.by_workflow_type.len(), 3);
    assert_eq!(metrics.by_workflow_type[UNREGISTERED_TYPE].failed, 22);
    assert_eq!(metrics.unsupported, 21);
}

#[tokio::test(start_paused = true)]
async fn test_status_shows_pending_retry() {
    let handler = ScriptedHandler::new("flaky")
        .then_err(HandlerError::Dependency("pharmacy api".into()))
        .then_ok(json!("done"));
    let orchestrator = Arc::new(orchestrator_with(
        HandlerRegistry::builder().register(handler).build(),
    ));

    let runner = Arc::clone(&orchestrator);
    let task = tokio::spawn(async move {
        runner
            .orchestrate("flaky", WorkflowData::new(), ContextMap::new())
            .await
    });

    let id = wait_for_active(&orchestrator, 1).await[0];
    let record = orchestrator.get_status(&id.to_string()).unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Running);
    assert_eq!(record.attempt_count, 1);
    assert!(record.message.contains("retrying in"), "{}", record.message);

    let result = task.await.unwrap();
    assert!(result.success);
    let record = orchestrator.get_status(&id.to_string()).unwrap().unwrap();
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.status, WorkflowStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_from_another_orchestrator() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let slow = SleepHandler::new("slow", Duration::from_secs(5));
    let driver = Arc::new(
        Orchestrator::builder(HandlerRegistry::builder().register(slow.clone()).build())
            .config(test_config())
            .state_store(Arc::clone(&store))
            .build(),
    );
    let observer = Orchestrator::builder(HandlerRegistry::default())
        .config(test_config())
        .state_store(store)
        .build();

    let runner = Arc::clone(&driver);
    let task = tokio::spawn(async move {
        runner
            .orchestrate("slow", WorkflowData::new(), ContextMap::new())
            .await
    });
    let id = wait_for_active(&driver, 1).await[0].to_string();

    assert_eq!(observer.cancel(&id).await.unwrap(), CancelOutcome::Cancelled);

    let result = task.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error_type, Some(ErrorType::Cancelled));
    let record = driver.get_status(&id).unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Cancelled);
    assert_eq!(record.result, None);
    assert_eq!(slow.invocations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_from_another_orchestrator_during_backoff() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let flaky = ScriptedHandler::new("flaky").then_err(HandlerError::Transient("pharmacy api".into()));
    let driver = Arc::new(
        Orchestrator::builder(HandlerRegistry::builder().register(flaky.clone()).build())
            .config(test_config())
            .state_store(Arc::clone(&store))
            .build(),
    );
    let observer = Orchestrator::builder(HandlerRegistry::default())
        .config(test_config())
        .state_store(store)
        .build();

    let runner = Arc::clone(&driver);
    let task = tokio::spawn(async move {
        runner
            .orchestrate("flaky", WorkflowData::new(), ContextMap::new())
            .await
    });
    let id = wait_for_active(&driver, 1).await[0].to_string();
    let record = observer.get_status(&id).unwrap().unwrap();
    assert!(record.message.contains("retrying in"), "{}", record.message);

    assert_eq!(observer.cancel(&id).await.unwrap(), CancelOutcome::Cancelled);

    let result = task.await.unwrap();
    assert_eq!(result.error_type, Some(ErrorType::Cancelled));
    assert_eq!(flaky.invocations(), 1);
    let record = driver.get_status(&id).unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Cancelled);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(driver.metrics().attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_orchestrate_future_cancels_workflow() {
    let slow = SleepHandler::new("slow", Duration::from_secs(30));
    let orchestrator = orchestrator_with(HandlerRegistry::builder().register(slow).build());

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        orchestrator.orchestrate("slow", WorkflowData::new(), ContextMap::new()),
    )
    .await;
    assert!(outcome.is_err());

    assert!(orchestrator.active_workflow_ids().is_empty());
    let records = orchestrator.list_workflows().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, WorkflowStatus::Cancelled);
    assert_eq!(records[0].error_type, Some(ErrorType::Cancelled));
    assert_eq!(records[0].message, "abandoned before completion");

    let metrics = orchestrator.metrics();
    assert_eq!(metrics.cancelled, 1);
    assert_eq!(metrics.finished(), 1);

    let id = records[0].id.to_string();
    assert_eq!(
        orchestrator.cancel(&id).await.unwrap(),
        CancelOutcome::AlreadyTerminal(WorkflowStatus::Cancelled)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all() {
    let slow = SleepHandler::new("slow", Duration::from_secs(30));
    let orchestrator = Arc::new(orchestrator_with(
        HandlerRegistry::builder().register(slow).build(),
    ));

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let runner = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                runner
                    .orchestrate("slow", WorkflowData::new(), ContextMap::new())
                    .await
            })
        })
        .collect();
    wait_for_active(&orchestrator, 2).await;

    assert_eq!(orchestrator.cancel_all().await, 2);
    for task in tasks {
        let result = task.await.unwrap();
        assert_eq!(result.error_type, Some(ErrorType::Cancelled));
    }
    assert!(orchestrator.active_workflow_ids().is_empty());
    assert_eq!(orchestrator.metrics().cancelled, 2);
}

#[tokio::test]
async fn test_unsupported_lists_registered_types() {
    let orchestrator = orchestrator_with(
        HandlerRegistry::builder()
            .register(ScriptedHandler::new("b_type"))
            .register(ScriptedHandler::new("a_type"))
            .build(),
    );

    let result = orchestrator
        .orchestrate("lab_order", WorkflowData::new(), ContextMap::new())
        .await;

    assert_eq!(result.error_type, Some(ErrorType::UnsupportedWorkflow));
    let error_data = result.error_data.unwrap();
    assert_eq!(error_data["workflow_type"], "lab_order");
    assert_eq!(error_data["supported"], json!(["a_type", "b_type"]));
}

#[tokio::test]
async fn test_custom_validator() {
    let handler = ScriptedHandler::new("consent_handling");
    let orchestrator = Orchestrator::builder(HandlerRegistry::builder().register(handler.clone()).build())
        .validator(Arc::new(RejectEverything))
        .build();

    let result = orchestrator
        .orchestrate("consent_handling", WorkflowData::new(), ContextMap::new())
        .await;

    assert_eq!(result.error_type, Some(ErrorType::ValidationFailed));
    assert_eq!(result.error_data, Some(json!({"missing_fields": ["signature"]})));
    assert_eq!(handler.invocations(), 0);
}

#[tokio::test]
async fn test_malformed_ids() {
    let orchestrator = orchestrator_with(HandlerRegistry::default());

    assert!(orchestrator.get_status("not-an-id").unwrap().is_none());
    let outcome = orchestrator.cancel("not-an-id").await.unwrap();
    assert_eq!(outcome, CancelOutcome::NotFound);
    assert!(!outcome.found());
    assert!(!outcome.ok());
}

#[tokio::test]
async fn test_failed_record_keeps_last_error() {
    let handler = ScriptedHandler::new("record_creation")
        .then_err(HandlerError::NotFound("patient pat_9".into()));
    let orchestrator = orchestrator_with(HandlerRegistry::builder().register(handler).build());

    let result = orchestrator
        .orchestrate(
            "record_creation",
            workflow_data(&[("patient_id", json!("pat_9")), ("record_type", json!("visit"))]),
            ContextMap::new(),
        )
        .await;

    assert_eq!(result.error_type, Some(ErrorType::ExecutionFailed));
    let error_data = result.error_data.unwrap();
    assert_eq!(error_data["attempts"], 1);
    assert_eq!(error_data["error"]["kind"], "not_found");

    let record = orchestrator
        .get_status(&result.workflow_id.to_string())
        .unwrap()
        .unwrap();
    assert_eq!(record.status, WorkflowStatus::Failed);
    assert_eq!(record.error_type, Some(ErrorType::ExecutionFailed));
    assert_eq!(record.result, Some(error_data));
    assert!(record.completed_at.is_some());
}
