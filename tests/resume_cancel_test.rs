//! Cancellation, failure recovery and checkpoint-based resume.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{drive_to_end, orchestrator_with, test_config, MockEntityService};
use serde_json::json;
use std::sync::Arc;
use sync_core::constants::keys;
use sync_core::orchestration::{ProcessMode, ProcessOutcome, ResumeRequest};
use sync_core::{Direction, EntityRegistration, EntityRegistry, SyncStatus};

fn products(service: &Arc<MockEntityService>) -> EntityRegistry {
    EntityRegistry::new().with(
        "products",
        EntityRegistration::new(service.clone()).with_direction(Direction::RemoteToLocal),
    )
}

#[tokio::test]
async fn test_cancel_stops_run_and_clears_checkpoint() {
    let service = Arc::new(MockEntityService::with_items(50));
    let (orchestrator, _) = orchestrator_with(products(&service), test_config(10));
    let handle = orchestrator
        .start("products", Direction::RemoteToLocal, json!({}))
        .await
        .unwrap();
    orchestrator
        .process_next_batch(&handle, ProcessMode::Single)
        .await
        .unwrap();

    let entry = orchestrator.cancel("products").await.unwrap();
    assert_eq!(entry.operation_id, handle.operation_id);
    assert_eq!(entry.status, SyncStatus::Cancelled);
    assert_eq!(entry.items_synced, 10);

    assert!(orchestrator.status("products").await.unwrap().is_none());
    assert!(orchestrator.lock().lock_info("products").await.unwrap().is_none());

    // A late invocation observes the cancellation instead of a missing run
    let late = orchestrator
        .process_next_batch(&handle, ProcessMode::Single)
        .await
        .unwrap();
    assert_eq!(late, ProcessOutcome::Cancelled);
    assert_eq!(service.transfer_calls(), 1);

    let resume = orchestrator
        .resume(ResumeRequest::for_entity("products"))
        .await
        .unwrap_err();
    assert_eq!(resume.code(), "not_found");

    assert_eq!(
        orchestrator.history(1).await.unwrap()[0].status,
        SyncStatus::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_without_active_run_is_not_found() {
    let service = Arc::new(MockEntityService::with_items(50));
    let (orchestrator, _) = orchestrator_with(products(&service), test_config(10));

    let err = orchestrator.cancel("products").await.unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_new_start_after_cancel_runs_normally() {
    let service = Arc::new(MockEntityService::with_items(20));
    let (orchestrator, _) = orchestrator_with(products(&service), test_config(10));
    orchestrator
        .start("products", Direction::RemoteToLocal, json!({}))
        .await
        .unwrap();
    orchestrator.cancel("products").await.unwrap();

    let handle = orchestrator
        .start("products", Direction::RemoteToLocal, json!({}))
        .await
        .unwrap();
    let (outcome, _) = drive_to_end(&orchestrator, &handle).await.unwrap();

    assert_eq!(
        outcome,
        ProcessOutcome::Completed {
            items_synced: 20,
            total_items: 20,
            errors: 0
        }
    );
}

#[tokio::test]
async fn test_failed_run_resumes_from_last_committed_batch() {
    let service = Arc::new(MockEntityService::with_items(30).failing_at_offset(10));
    let (orchestrator, _) = orchestrator_with(products(&service), test_config(10));
    let handle = orchestrator
        .start("products", Direction::RemoteToLocal, json!({}))
        .await
        .unwrap();

    orchestrator
        .process_next_batch(&handle, ProcessMode::Single)
        .await
        .unwrap();
    let err = orchestrator
        .process_next_batch(&handle, ProcessMode::Single)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "fatal_batch_error");

    let failed = &orchestrator.history(1).await.unwrap()[0];
    assert_eq!(failed.status, SyncStatus::Failed);
    assert_eq!(failed.items_synced, 10);
    assert_eq!(
        orchestrator
            .errors_for(&handle.operation_id)
            .await
            .unwrap()
            .len(),
        10
    );
    assert!(orchestrator.lock().lock_info("products").await.unwrap().is_none());

    service.heal();
    // No entity given: the most recently checkpointed one is picked up
    let resumed = orchestrator.resume(ResumeRequest::default()).await.unwrap();
    assert_eq!(resumed, handle);

    let status = orchestrator.status("products").await.unwrap().unwrap();
    assert_eq!(status.status, SyncStatus::Running);
    assert_eq!(status.current_batch, 1);
    assert_eq!(status.items_synced, 10);

    let (outcome, _) = drive_to_end(&orchestrator, &resumed).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Completed {
            items_synced: 30,
            total_items: 30,
            errors: 0
        }
    );
    assert_eq!(service.offsets(), vec![0, 10, 10, 20]);
}

#[tokio::test]
async fn test_resume_refuses_active_run() {
    let service = Arc::new(MockEntityService::with_items(30));
    let (orchestrator, _) = orchestrator_with(products(&service), test_config(10));
    orchestrator
        .start("products", Direction::RemoteToLocal, json!({}))
        .await
        .unwrap();

    let err = orchestrator
        .resume(ResumeRequest::for_entity("products"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "concurrency_error");
}

#[tokio::test]
async fn test_resume_of_stale_run_with_new_batch_size() {
    let service = Arc::new(MockEntityService::with_items(100));
    let (orchestrator, collaborators) = orchestrator_with(products(&service), test_config(10));
    let handle = orchestrator
        .start("products", Direction::RemoteToLocal, json!({}))
        .await
        .unwrap();
    orchestrator
        .process_next_batch(&handle, ProcessMode::Slice)
        .await
        .unwrap();

    // The driving process died without touching the run for hours
    let key = keys::run("products");
    let mut raw = collaborators.store.get(&key).await.unwrap().unwrap();
    raw["last_update"] = json!(Utc::now() - ChronoDuration::hours(2));
    collaborators.store.set(&key, raw).await.unwrap();

    let resumed = orchestrator
        .resume(ResumeRequest::for_entity("products").with_batch_size(25))
        .await
        .unwrap();
    assert_eq!(resumed.operation_id, handle.operation_id);

    let status = orchestrator.status("products").await.unwrap().unwrap();
    assert_eq!(status.batch_size, 25);
    assert_eq!(status.current_batch, 1);
    assert_eq!(status.total_batches, 4);
    assert_eq!(status.items_synced, 30);

    let (outcome, _) = drive_to_end(&orchestrator, &resumed).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Completed {
            items_synced: 100,
            total_items: 100,
            errors: 0
        }
    );
    assert_eq!(service.offsets(), vec![0, 10, 20, 30, 55, 80]);
}

#[tokio::test]
async fn test_resume_at_explicit_offset_without_checkpoint() {
    let service = Arc::new(MockEntityService::with_items(100));
    let (orchestrator, _) = orchestrator_with(products(&service), test_config(20));

    let missing_direction = orchestrator
        .resume(ResumeRequest::for_entity("products").at_offset(40))
        .await
        .unwrap_err();
    assert_eq!(missing_direction.code(), "validation_error");

    let handle = orchestrator
        .resume(
            ResumeRequest::for_entity("products")
                .at_offset(40)
                .with_direction(Direction::RemoteToLocal),
        )
        .await
        .unwrap();

    let status = orchestrator.status("products").await.unwrap().unwrap();
    assert_eq!(status.current_batch, 2);
    assert_eq!(status.total_batches, 5);
    assert_eq!(status.items_synced, 40);

    let (outcome, invocations) = drive_to_end(&orchestrator, &handle).await.unwrap();
    assert_eq!(invocations, 3);
    assert_eq!(
        outcome,
        ProcessOutcome::Completed {
            items_synced: 100,
            total_items: 100,
            errors: 0
        }
    );
    assert_eq!(service.offsets(), vec![40, 60, 80]);
}

#[tokio::test]
async fn test_resume_without_any_checkpoint_is_not_found() {
    let service = Arc::new(MockEntityService::with_items(10));
    let (orchestrator, _) = orchestrator_with(products(&service), test_config(10));

    let err = orchestrator
        .resume(ResumeRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}
