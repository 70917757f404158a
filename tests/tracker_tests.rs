use std::sync::Arc;

use carnet_server::carnet::{
    GenerationStatus, GenerationStore, InMemoryGenerationStore, StoreError, Tracker, Transition,
    TransitionOutcome,
};
use carnet_server::people::{KindFilter, PersonFilter};
use carnet_server::TenantId;
use uuid::Uuid;

fn tracker() -> (Tracker, Arc<InMemoryGenerationStore>) {
    let store = Arc::new(InMemoryGenerationStore::new());
    (Tracker::new(store.clone()), store)
}

fn students() -> PersonFilter {
    PersonFilter {
        kind: KindFilter::Student,
        ..PersonFilter::default()
    }
}

#[tokio::test]
async fn test_lifecycle_to_completed() {
    let (tracker, _) = tracker();
    let tenant = TenantId(1);
    let request = tracker.create(tenant, students()).await.unwrap();
    assert_eq!(request.status, GenerationStatus::Pending);
    assert_eq!(request.progress, 0);

    tracker.start(request.id).await;
    for progress in [10, 40, 85, 92] {
        tracker.progress(request.id, progress).await;
    }
    tracker
        .complete(request.id, "tenants/1/carnets/pdf/carnets_x.pdf".to_string())
        .await;

    let stored = tracker.get(tenant, request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, GenerationStatus::Completed);
    assert_eq!(stored.progress, 100);
    assert_eq!(
        stored.result_path.as_deref(),
        Some("tenants/1/carnets/pdf/carnets_x.pdf")
    );
    assert_eq!(stored.filters, students());
    assert!(stored.started_at.is_some());
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_failure_after_progress_keeps_value() {
    let (tracker, _) = tracker();
    let tenant = TenantId(1);
    let request = tracker.create(tenant, students()).await.unwrap();

    tracker.start(request.id).await;
    tracker.progress(request.id, 92).await;
    tracker
        .fail(request.id, "PDF export timed out after 300s".to_string())
        .await;

    let stored = tracker.get(tenant, request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, GenerationStatus::Failed);
    assert_eq!(stored.progress, 92);
    assert_eq!(
        stored.error_message.as_deref(),
        Some("PDF export timed out after 300s")
    );
    assert!(stored.result_path.is_none());
}

#[tokio::test]
async fn test_late_updates_do_not_change_terminal_record() {
    let (tracker, store) = tracker();
    let tenant = TenantId(1);
    let request = tracker.create(tenant, students()).await.unwrap();
    tracker.start(request.id).await;
    tracker.fail(request.id, "boom".to_string()).await;
    let frozen = tracker.get(tenant, request.id).await.unwrap().unwrap();

    tracker.progress(request.id, 99).await;
    tracker.complete(request.id, "late.pdf".to_string()).await;

    assert_eq!(tracker.get(tenant, request.id).await.unwrap().unwrap(), frozen);
    assert!(matches!(
        store
            .transition(request.id, &Transition::Start)
            .await
            .unwrap(),
        TransitionOutcome::Rejected(_)
    ));
}

#[tokio::test]
async fn test_requests_are_tenant_scoped() {
    let (tracker, _) = tracker();
    let mine = tracker.create(TenantId(1), students()).await.unwrap();
    tracker.create(TenantId(2), students()).await.unwrap();

    assert!(tracker.get(TenantId(2), mine.id).await.unwrap().is_none());
    let listed = tracker.list(TenantId(1), 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, mine.id);
}

#[tokio::test]
async fn test_list_is_newest_first_and_limited() {
    let (tracker, _) = tracker();
    let tenant = TenantId(5);
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(tracker.create(tenant, students()).await.unwrap().id);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let listed: Vec<Uuid> = tracker
        .list(tenant, 3)
        .await
        .unwrap()
        .into_iter()
        .map(|request| request.id)
        .collect();
    assert_eq!(listed, vec![ids[3], ids[2], ids[1]]);
}

#[tokio::test]
async fn test_unknown_request_is_reported_by_store_and_tolerated_by_tracker() {
    let (tracker, store) = tracker();
    let missing = Uuid::new_v4();

    assert!(matches!(
        store.transition(missing, &Transition::Start).await,
        Err(StoreError::NotFound(id)) if id == missing
    ));

    // Logged, never propagated.
    tracker.start(missing).await;
    tracker.progress(missing, 50).await;
    tracker.fail(missing, "gone".to_string()).await;
}
