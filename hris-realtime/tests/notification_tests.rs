//! Notification producer integration tests

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use hris_common::events::{Notification, NotificationType};
use hris_realtime::broker::{spawn_listener, Broker, MemoryBroker};
use hris_realtime::hub::{Connection, Hub};
use hris_realtime::notification::NotificationService;

async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    hris_common::db::init_tables(&pool).await.unwrap();
    pool
}

async fn setup_service(cancel: &CancellationToken) -> (NotificationService, Hub) {
    let pool = setup_test_db().await;
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new(64));
    let (hub, _task) = Hub::spawn(Arc::clone(&broker), 256, cancel.clone());
    spawn_listener(broker, hub.clone(), Duration::from_millis(50), cancel.clone()).await;
    (NotificationService::new(pool, hub.clone()), hub)
}

#[tokio::test]
async fn test_notification_persisted_and_pushed() {
    let cancel = CancellationToken::new();
    let (service, hub) = setup_service(&cancel).await;

    let (connection, mut rx) = Connection::new(42, 8);
    let key = connection.key();
    hub.register(connection);
    while !hub.contains(key).await {
        sleep(Duration::from_millis(5)).await;
    }

    let sent = service
        .send_notification(
            42,
            NotificationType::LeaveApprovalReq,
            "Leave request",
            "Sari requested annual leave",
            77,
        )
        .await
        .unwrap();

    let payload = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let pushed: Notification = serde_json::from_slice(&payload).unwrap();
    assert_eq!(pushed, sent);

    let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(json["type"], "LEAVE_APPROVAL_REQ");
    assert_eq!(json["is_read"], false);

    let stored = service.list_for_user(42).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, sent.id);

    cancel.cancel();
}

#[tokio::test]
async fn test_send_without_live_session_still_persists() {
    let cancel = CancellationToken::new();
    let (service, _hub) = setup_service(&cancel).await;

    service
        .send_notification(5, NotificationType::PayrollPaid, "Payslip", "", 0)
        .await
        .unwrap();

    assert_eq!(service.list_for_user(5).await.unwrap().len(), 1);
    cancel.cancel();
}

#[tokio::test]
async fn test_mark_as_read_checks_owner() {
    let cancel = CancellationToken::new();
    let (service, _hub) = setup_service(&cancel).await;

    let notification = service
        .send_notification(1, NotificationType::Approved, "Approved", "", 3)
        .await
        .unwrap();

    let err = service.mark_as_read(2, notification.id).await.unwrap_err();
    assert!(matches!(err, hris_common::Error::NotFound(_)));

    service.mark_as_read(1, notification.id).await.unwrap();
    assert!(service.list_for_user(1).await.unwrap()[0].is_read);
}

#[tokio::test]
async fn test_purge_keeps_recent_and_unread() {
    let cancel = CancellationToken::new();
    let (service, _hub) = setup_service(&cancel).await;

    let read = service
        .send_notification(1, NotificationType::Rejected, "Rejected", "", 0)
        .await
        .unwrap();
    service
        .send_notification(1, NotificationType::Approved, "Approved", "", 0)
        .await
        .unwrap();
    service.mark_as_read(1, read.id).await.unwrap();

    // Fresh rows survive the default retention
    assert_eq!(service.purge_read_older_than(3).await.unwrap(), 0);

    // Zero-day retention removes only the read row
    sleep(Duration::from_millis(5)).await;
    assert_eq!(service.purge_read_older_than(0).await.unwrap(), 1);

    let remaining = service.list_for_user(1).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(!remaining[0].is_read);

    cancel.cancel();
}
