//! Geocode pipeline integration tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use hris_realtime::geocode::{
    AddressColumn, AddressLookup, AddressResolver, AttendanceStore, GeocodeError, GeocodeJob,
    GeocodeQueue, GeocodeWorker, RateLimiter, SqliteAttendanceStore,
};

/// Lookup that always answers with a fixed address and records call times
struct FixedLookup {
    address: Option<String>,
    calls: Mutex<Vec<Instant>>,
}

impl FixedLookup {
    fn ok(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: Some(address.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            address: None,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AddressLookup for FixedLookup {
    async fn lookup(&self, _latitude: f64, _longitude: f64) -> Result<String, GeocodeError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.address
            .clone()
            .ok_or_else(|| GeocodeError::Lookup("connection refused".into()))
    }
}

/// Lookup that never completes
struct StuckLookup;

#[async_trait]
impl AddressLookup for StuckLookup {
    async fn lookup(&self, _latitude: f64, _longitude: f64) -> Result<String, GeocodeError> {
        std::future::pending().await
    }
}

/// In-memory store; ids listed in `fail_ids` report a write failure
#[derive(Default)]
struct RecordingStore {
    writes: Mutex<Vec<(i64, AddressColumn, String)>>,
    fail_ids: Vec<i64>,
}

#[async_trait]
impl AttendanceStore for RecordingStore {
    async fn update_address(
        &self,
        attendance_id: i64,
        column: AddressColumn,
        address: &str,
    ) -> hris_common::Result<()> {
        if self.fail_ids.contains(&attendance_id) {
            return Err(hris_common::Error::Internal("disk full".into()));
        }
        self.writes
            .lock()
            .unwrap()
            .push((attendance_id, column, address.to_string()));
        Ok(())
    }
}

impl RecordingStore {
    fn written_ids(&self) -> Vec<i64> {
        self.writes.lock().unwrap().iter().map(|w| w.0).collect()
    }
}

fn job(attendance_id: i64, is_checkout: bool) -> GeocodeJob {
    GeocodeJob {
        attendance_id,
        latitude: -6.2,
        longitude: 106.8,
        is_checkout,
    }
}

fn start_worker(
    lookup: Arc<dyn AddressLookup>,
    store: Arc<dyn AttendanceStore>,
    min_interval: Duration,
    capacity: usize,
    cancel: &CancellationToken,
) -> (GeocodeQueue, tokio::task::JoinHandle<()>) {
    let worker = GeocodeWorker::new(
        AddressResolver::new(lookup, 3, Duration::from_millis(5)),
        store,
        Arc::new(RateLimiter::new(min_interval)),
    );
    worker.spawn(capacity, Duration::from_millis(50), cancel.clone())
}

async fn setup_attendance_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    hris_common::db::init_tables(&pool).await.unwrap();

    sqlx::query(
        "INSERT INTO attendances (id, employee_id, check_in_lat, check_in_long, check_out_lat, check_out_long)
         VALUES (1, 10, 1.0, 2.0, 1.0, 2.0)",
    )
    .execute(&pool)
    .await
    .unwrap();

    pool
}

async fn addresses(pool: &SqlitePool) -> (String, Option<String>) {
    sqlx::query_as("SELECT check_in_address, check_out_address FROM attendances WHERE id = 1")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_failed_lookup_stores_unknown_location() {
    let pool = setup_attendance_db().await;
    let cancel = CancellationToken::new();
    let store = Arc::new(SqliteAttendanceStore::new(pool.clone()));
    let (queue, _task) = start_worker(
        FixedLookup::failing(),
        store,
        Duration::from_millis(1),
        8,
        &cancel,
    );

    queue
        .enqueue(GeocodeJob {
            attendance_id: 1,
            latitude: 1.0,
            longitude: 2.0,
            is_checkout: false,
        })
        .await
        .unwrap();

    timeout(Duration::from_secs(2), async {
        while addresses(&pool).await.0.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("address never written");

    assert_eq!(
        addresses(&pool).await.0,
        "Unknown Location (1.000000, 2.000000)"
    );
    cancel.cancel();
}

#[tokio::test]
async fn test_checkout_job_fills_checkout_column() {
    let pool = setup_attendance_db().await;
    let cancel = CancellationToken::new();
    let store = Arc::new(SqliteAttendanceStore::new(pool.clone()));
    let (queue, _task) = start_worker(
        FixedLookup::ok("Jl. Thamrin, Jakarta"),
        store,
        Duration::from_millis(1),
        8,
        &cancel,
    );

    queue.enqueue(job(1, true)).await.unwrap();

    timeout(Duration::from_secs(2), async {
        while addresses(&pool).await.1.is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("address never written");

    let (check_in, check_out) = addresses(&pool).await;
    assert_eq!(check_in, "");
    assert_eq!(check_out.as_deref(), Some("Jl. Thamrin, Jakarta"));
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_lookups_respect_rate_limit() {
    let cancel = CancellationToken::new();
    let lookup = FixedLookup::ok("Bandung");
    let store = Arc::new(RecordingStore::default());
    let (queue, _task) = start_worker(
        lookup.clone(),
        store.clone(),
        Duration::from_millis(1500),
        8,
        &cancel,
    );

    for id in 1..=3 {
        queue.enqueue(job(id, false)).await.unwrap();
    }

    while store.written_ids().len() < 3 {
        sleep(Duration::from_millis(100)).await;
    }

    let calls = lookup.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(1500));
    }
    cancel.cancel();
}

#[tokio::test]
async fn test_store_failure_does_not_stop_worker() {
    let cancel = CancellationToken::new();
    let store = Arc::new(RecordingStore {
        fail_ids: vec![1],
        ..Default::default()
    });
    let (queue, _task) = start_worker(
        FixedLookup::ok("Surabaya"),
        store.clone(),
        Duration::from_millis(1),
        8,
        &cancel,
    );

    queue.enqueue(job(1, false)).await.unwrap();
    queue.enqueue(job(2, true)).await.unwrap();

    timeout(Duration::from_secs(2), async {
        while store.written_ids().is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second job never processed");

    let writes = store.writes.lock().unwrap().clone();
    assert_eq!(
        writes,
        vec![(2, AddressColumn::CheckOut, "Surabaya".to_string())]
    );
    cancel.cancel();
}

#[tokio::test]
async fn test_saturated_queue_rejects_job() {
    let cancel = CancellationToken::new();
    let store = Arc::new(RecordingStore::default());
    let (queue, _task) = start_worker(
        Arc::new(StuckLookup),
        store,
        Duration::from_millis(1),
        1,
        &cancel,
    );

    // First job occupies the worker, second fills the queue
    queue.enqueue(job(1, false)).await.unwrap();
    queue.enqueue(job(2, false)).await.unwrap();

    let result = queue.enqueue(job(3, false)).await;
    assert!(matches!(result, Err(GeocodeError::QueueSaturated)));

    cancel.cancel();
}

#[tokio::test]
async fn test_enqueue_after_shutdown_reports_closed() {
    let cancel = CancellationToken::new();
    let store = Arc::new(RecordingStore::default());
    let (queue, task) = start_worker(
        FixedLookup::ok("Medan"),
        store,
        Duration::from_millis(1),
        4,
        &cancel,
    );

    cancel.cancel();
    task.await.unwrap();

    let result = queue.enqueue(job(1, false)).await;
    assert!(matches!(result, Err(GeocodeError::QueueClosed)));
}
