//! Geocode queue and worker

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    AddressColumn, AddressResolver, AttendanceStore, GeocodeError, GeocodeJob, RateLimiter,
};

/// Producer side of the geocode queue
#[derive(Clone)]
pub struct GeocodeQueue {
    tx: mpsc::Sender<GeocodeJob>,
    enqueue_timeout: Duration,
}

impl GeocodeQueue {
    /// Queue a job, waiting at most `enqueue_timeout` for space
    ///
    /// A saturated queue drops the job; the attendance row keeps its empty
    /// address.
    pub async fn enqueue(&self, job: GeocodeJob) -> Result<(), GeocodeError> {
        match self.tx.send_timeout(job, self.enqueue_timeout).await {
            Ok(()) => {
                debug!(attendance_id = job.attendance_id, "Geocode job queued");
                Ok(())
            }
            Err(SendTimeoutError::Timeout(job)) => {
                warn!(
                    attendance_id = job.attendance_id,
                    timeout = ?self.enqueue_timeout,
                    "Geocode queue saturated, job dropped"
                );
                Err(GeocodeError::QueueSaturated)
            }
            Err(SendTimeoutError::Closed(job)) => {
                warn!(attendance_id = job.attendance_id, "Geocode worker stopped, job dropped");
                Err(GeocodeError::QueueClosed)
            }
        }
    }
}

/// Consumer draining the queue one job at a time
pub struct GeocodeWorker {
    resolver: AddressResolver,
    store: Arc<dyn AttendanceStore>,
    limiter: Arc<RateLimiter>,
}

impl GeocodeWorker {
    pub fn new(
        resolver: AddressResolver,
        store: Arc<dyn AttendanceStore>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            resolver,
            store,
            limiter,
        }
    }

    /// Start the worker task and return the queue feeding it
    ///
    /// The worker stops when `cancel` fires or every queue handle is dropped.
    /// Jobs still queued at cancellation are discarded.
    pub fn spawn(
        self,
        capacity: usize,
        enqueue_timeout: Duration,
        cancel: CancellationToken,
    ) -> (GeocodeQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(self.run(rx, cancel));
        (
            GeocodeQueue {
                tx,
                enqueue_timeout,
            },
            handle,
        )
    }

    async fn run(self, mut rx: mpsc::Receiver<GeocodeJob>, cancel: CancellationToken) {
        info!("Geocode worker started");

        loop {
            let job = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.limiter.wait() => {}
            }

            self.process_job(job).await;
        }

        info!("Geocode worker stopped");
    }

    async fn process_job(&self, job: GeocodeJob) {
        let address = self.resolver.resolve(job.latitude, job.longitude).await;
        let column = AddressColumn::for_job(job.is_checkout);

        match self
            .store
            .update_address(job.attendance_id, column, &address)
            .await
        {
            Ok(()) => info!(
                attendance_id = job.attendance_id,
                column = ?column,
                address = %address,
                "Attendance address updated"
            ),
            Err(e) => error!(
                attendance_id = job.attendance_id,
                error = %e,
                "Failed to store attendance address"
            ),
        }
    }
}
