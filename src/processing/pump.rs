use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ports::{NotificationQueue, PortFuture};
use crate::types::{FlowProcessingRequest, WorkerId};

/// Consumer callback for claimed notifications.
///
/// The handler returns the subset it fully progressed (flow re-leased and
/// drained, or determined to be a no-op); only those are acknowledged.
/// Everything else stays queued and redelivers after the claim lease runs
/// out, so a crash between claim and ack loses nothing.
pub trait NotificationHandler: Send + Sync + 'static {
    fn handle(
        &self,
        batch: Vec<FlowProcessingRequest>,
    ) -> PortFuture<'_, Vec<FlowProcessingRequest>>;
}

/// Polling delivery loop over the notification queue.
///
/// One pump owns one consumer: `start` hands the queue to a background task
/// and returns a handle that is the subscription itself. Dropping the
/// handle without `close` leaves the task running until the process exits;
/// `close` stops the loop and joins it.
pub struct NotificationPump<Q> {
    queue: Arc<Q>,
    worker: WorkerId,
    claim_lease: Duration,
    poll_interval: Duration,
    batch_limit: i64,
}

impl<Q> NotificationPump<Q>
where
    Q: NotificationQueue + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(queue: Arc<Q>, worker: WorkerId, config: &crate::config::FlowConfig) -> Self {
        Self {
            queue,
            worker,
            claim_lease: config.notification_lease,
            poll_interval: config.poll_interval,
            batch_limit: 32,
        }
    }

    #[must_use]
    pub const fn with_batch_limit(mut self, batch_limit: i64) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    /// Spawn the delivery loop. The returned handle is the only way to stop
    /// it again.
    #[must_use]
    pub fn start<H>(self, handler: H) -> PumpHandle
    where
        H: NotificationHandler,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(handler, shutdown_rx));
        PumpHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run<H>(self, handler: H, mut shutdown: watch::Receiver<bool>)
    where
        H: NotificationHandler,
    {
        info!(worker = %self.worker, "notification pump started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.deliver_once(&handler).await;
                }
            }
        }
        info!(worker = %self.worker, "notification pump stopped");
    }

    async fn deliver_once<H>(&self, handler: &H)
    where
        H: NotificationHandler,
    {
        let batch = match self
            .queue
            .claim(&self.worker, self.claim_lease, self.batch_limit)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!("failed to claim notifications: {e}");
                return;
            }
        };

        if batch.is_empty() {
            return;
        }

        debug!(count = batch.len(), "delivering notifications");
        match handler.handle(batch).await {
            Ok(progressed) => {
                if let Err(e) = self.queue.ack(&progressed).await {
                    // Redelivery will retry them; the handler's work was
                    // idempotent by contract.
                    warn!("failed to ack notifications: {e}");
                }
            }
            Err(e) => {
                warn!("notification handler failed, batch will redeliver: {e}");
            }
        }
    }
}

/// Owned subscription to a running pump.
pub struct PumpHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PumpHandle {
    /// Stop the delivery loop and wait for it to finish.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
