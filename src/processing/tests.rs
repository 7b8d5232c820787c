#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use super::{
    BatchOutcome, FlowLogic, FlowWorker, HuntGateway, NotificationHandler, NotificationPump,
    NotificationQueue, PortFuture, ProcessOutcome, WorkerStore,
};
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::types::{
    ClientId, Flow, FlowId, FlowProcessingRequest, FlowRequest, FlowState, HuntId,
    ReleaseOutcome, RequestAndResponses, WorkerId,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

fn test_flow() -> Flow {
    Flow::new(ClientId::new("C.1"), FlowId::new("F.1"))
}

fn ready_batch(ids: &[u64]) -> Vec<RequestAndResponses> {
    ids.iter()
        .map(|id| {
            let mut request = FlowRequest::new(ClientId::new("C.1"), FlowId::new("F.1"), *id);
            request.needs_processing = true;
            RequestAndResponses {
                request,
                responses: Vec::new(),
            }
        })
        .collect()
}

#[derive(Clone)]
struct FakeStore {
    flow: Arc<Mutex<Flow>>,
    lease_errors: Arc<Mutex<VecDeque<FlowError>>>,
    ready_batches: Arc<Mutex<VecDeque<Vec<RequestAndResponses>>>>,
    release_outcomes: Arc<Mutex<VecDeque<ReleaseOutcome>>>,
    lease_calls: Arc<Mutex<u32>>,
    released: Arc<Mutex<Vec<Flow>>>,
    deleted: Arc<Mutex<Vec<Vec<u64>>>>,
}

impl FakeStore {
    fn new(flow: Flow) -> Self {
        Self {
            flow: Arc::new(Mutex::new(flow)),
            lease_errors: Arc::new(Mutex::new(VecDeque::new())),
            ready_batches: Arc::new(Mutex::new(VecDeque::new())),
            release_outcomes: Arc::new(Mutex::new(VecDeque::new())),
            lease_calls: Arc::new(Mutex::new(0)),
            released: Arc::new(Mutex::new(Vec::new())),
            deleted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn with_ready_batches(self, batches: Vec<Vec<RequestAndResponses>>) -> Self {
        let mut queued = self.ready_batches.lock().await;
        *queued = batches.into();
        drop(queued);
        self
    }

    async fn with_release_outcomes(self, outcomes: Vec<ReleaseOutcome>) -> Self {
        let mut queued = self.release_outcomes.lock().await;
        *queued = outcomes.into();
        drop(queued);
        self
    }

    async fn with_lease_error(self, error: FlowError) -> Self {
        let mut queued = self.lease_errors.lock().await;
        queued.push_back(error);
        drop(queued);
        self
    }
}

impl WorkerStore for FakeStore {
    fn read_flow<'a>(
        &'a self,
        _client_id: &'a ClientId,
        _flow_id: &'a FlowId,
    ) -> PortFuture<'a, Flow> {
        Box::pin(async move { Ok(self.flow.lock().await.clone()) })
    }

    fn lease_flow<'a>(
        &'a self,
        _client_id: &'a ClientId,
        _flow_id: &'a FlowId,
        worker: &'a WorkerId,
        _processing_time: Duration,
    ) -> PortFuture<'a, Flow> {
        Box::pin(async move {
            if let Some(error) = self.lease_errors.lock().await.pop_front() {
                return Err(error);
            }
            let mut calls = self.lease_calls.lock().await;
            *calls += 1;
            drop(calls);

            let mut flow = self.flow.lock().await.clone();
            flow.processing_on = Some(worker.value().to_string());
            Ok(flow)
        })
    }

    fn read_ready_requests<'a>(
        &'a self,
        _client_id: &'a ClientId,
        _flow_id: &'a FlowId,
        _next_needed: u64,
    ) -> PortFuture<'a, Vec<RequestAndResponses>> {
        Box::pin(async move {
            Ok(self
                .ready_batches
                .lock()
                .await
                .pop_front()
                .unwrap_or_default())
        })
    }

    fn delete_processed_requests<'a>(
        &'a self,
        requests: &'a [FlowRequest],
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let ids = requests.iter().map(|r| r.request_id).collect();
            self.deleted.lock().await.push(ids);
            Ok(())
        })
    }

    fn release_flow<'a>(&'a self, flow: &'a Flow) -> PortFuture<'a, ReleaseOutcome> {
        Box::pin(async move {
            self.released.lock().await.push(flow.clone());
            let mut stored = self.flow.lock().await;
            stored.next_request_to_process = flow.next_request_to_process;
            stored.flow_state = flow.flow_state;
            stored.processing_on = None;
            drop(stored);
            Ok(self
                .release_outcomes
                .lock()
                .await
                .pop_front()
                .unwrap_or(ReleaseOutcome::Drained))
        })
    }
}

#[derive(Clone)]
struct FakeHunts {
    running: Arc<Mutex<bool>>,
    counter_updates: Arc<Mutex<Vec<(HuntId, u64)>>>,
}

impl FakeHunts {
    fn new(running: bool) -> Self {
        Self {
            running: Arc::new(Mutex::new(running)),
            counter_updates: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl HuntGateway for FakeHunts {
    fn is_hunt_running<'a>(&'a self, _hunt_id: &'a HuntId) -> PortFuture<'a, bool> {
        Box::pin(async move { Ok(*self.running.lock().await) })
    }

    fn update_hunt_counters<'a>(
        &'a self,
        hunt_id: &'a HuntId,
        replies_sent: u64,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.counter_updates
                .lock()
                .await
                .push((hunt_id.clone(), replies_sent));
            Ok(())
        })
    }
}

#[derive(Clone)]
struct FakeLogic {
    outcome: BatchOutcome,
    batches_seen: Arc<Mutex<Vec<Vec<u64>>>>,
}

impl FakeLogic {
    fn new(outcome: BatchOutcome) -> Self {
        Self {
            outcome,
            batches_seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl FlowLogic for FakeLogic {
    fn process_batch<'a>(
        &'a self,
        _flow: &'a Flow,
        batch: &'a [RequestAndResponses],
    ) -> PortFuture<'a, BatchOutcome> {
        Box::pin(async move {
            let ids = batch.iter().map(|item| item.request.request_id).collect();
            self.batches_seen.lock().await.push(ids);
            Ok(self.outcome)
        })
    }
}

fn worker(store: FakeStore, hunts: FakeHunts, logic: FakeLogic) -> FlowWorker<FakeStore, FakeHunts, FakeLogic> {
    FlowWorker::new(
        store,
        hunts,
        logic,
        WorkerId::new("worker-1"),
        Duration::from_secs(60),
    )
}

mod flow_worker {
    use super::*;

    #[tokio::test]
    async fn pending_release_outcome_makes_the_worker_loop_until_drained() {
        let store = FakeStore::new(test_flow())
            .with_ready_batches(vec![ready_batch(&[1]), ready_batch(&[2])])
            .await
            .with_release_outcomes(vec![
                ReleaseOutcome::MoreWorkPending,
                ReleaseOutcome::Drained,
            ])
            .await;
        let hunts = FakeHunts::new(true);
        let logic = FakeLogic::new(BatchOutcome::new(1));
        let service = worker(store.clone(), hunts, logic.clone());

        let outcome = service
            .process_flow(&ClientId::new("C.1"), &FlowId::new("F.1"))
            .await
            .expect("processing failed");

        assert_eq!(outcome, ProcessOutcome::Drained);
        assert_eq!(*store.lease_calls.lock().await, 2, "re-lease per cycle");
        assert_eq!(
            *logic.batches_seen.lock().await,
            vec![vec![1], vec![2]],
            "each cycle hands exactly one contiguous batch to the flow logic"
        );

        let released = store.released.lock().await;
        assert_eq!(released.len(), 2);
        assert_eq!(released[0].next_request_to_process, 2);
        assert_eq!(released[1].next_request_to_process, 3);
        drop(released);

        let deleted = store.deleted.lock().await;
        assert_eq!(*deleted, vec![vec![1], vec![2]], "processed requests are deleted");
    }

    #[tokio::test]
    async fn an_empty_ready_run_still_releases_and_drains() {
        let store = FakeStore::new(test_flow());
        let hunts = FakeHunts::new(true);
        let logic = FakeLogic::new(BatchOutcome::new(0));
        let service = worker(store.clone(), hunts, logic.clone());

        let outcome = service
            .process_flow(&ClientId::new("C.1"), &FlowId::new("F.1"))
            .await
            .expect("processing failed");

        assert_eq!(outcome, ProcessOutcome::Drained);
        assert!(logic.batches_seen.lock().await.is_empty());
        assert!(store.deleted.lock().await.is_empty());
        assert_eq!(store.released.lock().await.len(), 1, "the lease is surrendered");
    }

    #[tokio::test]
    async fn lease_contention_is_a_benign_noop() {
        let flow = test_flow();
        let store = FakeStore::new(flow.clone())
            .with_lease_error(FlowError::FlowAlreadyLeased {
                client_id: flow.client_id.clone(),
                flow_id: flow.flow_id.clone(),
                leased_until: Utc::now(),
            })
            .await;
        let hunts = FakeHunts::new(true);
        let logic = FakeLogic::new(BatchOutcome::new(0));
        let service = worker(store.clone(), hunts, logic);

        let outcome = service
            .process_flow(&flow.client_id, &flow.flow_id)
            .await
            .expect("contention must not be an error");

        assert_eq!(outcome, ProcessOutcome::AlreadyLeased);
        assert!(store.released.lock().await.is_empty());
    }

    #[tokio::test]
    async fn other_lease_failures_propagate() {
        let store = FakeStore::new(test_flow())
            .with_lease_error(FlowError::Internal("boom".to_string()))
            .await;
        let hunts = FakeHunts::new(true);
        let logic = FakeLogic::new(BatchOutcome::new(0));
        let service = worker(store, hunts, logic);

        let result = service
            .process_flow(&ClientId::new("C.1"), &FlowId::new("F.1"))
            .await;
        assert!(matches!(result, Err(FlowError::Internal(_))));
    }

    #[tokio::test]
    async fn a_paused_hunt_blocks_processing_before_the_lease() {
        let flow = test_flow().with_parent_hunt(HuntId::new("H.1"));
        let store = FakeStore::new(flow.clone());
        let hunts = FakeHunts::new(false);
        let logic = FakeLogic::new(BatchOutcome::new(0));
        let service = worker(store.clone(), hunts, logic);

        let result = service.process_flow(&flow.client_id, &flow.flow_id).await;

        assert!(matches!(
            result,
            Err(FlowError::ParentHuntIsNotRunning { .. })
        ));
        assert_eq!(
            *store.lease_calls.lock().await,
            0,
            "back-pressure applies before the flow is touched"
        );
    }

    #[tokio::test]
    async fn hunt_counters_update_once_per_release_with_the_reply_delta() {
        let flow = test_flow().with_parent_hunt(HuntId::new("H.1"));
        let store = FakeStore::new(flow.clone())
            .with_ready_batches(vec![ready_batch(&[1, 2])])
            .await;
        let hunts = FakeHunts::new(true);
        let logic = FakeLogic::new(BatchOutcome::new(3));
        let service = worker(store, hunts.clone(), logic);

        service
            .process_flow(&flow.client_id, &flow.flow_id)
            .await
            .expect("processing failed");

        let updates = hunts.counter_updates.lock().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0], (HuntId::new("H.1"), 3));
    }

    #[tokio::test]
    async fn a_cycle_without_replies_does_not_touch_hunt_counters() {
        let flow = test_flow().with_parent_hunt(HuntId::new("H.1"));
        let store = FakeStore::new(flow.clone());
        let hunts = FakeHunts::new(true);
        let logic = FakeLogic::new(BatchOutcome::new(0));
        let service = worker(store, hunts.clone(), logic);

        service
            .process_flow(&flow.client_id, &flow.flow_id)
            .await
            .expect("processing failed");

        assert!(hunts.counter_updates.lock().await.is_empty());
    }

    #[tokio::test]
    async fn pending_termination_is_honored_at_the_checkpoint() {
        let mut flow = test_flow();
        flow.pending_termination = Some("requested by operator".to_string());
        let store = FakeStore::new(flow.clone());
        let hunts = FakeHunts::new(true);
        let logic = FakeLogic::new(BatchOutcome::new(0));
        let service = worker(store.clone(), hunts, logic);

        let outcome = service
            .process_flow(&flow.client_id, &flow.flow_id)
            .await
            .expect("processing failed");

        assert_eq!(outcome, ProcessOutcome::Drained);
        let released = store.released.lock().await;
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].flow_state, FlowState::Error);
    }

    #[tokio::test]
    async fn a_terminal_flow_stops_the_loop_even_with_work_pending() {
        let store = FakeStore::new(test_flow())
            .with_ready_batches(vec![ready_batch(&[1])])
            .await
            .with_release_outcomes(vec![ReleaseOutcome::MoreWorkPending])
            .await;
        let hunts = FakeHunts::new(true);
        let logic = FakeLogic::new(BatchOutcome::new(1).with_new_state(FlowState::Finished));
        let service = worker(store.clone(), hunts, logic);

        let outcome = service
            .process_flow(&ClientId::new("C.1"), &FlowId::new("F.1"))
            .await
            .expect("processing failed");

        assert_eq!(outcome, ProcessOutcome::Drained);
        assert_eq!(*store.lease_calls.lock().await, 1, "no re-lease after a terminal state");
    }
}

#[derive(Clone)]
struct FakeQueue {
    pending: Arc<Mutex<Vec<(FlowProcessingRequest, Option<Instant>)>>>,
    deliveries: Arc<Mutex<Vec<(i64, DateTime<Utc>)>>>,
}

impl FakeQueue {
    fn new(notifications: Vec<FlowProcessingRequest>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(
                notifications.into_iter().map(|n| (n, None)).collect(),
            )),
            deliveries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl NotificationQueue for FakeQueue {
    fn claim<'a>(
        &'a self,
        _worker: &'a WorkerId,
        lease_time: Duration,
        limit: i64,
    ) -> PortFuture<'a, Vec<FlowProcessingRequest>> {
        Box::pin(async move {
            let now = Utc::now();
            let mut claimed = Vec::new();
            let mut pending = self.pending.lock().await;
            for (notification, lease) in pending.iter_mut() {
                if claimed.len() >= usize::try_from(limit).unwrap_or(usize::MAX) {
                    break;
                }
                if notification.delivery_time.is_some_and(|t| t > now) {
                    continue;
                }
                if lease.is_some_and(|until| until > Instant::now()) {
                    continue;
                }
                *lease = Some(Instant::now() + lease_time);
                claimed.push(notification.clone());
            }
            drop(pending);

            let mut deliveries = self.deliveries.lock().await;
            for notification in &claimed {
                deliveries.push((notification.id, now));
            }
            drop(deliveries);

            Ok(claimed)
        })
    }

    fn ack<'a>(&'a self, requests: &'a [FlowProcessingRequest]) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let mut pending = self.pending.lock().await;
            pending.retain(|(notification, _)| {
                !requests.iter().any(|acked| acked.id == notification.id)
            });
            Ok(())
        })
    }
}

struct AckAllHandler;

impl NotificationHandler for AckAllHandler {
    fn handle(
        &self,
        batch: Vec<FlowProcessingRequest>,
    ) -> PortFuture<'_, Vec<FlowProcessingRequest>> {
        Box::pin(async move { Ok(batch) })
    }
}

struct AckNothingHandler;

impl NotificationHandler for AckNothingHandler {
    fn handle(
        &self,
        _batch: Vec<FlowProcessingRequest>,
    ) -> PortFuture<'_, Vec<FlowProcessingRequest>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}

fn pump_config(poll: Duration, claim_lease: Duration) -> FlowConfig {
    FlowConfig {
        poll_interval: poll,
        notification_lease: claim_lease,
        ..FlowConfig::default()
    }
}

fn numbered(id: i64) -> FlowProcessingRequest {
    let mut notification =
        FlowProcessingRequest::new(ClientId::new("C.1"), FlowId::new(format!("F.{id}")));
    notification.id = id;
    notification
}

mod notification_pump {
    use super::*;

    #[tokio::test]
    async fn delivered_and_acked_notifications_leave_the_queue() {
        let queue = Arc::new(FakeQueue::new(vec![numbered(1)]));
        let config = pump_config(Duration::from_millis(10), Duration::from_secs(60));
        let pump = NotificationPump::new(queue.clone(), WorkerId::new("pump-1"), &config);

        let handle = pump.start(AckAllHandler);
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.close().await;

        assert!(
            !queue.deliveries.lock().await.is_empty(),
            "the handler must have been invoked"
        );
        assert!(
            queue.pending.lock().await.is_empty(),
            "acknowledged notifications must be gone"
        );
    }

    #[tokio::test]
    async fn a_delayed_notification_is_not_delivered_before_its_time() {
        let delivery_time = Utc::now() + chrono::Duration::milliseconds(250);
        let mut delayed = numbered(7);
        delayed.delivery_time = Some(delivery_time);

        let queue = Arc::new(FakeQueue::new(vec![delayed]));
        let config = pump_config(Duration::from_millis(10), Duration::from_secs(60));
        let pump = NotificationPump::new(queue.clone(), WorkerId::new("pump-1"), &config);

        let handle = pump.start(AckAllHandler);
        tokio::time::sleep(Duration::from_millis(600)).await;
        handle.close().await;

        let deliveries = queue.deliveries.lock().await;
        assert!(!deliveries.is_empty(), "the notification must eventually fire");
        assert!(
            deliveries.iter().all(|(_, at)| *at >= delivery_time),
            "every delivery must happen after the requested delivery time"
        );
    }

    #[tokio::test]
    async fn unacked_notifications_redeliver_until_acked() {
        let queue = Arc::new(FakeQueue::new(vec![numbered(3)]));
        let config = pump_config(Duration::from_millis(10), Duration::from_millis(40));
        let pump = NotificationPump::new(queue.clone(), WorkerId::new("pump-1"), &config);

        let handle = pump.start(AckNothingHandler);
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.close().await;

        let deliveries = queue.deliveries.lock().await;
        assert!(
            deliveries.len() >= 2,
            "an unacknowledged notification must be redelivered, saw {} deliveries",
            deliveries.len()
        );
        drop(deliveries);
        assert_eq!(
            queue.pending.lock().await.len(),
            1,
            "the notification stays queued until acked"
        );
    }
}
