use crate::error::Result;
use crate::types::{
    ClientId, Flow, FlowId, FlowProcessingRequest, FlowRequest, FlowState, HuntId,
    ReleaseOutcome, RequestAndResponses, WorkerId,
};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Store operations a processing worker needs around one lease cycle.
pub trait WorkerStore {
    fn read_flow<'a>(
        &'a self,
        client_id: &'a ClientId,
        flow_id: &'a FlowId,
    ) -> PortFuture<'a, Flow>;

    fn lease_flow<'a>(
        &'a self,
        client_id: &'a ClientId,
        flow_id: &'a FlowId,
        worker: &'a WorkerId,
        processing_time: Duration,
    ) -> PortFuture<'a, Flow>;

    fn read_ready_requests<'a>(
        &'a self,
        client_id: &'a ClientId,
        flow_id: &'a FlowId,
        next_needed: u64,
    ) -> PortFuture<'a, Vec<RequestAndResponses>>;

    fn delete_processed_requests<'a>(
        &'a self,
        requests: &'a [FlowRequest],
    ) -> PortFuture<'a, ()>;

    fn release_flow<'a>(&'a self, flow: &'a Flow) -> PortFuture<'a, ReleaseOutcome>;
}

/// Claim/ack surface of the notification queue, as consumed by the pump.
pub trait NotificationQueue {
    fn claim<'a>(
        &'a self,
        worker: &'a WorkerId,
        lease_time: Duration,
        limit: i64,
    ) -> PortFuture<'a, Vec<FlowProcessingRequest>>;

    fn ack<'a>(&'a self, requests: &'a [FlowProcessingRequest]) -> PortFuture<'a, ()>;
}

/// The hunt controller is an external collaborator; only its contract is
/// consumed here.
pub trait HuntGateway {
    fn is_hunt_running<'a>(&'a self, hunt_id: &'a HuntId) -> PortFuture<'a, bool>;

    fn update_hunt_counters<'a>(
        &'a self,
        hunt_id: &'a HuntId,
        replies_sent: u64,
    ) -> PortFuture<'a, ()>;
}

/// What the flow-logic layer reports back after consuming one ready batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    replies_sent: u64,
    network_bytes_sent: u64,
    user_cpu_time_used_micros: u64,
    system_cpu_time_used_micros: u64,
    new_state: Option<FlowState>,
}

impl BatchOutcome {
    #[must_use]
    pub const fn new(replies_sent: u64) -> Self {
        Self {
            replies_sent,
            network_bytes_sent: 0,
            user_cpu_time_used_micros: 0,
            system_cpu_time_used_micros: 0,
            new_state: None,
        }
    }

    #[must_use]
    pub const fn with_network_bytes(mut self, bytes: u64) -> Self {
        self.network_bytes_sent = bytes;
        self
    }

    #[must_use]
    pub const fn with_cpu_time(mut self, user_micros: u64, system_micros: u64) -> Self {
        self.user_cpu_time_used_micros = user_micros;
        self.system_cpu_time_used_micros = system_micros;
        self
    }

    /// Declare a state transition, e.g. `Finished` once the final request
    /// was consumed.
    #[must_use]
    pub const fn with_new_state(mut self, state: FlowState) -> Self {
        self.new_state = Some(state);
        self
    }

    #[must_use]
    pub const fn replies_sent(&self) -> u64 {
        self.replies_sent
    }

    #[must_use]
    pub const fn network_bytes_sent(&self) -> u64 {
        self.network_bytes_sent
    }

    #[must_use]
    pub const fn user_cpu_time_used_micros(&self) -> u64 {
        self.user_cpu_time_used_micros
    }

    #[must_use]
    pub const fn system_cpu_time_used_micros(&self) -> u64 {
        self.system_cpu_time_used_micros
    }

    #[must_use]
    pub const fn new_state(&self) -> Option<FlowState> {
        self.new_state
    }
}

/// The investigative logic of a flow. Out of scope here; the worker only
/// needs a seam to hand ready batches through.
pub trait FlowLogic {
    fn process_batch<'a>(
        &'a self,
        flow: &'a Flow,
        batch: &'a [RequestAndResponses],
    ) -> PortFuture<'a, BatchOutcome>;
}
