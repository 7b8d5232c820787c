use std::time::Duration;

use tracing::{debug, info};

use super::ports::{FlowLogic, HuntGateway, WorkerStore};
use crate::error::{FlowError, Result};
use crate::types::{
    ClientId, FlowId, FlowProcessingRequest, FlowRequest, FlowState, ReleaseOutcome, WorkerId,
};

/// How one wake-up ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every ready request was consumed and the cursor is fully advanced.
    Drained,
    /// Another worker holds the lease; it will drain the flow. A no-op for
    /// this worker and safe to acknowledge.
    AlreadyLeased,
}

/// The lease/process/release loop that turns notifications into flow
/// progress.
///
/// Exactly-once side effects hang off the release boundary: the cursor
/// commit and the hunt counter update happen once per successful release,
/// never per notification (notifications are at-least-once and may
/// duplicate).
pub struct FlowWorker<S, H, L> {
    store: S,
    hunts: H,
    logic: L,
    worker_id: WorkerId,
    processing_time: Duration,
}

impl<S, H, L> FlowWorker<S, H, L>
where
    S: WorkerStore + Sync,
    H: HuntGateway + Sync,
    L: FlowLogic + Sync,
{
    pub fn new(
        store: S,
        hunts: H,
        logic: L,
        worker_id: WorkerId,
        processing_time: Duration,
    ) -> Self {
        Self {
            store,
            hunts,
            logic,
            worker_id,
            processing_time,
        }
    }

    /// Handle one notification end to end.
    pub async fn process_notification(
        &self,
        notification: &FlowProcessingRequest,
    ) -> Result<ProcessOutcome> {
        self.process_flow(&notification.client_id, &notification.flow_id)
            .await
    }

    /// Drain a flow: lease, hand contiguous ready batches to the flow
    /// logic, release, and loop until the release reports no pending work.
    pub async fn process_flow(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
    ) -> Result<ProcessOutcome> {
        let flow = self.store.read_flow(client_id, flow_id).await?;
        if let Some(hunt_id) = &flow.parent_hunt_id {
            if !self.hunts.is_hunt_running(hunt_id).await? {
                return Err(FlowError::ParentHuntIsNotRunning {
                    hunt_id: hunt_id.clone(),
                });
            }
        }

        loop {
            let mut leased = match self
                .store
                .lease_flow(client_id, flow_id, &self.worker_id, self.processing_time)
                .await
            {
                Ok(flow) => flow,
                Err(e) if e.is_lease_contention() => {
                    debug!(
                        client_id = %client_id,
                        flow_id = %flow_id,
                        "flow already leased, leaving it to the holder"
                    );
                    return Ok(ProcessOutcome::AlreadyLeased);
                }
                Err(e) => return Err(e),
            };

            let mut replies_this_cycle: u64 = 0;
            let batch = self
                .store
                .read_ready_requests(client_id, flow_id, leased.next_request_to_process)
                .await?;

            let next_cursor = batch.last().map(|last| last.request.request_id + 1);
            if let Some(next_cursor) = next_cursor {
                let outcome = self.logic.process_batch(&leased, &batch).await?;

                replies_this_cycle = outcome.replies_sent();
                leased.num_replies_sent += outcome.replies_sent();
                leased.network_bytes_sent += outcome.network_bytes_sent();
                leased.user_cpu_time_used_micros += outcome.user_cpu_time_used_micros();
                leased.system_cpu_time_used_micros += outcome.system_cpu_time_used_micros();
                if let Some(state) = outcome.new_state() {
                    leased.flow_state = state;
                }
                leased.next_request_to_process = next_cursor;

                let processed: Vec<FlowRequest> =
                    batch.into_iter().map(|item| item.request).collect();
                self.store.delete_processed_requests(&processed).await?;
            }

            // Termination checkpoint: advisory, honored between batches
            // rather than by preemption.
            if leased.pending_termination.is_some() && !leased.flow_state.is_terminal() {
                info!(
                    client_id = %client_id,
                    flow_id = %flow_id,
                    "terminating flow at checkpoint"
                );
                leased.flow_state = FlowState::Error;
            }

            let terminal = leased.flow_state.is_terminal();
            let parent_hunt = leased.parent_hunt_id.clone();
            let outcome = self.store.release_flow(&leased).await?;

            if let Some(hunt_id) = &parent_hunt {
                if replies_this_cycle > 0 {
                    self.hunts
                        .update_hunt_counters(hunt_id, replies_this_cycle)
                        .await?;
                }
            }

            match outcome {
                ReleaseOutcome::MoreWorkPending if !terminal => {}
                _ => return Ok(ProcessOutcome::Drained),
            }
        }
    }
}
