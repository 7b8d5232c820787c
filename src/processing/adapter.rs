use std::time::Duration;

use super::ports::{NotificationQueue, PortFuture, WorkerStore};
use crate::db::FlowDb;
use crate::types::{
    ClientId, Flow, FlowId, FlowProcessingRequest, FlowRequest, ReleaseOutcome,
    RequestAndResponses, WorkerId,
};

impl WorkerStore for FlowDb {
    fn read_flow<'a>(
        &'a self,
        client_id: &'a ClientId,
        flow_id: &'a FlowId,
    ) -> PortFuture<'a, Flow> {
        Box::pin(async move { Self::read_flow(self, client_id, flow_id).await })
    }

    fn lease_flow<'a>(
        &'a self,
        client_id: &'a ClientId,
        flow_id: &'a FlowId,
        worker: &'a WorkerId,
        processing_time: Duration,
    ) -> PortFuture<'a, Flow> {
        Box::pin(async move {
            self.lease_flow_for_processing(client_id, flow_id, worker, processing_time)
                .await
        })
    }

    fn read_ready_requests<'a>(
        &'a self,
        client_id: &'a ClientId,
        flow_id: &'a FlowId,
        next_needed: u64,
    ) -> PortFuture<'a, Vec<RequestAndResponses>> {
        Box::pin(async move {
            self.read_flow_requests_ready_for_processing(client_id, flow_id, next_needed)
                .await
        })
    }

    fn delete_processed_requests<'a>(
        &'a self,
        requests: &'a [FlowRequest],
    ) -> PortFuture<'a, ()> {
        Box::pin(async move { self.delete_flow_requests(requests).await })
    }

    fn release_flow<'a>(&'a self, flow: &'a Flow) -> PortFuture<'a, ReleaseOutcome> {
        Box::pin(async move { self.release_processed_flow(flow).await })
    }
}

impl NotificationQueue for FlowDb {
    fn claim<'a>(
        &'a self,
        worker: &'a WorkerId,
        lease_time: Duration,
        limit: i64,
    ) -> PortFuture<'a, Vec<FlowProcessingRequest>> {
        Box::pin(async move {
            self.claim_flow_processing_requests(worker, lease_time, limit)
                .await
        })
    }

    fn ack<'a>(&'a self, requests: &'a [FlowProcessingRequest]) -> PortFuture<'a, ()> {
        Box::pin(async move { self.ack_flow_processing_requests(requests).await })
    }
}
