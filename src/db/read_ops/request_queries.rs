use std::collections::BTreeMap;

use chrono::Utc;

use crate::db::mappers::{
    request_from_row, response_from_row, RequestRow, ResponseRow, REQUEST_COLUMNS,
    RESPONSE_COLUMNS,
};
use crate::db::readiness::ready_run;
use crate::db::FlowDb;
use crate::error::{FlowError, Result};
use crate::types::{ClientId, FlowId, RequestAndResponses};

impl FlowDb {
    /// The maximal contiguous run of completed requests starting at
    /// `next_needed`, each with its responses in ascending `response_id`
    /// order. Requests past a gap are withheld even when individually
    /// complete; see `ready_run` for the exact rule.
    pub async fn read_flow_requests_ready_for_processing(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
        next_needed: u64,
    ) -> Result<Vec<RequestAndResponses>> {
        let candidates = self
            .read_requests_with_responses(client_id, flow_id, Some(next_needed), true)
            .await?;
        Ok(ready_run(next_needed, Utc::now(), candidates))
    }

    /// Every request of a flow with its responses, for inspection and
    /// cleanup tooling.
    pub async fn read_all_flow_requests_and_responses(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
    ) -> Result<Vec<RequestAndResponses>> {
        self.read_requests_with_responses(client_id, flow_id, None, false)
            .await
    }

    async fn read_requests_with_responses(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
        min_request_id: Option<u64>,
        only_needs_processing: bool,
    ) -> Result<Vec<RequestAndResponses>> {
        let min_id = min_request_id.unwrap_or(0).cast_signed();
        let requests = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM flow_requests
             WHERE client_id = $1 AND flow_id = $2 AND request_id >= $3
               AND (NOT $4 OR needs_processing)
             ORDER BY request_id"
        ))
        .bind(client_id.value())
        .bind(flow_id.value())
        .bind(min_id)
        .bind(only_needs_processing)
        .fetch_all(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to read requests: {e}")))?;

        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let responses = sqlx::query_as::<_, ResponseRow>(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM flow_responses
             WHERE client_id = $1 AND flow_id = $2 AND request_id >= $3
             ORDER BY request_id, response_id"
        ))
        .bind(client_id.value())
        .bind(flow_id.value())
        .bind(min_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to read responses: {e}")))?;

        let mut by_request: BTreeMap<u64, Vec<crate::types::FlowResponse>> = BTreeMap::new();
        for row in responses {
            let response = response_from_row(row)?;
            by_request
                .entry(response.request_id)
                .or_default()
                .push(response);
        }

        Ok(requests
            .into_iter()
            .map(request_from_row)
            .map(|request| {
                let responses = by_request.remove(&request.request_id).unwrap_or_default();
                RequestAndResponses { request, responses }
            })
            .collect())
    }
}
