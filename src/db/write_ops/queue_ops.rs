#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::time::Duration;

use crate::db::mappers::{processing_from_row, ProcessingRow, PROCESSING_COLUMNS};
use crate::db::FlowDb;
use crate::error::{FlowError, Result};
use crate::types::{FlowProcessingRequest, WorkerId};

impl FlowDb {
    /// Persist wake-up notifications. A notification with a `delivery_time`
    /// stays invisible to consumers until that time passes.
    pub async fn write_flow_processing_requests(
        &self,
        requests: &[FlowProcessingRequest],
    ) -> Result<()> {
        for request in requests {
            sqlx::query(
                "INSERT INTO flow_processing_requests (client_id, flow_id, delivery_time)
                 VALUES ($1, $2, $3)",
            )
            .bind(request.client_id.value())
            .bind(request.flow_id.value())
            .bind(request.delivery_time)
            .execute(self.pool())
            .await
            .map(|_result| ())
            .map_err(|e| {
                FlowError::DatabaseError(format!("Failed to write processing request: {e}"))
            })?;
        }
        Ok(())
    }

    /// Claim eligible notifications for delivery. A claim is a lease, not a
    /// removal: anything not acknowledged before the lease expires becomes
    /// claimable again, which is what makes delivery at-least-once.
    pub async fn claim_flow_processing_requests(
        &self,
        worker: &WorkerId,
        lease_time: Duration,
        limit: i64,
    ) -> Result<Vec<FlowProcessingRequest>> {
        let lease_ms = i64::try_from(lease_time.as_millis())
            .map_err(|_| FlowError::Internal("lease_time overflow".to_string()))?;

        let claimed = sqlx::query_as::<_, ProcessingRow>(&format!(
            "UPDATE flow_processing_requests
             SET leased_until = NOW() + ($2 * INTERVAL '1 millisecond'),
                 leased_by = $1
             WHERE id IN (
                 SELECT id FROM flow_processing_requests
                 WHERE (delivery_time IS NULL OR delivery_time <= NOW())
                   AND (leased_until IS NULL OR leased_until <= NOW())
                 ORDER BY id
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED)
             RETURNING {PROCESSING_COLUMNS}"
        ))
        .bind(worker.value())
        .bind(lease_ms)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| {
            FlowError::DatabaseError(format!("Failed to claim processing requests: {e}"))
        })?;

        Ok(claimed.into_iter().map(processing_from_row).collect())
    }

    /// Acknowledge handled notifications. Only acked rows leave the queue;
    /// everything else redelivers after its claim lease runs out.
    pub async fn ack_flow_processing_requests(
        &self,
        requests: &[FlowProcessingRequest],
    ) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = requests.iter().map(|r| r.id).collect();

        sqlx::query("DELETE FROM flow_processing_requests WHERE id = ANY($1)")
            .bind(&ids)
            .execute(self.pool())
            .await
            .map(|_result| ())
            .map_err(|e| {
                FlowError::DatabaseError(format!("Failed to ack processing requests: {e}"))
            })
    }
}
