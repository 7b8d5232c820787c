#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::time::Duration;

use crate::db::mappers::{flow_from_row, FlowRow, FLOW_COLUMNS};
use crate::db::FlowDb;
use crate::error::{FlowError, Result};
use crate::types::{ClientId, Flow, FlowId, ReleaseOutcome, WorkerId};

impl FlowDb {
    /// Claim exclusive processing ownership of a flow.
    ///
    /// The claim is a single compare-and-swap: it succeeds iff the flow is
    /// running and the current lease is absent or past its deadline. An
    /// expired lease needs no reaper, the deadline comparison makes it
    /// leasable again.
    pub async fn lease_flow_for_processing(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
        worker: &WorkerId,
        processing_time: Duration,
    ) -> Result<Flow> {
        let processing_ms = i64::try_from(processing_time.as_millis())
            .map_err(|_| FlowError::Internal("processing_time overflow".to_string()))?;

        let leased = sqlx::query_as::<_, FlowRow>(&format!(
            "UPDATE flows
             SET processing_on = $3,
                 processing_since = NOW(),
                 processing_deadline = NOW() + ($4 * INTERVAL '1 millisecond'),
                 last_update_at = NOW()
             WHERE client_id = $1 AND flow_id = $2
               AND flow_state = 'running'
               AND (processing_on IS NULL
                    OR processing_deadline IS NULL
                    OR processing_deadline <= NOW())
             RETURNING {FLOW_COLUMNS}"
        ))
        .bind(client_id.value())
        .bind(flow_id.value())
        .bind(worker.value())
        .bind(processing_ms)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to lease flow: {e}")))?;

        match leased {
            Some(row) => flow_from_row(row),
            None => Err(self.diagnose_lease_failure(client_id, flow_id).await?),
        }
    }

    /// The CAS lost; figure out which error the caller gets.
    async fn diagnose_lease_failure(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
    ) -> Result<FlowError> {
        let current = self.read_flow_optional(client_id, flow_id).await?;

        Ok(match current {
            None => FlowError::UnknownFlow {
                client_id: client_id.clone(),
                flow_id: flow_id.clone(),
            },
            Some(flow) if flow.flow_state.is_terminal() => FlowError::FlowNotRunnable {
                client_id: client_id.clone(),
                flow_id: flow_id.clone(),
                state: flow.flow_state,
            },
            Some(flow) => FlowError::FlowAlreadyLeased {
                client_id: client_id.clone(),
                flow_id: flow_id.clone(),
                leased_until: flow.processing_deadline.unwrap_or_else(chrono::Utc::now),
            },
        })
    }

    /// Commit a processed snapshot and surrender the lease.
    ///
    /// The lease columns are cleared unconditionally on success, but the
    /// commit itself requires the caller to still be the recorded holder; a
    /// taken-over lease surfaces as `LeaseExpired` and the caller must
    /// abandon its local snapshot.
    ///
    /// `MoreWorkPending` means a request at the committed cursor became
    /// ready while the caller was processing, so it must re-lease and drain
    /// again immediately.
    pub async fn release_processed_flow(&self, flow: &Flow) -> Result<ReleaseOutcome> {
        let worker = flow.processing_on.as_deref().ok_or_else(|| {
            FlowError::Internal("release of a flow snapshot without a held lease".to_string())
        })?;

        let result = sqlx::query(
            "UPDATE flows
             SET next_request_to_process = $4,
                 flow_state = $5,
                 num_replies_sent = $6,
                 network_bytes_sent = $7,
                 user_cpu_time_used_micros = $8,
                 system_cpu_time_used_micros = $9,
                 pending_termination = $10,
                 processing_on = NULL,
                 processing_since = NULL,
                 processing_deadline = NULL,
                 last_update_at = NOW()
             WHERE client_id = $1 AND flow_id = $2 AND processing_on = $3",
        )
        .bind(flow.client_id.value())
        .bind(flow.flow_id.value())
        .bind(worker)
        .bind(flow.next_request_to_process.cast_signed())
        .bind(flow.flow_state.as_str())
        .bind(flow.num_replies_sent.cast_signed())
        .bind(flow.network_bytes_sent.cast_signed())
        .bind(flow.user_cpu_time_used_micros.cast_signed())
        .bind(flow.system_cpu_time_used_micros.cast_signed())
        .bind(flow.pending_termination.as_deref())
        .execute(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to release flow: {e}")))?;

        if result.rows_affected() == 0 {
            let exists = self.read_flow_optional(&flow.client_id, &flow.flow_id).await?;
            return Err(match exists {
                None => FlowError::UnknownFlow {
                    client_id: flow.client_id.clone(),
                    flow_id: flow.flow_id.clone(),
                },
                Some(_) => FlowError::LeaseExpired {
                    client_id: flow.client_id.clone(),
                    flow_id: flow.flow_id.clone(),
                    worker: worker.to_string(),
                },
            });
        }

        // Post-commit re-check: a response may have completed the request at
        // the new cursor while this worker was busy.
        let more_work = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                 SELECT 1 FROM flow_requests
                 WHERE client_id = $1 AND flow_id = $2 AND request_id = $3
                   AND needs_processing
                   AND (start_time IS NULL OR start_time <= NOW()))",
        )
        .bind(flow.client_id.value())
        .bind(flow.flow_id.value())
        .bind(flow.next_request_to_process.cast_signed())
        .fetch_one(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to re-check readiness: {e}")))?;

        Ok(if more_work {
            ReleaseOutcome::MoreWorkPending
        } else {
            ReleaseOutcome::Drained
        })
    }
}
