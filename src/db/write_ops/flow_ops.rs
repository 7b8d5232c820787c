#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::db::FlowDb;
use crate::error::{FlowError, Result};
use crate::types::{ClientId, Flow, FlowId, FlowUpdate};

impl FlowDb {
    /// Create a flow record, or refresh the mutable fields of an existing
    /// one. Identity columns (`parent_flow_id`, `parent_hunt_id`) are only
    /// ever written by the insert arm; a conflicting rewrite cannot change
    /// them.
    pub async fn write_flow(&self, flow: &Flow) -> Result<()> {
        sqlx::query(
            "INSERT INTO flows (client_id, flow_id, parent_flow_id, parent_hunt_id, flow_state,
                 next_request_to_process, num_replies_sent, network_bytes_sent,
                 user_cpu_time_used_micros, system_cpu_time_used_micros, pending_termination)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (client_id, flow_id) DO UPDATE
             SET flow_state = EXCLUDED.flow_state,
                 next_request_to_process = EXCLUDED.next_request_to_process,
                 num_replies_sent = EXCLUDED.num_replies_sent,
                 network_bytes_sent = EXCLUDED.network_bytes_sent,
                 user_cpu_time_used_micros = EXCLUDED.user_cpu_time_used_micros,
                 system_cpu_time_used_micros = EXCLUDED.system_cpu_time_used_micros,
                 pending_termination = EXCLUDED.pending_termination,
                 last_update_at = NOW()",
        )
        .bind(flow.client_id.value())
        .bind(flow.flow_id.value())
        .bind(flow.parent_flow_id.as_ref().map(crate::types::FlowId::value))
        .bind(flow.parent_hunt_id.as_ref().map(crate::types::HuntId::value))
        .bind(flow.flow_state.as_str())
        .bind(flow.next_request_to_process.cast_signed())
        .bind(flow.num_replies_sent.cast_signed())
        .bind(flow.network_bytes_sent.cast_signed())
        .bind(flow.user_cpu_time_used_micros.cast_signed())
        .bind(flow.system_cpu_time_used_micros.cast_signed())
        .bind(flow.pending_termination.as_deref())
        .execute(self.pool())
        .await
        .map(|_result| ())
        .map_err(|e| FlowError::DatabaseError(format!("Failed to write flow: {e}")))
    }

    /// Apply either a full snapshot rewrite or a narrow field update, never
    /// both. Supplying both (or neither) is a programmer error rejected
    /// before any mutation.
    pub async fn update_flow(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
        snapshot: Option<&Flow>,
        update: Option<&FlowUpdate>,
    ) -> Result<()> {
        match (snapshot, update) {
            (Some(_), Some(_)) => Err(FlowError::ConflictingUpdateFlowArguments(
                "both a full snapshot and a narrow update were supplied".to_string(),
            )),
            (None, None) => Err(FlowError::ConflictingUpdateFlowArguments(
                "neither a snapshot nor an update was supplied".to_string(),
            )),
            (Some(flow), None) => {
                if &flow.client_id != client_id || &flow.flow_id != flow_id {
                    return Err(FlowError::ConflictingUpdateFlowArguments(format!(
                        "snapshot identity {}/{} does not match target {}/{}",
                        flow.client_id, flow.flow_id, client_id, flow_id
                    )));
                }
                self.update_flow_from_snapshot(flow).await
            }
            (None, Some(update)) => self.update_flow_fields(client_id, flow_id, update).await,
        }
    }

    async fn update_flow_from_snapshot(&self, flow: &Flow) -> Result<()> {
        let result = sqlx::query(
            "UPDATE flows
             SET flow_state = $3,
                 next_request_to_process = $4,
                 num_replies_sent = $5,
                 network_bytes_sent = $6,
                 user_cpu_time_used_micros = $7,
                 system_cpu_time_used_micros = $8,
                 pending_termination = $9,
                 last_update_at = NOW()
             WHERE client_id = $1 AND flow_id = $2",
        )
        .bind(flow.client_id.value())
        .bind(flow.flow_id.value())
        .bind(flow.flow_state.as_str())
        .bind(flow.next_request_to_process.cast_signed())
        .bind(flow.num_replies_sent.cast_signed())
        .bind(flow.network_bytes_sent.cast_signed())
        .bind(flow.user_cpu_time_used_micros.cast_signed())
        .bind(flow.system_cpu_time_used_micros.cast_signed())
        .bind(flow.pending_termination.as_deref())
        .execute(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to update flow: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(FlowError::UnknownFlow {
                client_id: flow.client_id.clone(),
                flow_id: flow.flow_id.clone(),
            });
        }
        Ok(())
    }

    async fn update_flow_fields(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
        update: &FlowUpdate,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE flows
             SET flow_state = COALESCE($3, flow_state),
                 num_replies_sent = COALESCE($4, num_replies_sent),
                 network_bytes_sent = COALESCE($5, network_bytes_sent),
                 user_cpu_time_used_micros = COALESCE($6, user_cpu_time_used_micros),
                 system_cpu_time_used_micros = COALESCE($7, system_cpu_time_used_micros),
                 pending_termination = COALESCE($8, pending_termination),
                 last_update_at = NOW()
             WHERE client_id = $1 AND flow_id = $2",
        )
        .bind(client_id.value())
        .bind(flow_id.value())
        .bind(update.flow_state.map(crate::types::FlowState::as_str))
        .bind(update.num_replies_sent.map(u64::cast_signed))
        .bind(update.network_bytes_sent.map(u64::cast_signed))
        .bind(update.user_cpu_time_used_micros.map(u64::cast_signed))
        .bind(update.system_cpu_time_used_micros.map(u64::cast_signed))
        .bind(update.pending_termination.as_deref())
        .execute(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to update flow fields: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(FlowError::UnknownFlow {
                client_id: client_id.clone(),
                flow_id: flow_id.clone(),
            });
        }
        Ok(())
    }

    /// Advisory termination request. The current lease holder observes the
    /// mark at its next checkpoint; nothing is forcibly interrupted.
    pub async fn mark_flow_for_termination(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
        reason: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE flows
             SET pending_termination = $3, last_update_at = NOW()
             WHERE client_id = $1 AND flow_id = $2 AND flow_state = 'running'",
        )
        .bind(client_id.value())
        .bind(flow_id.value())
        .bind(reason)
        .execute(self.pool())
        .await
        .map_err(|e| {
            FlowError::DatabaseError(format!("Failed to mark flow for termination: {e}"))
        })?;

        if result.rows_affected() == 0 {
            return Err(FlowError::UnknownFlow {
                client_id: client_id.clone(),
                flow_id: flow_id.clone(),
            });
        }
        Ok(())
    }
}
