use crate::db::mappers::{
    action_from_row, processing_from_row, ActionRow, ProcessingRow, ACTION_COLUMNS,
    PROCESSING_COLUMNS,
};
use crate::db::FlowDb;
use crate::error::{FlowError, Result};
use crate::types::{ClientActionRequest, ClientId, FlowProcessingRequest};

impl FlowDb {
    pub async fn read_all_client_action_requests(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<ClientActionRequest>> {
        Ok(sqlx::query_as::<_, ActionRow>(&format!(
            "SELECT {ACTION_COLUMNS} FROM client_action_requests
             WHERE client_id = $1
             ORDER BY created_at, flow_id, request_id"
        ))
        .bind(client_id.value())
        .fetch_all(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to read action requests: {e}")))?
        .into_iter()
        .map(action_from_row)
        .collect())
    }

    /// Every queued notification, claimed or not, for inspection.
    pub async fn read_flow_processing_requests(&self) -> Result<Vec<FlowProcessingRequest>> {
        Ok(sqlx::query_as::<_, ProcessingRow>(&format!(
            "SELECT {PROCESSING_COLUMNS} FROM flow_processing_requests ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(|e| {
            FlowError::DatabaseError(format!("Failed to read processing requests: {e}"))
        })?
        .into_iter()
        .map(processing_from_row)
        .collect())
    }
}
