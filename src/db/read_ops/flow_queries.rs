use crate::db::mappers::{flow_from_row, FlowRow, FLOW_COLUMNS};
use crate::db::FlowDb;
use crate::error::{FlowError, Result};
use crate::types::{ClientId, Flow, FlowId};

impl FlowDb {
    pub async fn read_flow(&self, client_id: &ClientId, flow_id: &FlowId) -> Result<Flow> {
        self.read_flow_optional(client_id, flow_id)
            .await?
            .ok_or_else(|| FlowError::UnknownFlow {
                client_id: client_id.clone(),
                flow_id: flow_id.clone(),
            })
    }

    pub(crate) async fn read_flow_optional(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
    ) -> Result<Option<Flow>> {
        sqlx::query_as::<_, FlowRow>(&format!(
            "SELECT {FLOW_COLUMNS} FROM flows WHERE client_id = $1 AND flow_id = $2"
        ))
        .bind(client_id.value())
        .bind(flow_id.value())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to read flow: {e}")))?
        .map(flow_from_row)
        .transpose()
    }

    pub async fn read_all_flows(&self, client_id: &ClientId) -> Result<Vec<Flow>> {
        sqlx::query_as::<_, FlowRow>(&format!(
            "SELECT {FLOW_COLUMNS} FROM flows WHERE client_id = $1 ORDER BY flow_id"
        ))
        .bind(client_id.value())
        .fetch_all(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to read flows: {e}")))?
        .into_iter()
        .map(flow_from_row)
        .collect()
    }

    /// Children of a flow, for cascade termination by the flow-logic layer.
    pub async fn read_child_flows(
        &self,
        client_id: &ClientId,
        parent_flow_id: &FlowId,
    ) -> Result<Vec<Flow>> {
        sqlx::query_as::<_, FlowRow>(&format!(
            "SELECT {FLOW_COLUMNS} FROM flows
             WHERE client_id = $1 AND parent_flow_id = $2
             ORDER BY flow_id"
        ))
        .bind(client_id.value())
        .bind(parent_flow_id.value())
        .fetch_all(self.pool())
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to read child flows: {e}")))?
        .into_iter()
        .map(flow_from_row)
        .collect()
    }
}
