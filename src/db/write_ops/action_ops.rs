#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::time::Duration;

use sqlx::Acquire;
use tracing::warn;

use crate::db::mappers::{action_from_row, ActionRow, ACTION_COLUMNS};
use crate::db::FlowDb;
use crate::error::{FlowError, Result};
use crate::types::{ClientActionRequest, ClientId, WorkerId};

impl FlowDb {
    /// Enqueue outbound delivery tickets, all-or-nothing. Every ticket must
    /// reference an existing `FlowRequest`; otherwise the batch fails with
    /// the complete list of unknown keys and nothing is written.
    pub async fn write_client_action_requests(
        &self,
        requests: &[ClientActionRequest],
    ) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        let mut missing = Vec::new();
        for request in requests {
            let backing_exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(
                     SELECT 1 FROM flow_requests
                     WHERE client_id = $1 AND flow_id = $2 AND request_id = $3)",
            )
            .bind(request.client_id.value())
            .bind(request.flow_id.value())
            .bind(request.request_id.cast_signed())
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to check request: {e}")))?;

            if !backing_exists {
                missing.push((
                    request.client_id.clone(),
                    request.flow_id.clone(),
                    request.request_id,
                ));
            }
        }

        if !missing.is_empty() {
            return Err(FlowError::AtLeastOneUnknownRequest(missing));
        }

        for request in requests {
            sqlx::query(
                "INSERT INTO client_action_requests
                     (client_id, flow_id, request_id, ttl, payload)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (client_id, flow_id, request_id) DO UPDATE
                 SET ttl = EXCLUDED.ttl,
                     payload = EXCLUDED.payload",
            )
            .bind(request.client_id.value())
            .bind(request.flow_id.value())
            .bind(request.request_id.cast_signed())
            .bind(request.ttl)
            .bind(request.payload.as_ref())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                FlowError::DatabaseError(format!("Failed to write action request: {e}"))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to commit tx: {e}")))
    }

    /// Lease up to `limit` deliverable tickets for one client.
    ///
    /// The retry budget decrements once per lease attempt. A ticket whose
    /// budget is spent is deleted instead of leased and disappears from all
    /// subsequent reads; the flow logic is responsible for noticing the
    /// missing reply through its own timeout.
    pub async fn lease_client_action_requests(
        &self,
        client_id: &ClientId,
        worker: &WorkerId,
        lease_time: Duration,
        limit: i64,
    ) -> Result<Vec<ClientActionRequest>> {
        let lease_ms = i64::try_from(lease_time.as_millis())
            .map_err(|_| FlowError::Internal("lease_time overflow".to_string()))?;

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        let expired = sqlx::query(
            "DELETE FROM client_action_requests
             WHERE client_id = $1 AND ttl <= 0
               AND (leased_until IS NULL OR leased_until <= NOW())",
        )
        .bind(client_id.value())
        .execute(&mut *conn)
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to drop exhausted tickets: {e}")))?;

        if expired.rows_affected() > 0 {
            warn!(
                client_id = %client_id,
                dropped = expired.rows_affected(),
                "dropped client action requests with exhausted retry budget"
            );
        }

        let leased = sqlx::query_as::<_, ActionRow>(&format!(
            "UPDATE client_action_requests c
             SET leased_until = NOW() + ($3 * INTERVAL '1 millisecond'),
                 leased_by = $2,
                 ttl = c.ttl - 1
             WHERE (c.client_id, c.flow_id, c.request_id) IN (
                 SELECT client_id, flow_id, request_id FROM client_action_requests
                 WHERE client_id = $1 AND ttl > 0
                   AND (leased_until IS NULL OR leased_until <= NOW())
                 ORDER BY created_at, flow_id, request_id
                 LIMIT $4
                 FOR UPDATE SKIP LOCKED)
             RETURNING {ACTION_COLUMNS}"
        ))
        .bind(client_id.value())
        .bind(worker.value())
        .bind(lease_ms)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to lease action requests: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to commit tx: {e}")))?;

        Ok(leased.into_iter().map(action_from_row).collect())
    }

    /// Remove tickets after their responses arrived. Missing rows are a
    /// no-op; the same key twice in one batch is a caller bug.
    pub async fn delete_client_action_requests(
        &self,
        requests: &[ClientActionRequest],
    ) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::new();
        for request in requests {
            let key = (
                request.client_id.clone(),
                request.flow_id.clone(),
                request.request_id,
            );
            if !seen.insert(key) {
                return Err(FlowError::DuplicateDeletion(format!(
                    "{}/{}/{}",
                    request.client_id, request.flow_id, request.request_id
                )));
            }
        }

        let clients: Vec<&str> = requests.iter().map(|r| r.client_id.value()).collect();
        let flows: Vec<&str> = requests.iter().map(|r| r.flow_id.value()).collect();
        let ids: Vec<i64> = requests.iter().map(|r| r.request_id.cast_signed()).collect();

        sqlx::query(
            "DELETE FROM client_action_requests
             WHERE (client_id, flow_id, request_id) IN
                   (SELECT * FROM UNNEST($1::text[], $2::text[], $3::bigint[]))",
        )
        .bind(&clients)
        .bind(&flows)
        .bind(&ids)
        .execute(self.pool())
        .await
        .map(|_result| ())
        .map_err(|e| FlowError::DatabaseError(format!("Failed to delete action requests: {e}")))
    }
}
