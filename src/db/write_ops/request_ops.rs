#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashSet};

use sqlx::Acquire;
use tracing::debug;

use crate::db::FlowDb;
use crate::error::{FlowError, Result};
use crate::types::{ClientId, FlowId, FlowRequest};

impl FlowDb {
    /// Idempotently upsert a batch of outgoing requests.
    ///
    /// Every referenced flow must exist; otherwise the whole batch is
    /// rejected with the full list of missing flows and nothing is written.
    /// A written request whose id already sits at its flow's cursor and
    /// whose responses are already buffered complete is marked ready
    /// immediately and a processing notification is enqueued, so a flow
    /// cannot stall waiting for a response write that already happened.
    pub async fn write_flow_requests(&self, requests: &[FlowRequest]) -> Result<()> {
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

        // Existence check for every distinct flow, collecting cursors for
        // the immediate-trigger pass below.
        let mut cursors: BTreeMap<(ClientId, FlowId), i64> = BTreeMap::new();
        let mut missing: Vec<(ClientId, FlowId)> = Vec::new();
        let flow_keys: HashSet<(ClientId, FlowId)> = requests
            .iter()
            .map(|r| (r.client_id.clone(), r.flow_id.clone()))
            .collect();

        for (client_id, flow_id) in flow_keys {
            let cursor = sqlx::query_scalar::<_, i64>(
                "SELECT next_request_to_process FROM flows WHERE client_id = $1 AND flow_id = $2",
            )
            .bind(client_id.value())
            .bind(flow_id.value())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to check flow: {e}")))?;

            match cursor {
                Some(cursor) => {
                    cursors.insert((client_id, flow_id), cursor);
                }
                None => missing.push((client_id, flow_id)),
            }
        }

        if !missing.is_empty() {
            missing.sort();
            return Err(FlowError::AtLeastOneUnknownFlow(missing));
        }

        for request in requests {
            sqlx::query(
                "INSERT INTO flow_requests
                     (client_id, flow_id, request_id, needs_processing, start_time, payload)
                 VALUES ($1, $2, $3, FALSE, $4, $5)
                 ON CONFLICT (client_id, flow_id, request_id) DO UPDATE
                 SET start_time = EXCLUDED.start_time,
                     payload = EXCLUDED.payload",
            )
            .bind(request.client_id.value())
            .bind(request.flow_id.value())
            .bind(request.request_id.cast_signed())
            .bind(request.start_time)
            .bind(request.payload.as_ref())
            .execute(&mut *conn)
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to write flow request: {e}")))?;
        }

        // Immediate-trigger pass: a request written at the cursor may
        // already have its complete response set buffered.
        for request in requests {
            let key = (request.client_id.clone(), request.flow_id.clone());
            if cursors.get(&key).copied() != Some(request.request_id.cast_signed()) {
                continue;
            }

            let newly_ready = sqlx::query_scalar::<_, i64>(
                "UPDATE flow_requests
                 SET needs_processing = TRUE
                 WHERE client_id = $1 AND flow_id = $2 AND request_id = $3
                   AND NOT needs_processing
                   AND responses_expected IS NOT NULL
                   AND responses_expected <= (
                       SELECT COUNT(*) FROM flow_responses r
                       WHERE r.client_id = $1 AND r.flow_id = $2 AND r.request_id = $3)
                 RETURNING request_id",
            )
            .bind(request.client_id.value())
            .bind(request.flow_id.value())
            .bind(request.request_id.cast_signed())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| {
                FlowError::DatabaseError(format!("Failed to re-check buffered responses: {e}"))
            })?;

            if newly_ready.is_some() {
                debug!(
                    client_id = %request.client_id,
                    flow_id = %request.flow_id,
                    request_id = request.request_id,
                    "request complete at write time, scheduling processing"
                );
                sqlx::query(
                    "INSERT INTO flow_processing_requests (client_id, flow_id, delivery_time)
                     VALUES ($1, $2, $3)",
                )
                .bind(request.client_id.value())
                .bind(request.flow_id.value())
                .bind(request.start_time)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    FlowError::DatabaseError(format!("Failed to enqueue processing: {e}"))
                })?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to commit tx: {e}")))
    }

    /// Batch-delete requests with their responses and outbound delivery
    /// tickets. Absent rows are a no-op; the same key twice in one call is
    /// a caller bug and raises before anything is deleted.
    pub async fn delete_flow_requests(&self, requests: &[FlowRequest]) -> Result<()> {
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

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        // Responses go with their requests via ON DELETE CASCADE; delivery
        // tickets have no FK and are cleared explicitly.
        sqlx::query(
            "DELETE FROM client_action_requests
             WHERE (client_id, flow_id, request_id) IN
                   (SELECT * FROM UNNEST($1::text[], $2::text[], $3::bigint[]))",
        )
        .bind(&clients)
        .bind(&flows)
        .bind(&ids)
        .execute(&mut *conn)
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to delete action requests: {e}")))?;

        sqlx::query(
            "DELETE FROM flow_requests
             WHERE (client_id, flow_id, request_id) IN
                   (SELECT * FROM UNNEST($1::text[], $2::text[], $3::bigint[]))",
        )
        .bind(&clients)
        .bind(&flows)
        .bind(&ids)
        .execute(&mut *conn)
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to delete flow requests: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to commit tx: {e}")))
    }

    /// Bulk cleanup for one flow: a constant number of statements no matter
    /// how many rows are involved.
    pub async fn delete_all_flow_requests_and_responses(
        &self,
        client_id: &ClientId,
        flow_id: &FlowId,
    ) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        sqlx::query("DELETE FROM client_action_requests WHERE client_id = $1 AND flow_id = $2")
            .bind(client_id.value())
            .bind(flow_id.value())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                FlowError::DatabaseError(format!("Failed to delete action requests: {e}"))
            })?;

        sqlx::query("DELETE FROM flow_requests WHERE client_id = $1 AND flow_id = $2")
            .bind(client_id.value())
            .bind(flow_id.value())
            .execute(&mut *conn)
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to delete flow requests: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to commit tx: {e}")))
    }
}
