#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::Acquire;
use sqlx::postgres::PgConnection;
use tracing::{debug, info};

use crate::db::FlowDb;
use crate::error::{FlowError, Result};
use crate::types::{ClientId, FlowId, FlowResponse, ResponseWriteReport};

impl FlowDb {
    /// Persist a batch of inbound responses and run completion detection.
    ///
    /// Agents cannot know server-side garbage collection state, so a
    /// response for a flow or request that no longer exists is logged and
    /// dropped, never an error. Writes are idempotent: the same
    /// `(request_id, response_id)` overwrites in place, and because the
    /// ready transition carries `AND NOT needs_processing`, a rewrite of an
    /// already-complete response set cannot re-trigger processing.
    pub async fn write_flow_responses(
        &self,
        responses: &[FlowResponse],
    ) -> Result<ResponseWriteReport> {
        if responses.is_empty() {
            return Ok(ResponseWriteReport::default());
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

        let mut report = ResponseWriteReport::default();
        let mut touched: BTreeSet<(ClientId, FlowId, u64)> = BTreeSet::new();

        for response in responses {
            let request_exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(
                     SELECT 1 FROM flow_requests
                     WHERE client_id = $1 AND flow_id = $2 AND request_id = $3)",
            )
            .bind(response.client_id.value())
            .bind(response.flow_id.value())
            .bind(response.request_id.cast_signed())
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to check request: {e}")))?;

            if !request_exists {
                info!(
                    client_id = %response.client_id,
                    flow_id = %response.flow_id,
                    request_id = response.request_id,
                    response_id = response.response_id,
                    "dropping response for vanished flow request"
                );
                report.dropped += 1;
                continue;
            }

            sqlx::query(
                "INSERT INTO flow_responses
                     (client_id, flow_id, request_id, response_id, response_kind, payload,
                      status_code, error_message, network_bytes_sent, runtime_micros)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (client_id, flow_id, request_id, response_id) DO UPDATE
                 SET response_kind = EXCLUDED.response_kind,
                     payload = EXCLUDED.payload,
                     status_code = EXCLUDED.status_code,
                     error_message = EXCLUDED.error_message,
                     network_bytes_sent = EXCLUDED.network_bytes_sent,
                     runtime_micros = EXCLUDED.runtime_micros",
            )
            .bind(response.client_id.value())
            .bind(response.flow_id.value())
            .bind(response.request_id.cast_signed())
            .bind(response.response_id.cast_signed())
            .bind(response.kind.as_str())
            .bind(response.payload.as_ref())
            .bind(response.status_code.as_deref())
            .bind(response.error_message.as_deref())
            .bind(response.network_bytes_sent.map(u64::cast_signed))
            .bind(response.runtime_micros.map(u64::cast_signed))
            .execute(&mut *conn)
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to write response: {e}")))?;

            report.written += 1;

            // The terminating status is the highest-numbered response of
            // its request; its id is the expected total.
            if response.is_status() {
                sqlx::query(
                    "UPDATE flow_requests
                     SET responses_expected = $4
                     WHERE client_id = $1 AND flow_id = $2 AND request_id = $3",
                )
                .bind(response.client_id.value())
                .bind(response.flow_id.value())
                .bind(response.request_id.cast_signed())
                .bind(response.response_id.cast_signed())
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    FlowError::DatabaseError(format!("Failed to record expected count: {e}"))
                })?;
            }

            touched.insert((
                response.client_id.clone(),
                response.flow_id.clone(),
                response.request_id,
            ));
        }

        for (client_id, flow_id, request_id) in touched {
            Self::detect_completion(conn, &client_id, &flow_id, request_id).await?;
        }

        tx.commit()
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to commit tx: {e}")))
            .map(|()| report)
    }

    /// Flip a request to ready exactly once when its response count reaches
    /// the declared total, cancel its in-flight delivery tickets, and wake
    /// a worker if the request sits at the flow's cursor.
    async fn detect_completion(
        conn: &mut PgConnection,
        client_id: &ClientId,
        flow_id: &FlowId,
        request_id: u64,
    ) -> Result<()> {
        let newly_ready = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "UPDATE flow_requests
             SET needs_processing = TRUE
             WHERE client_id = $1 AND flow_id = $2 AND request_id = $3
               AND NOT needs_processing
               AND responses_expected IS NOT NULL
               AND responses_expected <= (
                   SELECT COUNT(*) FROM flow_responses r
                   WHERE r.client_id = $1 AND r.flow_id = $2 AND r.request_id = $3)
             RETURNING start_time",
        )
        .bind(client_id.value())
        .bind(flow_id.value())
        .bind(request_id.cast_signed())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to detect completion: {e}")))?;

        let Some(start_time) = newly_ready else {
            return Ok(());
        };

        debug!(
            client_id = %client_id,
            flow_id = %flow_id,
            request_id = request_id,
            "request complete, needs processing"
        );

        // Completed work cancels delivery bookkeeping, leased or not.
        sqlx::query(
            "DELETE FROM client_action_requests
             WHERE client_id = $1 AND flow_id = $2 AND request_id = $3",
        )
        .bind(client_id.value())
        .bind(flow_id.value())
        .bind(request_id.cast_signed())
        .execute(&mut *conn)
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to cancel delivery: {e}")))?;

        let at_cursor = sqlx::query_scalar::<_, bool>(
            "SELECT next_request_to_process = $3
             FROM flows WHERE client_id = $1 AND flow_id = $2",
        )
        .bind(client_id.value())
        .bind(flow_id.value())
        .bind(request_id.cast_signed())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| FlowError::DatabaseError(format!("Failed to read flow cursor: {e}")))?;

        if at_cursor == Some(true) {
            sqlx::query(
                "INSERT INTO flow_processing_requests (client_id, flow_id, delivery_time)
                 VALUES ($1, $2, $3)",
            )
            .bind(client_id.value())
            .bind(flow_id.value())
            .bind(start_time)
            .execute(&mut *conn)
            .await
            .map_err(|e| FlowError::DatabaseError(format!("Failed to enqueue processing: {e}")))?;
        }

        Ok(())
    }
}
