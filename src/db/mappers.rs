use chrono::{DateTime, Utc};

use crate::error::{FlowError, Result};
use crate::types::{
    ClientActionRequest, ClientId, Flow, FlowId, FlowProcessingRequest, FlowRequest, FlowResponse,
    FlowState, HuntId, ResponseKind,
};

pub(crate) const FLOW_COLUMNS: &str = "client_id, flow_id, parent_flow_id, parent_hunt_id, \
     flow_state, next_request_to_process, processing_on, processing_since, processing_deadline, \
     num_replies_sent, network_bytes_sent, user_cpu_time_used_micros, \
     system_cpu_time_used_micros, pending_termination, created_at, last_update_at";

pub(crate) const REQUEST_COLUMNS: &str =
    "client_id, flow_id, request_id, needs_processing, responses_expected, start_time, payload, \
     created_at";

pub(crate) const RESPONSE_COLUMNS: &str =
    "client_id, flow_id, request_id, response_id, response_kind, payload, status_code, \
     error_message, network_bytes_sent, runtime_micros, created_at";

pub(crate) const ACTION_COLUMNS: &str =
    "client_id, flow_id, request_id, leased_until, leased_by, ttl, payload, created_at";

pub(crate) const PROCESSING_COLUMNS: &str =
    "id, client_id, flow_id, delivery_time, created_at";

#[derive(sqlx::FromRow)]
pub(crate) struct FlowRow {
    pub client_id: String,
    pub flow_id: String,
    pub parent_flow_id: Option<String>,
    pub parent_hunt_id: Option<String>,
    pub flow_state: String,
    pub next_request_to_process: i64,
    pub processing_on: Option<String>,
    pub processing_since: Option<DateTime<Utc>>,
    pub processing_deadline: Option<DateTime<Utc>>,
    pub num_replies_sent: i64,
    pub network_bytes_sent: i64,
    pub user_cpu_time_used_micros: i64,
    pub system_cpu_time_used_micros: i64,
    pub pending_termination: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct RequestRow {
    pub client_id: String,
    pub flow_id: String,
    pub request_id: i64,
    pub needs_processing: bool,
    pub responses_expected: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ResponseRow {
    pub client_id: String,
    pub flow_id: String,
    pub request_id: i64,
    pub response_id: i64,
    pub response_kind: String,
    pub payload: Option<serde_json::Value>,
    pub status_code: Option<String>,
    pub error_message: Option<String>,
    pub network_bytes_sent: Option<i64>,
    pub runtime_micros: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ActionRow {
    pub client_id: String,
    pub flow_id: String,
    pub request_id: i64,
    pub leased_until: Option<DateTime<Utc>>,
    pub leased_by: Option<String>,
    pub ttl: i32,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ProcessingRow {
    pub id: i64,
    pub client_id: String,
    pub flow_id: String,
    pub delivery_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn flow_from_row(row: FlowRow) -> Result<Flow> {
    let flow_state =
        FlowState::try_from(row.flow_state.as_str()).map_err(FlowError::DatabaseError)?;

    Ok(Flow {
        client_id: ClientId::new(row.client_id),
        flow_id: FlowId::new(row.flow_id),
        parent_flow_id: row.parent_flow_id.map(FlowId::new),
        parent_hunt_id: row.parent_hunt_id.map(HuntId::new),
        flow_state,
        next_request_to_process: to_u64_i64(row.next_request_to_process),
        processing_on: row.processing_on,
        processing_since: row.processing_since,
        processing_deadline: row.processing_deadline,
        num_replies_sent: to_u64_i64(row.num_replies_sent),
        network_bytes_sent: to_u64_i64(row.network_bytes_sent),
        user_cpu_time_used_micros: to_u64_i64(row.user_cpu_time_used_micros),
        system_cpu_time_used_micros: to_u64_i64(row.system_cpu_time_used_micros),
        pending_termination: row.pending_termination,
        created_at: row.created_at,
        last_update_at: row.last_update_at,
    })
}

pub(crate) fn request_from_row(row: RequestRow) -> FlowRequest {
    FlowRequest {
        client_id: ClientId::new(row.client_id),
        flow_id: FlowId::new(row.flow_id),
        request_id: to_u64_i64(row.request_id),
        needs_processing: row.needs_processing,
        responses_expected: row.responses_expected.map(to_u64_i64),
        start_time: row.start_time,
        payload: row.payload,
        created_at: row.created_at,
    }
}

pub(crate) fn response_from_row(row: ResponseRow) -> Result<FlowResponse> {
    let kind =
        ResponseKind::try_from(row.response_kind.as_str()).map_err(FlowError::DatabaseError)?;

    Ok(FlowResponse {
        client_id: ClientId::new(row.client_id),
        flow_id: FlowId::new(row.flow_id),
        request_id: to_u64_i64(row.request_id),
        response_id: to_u64_i64(row.response_id),
        kind,
        payload: row.payload,
        status_code: row.status_code,
        error_message: row.error_message,
        network_bytes_sent: row.network_bytes_sent.map(to_u64_i64),
        runtime_micros: row.runtime_micros.map(to_u64_i64),
        created_at: row.created_at,
    })
}

pub(crate) fn action_from_row(row: ActionRow) -> ClientActionRequest {
    ClientActionRequest {
        client_id: ClientId::new(row.client_id),
        flow_id: FlowId::new(row.flow_id),
        request_id: to_u64_i64(row.request_id),
        leased_until: row.leased_until,
        leased_by: row.leased_by,
        ttl: row.ttl,
        payload: row.payload,
        created_at: row.created_at,
    }
}

pub(crate) fn processing_from_row(row: ProcessingRow) -> FlowProcessingRequest {
    FlowProcessingRequest {
        id: row.id,
        client_id: ClientId::new(row.client_id),
        flow_id: FlowId::new(row.flow_id),
        delivery_time: row.delivery_time,
        created_at: row.created_at,
    }
}

pub(crate) const fn to_u64_i64(value: i64) -> u64 {
    if value < 0 {
        0
    } else {
        value.cast_unsigned()
    }
}
