use super::identifiers::{ClientId, FlowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of work dispatched to a client, keyed by a caller-chosen
/// `request_id`. Ids are unique per flow and need not be contiguous, but the
/// processing path only ever consumes a contiguous run starting at the
/// flow's cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRequest {
    pub client_id: ClientId,
    pub flow_id: FlowId,
    pub request_id: u64,
    pub needs_processing: bool,
    /// Total response count that completes this request. Unset until the
    /// terminating status response arrives.
    pub responses_expected: Option<u64>,
    /// Do-not-process-before mark. A ready request with a future start time
    /// is withheld from processing reads until the time passes.
    pub start_time: Option<DateTime<Utc>>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl FlowRequest {
    #[must_use]
    pub fn new(client_id: ClientId, flow_id: FlowId, request_id: u64) -> Self {
        Self {
            client_id,
            flow_id,
            request_id,
            needs_processing: false,
            responses_expected: None,
            start_time: None,
            payload: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub const fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

/// Discriminant for the three response shapes sharing one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    Data,
    Status,
    Iterator,
}

impl ResponseKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Status => "status",
            Self::Iterator => "iterator",
        }
    }
}

impl TryFrom<&str> for ResponseKind {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, String> {
        match value {
            "data" => Ok(Self::Data),
            "status" => Ok(Self::Status),
            "iterator" => Ok(Self::Iterator),
            _ => Err(format!("Unknown response kind: {}", value)),
        }
    }
}

/// A single inbound row for a request: payload data, the terminating status,
/// or an iterator checkpoint. Append-only and idempotent under
/// retransmission: rewriting the same `response_id` overwrites in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResponse {
    pub client_id: ClientId,
    pub flow_id: FlowId,
    pub request_id: u64,
    pub response_id: u64,
    pub kind: ResponseKind,
    pub payload: Option<serde_json::Value>,
    /// Status rows only: agent-side outcome of the whole request.
    pub status_code: Option<String>,
    pub error_message: Option<String>,
    pub network_bytes_sent: Option<u64>,
    pub runtime_micros: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl FlowResponse {
    #[must_use]
    pub fn data(
        client_id: ClientId,
        flow_id: FlowId,
        request_id: u64,
        response_id: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            client_id,
            flow_id,
            request_id,
            response_id,
            kind: ResponseKind::Data,
            payload: Some(payload),
            status_code: None,
            error_message: None,
            network_bytes_sent: None,
            runtime_micros: None,
            created_at: Utc::now(),
        }
    }

    /// Terminating status. Its `response_id` is the highest of the request,
    /// which is what fixes the expected response count.
    #[must_use]
    pub fn status(
        client_id: ClientId,
        flow_id: FlowId,
        request_id: u64,
        response_id: u64,
        status_code: impl Into<String>,
    ) -> Self {
        Self {
            client_id,
            flow_id,
            request_id,
            response_id,
            kind: ResponseKind::Status,
            payload: None,
            status_code: Some(status_code.into()),
            error_message: None,
            network_bytes_sent: None,
            runtime_micros: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn iterator(
        client_id: ClientId,
        flow_id: FlowId,
        request_id: u64,
        response_id: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            client_id,
            flow_id,
            request_id,
            response_id,
            kind: ResponseKind::Iterator,
            payload: Some(payload),
            status_code: None,
            error_message: None,
            network_bytes_sent: None,
            runtime_micros: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn is_status(&self) -> bool {
        matches!(self.kind, ResponseKind::Status)
    }
}

/// A request together with its complete, `response_id`-ordered responses,
/// as handed to the flow-logic layer.
#[derive(Debug, Clone)]
pub struct RequestAndResponses {
    pub request: FlowRequest,
    pub responses: Vec<FlowResponse>,
}

/// Outcome of a `write_flow_responses` call. Late responses for vanished
/// flows or requests are dropped and counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseWriteReport {
    pub written: usize,
    pub dropped: usize,
}

/// Outbound mirror of a `FlowRequest`: the leasable delivery ticket handed
/// to transport workers, with a decrementing retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientActionRequest {
    pub client_id: ClientId,
    pub flow_id: FlowId,
    pub request_id: u64,
    pub leased_until: Option<DateTime<Utc>>,
    pub leased_by: Option<String>,
    /// Remaining lease attempts. Decremented once per lease, never per
    /// retry within a lease. At zero the request is dropped, not leased.
    pub ttl: i32,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_CLIENT_ACTION_TTL: i32 = 5;

impl ClientActionRequest {
    #[must_use]
    pub fn new(client_id: ClientId, flow_id: FlowId, request_id: u64) -> Self {
        Self {
            client_id,
            flow_id,
            request_id,
            leased_until: None,
            leased_by: None,
            ttl: DEFAULT_CLIENT_ACTION_TTL,
            payload: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Ephemeral wake-up for a flow that may have runnable work. A trigger, not
/// a source of truth: consumers must tolerate duplicates and re-lease
/// already-drained flows as a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowProcessingRequest {
    /// Queue-assigned id; zero until the row is persisted.
    pub id: i64,
    pub client_id: ClientId,
    pub flow_id: FlowId,
    /// Invisible to consumers until this time passes. `None` means
    /// eligible immediately.
    pub delivery_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FlowProcessingRequest {
    #[must_use]
    pub fn new(client_id: ClientId, flow_id: FlowId) -> Self {
        Self {
            id: 0,
            client_id,
            flow_id,
            delivery_time: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn with_delivery_time(mut self, delivery_time: DateTime<Utc>) -> Self {
        self.delivery_time = Some(delivery_time);
        self
    }
}
