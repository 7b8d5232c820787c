#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{ClientId, FlowId, FlowState, HuntId};

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Unknown flow: {client_id}/{flow_id}")]
    UnknownFlow { client_id: ClientId, flow_id: FlowId },

    #[error("At least one referenced flow does not exist: {0:?}")]
    AtLeastOneUnknownFlow(Vec<(ClientId, FlowId)>),

    #[error("At least one referenced flow request does not exist: {0:?}")]
    AtLeastOneUnknownRequest(Vec<(ClientId, FlowId, u64)>),

    #[error("Conflicting flow update arguments: {0}")]
    ConflictingUpdateFlowArguments(String),

    #[error("Parent hunt {hunt_id} is not running")]
    ParentHuntIsNotRunning { hunt_id: HuntId },

    #[error("Flow {client_id}/{flow_id} is already leased until {leased_until}")]
    FlowAlreadyLeased {
        client_id: ClientId,
        flow_id: FlowId,
        leased_until: DateTime<Utc>,
    },

    #[error("Flow {client_id}/{flow_id} is in terminal state {state:?} and cannot be leased")]
    FlowNotRunnable {
        client_id: ClientId,
        flow_id: FlowId,
        state: FlowState,
    },

    #[error("Processing lease on flow {client_id}/{flow_id} is no longer held by {worker}")]
    LeaseExpired {
        client_id: ClientId,
        flow_id: FlowId,
        worker: String,
    },

    #[error("Duplicate key in one deletion batch: {0}")]
    DuplicateDeletion(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// True for lease conflicts that are expected under normal concurrent
    /// operation. Callers should move on to another flow rather than treat
    /// these as anomalies.
    #[must_use]
    pub const fn is_lease_contention(&self) -> bool {
        matches!(self, Self::FlowAlreadyLeased { .. })
    }

    /// True when the caller should back off instead of retrying immediately
    /// (distinct from transient lease contention).
    #[must_use]
    pub const fn is_backoff(&self) -> bool {
        matches!(self, Self::ParentHuntIsNotRunning { .. })
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
