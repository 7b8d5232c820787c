use super::identifiers::{ClientId, FlowId, HuntId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowState {
    Running,
    Crashed,
    Error,
    Finished,
}

impl FlowState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Crashed => "crashed",
            Self::Error => "error",
            Self::Finished => "finished",
        }
    }

    /// Terminal states are absorbing: a flow never leaves them and can no
    /// longer be leased for processing.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl TryFrom<&str> for FlowState {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, String> {
        match value {
            "running" => Ok(Self::Running),
            "crashed" => Ok(Self::Crashed),
            "error" => Ok(Self::Error),
            "finished" => Ok(Self::Finished),
            _ => Err(format!("Unknown flow state: {}", value)),
        }
    }
}

/// One flow instance: a resumable server-side task against one client.
///
/// Identity fields (`client_id`, `flow_id`, `parent_flow_id`,
/// `parent_hunt_id`) are write-once. Only the worker holding the processing
/// lease may advance `next_request_to_process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub client_id: ClientId,
    pub flow_id: FlowId,
    pub parent_flow_id: Option<FlowId>,
    pub parent_hunt_id: Option<HuntId>,
    pub flow_state: FlowState,
    pub next_request_to_process: u64,
    pub processing_on: Option<String>,
    pub processing_since: Option<DateTime<Utc>>,
    pub processing_deadline: Option<DateTime<Utc>>,
    pub num_replies_sent: u64,
    pub network_bytes_sent: u64,
    pub user_cpu_time_used_micros: u64,
    pub system_cpu_time_used_micros: u64,
    pub pending_termination: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
}

impl Flow {
    /// Fresh flow record with the cursor at the first request.
    #[must_use]
    pub fn new(client_id: ClientId, flow_id: FlowId) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            flow_id,
            parent_flow_id: None,
            parent_hunt_id: None,
            flow_state: FlowState::Running,
            next_request_to_process: 1,
            processing_on: None,
            processing_since: None,
            processing_deadline: None,
            num_replies_sent: 0,
            network_bytes_sent: 0,
            user_cpu_time_used_micros: 0,
            system_cpu_time_used_micros: 0,
            pending_termination: None,
            created_at: now,
            last_update_at: now,
        }
    }

    #[must_use]
    pub fn with_parent_hunt(mut self, hunt_id: HuntId) -> Self {
        self.parent_hunt_id = Some(hunt_id);
        self
    }

    #[must_use]
    pub fn with_parent_flow(mut self, parent: FlowId) -> Self {
        self.parent_flow_id = Some(parent);
        self
    }
}

/// Narrow field update applied outside the lease path. Every field is
/// optional; the identity of the target flow comes from the call arguments,
/// never from the update itself.
#[derive(Debug, Clone, Default)]
pub struct FlowUpdate {
    pub flow_state: Option<FlowState>,
    pub num_replies_sent: Option<u64>,
    pub network_bytes_sent: Option<u64>,
    pub user_cpu_time_used_micros: Option<u64>,
    pub system_cpu_time_used_micros: Option<u64>,
    pub pending_termination: Option<String>,
}

impl FlowUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.flow_state.is_none()
            && self.num_replies_sent.is_none()
            && self.network_bytes_sent.is_none()
            && self.user_cpu_time_used_micros.is_none()
            && self.system_cpu_time_used_micros.is_none()
            && self.pending_termination.is_none()
    }
}

/// Result of committing a processing lease.
///
/// `MoreWorkPending` means a request at the new cursor became ready while
/// the worker was processing; the caller must re-lease and drain again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Drained,
    MoreWorkPending,
}

impl ReleaseOutcome {
    #[must_use]
    pub const fn is_drained(self) -> bool {
        matches!(self, Self::Drained)
    }
}
