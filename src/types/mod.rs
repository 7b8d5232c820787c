mod flow;
mod identifiers;
mod requests;

pub use flow::{Flow, FlowState, FlowUpdate, ReleaseOutcome};
pub use identifiers::{ClientId, FlowId, HuntId, WorkerId};
pub use requests::{
    ClientActionRequest, FlowProcessingRequest, FlowRequest, FlowResponse, RequestAndResponses,
    ResponseKind, ResponseWriteReport, DEFAULT_CLIENT_ACTION_TTL,
};
