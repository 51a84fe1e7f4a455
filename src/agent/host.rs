//! Host control channel contract and the messages the agent exchanges with the host.
use crate::agent::batcher::TraceEvent;
use crate::agent::target::{Flavor, MemberDescriptor, TargetId};
use serde::{Deserialize, Serialize};

/// Members of one scope (module or class) requested in a handlers round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeRequest {
    pub name: String,
    pub members: Vec<MemberDescriptor>,
}

/// Agent to host message envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    #[serde(rename = "agent:initialized")]
    Initialized,
    #[serde(rename = "agent:started")]
    Started { count: usize },
    #[serde(rename = "agent:warning")]
    Warning { message: String },
    #[serde(rename = "agent:error")]
    Error { message: String },
    #[serde(rename = "events:add")]
    EventsAdd { events: Vec<TraceEvent> },
    #[serde(rename = "handlers:get")]
    HandlersGet {
        flavor: Flavor,
        #[serde(rename = "baseId")]
        base_id: TargetId,
        scopes: Vec<ScopeRequest>,
    },
}

/// Reply to a [`AgentMessage::HandlersGet`] request, scripts in request order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HandlersReply {
    pub scripts: Vec<String>,
}

/// Asynchronous, message typed channel to the host controller.
pub trait HostChannel: Send + Sync {
    /// Fire-and-forget message.
    fn post(&self, message: AgentMessage);

    /// Send a request and block until the reply correlated by `id` arrives.
    /// There is no local timeout, a silent host stalls the caller.
    fn request(&self, id: &str, message: AgentMessage) -> anyhow::Result<serde_json::Value>;
}
