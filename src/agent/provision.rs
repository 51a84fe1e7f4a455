//! Handler provisioning protocol.
//!
//! Behavior scripts are fetched from the host in bounded rounds: every `handlers:get` request
//! carries at most one page of members, so a single control message never grows with the number
//! of resolved call sites. Ids stay contiguous and scripts come back in request order, so the
//! n-th script belongs to target `base_id + n`.
use crate::agent::error::Error;
use crate::agent::host::{AgentMessage, HandlersReply, HostChannel, ScopeRequest};
use crate::agent::target::{Flavor, TargetId};
use crate::agent_debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default number of members in one provisioning round.
pub const MAX_HANDLERS_PER_REQUEST: usize = 1000;

/// Session wide source of target ids, shared by all flavors.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub fn new(first: TargetId) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Reserve `count` consecutive ids, return the first one.
    pub fn reserve(&self, count: usize) -> TargetId {
        self.next.fetch_add(count as u32, Ordering::SeqCst)
    }
}

/// Fetch one script per member, in flattened group order.
pub fn request_scripts(
    host: &dyn HostChannel,
    flavor: Flavor,
    groups: Vec<ScopeRequest>,
    base_id: TargetId,
    page_size: usize,
) -> Result<Vec<String>, Error> {
    let page_size = page_size.max(1);
    let mut pending: VecDeque<ScopeRequest> = groups
        .into_iter()
        .filter(|group| !group.members.is_empty())
        .collect();

    let mut scripts = vec![];
    let mut id = base_id;
    while !pending.is_empty() {
        let mut page = vec![];
        let mut consumed = 0;
        for group in pending.iter_mut() {
            if consumed == page_size {
                break;
            }
            let take = (page_size - consumed).min(group.members.len());
            page.push(ScopeRequest {
                name: group.name.clone(),
                members: group.members.drain(..take).collect(),
            });
            consumed += take;
        }
        while pending.front().is_some_and(|group| group.members.is_empty()) {
            pending.pop_front();
        }

        agent_debug!(target: "provision", "{flavor}: request {consumed} handlers from id {id}");
        let request_id = format!("handlers:{flavor}:{id}");
        let message = AgentMessage::HandlersGet {
            flavor,
            base_id: id,
            scopes: page,
        };
        let reply = host.request(&request_id, message).map_err(Error::Host)?;
        let reply: HandlersReply = serde_json::from_value(reply)?;
        if reply.scripts.len() != consumed {
            return Err(Error::ScriptCountMismatch {
                flavor,
                base_id: id,
                expected: consumed,
                actual: reply.scripts.len(),
            });
        }

        scripts.extend(reply.scripts);
        id += consumed as TargetId;
    }

    Ok(scripts)
}
