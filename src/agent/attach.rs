//! Attachment manager: turns resolved targets into installed probes.
//!
//! Every flavor goes through the same steps: group targets by scope, reserve a contiguous id
//! range, fetch the behavior scripts from the host, then install one probe per target. Scripts
//! of a flavor are all gathered before the first probe of that flavor is attached.
use crate::agent::dispatch::{managed_implementation, Dispatcher, NativeProbe, TargetHandle};
use crate::agent::engine::{InstrumentationEngine, ManagedRuntime};
use crate::agent::error::Error;
use crate::agent::host::{AgentMessage, HostChannel, ScopeRequest};
use crate::agent::plan::managed::ManagedPlan;
use crate::agent::provision::{request_scripts, IdAllocator};
use crate::agent::script::HandlerPair;
use crate::agent::target::{Address, Flavor, MemberDescriptor, NativeTarget, TargetId};
use crate::{agent_debug, agent_info, agent_warn};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Targets with an installed probe, by id.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    handles: Mutex<HashMap<TargetId, Arc<TargetHandle>>>,
}

impl TargetRegistry {
    fn insert(&self, handle: Arc<TargetHandle>) {
        self.handles.lock().unwrap().insert(handle.id, handle);
    }

    pub fn get(&self, id: TargetId) -> Option<Arc<TargetHandle>> {
        self.handles.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Group targets by scope, scopes keep the order they are first seen in.
fn group_by_scope<T>(items: Vec<(String, T)>) -> IndexMap<String, Vec<T>> {
    let mut groups: IndexMap<String, Vec<T>> = IndexMap::new();
    for (scope, item) in items {
        groups.entry(scope).or_default().push(item);
    }
    groups
}

pub struct AttachmentManager {
    engine: Arc<dyn InstrumentationEngine>,
    host: Arc<dyn HostChannel>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<TargetRegistry>,
    ids: IdAllocator,
    page_size: usize,
}

impl AttachmentManager {
    pub fn new(
        engine: Arc<dyn InstrumentationEngine>,
        host: Arc<dyn HostChannel>,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<TargetRegistry>,
        page_size: usize,
    ) -> Self {
        Self {
            engine,
            host,
            dispatcher,
            registry,
            ids: IdAllocator::new(1),
            page_size,
        }
    }

    fn warn(&self, message: String) {
        agent_warn!(target: "attach", "{message}");
        self.host.post(AgentMessage::Warning { message });
    }

    /// Parse a behavior, a malformed one is reported and replaced with a no-op.
    fn parse_behavior(&self, name: &str, script: &str) -> HandlerPair {
        match HandlerPair::parse(script) {
            Ok(pair) => pair,
            Err(e) => {
                self.warn(format!("{name}: {e}"));
                HandlerPair::noop()
            }
        }
    }

    /// Provision and attach native targets of one flavor. Returns the number of attached probes.
    pub fn attach_native(
        &self,
        flavor: Flavor,
        targets: Vec<(Address, NativeTarget)>,
    ) -> Result<usize, Error> {
        if targets.is_empty() {
            return Ok(0);
        }

        let groups = group_by_scope(
            targets
                .into_iter()
                .map(|(address, target)| (target.scope.clone(), (address, target)))
                .collect(),
        );
        let requests = groups
            .iter()
            .map(|(scope, targets)| ScopeRequest {
                name: scope.clone(),
                members: targets.iter().map(|(_, t)| t.member.clone()).collect(),
            })
            .collect::<Vec<_>>();
        let targets: Vec<(Address, NativeTarget)> = groups.into_values().flatten().collect();

        let base_id = self.ids.reserve(targets.len());
        let scripts = request_scripts(
            self.host.as_ref(),
            flavor,
            requests,
            base_id,
            self.page_size,
        )?;

        let mut attached = 0;
        for (offset, ((address, target), script)) in targets.into_iter().zip(scripts).enumerate() {
            let id = base_id + offset as TargetId;
            let name = target.display_name();
            let pair = self.parse_behavior(name, &script);
            let handle = Arc::new(TargetHandle::new(id, name, pair));
            let probe = Arc::new(NativeProbe::new(handle.clone(), self.dispatcher.clone()));

            match self.engine.attach(address, probe) {
                Ok(()) => {
                    self.registry.insert(handle);
                    attached += 1;
                }
                Err(e) => self.warn(format!("{name}: {}", Error::Attach(address, e))),
            }
        }

        agent_info!(target: "attach", "{flavor}: {attached} probes attached");
        Ok(attached)
    }

    /// Provision and install managed targets. Class lookups and replacements run inside
    /// [`ManagedRuntime::perform`]. Returns the number of traced methods.
    pub fn attach_managed(
        &self,
        runtime: &dyn ManagedRuntime,
        plan: &ManagedPlan,
    ) -> Result<usize, Error> {
        let mut requests = vec![];
        let mut methods = vec![];
        for group in plan.groups() {
            for (class, target) in group.classes() {
                requests.push(ScopeRequest {
                    name: class.to_string(),
                    members: target
                        .methods()
                        .map(|(bare, _)| MemberDescriptor::Name(bare.to_string()))
                        .collect(),
                });
                methods.extend(target.methods().map(|(bare, _)| (group, class, bare)));
            }
        }
        if methods.is_empty() {
            return Ok(0);
        }

        let base_id = self.ids.reserve(methods.len());
        let scripts = request_scripts(
            self.host.as_ref(),
            Flavor::Managed,
            requests,
            base_id,
            self.page_size,
        )?;

        let mut attached = 0;
        runtime.perform(&mut || {
            let mut classes = HashMap::new();
            for (offset, ((group, class, bare), script)) in methods.iter().zip(&scripts).enumerate() {
                let name = format!("{class}.{bare}");
                let key = (group.loader.clone(), *class);
                let handle = match classes.get(&key) {
                    Some(handle) => Arc::clone(handle),
                    None => match runtime.use_class(group.loader.as_ref(), class) {
                        Ok(handle) => {
                            classes.insert(key, handle.clone());
                            handle
                        }
                        Err(e) => {
                            self.warn(format!("{name}: {}", Error::ManagedHook(class.to_string(), e)));
                            continue;
                        }
                    },
                };

                let overloads = match handle.overloads(bare) {
                    Ok(overloads) => overloads,
                    Err(e) => {
                        self.warn(Error::ManagedHook(name, e).to_string());
                        continue;
                    }
                };

                let id = base_id + offset as TargetId;
                let pair = self.parse_behavior(&name, script);
                let target = Arc::new(TargetHandle::new(id, name.as_str(), pair));
                let implementation = managed_implementation(target.clone(), self.dispatcher.clone());

                let mut installed = 0;
                for overload in &overloads {
                    match handle.replace_implementation(bare, overload, implementation.clone()) {
                        Ok(()) => installed += 1,
                        Err(e) => self.warn(Error::ManagedHook(format!("{class}.{overload}"), e).to_string()),
                    }
                }
                agent_debug!(target: "attach", "{name}: {installed} of {} overloads replaced", overloads.len());
                if installed > 0 {
                    self.registry.insert(target);
                    attached += 1;
                }
            }
        });

        agent_info!(target: "attach", "managed: {attached} methods attached");
        Ok(attached)
    }
}
