//! Session controller.
//!
//! A session drives one trace from the specification to running probes:
//!
//! ```text
//! Created -> Collecting -> Resolving -> Provisioning -> Attaching -> Running
//!                 \             \              \             \
//!                  `-------------`--------------`-------------`--> Failed
//! ```
//!
//! and ends in `Disposed`. Native and managed pipelines run concurrently once resolution is
//! done. The host learns about progress through `agent:initialized` (native probes attached)
//! and `agent:started` (every pipeline done).
use crate::agent::attach::{AttachmentManager, TargetRegistry};
use crate::agent::batcher::EventBatcher;
use crate::agent::config::AgentConfig;
use crate::agent::control::ControlLoop;
use crate::agent::dispatch::Dispatcher;
use crate::agent::engine::{InstrumentationEngine, ManagedRuntime, ProcessInspector};
use crate::agent::error::Error;
use crate::agent::host::{AgentMessage, HostChannel};
use crate::agent::plan::TargetPlan;
use crate::agent::script::{HandlerPair, InitScript, TraceState};
use crate::agent::spec::{Rule, Specification};
use crate::agent::target::{Flavor, TargetId, TargetKind};
use crate::{agent_error, agent_info, agent_warn};
use std::sync::{Arc, Mutex};
use std::thread;
use strum_macros::{Display, IntoStaticStr};

/// Facilities of the traced process and the host a session works with.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn InstrumentationEngine>,
    pub inspector: Arc<dyn ProcessInspector>,
    /// Managed runtime bridge, `None` if the process has no managed runtime.
    pub managed: Option<Arc<dyn ManagedRuntime>>,
    pub host: Arc<dyn HostChannel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Created,
    Collecting,
    Resolving,
    Provisioning,
    Attaching,
    Running,
    Failed,
    Disposed,
}

/// Parts of a session that live from `init` until `dispose`.
#[derive(Clone)]
struct Live {
    trace_state: Arc<TraceState>,
    batcher: Arc<EventBatcher>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<TargetRegistry>,
}

pub struct Session {
    collaborators: Collaborators,
    config: AgentConfig,
    control: Arc<ControlLoop>,
    state: Mutex<SessionState>,
    live: Option<Live>,
}

impl Session {
    pub fn new(collaborators: Collaborators, config: AgentConfig) -> Self {
        Self {
            collaborators,
            config,
            control: Arc::new(ControlLoop::new()),
            state: Mutex::new(SessionState::Created),
            live: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Move forward through the startup states. Pipelines report concurrently, so a state that
    /// was already passed is ignored.
    fn advance(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        if *state < next && *state != SessionState::Failed {
            agent_info!("session: {} -> {next}", *state);
            *state = next;
        }
    }

    /// Report a fatal error to the host and mark the session failed.
    fn fail(&self, err: Error) -> Error {
        agent_error!("{err}");
        self.collaborators.host.post(AgentMessage::Error {
            message: err.to_string(),
        });
        *self.state.lock().unwrap() = SessionState::Failed;
        err
    }

    fn report_warnings(&self, warnings: Vec<String>) {
        for message in warnings {
            self.collaborators.host.post(AgentMessage::Warning { message });
        }
    }

    /// Start the trace. Returns the number of attached targets, reported to the host as
    /// `agent:started`.
    ///
    /// # Arguments
    ///
    /// * `stage`: load stage reported by the host, informational
    /// * `parameters`: JSON object readable by behaviors as `params.*`, its `config` key
    ///   overrides the session config
    /// * `init_scripts`: `(file name, source)` pairs run once, in order, before resolution
    /// * `spec`: rules applied in order
    pub fn init(
        &mut self,
        stage: &str,
        parameters: serde_json::Value,
        init_scripts: Vec<(String, String)>,
        spec: Specification,
    ) -> Result<usize, Error> {
        let current = self.state();
        if current != SessionState::Created {
            return Err(Error::InvalidState(current.into(), SessionState::Created.into()));
        }
        agent_info!("session init, stage `{stage}`, {} rules", spec.rules().len());

        if parameters.get("config").is_some() {
            self.config = AgentConfig::from_parameters(&parameters);
        }
        let trace_state = Arc::new(TraceState::new(&parameters));
        for (file, source) in &init_scripts {
            let result = InitScript::parse(source).and_then(|script| script.run(file, &trace_state));
            if let Err(e) = result {
                return Err(self.fail(Error::InitScript {
                    file: file.clone(),
                    source: Box::new(e),
                }));
            }
        }

        let batcher = match EventBatcher::new(self.collaborators.host.clone(), self.config.flush_delay) {
            Ok(batcher) => Arc::new(batcher),
            Err(e) => return Err(self.fail(e)),
        };
        let dispatcher = Arc::new(Dispatcher::new(
            batcher.clone(),
            trace_state.clone(),
            self.control.clone(),
        ));
        let live = Live {
            trace_state,
            batcher,
            dispatcher,
            registry: Arc::default(),
        };
        self.live = Some(live.clone());

        self.advance(SessionState::Collecting);
        let mut plan = TargetPlan::new(self.collaborators.inspector.clone());
        let mut deferred: Vec<&Rule> = vec![];
        for rule in spec.rules() {
            if rule.scope.is_deferred() {
                deferred.push(rule);
                continue;
            }
            let applied = plan.apply_rule(rule);
            self.report_warnings(plan.take_warnings());
            if let Err(e) = applied {
                return Err(self.fail(e));
            }
        }

        self.advance(SessionState::Resolving);
        let managed = if deferred.is_empty() {
            None
        } else {
            let Some(runtime) = self.collaborators.managed.clone() else {
                return Err(self.fail(Error::ManagedRuntimeUnavailable));
            };
            runtime.perform(&mut || {
                for rule in &deferred {
                    plan.apply_managed_rule(rule, runtime.as_ref());
                }
            });
            Some(runtime)
        };

        self.start(&live, &plan, managed)
    }

    /// Run native and managed pipelines concurrently.
    fn start(
        &self,
        live: &Live,
        plan: &TargetPlan,
        managed: Option<Arc<dyn ManagedRuntime>>,
    ) -> Result<usize, Error> {
        self.advance(SessionState::Provisioning);
        let manager = AttachmentManager::new(
            self.collaborators.engine.clone(),
            self.collaborators.host.clone(),
            live.dispatcher.clone(),
            live.registry.clone(),
            self.config.handlers_page_size,
        );

        let manager = &manager;
        let (native, managed) = thread::scope(|scope| {
            let native = scope.spawn(|| {
                let mut attached = 0;
                for kind in [TargetKind::Plain, TargetKind::ObjectOriented, TargetKind::AltRuntime] {
                    let targets = plan
                        .native_targets()
                        .filter(|(_, target)| target.kind == kind)
                        .map(|(address, target)| (address, target.clone()))
                        .collect();
                    attached += manager.attach_native(Flavor::from(kind), targets)?;
                    self.advance(SessionState::Attaching);
                }
                self.collaborators.host.post(AgentMessage::Initialized);
                Ok::<_, Error>(attached)
            });

            let managed = managed.map(|runtime| {
                scope.spawn(move || {
                    let attached = manager.attach_managed(runtime.as_ref(), plan.managed());
                    self.advance(SessionState::Attaching);
                    attached
                })
            });

            (join(native), managed.map(join).unwrap_or(Ok(0)))
        });

        let count = match (native, managed) {
            (Ok(native), Ok(managed)) => native + managed,
            (Err(e), _) | (_, Err(e)) => return Err(self.fail(e)),
        };
        if live.registry.is_empty() {
            agent_warn!("session started without attached targets");
        }

        self.advance(SessionState::Running);
        self.collaborators.host.post(AgentMessage::Started { count });
        Ok(count)
    }

    /// Neutralize installed probes, flush pending events and stop the flush timer.
    /// Probes stay in the process but only keep depth bookkeeping afterwards.
    pub fn dispose(&mut self) {
        if let Some(live) = self.live.take() {
            live.dispatcher.dispose();
            live.batcher.dispose();
        }
        *self.state.lock().unwrap() = SessionState::Disposed;
    }

    /// Replace the behavior of a provisioned target.
    pub fn update(&self, id: TargetId, display_name: &str, script: &str) -> Result<(), Error> {
        let live = self.live.as_ref().ok_or_else(|| {
            Error::InvalidState(self.state().into(), SessionState::Running.into())
        })?;
        let handle = live.registry.get(id).ok_or(Error::UnknownTarget(id))?;
        let pair = HandlerPair::parse(script)?;
        handle.rebind(display_name, pair);
        Ok(())
    }

    /// Idle turn of the control thread: run deferred tasks and report their errors.
    /// Returns the number of reported errors.
    pub fn run_idle(&self) -> usize {
        let errors = self.control.run_idle();
        for err in &errors {
            agent_error!("{err}");
            self.collaborators.host.post(AgentMessage::Error {
                message: err.to_string(),
            });
        }
        errors.len()
    }

    /// Number of targets with an installed probe.
    pub fn attached(&self) -> usize {
        self.live.as_ref().map(|live| live.registry.len()).unwrap_or(0)
    }

    /// Shared behavior state, available between `init` and `dispose`.
    pub fn trace_state(&self) -> Option<&TraceState> {
        self.live.as_ref().map(|live| live.trace_state.as_ref())
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, Result<T, Error>>) -> Result<T, Error> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(Error::Host(anyhow::anyhow!("pipeline thread panicked"))),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.live.is_some() {
            self.dispose();
        }
    }
}
