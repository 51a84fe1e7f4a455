//! Probe dispatch: depth tracking, behavior invocation and event emission.
use crate::agent::batcher::{EventBatcher, TraceEvent};
use crate::agent::control::ControlLoop;
use crate::agent::engine::{
    CallContext, ManagedCall, ManagedException, ManagedImplementation, Probe,
};
use crate::agent::error::Error;
use crate::agent::script::{BehaviorError, Handler, HandlerPair, Invocation, TraceState, Value};
use crate::agent::target::{TargetId, ThreadId};
use crate::agent_warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Display name and behavior currently bound to a target.
#[derive(Debug)]
pub struct Binding {
    pub name: String,
    pub pair: Arc<HandlerPair>,
}

/// Target as seen by its probes. Behaviors are swapped in place by `update`.
#[derive(Debug)]
pub struct TargetHandle {
    pub id: TargetId,
    binding: RwLock<Arc<Binding>>,
}

impl TargetHandle {
    pub fn new(id: TargetId, name: impl Into<String>, pair: HandlerPair) -> Self {
        Self {
            id,
            binding: RwLock::new(Arc::new(Binding {
                name: name.into(),
                pair: Arc::new(pair),
            })),
        }
    }

    /// Snapshot of the binding, in-flight calls keep the behavior they started with.
    pub fn binding(&self) -> Arc<Binding> {
        self.binding.read().unwrap().clone()
    }

    pub fn rebind(&self, name: impl Into<String>, pair: HandlerPair) {
        *self.binding.write().unwrap() = Arc::new(Binding {
            name: name.into(),
            pair: Arc::new(pair),
        });
    }
}

/// Traced call as seen by one behavior invocation.
#[derive(Clone, Copy)]
struct Frame<'a> {
    target_id: TargetId,
    name: &'a str,
    thread_id: ThreadId,
    depth: u32,
}

/// Runs behaviors for every probe of a session.
///
/// The depth table holds an entry only for threads currently inside at least one traced call,
/// so it stays bounded by the number of such threads. Once disposed, probes still keep the
/// table balanced but no behavior runs.
pub struct Dispatcher {
    started: Instant,
    disposed: AtomicBool,
    depths: Mutex<HashMap<ThreadId, u32>>,
    batcher: Arc<EventBatcher>,
    state: Arc<TraceState>,
    control: Arc<ControlLoop>,
}

impl Dispatcher {
    pub fn new(batcher: Arc<EventBatcher>, state: Arc<TraceState>, control: Arc<ControlLoop>) -> Self {
        Self {
            started: Instant::now(),
            disposed: AtomicBool::new(false),
            depths: Mutex::default(),
            batcher,
            state,
            control,
        }
    }

    fn timestamp(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn push_depth(&self, thread_id: ThreadId) -> u32 {
        let mut depths = self.depths.lock().unwrap();
        let depth = depths.entry(thread_id).or_insert(0);
        *depth += 1;
        *depth
    }

    /// Pop one nesting level, returns the level of the returning call or 0 if the thread has
    /// no open call.
    fn pop_depth(&self, thread_id: ThreadId) -> u32 {
        let mut depths = self.depths.lock().unwrap();
        match depths.get_mut(&thread_id) {
            Some(depth) => {
                let current = *depth;
                if current <= 1 {
                    depths.remove(&thread_id);
                } else {
                    *depth = current - 1;
                }
                current
            }
            None => 0,
        }
    }

    fn run(
        &self,
        frame: Frame,
        handler: &Handler,
        args: &[Value],
        retval: &Value,
    ) -> Result<Option<Value>, BehaviorError> {
        if handler.is_noop() || self.is_disposed() {
            return Ok(None);
        }

        let timestamp = self.timestamp();
        let mut log = |message: String| {
            self.batcher.emit(TraceEvent {
                target_id: frame.target_id,
                timestamp,
                thread_id: frame.thread_id,
                depth: frame.depth,
                message,
            })
        };
        let mut inv = Invocation {
            name: frame.name,
            args,
            retval,
            state: &self.state,
            log: &mut log,
        };
        handler.invoke(&mut inv)
    }

    /// Call entry: one level deeper, then the enter behavior.
    pub fn enter(
        &self,
        target_id: TargetId,
        name: &str,
        thread_id: ThreadId,
        handler: &Handler,
        args: &[Value],
    ) -> Result<Option<Value>, BehaviorError> {
        let frame = Frame {
            target_id,
            name,
            thread_id,
            depth: self.push_depth(thread_id),
        };
        self.run(frame, handler, args, &Value::Undefined)
    }

    /// Call exit: the leave behavior reports the level of the returning call.
    pub fn leave(
        &self,
        target_id: TargetId,
        name: &str,
        thread_id: ThreadId,
        handler: &Handler,
        retval: &Value,
    ) -> Result<Option<Value>, BehaviorError> {
        let frame = Frame {
            target_id,
            name,
            thread_id,
            depth: self.pop_depth(thread_id),
        };
        self.run(frame, handler, &[], retval)
    }

    /// Stop running behaviors. Probes stay installed in the engine and only track depth.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Drop the level of a call that left by an exception, no behavior runs.
    pub fn unwind(&self, thread_id: ThreadId) {
        self.pop_depth(thread_id);
    }

    /// Current nesting level of a thread.
    pub fn depth(&self, thread_id: ThreadId) -> u32 {
        self.depths
            .lock()
            .unwrap()
            .get(&thread_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of threads with an open traced call.
    pub fn tracked_threads(&self) -> usize {
        self.depths.lock().unwrap().len()
    }

    /// Managed exceptions belong to the traced call, anything else goes to the control thread.
    fn isolate(&self, name: &str, err: BehaviorError) -> Result<(), ManagedException> {
        match err {
            BehaviorError::Managed(exception) => Err(exception),
            err => {
                self.control.defer_error(Error::Behavior(err));
                agent_warn!(target: "dispatch", "{name}: behavior failed, error deferred");
                Ok(())
            }
        }
    }
}

/// Native probe of one target.
pub struct NativeProbe {
    handle: Arc<TargetHandle>,
    dispatcher: Arc<Dispatcher>,
}

impl NativeProbe {
    pub fn new(handle: Arc<TargetHandle>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { handle, dispatcher }
    }

    fn report(&self, name: &str, err: BehaviorError) {
        agent_warn!(target: "dispatch", "{name}: {err}");
        self.dispatcher.control.defer_error(Error::Behavior(err));
    }
}

impl Probe for NativeProbe {
    fn on_enter(&self, ctx: &CallContext, args: &[Value]) {
        let binding = self.handle.binding();
        let result = self.dispatcher.enter(
            self.handle.id,
            &binding.name,
            ctx.thread_id,
            &binding.pair.on_enter,
            args,
        );
        if let Err(e) = result {
            self.report(&binding.name, e);
        }
    }

    fn on_leave(&self, ctx: &CallContext, retval: &Value) {
        let binding = self.handle.binding();
        let result = self.dispatcher.leave(
            self.handle.id,
            &binding.name,
            ctx.thread_id,
            &binding.pair.on_leave,
            retval,
        );
        if let Err(e) = result {
            self.report(&binding.name, e);
        }
    }
}

/// Replacement implementation for every overload of a managed method.
///
/// A defined value returned by the leave behavior replaces the real result.
pub fn managed_implementation(
    handle: Arc<TargetHandle>,
    dispatcher: Arc<Dispatcher>,
) -> ManagedImplementation {
    Arc::new(move |call: &mut dyn ManagedCall| {
        let binding = handle.binding();
        let thread_id = call.thread_id();

        if let Err(e) = dispatcher.enter(
            handle.id,
            &binding.name,
            thread_id,
            &binding.pair.on_enter,
            call.args(),
        ) {
            if let Err(exception) = dispatcher.isolate(&binding.name, e) {
                dispatcher.unwind(thread_id);
                return Err(exception);
            }
        }

        let result = match call.invoke_original() {
            Ok(result) => result,
            Err(exception) => {
                dispatcher.unwind(thread_id);
                return Err(exception);
            }
        };

        let replacement = match dispatcher.leave(
            handle.id,
            &binding.name,
            thread_id,
            &binding.pair.on_leave,
            &result,
        ) {
            Ok(replacement) => replacement,
            Err(e) => {
                dispatcher.isolate(&binding.name, e)?;
                None
            }
        };

        Ok(replacement.filter(Value::is_defined).unwrap_or(result))
    })
}
