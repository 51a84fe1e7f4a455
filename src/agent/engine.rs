//! Contracts of the collaborators the agent core drives: the instrumentation engine, the
//! enumeration facilities of the traced process and the managed runtime bridge.
use crate::agent::script::Value;
use crate::agent::signature::MethodIntrospector;
use crate::agent::target::{Address, ThreadId};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Loaded module of the traced process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub base: Address,
}

/// Resolver match, `name` is qualified the resolver's way (`module!function`, `-[Class sel]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiMatch {
    pub name: String,
    pub address: Address,
}

impl ApiMatch {
    pub fn new(name: impl Into<String>, address: impl Into<Address>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Function found through the symbol table or debug information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSymbol {
    pub address: Address,
    pub module: Option<String>,
    pub name: String,
}

/// Enumeration facilities of the traced process.
pub trait ProcessInspector: Send + Sync {
    /// Loaded modules, the main program first.
    fn modules(&self) -> Vec<Module>;

    /// Exported functions matching a `module!function` glob.
    fn exports_matching(&self, glob: &str) -> Vec<ApiMatch>;

    /// Imports of the modules matching a `module!function` glob, named after the module they
    /// are imported from.
    fn imports_matching(&self, glob: &str) -> Vec<ApiMatch>;

    /// Functions from symbol tables and debug information matching a glob.
    fn symbols_matching(&self, pattern: &str) -> Vec<DebugSymbol>;

    /// Object-oriented (message dispatch) runtime, if loaded into the process.
    fn object_runtime(&self) -> Option<Arc<dyn ObjectRuntime>>;

    /// Alternate native runtime, if loaded into the process.
    fn alt_runtime(&self) -> Option<Arc<dyn AltRuntime>>;
}

pub trait ObjectRuntime: Send + Sync {
    /// Methods matching a `-[Class selector]` pattern, names use the same notation.
    fn methods_matching(&self, pattern: &str) -> Vec<ApiMatch>;

    /// Instance variable names of a freshly instantiated object of `class`.
    /// `None` if the class cannot be instantiated.
    fn instance_variables(&self, class: &str) -> Option<Vec<String>>;

    fn introspector(&self) -> &dyn MethodIntrospector;
}

pub trait AltRuntime: Send + Sync {
    /// Functions matching a pattern, named `module!function`.
    fn functions_matching(&self, pattern: &str) -> Vec<ApiMatch>;
}

/// Context of a traced native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub thread_id: ThreadId,
}

/// Enter/leave callbacks installed at a call site.
pub trait Probe: Send + Sync {
    fn on_enter(&self, ctx: &CallContext, args: &[Value]);

    fn on_leave(&self, ctx: &CallContext, retval: &Value);
}

pub trait InstrumentationEngine: Send + Sync {
    /// Attach a probe at the call site. Attachment is serialized by the engine.
    fn attach(&self, address: Address, probe: Arc<dyn Probe>) -> anyhow::Result<()>;
}

/// Identity of a managed class loader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoaderId(pub String);

impl Display for LoaderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exception of the managed runtime's own exception model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class}: {message}")]
pub struct ManagedException {
    pub class: String,
    pub message: String,
}

impl ManagedException {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }
}

/// In-flight call of a replaced managed method.
pub trait ManagedCall {
    fn thread_id(&self) -> ThreadId;

    fn args(&self) -> &[Value];

    /// Call the original implementation.
    fn invoke_original(&mut self) -> Result<Value, ManagedException>;
}

/// Replacement implementation of a managed method overload.
pub type ManagedImplementation =
    Arc<dyn Fn(&mut dyn ManagedCall) -> Result<Value, ManagedException> + Send + Sync>;

/// Classes matching an enumeration pattern inside one class loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedLoaderMatch {
    pub loader: Option<LoaderId>,
    pub classes: Vec<ManagedClassMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedClassMatch {
    pub name: String,
    /// Method signatures, e.g. `foo(int): void`.
    pub methods: Vec<String>,
}

/// Reflective handle of a managed class.
pub trait ManagedClass: Send + Sync {
    /// Overload signatures of a method.
    fn overloads(&self, method: &str) -> anyhow::Result<Vec<String>>;

    fn replace_implementation(
        &self,
        method: &str,
        overload: &str,
        implementation: ManagedImplementation,
    ) -> anyhow::Result<()>;
}

pub trait ManagedRuntime: Send + Sync {
    /// Run `task` on the managed runtime's own execution context and wait for it.
    fn perform(&self, task: &mut dyn FnMut());

    /// Methods matching a `class!method` pattern, grouped by class loader.
    fn methods_matching(&self, pattern: &str) -> Vec<ManagedLoaderMatch>;

    fn use_class(
        &self,
        loader: Option<&LoaderId>,
        class: &str,
    ) -> anyhow::Result<Arc<dyn ManagedClass>>;
}
