//! Behavior scripts.
//!
//! A behavior script is a restricted program bound to one target. It owns two optional sections,
//! `enter { .. }` and `leave { .. }`, executed by the dispatcher around every traced call. Scripts
//! can only log, read call arguments and the return value, and touch the session's shared
//! [`TraceState`]:
//!
//! ```text
//! enter { log("open", args[0]); state.opened = state.opened + 1; }
//! leave { log("->", retval); }
//! ```
//!
//! Initialization scripts use the same statements without sections and run once per session.

pub mod parser;
mod state;

pub use state::TraceState;

use crate::agent::engine::ManagedException;
use crate::agent::error::Error;
use itertools::Itertools;
use std::fmt::{Display, Formatter};

/// Value visible to behavior scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Value {
    #[default]
    Undefined,
    Int(i64),
    Str(String),
    Ptr(u64),
}

impl Value {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Ptr(p) => write!(f, "{p:#x}"),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Undefined,
            serde_json::Value::Bool(b) => Value::Int(*b as i64),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .unwrap_or_else(|| Value::Str(n.to_string())),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Str(String),
    Int(i64),
    Arg(usize),
    Retval,
    State(String),
    Param(String),
    Name,
    Add(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Log(Vec<Expr>),
    SetState(String, Expr),
    Return(Expr),
    /// Fail the behavior with a script error.
    Throw(Expr),
    /// Raise an exception inside the traced managed runtime.
    Raise(Expr),
}

#[derive(Debug, thiserror::Error)]
pub enum BehaviorError {
    #[error("{0}")]
    Thrown(String),
    #[error(transparent)]
    Managed(#[from] ManagedException),
}

/// Everything a behavior may observe during one invocation.
pub struct Invocation<'a> {
    /// Display name of the traced target.
    pub name: &'a str,
    pub args: &'a [Value],
    pub retval: &'a Value,
    pub state: &'a TraceState,
    /// Log callback, one call per emitted line.
    pub log: &'a mut dyn FnMut(String),
}

impl Expr {
    fn eval(&self, inv: &Invocation) -> Value {
        match self {
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Int(v) => Value::Int(*v),
            Expr::Arg(idx) => inv.args.get(*idx).cloned().unwrap_or_default(),
            Expr::Retval => inv.retval.clone(),
            Expr::State(key) => inv.state.get(key),
            Expr::Param(key) => inv.state.param(key),
            Expr::Name => Value::Str(inv.name.to_string()),
            Expr::Add(lhs, rhs) => match (lhs.eval(inv), rhs.eval(inv)) {
                (Value::Int(l), Value::Int(r)) => Value::Int(l.wrapping_add(r)),
                (Value::Ptr(l), Value::Int(r)) => Value::Ptr(l.wrapping_add_signed(r)),
                (l, r) => Value::Str(format!("{l}{r}")),
            },
        }
    }
}

/// One section of a behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handler {
    body: Vec<Stmt>,
}

impl Handler {
    pub fn new(body: Vec<Stmt>) -> Self {
        Self { body }
    }

    pub fn is_noop(&self) -> bool {
        self.body.is_empty()
    }

    /// Execute statements in order, returns the value of an executed `return`.
    pub fn invoke(&self, inv: &mut Invocation) -> Result<Option<Value>, BehaviorError> {
        for stmt in &self.body {
            match stmt {
                Stmt::Log(exprs) => {
                    let line = exprs.iter().map(|e| e.eval(inv)).join(" ");
                    (inv.log)(line);
                }
                Stmt::SetState(key, expr) => {
                    let value = expr.eval(inv);
                    inv.state.set(key, value);
                }
                Stmt::Return(expr) => return Ok(Some(expr.eval(inv))),
                Stmt::Throw(expr) => return Err(BehaviorError::Thrown(expr.eval(inv).to_string())),
                Stmt::Raise(expr) => {
                    let class = match expr.eval(inv) {
                        Value::Str(class) => class,
                        other => other.to_string(),
                    };
                    return Err(ManagedException::new(class, format!("raised by {}", inv.name)).into());
                }
            }
        }
        Ok(None)
    }
}

/// Enter and leave behavior of one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerPair {
    pub on_enter: Handler,
    pub on_leave: Handler,
}

impl HandlerPair {
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn parse(source: &str) -> Result<Self, Error> {
        parser::parse_behavior(source)
    }
}

/// Statements run once at session initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitScript {
    body: Handler,
}

impl InitScript {
    pub fn parse(source: &str) -> Result<Self, Error> {
        Ok(Self {
            body: Handler::new(parser::parse_init(source)?),
        })
    }

    /// Run against the shared state. `log` lines are diagnostics of the init script.
    pub fn run(&self, file: &str, state: &TraceState) -> Result<(), Error> {
        let mut log = |line: String| crate::agent_info!(target: "agent", "{file}: {line}");
        let mut inv = Invocation {
            name: file,
            args: &[],
            retval: &Value::Undefined,
            state,
            log: &mut log,
        };
        self.body.invoke(&mut inv)?;
        Ok(())
    }
}
