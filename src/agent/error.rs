use crate::agent::target::{Address, Flavor, TargetId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("configuration: {0}")]
    Config(#[from] toml::de::Error),

    // --------------------------------- pattern and spec errors -----------------------------------
    #[error("malformed pattern `{0}`: {1}")]
    InvalidPattern(String, &'static str),
    #[error("malformed rule `{0}`")]
    InvalidRule(String),
    #[error("module `{0}` not found")]
    ModuleNotFound(String),

    // --------------------------------- capability errors -----------------------------------------
    #[error("{0} is not available")]
    CapabilityUnavailable(&'static str),
    #[error("managed runtime is required but not available")]
    ManagedRuntimeUnavailable,

    // --------------------------------- script errors ---------------------------------------------
    #[error("behavior script: {0}")]
    ScriptParsing(String),
    #[error("{file}: {source}")]
    InitScript {
        file: String,
        #[source]
        source: Box<Error>,
    },
    #[error(transparent)]
    Behavior(#[from] crate::agent::script::BehaviorError),

    // --------------------------------- provisioning errors ---------------------------------------
    #[error("host channel: {0}")]
    Host(anyhow::Error),
    #[error("{flavor} handlers request {base_id}: expected {expected} scripts, got {actual}")]
    ScriptCountMismatch {
        flavor: Flavor,
        base_id: TargetId,
        expected: usize,
        actual: usize,
    },
    #[error("unknown target id {0}")]
    UnknownTarget(TargetId),

    // --------------------------------- attach errors ---------------------------------------------
    #[error("attach probe at {0}: {1}")]
    Attach(Address, anyhow::Error),
    #[error("managed method {0}: {1}")]
    ManagedHook(String, anyhow::Error),

    // --------------------------------- session errors --------------------------------------------
    #[error("session is {0}, expected {1}")]
    InvalidState(&'static str, &'static str),
}

impl Error {
    /// Return a hint to the session - continue after error or abort whole startup.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => false,
            Error::Json(_) => false,
            Error::Config(_) => false,
            Error::InvalidPattern(_, _) => false,
            Error::InvalidRule(_) => false,
            Error::ModuleNotFound(_) => false,
            Error::ScriptParsing(_) => false,
            Error::Behavior(_) => false,
            Error::UnknownTarget(_) => false,
            Error::Attach(_, _) => false,
            Error::ManagedHook(_, _) => false,
            Error::InvalidState(_, _) => false,

            // startup aborting errors
            Error::CapabilityUnavailable(_) => true,
            Error::ManagedRuntimeUnavailable => true,
            Error::InitScript { .. } => true,
            Error::Host(_) => true,
            Error::ScriptCountMismatch { .. } => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Log the error of `$res` at `$level` and turn the result into an `Option`.
#[doc(hidden)]
#[macro_export]
macro_rules! _error {
    ($level:expr, $res:expr $(, $msg:tt)?) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $crate::_agent_log!($level, concat!($($msg, " ",)? "{:#}"), e);
                None
            }
        }
    };
}

/// Recoverable failure: warn and continue with `None`.
#[macro_export]
macro_rules! weak_error {
    ($res:expr $(, $msg:tt)?) => {
        $crate::_error!(log::Level::Warn, $res $(, $msg)?)
    };
}

/// Expected failure: keep it in debug logs only.
#[macro_export]
macro_rules! muted_error {
    ($res:expr $(, $msg:tt)?) => {
        $crate::_error!(log::Level::Debug, $res $(, $msg)?)
    };
}
