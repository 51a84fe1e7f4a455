pub mod attach;
pub mod batcher;
pub mod capability;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod host;
pub mod pattern;
pub mod plan;
pub mod provision;
pub mod script;
pub mod session;
pub mod signature;
pub mod spec;
pub mod target;

pub use config::AgentConfig;
pub use error::Error;
pub use session::{Collaborators, Session, SessionState};
pub use spec::{Operation, Rule, Scope, Specification};
