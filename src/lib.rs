//! Control core of a dynamic call-tracing agent.
//!
//! The crate resolves a declarative trace specification into concrete call sites, fetches
//! per-target behavior scripts from a host controller, attaches enter/leave probes through an
//! instrumentation engine and streams trace events back to the host.
//!
//! Everything platform specific (the instrumentation engine, symbol enumeration, the managed
//! runtime bridge and the host transport) is consumed through the traits in
//! [`agent::engine`] and [`agent::host`].

pub mod agent;
pub mod log;
