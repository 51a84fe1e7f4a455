
mod batcher;
mod managed;
mod provision;
mod session;

use calltrace::agent::spec::{Rule, Specification};
use std::str::FromStr;

/// Build a specification from `operation:scope:pattern` rules.
pub fn spec(rules: &[&str]) -> Specification {
    rules.iter().map(|r| Rule::from_str(r).unwrap()).collect()
}

/// Route agent logs to the test output, `RUST_LOG` selects targets.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
