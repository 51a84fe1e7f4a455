use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Mute agent diagnostics (hot probe paths stay silent while the host owns the channel).
pub fn disable() {
    ENABLED.store(false, Ordering::SeqCst)
}

pub fn enable() {
    ENABLED.store(true, Ordering::SeqCst)
}

#[doc(hidden)]
#[macro_export]
macro_rules! _agent_log {
    ($level:expr, target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::log!(target: $target, $level, $($arg)+)
        }
    };
    ($level:expr, $($arg:tt)+) => {
        $crate::_agent_log!($level, target: "agent", $($arg)+)
    };
}

#[macro_export]
macro_rules! agent_info {
    ($($arg:tt)+) => { $crate::_agent_log!(log::Level::Info, $($arg)+) };
}

#[macro_export]
macro_rules! agent_warn {
    ($($arg:tt)+) => { $crate::_agent_log!(log::Level::Warn, $($arg)+) };
}

#[macro_export]
macro_rules! agent_error {
    ($($arg:tt)+) => { $crate::_agent_log!(log::Level::Error, $($arg)+) };
}

#[macro_export]
macro_rules! agent_debug {
    ($($arg:tt)+) => { $crate::_agent_log!(log::Level::Debug, $($arg)+) };
}
