use std::sync::OnceLock;

use parking_lot::RwLock;

/// Controls whether the HTTP→RPC proxy logs no requests, only mutating
/// requests, or all requests. Wire-stable values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    None,
    Sets,
    All,
}

/// Replaces the SysV shared-memory configuration blob: one process-wide
/// read-mostly cell. Writers take the cell's own lock; readers get a cheap
/// snapshot copy (`LogMode` is `Copy`, so no cloning cost beyond that).
static LOG_MODE: OnceLock<RwLock<LogMode>> = OnceLock::new();

fn cell() -> &'static RwLock<LogMode> {
    LOG_MODE.get_or_init(|| RwLock::new(LogMode::None))
}

pub fn log_mode() -> LogMode {
    *cell().read()
}

pub fn set_log_mode(mode: LogMode) {
    *cell().write() = mode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_none_and_is_settable() {
        assert_eq!(log_mode(), LogMode::None);
        set_log_mode(LogMode::All);
        assert_eq!(log_mode(), LogMode::All);
        set_log_mode(LogMode::None);
    }
}
