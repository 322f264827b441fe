//! Per-module switchable logging.
//!
//! The session, capture and audit flows narrate every step they take. Each of
//! those modules declares its own flag so the narration can be silenced
//! without touching `RUST_LOG` for the rest of the crate:
//!
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("round {round}: step complete");
//! ```

/// `log::debug!` guarded by the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// `log::info!` guarded by the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// `log::warn!` guarded by the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// `log::error!` guarded by the calling module's `ENABLE_LOGS` const.
///
/// Errors are usually worth keeping even when a module is silenced, so most
/// call sites that must always surface use `log::error!` directly.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Initialise the global logger. Reads `RUST_LOG`, defaults to `Info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
