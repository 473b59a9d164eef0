//! Logging setup for sweeten
//!
//! Thin wrapper over `env_logger`. Library code only uses the `log` macros;
//! binaries and tests pick one of the initializers below.
//!
//! # Log Levels
//!
//! - `warn!` - ambiguous identifier resolutions
//! - `info!` - module loads and instantiations
//! - `debug!` - every macro invocation and splice
//! - `trace!` - scope and binding bookkeeping
//!
//! ```bash
//! RUST_LOG=debug sweeten expand main.js
//! RUST_LOG=expander::scope=trace sweeten expand main.js
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize at `Warn`. Only the first initializer call has an effect.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {} - {}",
                    record.level(),
                    record.module_path().unwrap_or("sweeten"),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize from `RUST_LOG`, defaulting to `warn`
pub fn init_from_env() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Initialize for tests: captured output, safe to call from every test
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}

/// Whether one of the `Once`-guarded initializers has run
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
        log::warn!("still fine");
    }
}
