#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `relay_logging` wires the workspace onto the [`tracing`] ecosystem. The
//! engine crates emit structured events through the `tracing` macros and
//! never install a subscriber themselves; binaries (and tests that want
//! output) call [`init`] exactly once.
//!
//! # Design
//!
//! Verbosity is controlled through the `RELAY_LOG` environment variable
//! using [`tracing_subscriber::EnvFilter`] syntax. When the variable is
//! unset, a default filter keeps dependency noise at `warn` while workspace
//! crates log at `info`.
//!
//! # Examples
//!
//! ```no_run
//! relay_logging::init();
//! tracing::info!("engine starting");
//! ```

use tracing_subscriber::EnvFilter;

/// Environment variable consulted for the log filter.
pub const LOG_ENV_VAR: &str = "RELAY_LOG";

/// Filter applied when [`LOG_ENV_VAR`] is unset.
const DEFAULT_FILTER: &str =
    "warn,relay_engine=info,relay_walk=info,relay_filters=info,relay_cli=info";

/// Installs the global subscriber using [`LOG_ENV_VAR`] or the default
/// filter. Calling it twice is harmless; the second call is ignored.
pub fn init() {
    init_with_filter(
        EnvFilter::try_from_env(LOG_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    );
}

/// Installs the global subscriber with an explicit filter.
pub fn init_with_filter(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_initialisation_is_harmless() {
        init();
        init();
        tracing::debug!("still alive");
    }
}
