use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// Installs the stdout subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stdout().is_terminal())
        .with_target(verbose)
        .with_thread_names(verbose)
        .with_writer(std::io::stdout)
        .try_init()
        .ok();
}
