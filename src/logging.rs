//! Stderr-only logging setup. stdout is reserved for JSON-RPC framing, so
//! nothing here may ever write there.

use std::env;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `verbose` comes from the CLI
/// flag; `mcp_mode` indicates stdin is not a tty (a real client is
/// talking JSON-RPC to us), in which case `MCP_LOG_LEVEL` is honored the
/// same way the original CLI entrypoint honored it.
pub fn init(verbose: bool, mcp_mode: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    let filter = if mcp_mode {
        env::var("MCP_LOG_LEVEL")
            .ok()
            .and_then(|level| EnvFilter::try_new(level).ok())
            .unwrap_or_else(|| EnvFilter::new(default_level))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
