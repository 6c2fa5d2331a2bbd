//! Process-wide logging init (teacher precedent: the `tracing_subscriber`
//! setup in `mcp-agent-mail/src/main.rs`), factored out so the thin
//! `pixeltriage-server` binary and any test harness can share it.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber` formatter honoring `RUST_LOG`,
/// defaulting to `info`. Safe to call once per process; a second call is
/// a no-op (the underlying `try_init` swallows "already set").
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
