//! Minimal process entry point (SPEC_FULL §1: "a minimal wiring binary").
//! No CLI flag parsing, no HTTP/RPC surface — both are explicit
//! Non-goals. Config comes from environment variables only
//! (`pixeltriage_core::Config::from_env`).

#![forbid(unsafe_code)]

use std::time::Duration;

fn main() {
    pixeltriage_core::logging::init_logging();

    let config = pixeltriage_core::Config::from_env();
    let app = match pixeltriage_server::App::bootstrap_with_empty_tile(config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "failed to bootstrap pixeltriage-server");
            std::process::exit(1);
        }
    };

    tracing::info!("pixeltriage-server running (no TraceStore configured, starting on an empty tile)");

    let cx = pixeltriage_core::Cx::new();
    loop {
        std::thread::sleep(Duration::from_secs(30));
        app.warm_once(&cx);
        let readiness = app.readiness();
        tracing::debug!(?readiness, "readiness snapshot");
    }
}
