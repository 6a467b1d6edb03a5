use jsockd::commands;
use jsockd::config::Config;
use jsockd::runtime::{Server, ShutdownHandle};
use std::sync::OnceLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

static SHUTDOWN: OnceLock<ShutdownHandle> = OnceLock::new();

extern "C" fn on_signal(_signal: libc::c_int) {
    if let Some(handle) = SHUTDOWN.get() {
        handle.shutdown();
    }
}

fn install_signal_handlers() {
    let handler: extern "C" fn(libc::c_int) = on_signal;
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        socket = %config.socket.display(),
        max_connections = config.max_connections,
        max_request = config.max_request,
        "Starting jsockd server"
    );

    let server = Server::bind(&config, commands::default_registry())?;
    let _ = SHUTDOWN.set(server.shutdown_handle());
    install_signal_handlers();

    server.run()?;
    info!("Shutdown complete");
    Ok(())
}
