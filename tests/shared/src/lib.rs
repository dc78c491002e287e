//! Shared test utilities for the Kodi JSON-RPC client
//!
//! Provides a scripted stub server that speaks the Kodi raw socket dialect over TCP or
//! in-memory pipes.

pub mod stub_server;

// Re-export the main types for convenience
pub use stub_server::{
    Handler, MemoryConnector, Reply, StubServer, kodi_handler, unreachable_address, wait_until,
};

/// Install a test log subscriber once; honours `RUST_LOG`
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
