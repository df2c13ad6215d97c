//! Ctrl-C and SIGTERM handling.

use grpc::ShutdownHandle;
use std::sync::atomic::{AtomicBool, Ordering};

/// Drain the server on the first signal; exit on the second.
pub fn install(handle: ShutdownHandle) -> Result<(), ctrlc::Error> {
    let signalled = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if signalled.swap(true, Ordering::SeqCst) {
            tracing::warn!("received second signal, exiting immediately");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, draining connections");
        handle.shutdown();
    })
}
