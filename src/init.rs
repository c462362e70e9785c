use crate::platform::{OsPlatform, Platform};
use std::sync::Once;

static INIT: Once = Once::new();

/// Prepare the process for threads started by this crate.
///
/// Blocks `SIGPIPE` on the calling thread so that writes to closed pipes and
/// sockets report `EPIPE` instead of terminating the process. Threads started
/// later inherit the mask. Call it from the main thread before starting any
/// thread; calling it again has no effect.
pub fn initialize() {
    INIT.call_once(|| {
        OsPlatform::block_broken_pipe();
        tracing::trace!("thread runtime initialized");
    });
}
