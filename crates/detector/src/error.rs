#![forbid(unsafe_code)]

use std::io;

/// Failure to establish the kernel event subscription.
///
/// Raised only at session start and always recoverable: the caller is
/// expected to fall back to snapshot polling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The connector socket needs CAP_NET_ADMIN and we don't have it.
    #[error("process event socket requires elevated privileges: {0}")]
    PermissionDenied(#[source] io::Error),

    /// Anything else that prevented the subscription (kernel without
    /// CONFIG_PROC_EVENTS, resource exhaustion, ...).
    #[error("process event socket unavailable: {0}")]
    Unavailable(#[source] io::Error),
}

/// Session-fatal detection failures.
///
/// Everything recoverable (stream termination, kernel overflow, malformed
/// frames, queue overflow) is absorbed inside the engine; only the
/// exhaustion of the last detection strategy surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The snapshot poller could not enumerate processes.
    #[error("process enumeration failed: {0}")]
    Enumeration(#[from] procfs::ProcError),
}
