#![forbid(unsafe_code)]

//! Resolution of process attributes for a freshly observed pid.

use detector::Pid;
use nix::unistd::{Uid, User};
use tracing::trace;

/// Everything the matcher and the notification templates need to know
/// about one process.
#[derive(Debug, Clone)]
pub struct ProcessAttributes {
    pub pid: Pid,
    pub name: String,
    pub cmdline: String,
    pub username: String,
}

/// Read name, command line and owning user from /proc.
///
/// Returns `None` when the process is already gone: exec events routinely
/// outlive short-lived processes, and a vanished pid is not an error.
/// Individual attributes that cannot be read degrade to empty strings so a
/// partially torn-down process can still be matched on what remains.
pub fn resolve(pid: Pid) -> Option<ProcessAttributes> {
    let process = match procfs::process::Process::new(pid) {
        Ok(process) => process,
        Err(err) => {
            trace!(pid, ?err, "process vanished before attribute resolution");
            return None;
        }
    };

    let name = process
        .stat()
        .map(|stat| stat.comm)
        .unwrap_or_default();

    let cmdline = process
        .cmdline()
        .map(|parts| parts.join(" "))
        .unwrap_or_default();

    let username = process
        .uid()
        .ok()
        .and_then(|uid| User::from_uid(Uid::from_raw(uid)).ok().flatten())
        .map(|user| user.name)
        .unwrap_or_default();

    Some(ProcessAttributes {
        pid,
        name,
        cmdline,
        username,
    })
}
