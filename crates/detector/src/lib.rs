// deny rather than forbid: transport.rs allows unsafe for its libc calls.
#![deny(unsafe_code)]

//! Near-real-time detection of process creation.
//!
//! Two strategies behind one stream: a netlink proc-connector subscription
//! for kernel exec events, and snapshot diffing over /proc as the fallback
//! when the connector is unavailable (usually: no CAP_NET_ADMIN) or dies
//! mid-run. Consumers receive a deduplicated, ordered sequence of pids and
//! never touch the underlying socket or ticker.

pub mod codec;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod listener;
pub mod poller;
pub mod transport;

/// A live process identifier. Positive, reused by the kernel after exit;
/// uniqueness only holds within the suppression window.
pub type Pid = i32;

pub use engine::{DetectionConfig, DetectionEngine, DetectionMode, EngineStats};
pub use error::{ConnectError, Error};
pub use listener::{ExecEventListener, ListenerStats};
pub use poller::{ProcessEnumerator, ProcfsEnumerator, SnapshotPoller};
pub use transport::{EventTransport, ProcConnectorSocket};
