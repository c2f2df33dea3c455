#![forbid(unsafe_code)]

//! Exec event listener: subscribe handshake plus the blocking receive loop.

use crate::Pid;
use crate::codec::{self, PROC_CN_MCAST_LISTEN};
use crate::error::ConnectError;
use crate::transport::EventTransport;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// The kernel's cn_proc messages are well under a page; one datagram fits
/// comfortably in 4 KiB.
const RECV_BUFFER_SIZE: usize = 4096;

/// How long the reader sleeps when the socket has nothing ready. Bounds the
/// latency of both event pickup and stop-flag observation.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

/// Counters for conditions that are tolerated but must stay observable.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Times the kernel reported ENOBUFS (events dropped upstream).
    pub kernel_overflows: AtomicU64,
    /// Events dropped because the consumer-side queue was full.
    pub queue_drops: AtomicU64,
}

/// A live subscription to kernel exec events.
///
/// Owns the reader thread and the transport; dropping the listener stops
/// the thread and closes the socket. The pid stream ends (recv returns
/// `None`) when the kernel side fails terminally, which is the caller's
/// signal to switch to polling.
pub struct ExecEventListener {
    rx: mpsc::Receiver<Pid>,
    stop: Arc<AtomicBool>,
    stats: Arc<ListenerStats>,
    handle: Option<JoinHandle<()>>,
}

impl ExecEventListener {
    /// Subscribe to exec events and start the reader thread.
    ///
    /// `capacity` bounds the queue between the reader and the consumer;
    /// when it fills, new events are dropped (never blocking the reader).
    /// A failed subscription is classified the same way as a failed socket
    /// open so the caller can decide on fallback.
    pub fn open<T>(mut transport: T, capacity: usize) -> Result<Self, ConnectError>
    where
        T: EventTransport + 'static,
    {
        let frame = codec::encode_subscribe(PROC_CN_MCAST_LISTEN, std::process::id());
        transport.send(&frame).map_err(|err| match err.kind() {
            io::ErrorKind::PermissionDenied => ConnectError::PermissionDenied(err),
            _ => ConnectError::Unavailable(err),
        })?;

        let (tx, rx) = mpsc::channel(capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ListenerStats::default());

        let handle = {
            let stop = Arc::clone(&stop);
            let stats = Arc::clone(&stats);
            std::thread::Builder::new()
                .name("proc-connector".into())
                .spawn(move || reader_loop(transport, tx, stop, stats))
                .map_err(ConnectError::Unavailable)?
        };

        Ok(Self {
            rx,
            stop,
            stats,
            handle: Some(handle),
        })
    }

    /// Receive the next exec'd pid; `None` means the stream has terminated.
    pub async fn recv(&mut self) -> Option<Pid> {
        self.rx.recv().await
    }

    /// Overflow/drop counters, shared with the reader thread.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for ExecEventListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn reader_loop<T: EventTransport>(
    mut transport: T,
    tx: mpsc::Sender<Pid>,
    stop: Arc<AtomicBool>,
    stats: Arc<ListenerStats>,
) {
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let n = match transport.recv(&mut buf) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(IDLE_BACKOFF);
                continue;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.raw_os_error() == Some(libc::ENOBUFS) => {
                // The kernel dropped events because we read too slowly.
                // Best-effort delivery: count it and keep going.
                stats.kernel_overflows.fetch_add(1, Ordering::Relaxed);
                warn!("kernel dropped proc events (ENOBUFS), continuing");
                continue;
            }
            Err(err) => {
                warn!(%err, "proc connector read failed, ending event stream");
                break;
            }
        };

        for payload in codec::split_messages(&buf[..n]) {
            // Non-exec and malformed sub-messages are expected traffic on
            // this group, not errors.
            let Some(pid) = codec::decode_exec_event(payload) else {
                continue;
            };
            match tx.try_send(pid) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(pid)) => {
                    stats.queue_drops.fetch_add(1, Ordering::Relaxed);
                    warn!(pid, "pid queue full, dropping exec event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }

    trace!("proc connector reader exited");
    // Dropping tx here closes the stream; the transport (and its socket)
    // is dropped with it.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    use crate::codec::{
        CN_IDX_PROC, CN_MSG_HEADER_SIZE, CN_VAL_PROC, NLMSG_HEADER_SIZE, PROC_EVENT_EXEC,
        PROC_EVENT_MIN_SIZE,
    };

    /// What the scripted transport should do on one recv call.
    enum Step {
        Deliver(Vec<u8>),
        Fail(io::Error),
        /// Report WouldBlock forever once the script runs out.
        Idle,
    }

    struct ScriptedTransport {
        steps: Arc<Mutex<VecDeque<Step>>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    steps: Arc::new(Mutex::new(steps.into())),
                    sent: Arc::clone(&sent),
                },
                sent,
            )
        }
    }

    impl EventTransport for ScriptedTransport {
        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Deliver(datagram)) => {
                    buf[..datagram.len()].copy_from_slice(&datagram);
                    Ok(datagram.len())
                }
                Some(Step::Fail(err)) => Err(err),
                Some(Step::Idle) | None => {
                    Err(io::Error::from(io::ErrorKind::WouldBlock))
                }
            }
        }
    }

    fn exec_datagram(pid: u32) -> Vec<u8> {
        let total = NLMSG_HEADER_SIZE + CN_MSG_HEADER_SIZE + PROC_EVENT_MIN_SIZE;
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u32).to_ne_bytes());
        buf.extend_from_slice(&3u16.to_ne_bytes()); // NLMSG_DONE
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&CN_IDX_PROC.to_ne_bytes());
        buf.extend_from_slice(&CN_VAL_PROC.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&(PROC_EVENT_MIN_SIZE as u16).to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&PROC_EVENT_EXEC.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes()); // cpu
        buf.extend_from_slice(&0u64.to_ne_bytes()); // timestamp
        buf.extend_from_slice(&pid.to_ne_bytes());
        buf.extend_from_slice(&pid.to_ne_bytes());
        buf
    }

    #[tokio::test]
    async fn sends_subscription_then_delivers_pids_in_order() {
        let (transport, sent) = ScriptedTransport::new(vec![
            Step::Deliver(exec_datagram(11)),
            Step::Deliver(exec_datagram(22)),
            Step::Fail(io::Error::from(io::ErrorKind::ConnectionReset)),
        ]);
        let mut listener = ExecEventListener::open(transport, 16).unwrap();

        assert_eq!(listener.recv().await, Some(11));
        assert_eq!(listener.recv().await, Some(22));
        assert_eq!(listener.recv().await, None);

        let frames = sent.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), codec::SUBSCRIBE_FRAME_SIZE);
    }

    #[tokio::test]
    async fn kernel_overflow_is_counted_and_survived() {
        let (transport, _) = ScriptedTransport::new(vec![
            Step::Fail(io::Error::from_raw_os_error(libc::ENOBUFS)),
            Step::Deliver(exec_datagram(33)),
            Step::Fail(io::Error::from(io::ErrorKind::ConnectionReset)),
        ]);
        let mut listener = ExecEventListener::open(transport, 16).unwrap();
        let stats = listener.stats();

        assert_eq!(listener.recv().await, Some(33));
        assert_eq!(listener.recv().await, None);
        assert_eq!(stats.kernel_overflows.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn interrupted_reads_are_retried() {
        let (transport, _) = ScriptedTransport::new(vec![
            Step::Fail(io::Error::from(io::ErrorKind::Interrupted)),
            Step::Deliver(exec_datagram(44)),
            Step::Fail(io::Error::from(io::ErrorKind::ConnectionReset)),
        ]);
        let mut listener = ExecEventListener::open(transport, 16).unwrap();
        assert_eq!(listener.recv().await, Some(44));
        assert_eq!(listener.recv().await, None);
    }

    #[tokio::test]
    async fn malformed_datagrams_are_dropped_silently() {
        let mut bad = exec_datagram(55);
        bad.truncate(NLMSG_HEADER_SIZE + 10);
        // Patch the claimed length so the split accepts the short payload.
        let claimed = bad.len() as u32;
        bad[0..4].copy_from_slice(&claimed.to_ne_bytes());

        let (transport, _) = ScriptedTransport::new(vec![
            Step::Deliver(bad),
            Step::Deliver(exec_datagram(66)),
            Step::Fail(io::Error::from(io::ErrorKind::ConnectionReset)),
        ]);
        let mut listener = ExecEventListener::open(transport, 16).unwrap();
        assert_eq!(listener.recv().await, Some(66));
        assert_eq!(listener.recv().await, None);
    }

    #[tokio::test]
    async fn full_queue_drops_newest_and_counts() {
        // Capacity 1, two pids delivered before the consumer reads.
        let mut datagram = exec_datagram(1);
        datagram.extend_from_slice(&exec_datagram(2));
        let (transport, _) = ScriptedTransport::new(vec![
            Step::Deliver(datagram),
            Step::Fail(io::Error::from(io::ErrorKind::ConnectionReset)),
        ]);
        let mut listener = ExecEventListener::open(transport, 1).unwrap();
        let stats = listener.stats();

        let mut received = Vec::new();
        while let Some(pid) = listener.recv().await {
            received.push(pid);
        }

        // Whatever the interleaving, nothing is lost silently: every event
        // was either delivered or counted as dropped, and order held.
        assert_eq!(received[0], 1);
        let drops = stats.queue_drops.load(Ordering::Relaxed) as usize;
        assert_eq!(received.len() + drops, 2);
    }

    #[tokio::test]
    async fn drop_stops_the_reader_promptly() {
        let (transport, _) = ScriptedTransport::new(vec![Step::Idle]);
        let listener = ExecEventListener::open(transport, 16).unwrap();

        let start = Instant::now();
        drop(listener);
        // One idle backoff plus scheduling slack.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn failed_subscription_is_classified() {
        struct DeniedTransport;
        impl EventTransport for DeniedTransport {
            fn send(&mut self, _: &[u8]) -> io::Result<()> {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            }
            fn recv(&mut self, _: &mut [u8]) -> io::Result<usize> {
                unreachable!("open must fail before any recv")
            }
        }

        match ExecEventListener::open(DeniedTransport, 16) {
            Err(ConnectError::PermissionDenied(_)) => {}
            Err(other) => panic!("expected PermissionDenied, got {other}"),
            Ok(_) => panic!("expected PermissionDenied, got a live listener"),
        }
    }
}
