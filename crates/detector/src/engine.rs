#![forbid(unsafe_code)]

//! Detection engine: one unified pid stream over two detection modes.
//!
//! The engine starts in event-source mode when the connector subscription
//! succeeded and drops to snapshot polling when it did not, or when the
//! event stream later dies. The transition is one-directional and happens
//! at most once per session: the usual cause is a missing capability,
//! which will not appear mid-run, so re-probing would buy nothing.

use crate::Pid;
use crate::dedup::RecentPids;
use crate::error::{ConnectError, Error};
use crate::listener::ExecEventListener;
use crate::poller::{ProcessEnumerator, SnapshotPoller};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Engine tunables. Protocol constants live in [`crate::codec`]; these are
/// behavior knobs with conservative defaults.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Snapshot cadence in polling mode. Two seconds trades detection
    /// latency against the cost of a full /proc enumeration.
    pub poll_interval: Duration,
    /// Bound of the pid queue towards the consumer.
    pub queue_capacity: usize,
    /// How long a delivered pid suppresses duplicates of itself.
    pub suppression_window: Duration,
    /// Hard bound on the suppression set.
    pub suppression_capacity: usize,
    /// Consecutive enumeration failures tolerated before the session is
    /// declared dead. There is no fallback behind the poller.
    pub max_enumeration_failures: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            queue_capacity: 64,
            suppression_window: Duration::from_secs(5),
            suppression_capacity: 1024,
            max_enumeration_failures: 3,
        }
    }
}

/// Which detection strategy is currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    EventSource,
    Polling,
}

/// Deliveries dropped because the consumer queue was full.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub consumer_drops: AtomicU64,
}

/// Orchestrates the listener and the poller behind a single consumer-facing
/// pid stream.
pub struct DetectionEngine<E> {
    config: DetectionConfig,
    listener: Option<ExecEventListener>,
    poller: SnapshotPoller<E>,
    recent: RecentPids,
    tx: mpsc::Sender<Pid>,
    stats: Arc<EngineStats>,
}

impl<E: ProcessEnumerator> DetectionEngine<E> {
    /// Build the engine around a connector attempt and a fallback
    /// enumerator, and hand back the consumer side of the pid stream.
    ///
    /// A connect error is logged and absorbed here: the engine simply
    /// starts in polling mode. It is never surfaced to the caller.
    pub fn start(
        listener: Result<ExecEventListener, ConnectError>,
        enumerator: E,
        config: DetectionConfig,
    ) -> (Self, mpsc::Receiver<Pid>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        let listener = match listener {
            Ok(listener) => {
                info!("process event socket subscribed, using exec events");
                Some(listener)
            }
            Err(err) => {
                warn!(
                    %err,
                    poll_interval = ?config.poll_interval,
                    "exec event source unavailable, falling back to polling"
                );
                None
            }
        };

        let recent = RecentPids::new(config.suppression_window, config.suppression_capacity);
        let engine = Self {
            config,
            listener,
            poller: SnapshotPoller::new(enumerator),
            recent,
            tx,
            stats: Arc::new(EngineStats::default()),
        };
        (engine, rx)
    }

    pub fn mode(&self) -> DetectionMode {
        if self.listener.is_some() {
            DetectionMode::EventSource
        } else {
            DetectionMode::Polling
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Run detection until cancellation or a session-fatal error.
    ///
    /// Owns whichever resource is live; cancellation releases it within one
    /// read/tick cycle. Returns `Ok(())` on cancellation and `Err` only
    /// when the poller itself has failed persistently.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), Error> {
        if let Some(mut listener) = self.listener.take() {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("detection cancelled in event-source mode");
                        return Ok(());
                    }
                    pid = listener.recv() => match pid {
                        Some(pid) => self.deliver(pid),
                        None => break,
                    }
                }
            }
            // Tear the listener down (socket closed, thread joined) before
            // the poller starts: the two modes must never run concurrently.
            drop(listener);
            warn!(
                poll_interval = ?self.config.poll_interval,
                "exec event stream ended, switching to polling"
            );
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("detection cancelled in polling mode");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.poller.tick() {
                        Ok(appeared) => {
                            consecutive_failures = 0;
                            for pid in appeared {
                                self.deliver(pid);
                            }
                        }
                        Err(err) => {
                            consecutive_failures += 1;
                            if consecutive_failures >= self.config.max_enumeration_failures {
                                return Err(err);
                            }
                            warn!(%err, consecutive_failures, "poll tick failed, retrying");
                        }
                    }
                }
            }
        }
    }

    /// Push one pid through the suppression window onto the consumer
    /// queue. Never blocks: a full queue drops the event and counts it.
    fn deliver(&mut self, pid: Pid) {
        if !self.recent.insert(pid, Instant::now()) {
            debug!(pid, "suppressed duplicate delivery");
            return;
        }
        match self.tx.try_send(pid) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(pid)) => {
                self.stats.consumer_drops.fetch_add(1, Ordering::Relaxed);
                warn!(pid, "consumer queue full, dropping pid");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Consumer went away; nothing left to deliver to, but the
                // session itself is torn down by cancellation, not here.
                debug!(pid, "consumer queue closed");
            }
        }
    }
}
