#![forbid(unsafe_code)]

//! Snapshot-diff fallback: detect new processes by comparing successive
//! full enumerations of live pids.

use crate::Pid;
use crate::error::Error;
use rustc_hash::FxHashSet;
use tracing::{trace, warn};

/// Source of "which pids are alive right now".
pub trait ProcessEnumerator: Send {
    fn pids(&mut self) -> Result<FxHashSet<Pid>, Error>;
}

/// Enumerates pids from /proc.
#[derive(Debug, Default)]
pub struct ProcfsEnumerator;

impl ProcessEnumerator for ProcfsEnumerator {
    fn pids(&mut self) -> Result<FxHashSet<Pid>, Error> {
        let mut pids = FxHashSet::default();
        for process in procfs::process::all_processes()? {
            match process {
                Ok(process) => {
                    pids.insert(process.pid);
                }
                // Individual entries vanish between readdir and open all
                // the time; that is not an enumeration failure.
                Err(err) => warn!(?err, "failed to read process entry"),
            }
        }
        Ok(pids)
    }
}

/// Periodic snapshot differ. The caller drives the cadence; each call to
/// [`SnapshotPoller::tick`] captures one snapshot.
pub struct SnapshotPoller<E> {
    enumerator: E,
    previous: Option<FxHashSet<Pid>>,
}

impl<E: ProcessEnumerator> SnapshotPoller<E> {
    pub fn new(enumerator: E) -> Self {
        Self {
            enumerator,
            previous: None,
        }
    }

    /// Capture a snapshot and return the pids that appeared since the last
    /// one.
    ///
    /// The first call seeds the baseline and reports nothing: processes
    /// already running when observation starts are not "new". Departures
    /// are never reported.
    pub fn tick(&mut self) -> Result<Vec<Pid>, Error> {
        let current = self.enumerator.pids()?;

        let appeared = match &self.previous {
            None => Vec::new(),
            Some(previous) => current
                .iter()
                .filter(|pid| !previous.contains(pid))
                .copied()
                .collect(),
        };

        trace!(
            snapshot_size = current.len(),
            appeared = appeared.len(),
            "poll tick"
        );
        self.previous = Some(current);
        Ok(appeared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SequenceEnumerator {
        snapshots: Vec<FxHashSet<Pid>>,
        at: usize,
    }

    impl SequenceEnumerator {
        fn new(snapshots: Vec<&[Pid]>) -> Self {
            Self {
                snapshots: snapshots
                    .into_iter()
                    .map(|pids| pids.iter().copied().collect())
                    .collect(),
                at: 0,
            }
        }
    }

    impl ProcessEnumerator for SequenceEnumerator {
        fn pids(&mut self) -> Result<FxHashSet<Pid>, Error> {
            let snapshot = self.snapshots[self.at.min(self.snapshots.len() - 1)].clone();
            self.at += 1;
            Ok(snapshot)
        }
    }

    #[test]
    fn baseline_is_silent_and_departures_are_ignored() {
        // S0 baseline, S1 adds {7, 9}, S2 removes 7.
        let enumerator = SequenceEnumerator::new(vec![
            &[1, 2, 3],
            &[1, 2, 3, 7, 9],
            &[1, 2, 3, 9],
        ]);
        let mut poller = SnapshotPoller::new(enumerator);

        assert!(poller.tick().unwrap().is_empty());

        let mut appeared = poller.tick().unwrap();
        appeared.sort_unstable();
        assert_eq!(appeared, vec![7, 9]);

        assert!(poller.tick().unwrap().is_empty());
    }

    #[test]
    fn reused_pid_is_new_again_after_disappearing() {
        let enumerator = SequenceEnumerator::new(vec![&[5], &[], &[5]]);
        let mut poller = SnapshotPoller::new(enumerator);

        assert!(poller.tick().unwrap().is_empty());
        assert!(poller.tick().unwrap().is_empty());
        assert_eq!(poller.tick().unwrap(), vec![5]);
    }

    struct FailingEnumerator;

    impl ProcessEnumerator for FailingEnumerator {
        fn pids(&mut self) -> Result<FxHashSet<Pid>, Error> {
            Err(Error::Enumeration(procfs::ProcError::Other(
                "boom".to_string(),
            )))
        }
    }

    #[test]
    fn enumeration_failure_propagates() {
        let mut poller = SnapshotPoller::new(FailingEnumerator);
        assert!(poller.tick().is_err());
    }
}
