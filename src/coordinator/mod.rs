//! Fans out worker lanes and waits for the run to finish.
//!
//! The coordinator owns no algorithmic state: it spawns one lane task per
//! lane id, waits under a single overall deadline, and collects what each
//! lane reports. Lanes that miss the deadline are left to run to natural
//! completion; they are reported as still running, never cancelled.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::fault::FaultInjector;
use crate::lane::{LaneReport, WorkerLane};
use crate::store::TransactionalStore;
use crate::utils::retry::RetryPolicy;

/// Terminal status of one lane at the end of the wait window.
///
/// The three cases are deliberately distinct: a crashed lane must never be
/// mistaken for a drained one, and a lane that simply ran out of time is
/// neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneStatus {
    /// The lane drained its stride.
    Exhausted(LaneReport),
    /// The lane terminated abnormally.
    Failed(String),
    /// The lane had not finished when the deadline elapsed.
    StillRunning,
}

impl fmt::Display for LaneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneStatus::Exhausted(report) => write!(
                f,
                "exhausted after {} events ({} attempts, {} aborted)",
                report.consumed.len(),
                report.attempts,
                report.aborted
            ),
            LaneStatus::Failed(reason) => write!(f, "failed: {reason}"),
            LaneStatus::StillRunning => write!(f, "still running at deadline"),
        }
    }
}

/// What a full run produced, lane by lane.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub lanes: BTreeMap<u32, LaneStatus>,
    /// Whether every lane finished (exhausted or failed) within the wait
    /// window.
    pub finished_in_time: bool,
}

impl RunOutcome {
    pub fn all_exhausted(&self) -> bool {
        self.lanes
            .values()
            .all(|status| matches!(status, LaneStatus::Exhausted(_)))
    }

    /// All consumed sequences across lanes, ascending.
    pub fn consumed_sequences(&self) -> Vec<u64> {
        let mut sequences: Vec<u64> = self
            .lanes
            .values()
            .filter_map(|status| match status {
                LaneStatus::Exhausted(report) => Some(report.consumed.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect();
        sequences.sort_unstable();
        sequences
    }
}

/// Spawns the lanes and waits for them.
pub struct Coordinator {
    store: Arc<dyn TransactionalStore>,
    faults: Arc<dyn FaultInjector>,
    retry: RetryPolicy,
    total_lanes: u32,
    deadline: Duration,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        faults: Arc<dyn FaultInjector>,
        total_lanes: u32,
        retry: RetryPolicy,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            faults,
            retry,
            total_lanes,
            deadline,
        }
    }

    /// Run every lane to completion or until the deadline elapses.
    pub async fn run(&self) -> RunOutcome {
        let statuses: Arc<Mutex<BTreeMap<u32, LaneStatus>>> =
            Arc::new(Mutex::new(BTreeMap::new()));

        let mut handles = Vec::with_capacity(self.total_lanes as usize);
        for lane in 0..self.total_lanes {
            let worker = WorkerLane::new(
                lane,
                self.total_lanes,
                Arc::clone(&self.store),
                Arc::clone(&self.faults),
                self.retry.clone(),
            );
            let statuses = Arc::clone(&statuses);
            handles.push((
                lane,
                tokio::spawn(async move {
                    let status = match worker.run().await {
                        Ok(report) => LaneStatus::Exhausted(report),
                        Err(err) => {
                            error!(lane, error = %err, "lane terminated abnormally");
                            LaneStatus::Failed(err.to_string())
                        }
                    };
                    statuses.lock().await.insert(lane, status);
                }),
            ));
        }

        let joiners = handles.into_iter().map(|(lane, handle)| {
            let statuses = Arc::clone(&statuses);
            async move {
                if let Err(err) = handle.await {
                    statuses
                        .lock()
                        .await
                        .insert(lane, LaneStatus::Failed(format!("lane task died: {err}")));
                }
            }
        });

        let finished_in_time = tokio::time::timeout(self.deadline, join_all(joiners))
            .await
            .is_ok();
        if finished_in_time {
            info!("all lanes finished within the wait window");
        } else {
            // Timing out drops the join handles; the lane tasks themselves
            // keep running detached until they finish on their own.
            warn!(
                deadline = ?self.deadline,
                "lanes did not finish within the wait window"
            );
        }

        let mut lanes = statuses.lock().await.clone();
        for lane in 0..self.total_lanes {
            lanes.entry(lane).or_insert(LaneStatus::StillRunning);
        }
        RunOutcome {
            lanes,
            finished_in_time,
        }
    }
}
