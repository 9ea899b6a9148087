//! Worker lane: the transactional consumption loop.
//!
//! One lane drains its stride of the event log, one event per transaction.
//! Each attempt opens a fresh session, runs the consumption step, and
//! commits; any transient failure (an injected fault or a write conflict,
//! including one raised by commit itself) aborts the attempt and the step
//! is retried from scratch. Because the cursor read, the cursor upsert,
//! and the projection/tracker writes share one transaction, an aborted
//! attempt leaves zero trace and the retry recomputes the same sequence:
//! idempotence by all-or-nothing visibility, with no de-duplication logic.

mod partition;

pub use partition::{next_sequence, owning_lane};

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::fault::FaultInjector;
use crate::store::{
    Cursor, ProjectionEntry, StorageError, StoreSession, TransactionalStore,
};
use crate::utils::retry::RetryPolicy;

/// Outcome of one consumption step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A projection entry was written for this sequence.
    Consumed(u64),
    /// No event exists at the computed sequence; the stride is drained.
    /// This is a terminal success, not an error.
    Exhausted,
}

/// Failure of one step attempt, before commit.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("injected fault")]
    Injected,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StepError {
    /// Transient failures are retried by the lane loop; anything else
    /// terminates the lane.
    pub fn is_transient(&self) -> bool {
        match self {
            StepError::Injected => true,
            StepError::Storage(err) => err.is_conflict(),
        }
    }
}

/// Errors that terminate a lane without reaching exhaustion.
#[derive(Debug, thiserror::Error)]
pub enum LaneError {
    #[error("lane {lane} failed: {source}")]
    Fatal {
        lane: u32,
        #[source]
        source: StorageError,
    },

    #[error("lane {lane} gave up after {attempts} attempts on one step")]
    RetriesExhausted { lane: u32, attempts: u32 },
}

/// Summary of a lane's completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneReport {
    pub lane: u32,
    /// Sequence numbers consumed, in commit order.
    pub consumed: Vec<u64>,
    /// Transaction attempts, successful and aborted.
    pub attempts: u64,
    /// Attempts that were aborted and retried.
    pub aborted: u64,
}

/// One worker lane.
///
/// Holds its identity, the stores (via the transactional seam), the fault
/// injector, and the retry policy, all passed in explicitly; lanes share
/// no other state.
pub struct WorkerLane {
    lane: u32,
    total_lanes: u32,
    store: Arc<dyn TransactionalStore>,
    faults: Arc<dyn FaultInjector>,
    retry: RetryPolicy,
}

impl WorkerLane {
    pub fn new(
        lane: u32,
        total_lanes: u32,
        store: Arc<dyn TransactionalStore>,
        faults: Arc<dyn FaultInjector>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            lane,
            total_lanes,
            store,
            faults,
            retry,
        }
    }

    /// Drain this lane's stride. Returns when the stride is exhausted or a
    /// fatal failure ends the lane early.
    pub async fn run(self) -> Result<LaneReport, LaneError> {
        let mut report = LaneReport {
            lane: self.lane,
            ..Default::default()
        };
        // Attempts at the current step; resets on every successful commit.
        let mut step_attempts: u32 = 0;

        loop {
            let mut session = self.store.begin().await.map_err(|source| LaneError::Fatal {
                lane: self.lane,
                source,
            })?;
            report.attempts += 1;
            step_attempts += 1;

            match consume_one(
                session.as_mut(),
                self.lane,
                self.total_lanes,
                self.faults.as_ref(),
            )
            .await
            {
                Ok(StepOutcome::Exhausted) => {
                    // Empty write set; the commit cannot conflict.
                    session.commit().await.map_err(|source| LaneError::Fatal {
                        lane: self.lane,
                        source,
                    })?;
                    info!(
                        lane = self.lane,
                        consumed = report.consumed.len(),
                        attempts = report.attempts,
                        "stride exhausted"
                    );
                    return Ok(report);
                }
                Ok(StepOutcome::Consumed(sequence)) => match session.commit().await {
                    Ok(()) => {
                        info!(lane = self.lane, sequence, "successfully processed event");
                        report.consumed.push(sequence);
                        step_attempts = 0;
                    }
                    Err(err) if err.is_conflict() => {
                        warn!(lane = self.lane, error = %err, "commit conflict, retrying step");
                        report.aborted += 1;
                        self.pause(step_attempts).await?;
                    }
                    Err(source) => {
                        return Err(LaneError::Fatal {
                            lane: self.lane,
                            source,
                        })
                    }
                },
                Err(err) => {
                    if let Err(source) = session.abort().await {
                        return Err(LaneError::Fatal {
                            lane: self.lane,
                            source,
                        });
                    }
                    match err {
                        StepError::Storage(source) if !source.is_conflict() => {
                            return Err(LaneError::Fatal {
                                lane: self.lane,
                                source,
                            })
                        }
                        transient => {
                            warn!(lane = self.lane, error = %transient, "step aborted, retrying");
                            report.aborted += 1;
                            self.pause(step_attempts).await?;
                        }
                    }
                }
            }
        }
    }

    /// Apply the retry policy after an aborted attempt. `attempt` is the
    /// 1-based count of tries at the current step.
    async fn pause(&self, attempt: u32) -> Result<(), LaneError> {
        if !self.retry.should_retry(attempt) {
            return Err(LaneError::RetriesExhausted {
                lane: self.lane,
                attempts: attempt,
            });
        }
        if let Some(delay) = self.retry.delay_for_attempt(attempt.saturating_sub(1)) {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// One consumption step inside an open transaction.
///
/// Order matters: the cursor is advanced *before* the fault check so that
/// an injected failure exercises the rollback of real progress, and the
/// projection/tracker writes come last.
async fn consume_one(
    session: &mut dyn StoreSession,
    lane: u32,
    total_lanes: u32,
    faults: &dyn FaultInjector,
) -> Result<StepOutcome, StepError> {
    let cursor = session.find_cursor(lane).await?;
    let next = next_sequence(lane, total_lanes, cursor.map(|c| c.last_consumed));

    let Some(event) = session.find_event(next).await? else {
        info!(lane, sequence = next, "no event found at sequence");
        return Ok(StepOutcome::Exhausted);
    };
    debug!(lane, sequence = next, "retrieved event");

    match cursor {
        None => {
            session
                .insert_cursor(Cursor {
                    lane,
                    last_consumed: next,
                })
                .await?
        }
        Some(_) => session.update_cursor(lane, next).await?,
    }

    if faults.should_fail() {
        return Err(StepError::Injected);
    }

    session
        .insert_entry(ProjectionEntry::from_event(event, Utc::now()))
        .await?;
    session.set_tracker(next).await?;

    Ok(StepOutcome::Consumed(next))
}

#[cfg(test)]
mod tests;
