use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::fault::{RandomFaults, ScriptedFaults};
use crate::store::MemoryStore;
use crate::utils::retry::RetryConfig;

async fn seeded_store(total_events: u64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed_events(total_events).await;
    store.create_tracker().await;
    store
}

fn lane_with(
    store: &Arc<MemoryStore>,
    lane: u32,
    total_lanes: u32,
    faults: Arc<dyn FaultInjector>,
) -> WorkerLane {
    WorkerLane::new(
        lane,
        total_lanes,
        Arc::clone(store) as Arc<dyn TransactionalStore>,
        faults,
        RetryPolicy::Unbounded,
    )
}

#[tokio::test]
async fn test_single_lane_drains_log() {
    let store = seeded_store(5).await;
    let worker = lane_with(&store, 0, 1, Arc::new(RandomFaults::passthrough()));

    let report = worker.run().await.unwrap();

    assert_eq!(report.consumed, vec![0, 1, 2, 3, 4]);
    // Five consuming attempts plus the exhaustion probe.
    assert_eq!(report.attempts, 6);
    assert_eq!(report.aborted, 0);

    assert_eq!(store.cursor(0).await.unwrap().last_consumed, 4);
    assert_eq!(store.projection_size().await, 6);
    assert_eq!(store.tracker_last_processed().await, Some(4));
}

#[tokio::test]
async fn test_aborted_attempt_leaves_no_trace_and_recomputes_same_next() {
    let store = seeded_store(1).await;

    // First attempt: fault fires after the cursor upsert.
    let mut session = store.begin().await.unwrap();
    let err = consume_one(session.as_mut(), 0, 1, &ScriptedFaults::failures(1))
        .await
        .unwrap_err();
    assert!(matches!(err, StepError::Injected));
    assert!(err.is_transient());
    session.abort().await.unwrap();

    // No partial progress is observable.
    assert!(store.cursor(0).await.is_none());
    assert!(store.entry(0).await.is_none());
    assert_eq!(store.tracker_last_processed().await, None);

    // The retry recomputes the same sequence from the unchanged cursor.
    let mut session = store.begin().await.unwrap();
    let outcome = consume_one(session.as_mut(), 0, 1, &RandomFaults::passthrough())
        .await
        .unwrap();
    assert_eq!(outcome, StepOutcome::Consumed(0));
    session.commit().await.unwrap();

    assert_eq!(store.cursor(0).await.unwrap().last_consumed, 0);
    assert!(store.entry(0).await.is_some());
}

#[tokio::test]
async fn test_retries_until_fault_clears() {
    let store = seeded_store(1).await;
    let worker = lane_with(&store, 0, 1, Arc::new(ScriptedFaults::failures(3)));

    let report = worker.run().await.unwrap();

    // Three aborted attempts, the fourth commits sequence 0, then the
    // exhaustion probe ends the lane.
    assert_eq!(report.aborted, 3);
    assert_eq!(report.consumed, vec![0]);
    assert_eq!(report.attempts, 5);

    assert_eq!(store.entry_sequences().await, vec![0]);
    assert_eq!(store.tracker_last_processed().await, Some(0));
}

#[tokio::test]
async fn test_empty_log_exhausts_immediately() {
    let store = seeded_store(0).await;
    let worker = lane_with(&store, 0, 3, Arc::new(RandomFaults::passthrough()));

    let report = worker.run().await.unwrap();

    assert_eq!(report.attempts, 1);
    assert!(report.consumed.is_empty());
    assert!(store.cursor(0).await.is_none());
    // Only the tracker document remains.
    assert_eq!(store.projection_size().await, 1);
}

#[tokio::test]
async fn test_missing_tracker_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    store.seed_events(1).await;
    // No tracker singleton: the first successful step must fail hard.

    let worker = lane_with(&store, 0, 1, Arc::new(RandomFaults::passthrough()));
    let err = worker.run().await.unwrap_err();

    assert!(matches!(
        err,
        LaneError::Fatal {
            lane: 0,
            source: StorageError::TrackerMissing,
        }
    ));
    // The failing attempt was rolled back with everything else.
    assert!(store.cursor(0).await.is_none());
    assert!(store.entry(0).await.is_none());
}

#[tokio::test]
async fn test_capped_policy_gives_up() {
    let store = seeded_store(1).await;
    let worker = WorkerLane::new(
        0,
        1,
        Arc::clone(&store) as Arc<dyn TransactionalStore>,
        Arc::new(ScriptedFaults::new(vec![true; 16])),
        RetryPolicy::Capped(RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_retries: 3,
            jitter: 0.0,
        }),
    );

    let err = worker.run().await.unwrap_err();
    assert!(matches!(
        err,
        LaneError::RetriesExhausted { lane: 0, attempts: 3 }
    ));
    assert!(store.entry(0).await.is_none());
}

#[tokio::test]
async fn test_lanes_partition_disjointly() {
    let store = seeded_store(6).await;

    let report0 = lane_with(&store, 0, 2, Arc::new(RandomFaults::passthrough()))
        .run()
        .await
        .unwrap();
    let report1 = lane_with(&store, 1, 2, Arc::new(RandomFaults::passthrough()))
        .run()
        .await
        .unwrap();

    assert_eq!(report0.consumed, vec![0, 2, 4]);
    assert_eq!(report1.consumed, vec![1, 3, 5]);
    assert_eq!(store.entry_sequences().await, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_step_error_transience() {
    assert!(StepError::Injected.is_transient());
    assert!(StepError::Storage(StorageError::Conflict {
        row: crate::store::RowKey::Tracker
    })
    .is_transient());
    assert!(!StepError::Storage(StorageError::TrackerMissing).is_transient());
    assert!(!StepError::Storage(StorageError::DuplicateEntry { sequence: 7 }).is_transient());
}
