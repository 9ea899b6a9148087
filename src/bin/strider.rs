//! strider: seed a fixed event log and drain it with N transactional lanes.
//!
//! Runs the whole demo sequence: reset storage, bulk-create the events,
//! create the tracker singleton, fan out the worker lanes, wait for them
//! under one deadline, then compare the projection against the expected
//! total and report any shortfall.
//!
//! ## Configuration
//! - STRIDER_CONFIG: path to a YAML config file (optional)
//! - STRIDER__RUN__TOTAL_EVENTS / STRIDER__RUN__TOTAL_LANES: run shape
//! - STRIDER__FAULTS__RATE: injected failure probability (default 0.5)
//! - STRIDER_LOG: tracing filter (default "info")

use std::sync::Arc;

use tracing::{error, info, warn};

use strider::config::Config;
use strider::coordinator::Coordinator;
use strider::fault::RandomFaults;
use strider::store::{MemoryStore, TransactionalStore};
use strider::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        total_events = config.run.total_events,
        total_lanes = config.run.total_lanes,
        "about to create events and process them from concurrent lanes"
    );

    let store = Arc::new(MemoryStore::new());
    store.reset().await;
    store.seed_events(config.run.total_events).await;
    store.create_tracker().await;

    let faults = Arc::new(RandomFaults::new(config.faults.fault_config()));
    let coordinator = Coordinator::new(
        Arc::clone(&store) as Arc<dyn TransactionalStore>,
        faults,
        config.run.total_lanes,
        config.retry.policy(),
        config.run.wait_timeout(),
    );

    let outcome = coordinator.run().await;
    for (lane, status) in &outcome.lanes {
        info!(lane = *lane, %status, "lane finished");
    }

    // The projection holds one entry per event plus the tracker document.
    let expected = config.run.total_events + 1;
    let actual = store.projection_size().await;
    if actual == expected {
        info!("all events are now part of the projection");
    } else {
        warn!(
            missing = expected.saturating_sub(actual),
            "not all events are part of the projection"
        );
    }

    if let Some(last) = store.tracker_last_processed().await {
        info!(last_processed = last, "tracker final position");
    }

    Ok(())
}
