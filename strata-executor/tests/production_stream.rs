//! Production-mode requests: outputs are cached per segment by Tier-2 jobs
//! and replayed, the live pipeline only runs past the final head.

mod common;

use common::*;
use std::sync::Arc;
use strata_core::storage::{LocalStore, ObjectStore};
use strata_executor::service::BlocksRequest;
use strata_executor::testing::{counter_package, MemoryBlockSource, StreamRunner};

#[tokio::test]
async fn final_range_is_served_from_cached_outputs() {
    let runner = runner_with_head(99);
    let request = BlocksRequest::new(counter_package(0), "map_count", 42, 50).with_production_mode(true);
    let result = runner.run(request).await;

    assert_success(&result);
    assert_eq!(result.outputs(), expected_counts(42..50, 0));
    assert!(result.data().iter().all(|d| d.output.as_ref().unwrap().cached));
    assert_eq!(result.session().unwrap().linear_handoff_block, 50);
    assert_eq!(sorted_jobs(&runner), vec![(0, 0), (0, 1), (0, 2), (0, 3), (1, 4)]);
}

#[tokio::test]
async fn production_and_development_outputs_match() {
    let runner = runner_with_head(99);
    let development = runner
        .run(BlocksRequest::new(counter_package(3), "map_count", 17, 58))
        .await;
    let production = runner
        .run(BlocksRequest::new(counter_package(3), "map_count", 17, 58).with_production_mode(true))
        .await;

    assert_success(&development);
    assert_success(&production);
    assert_eq!(production.outputs(), development.outputs());
    assert_eq!(production.block_numbers(), (17..58).collect::<Vec<_>>());
}

#[tokio::test]
async fn cached_outputs_are_not_recomputed() {
    let runner = runner_with_head(99);
    let request = BlocksRequest::new(counter_package(0), "map_count", 42, 50).with_production_mode(true);
    assert_success(&runner.run(request.clone()).await);

    runner.client.clear();
    let again = runner.run(request).await;
    assert_success(&again);
    assert!(runner.client.jobs().is_empty());
    assert_eq!(again.outputs(), expected_counts(42..50, 0));
}

#[tokio::test]
async fn live_part_follows_the_cached_part() {
    let runner = runner_with_head(99);
    let request = BlocksRequest::new(counter_package(0), "map_count", 42, 0).with_production_mode(true);
    let result = runner.run(request).await;

    assert_success(&result);
    assert_eq!(result.session().unwrap().linear_handoff_block, 90);
    assert_eq!(result.outputs(), expected_counts(42..100, 0));
    for data in result.data() {
        let number = data.clock.as_ref().unwrap().number;
        assert_eq!(data.output.as_ref().unwrap().cached, number < 90, "block {number}");
        assert!(data.debug_map_outputs.is_empty());
        assert!(data.debug_store_outputs.is_empty());
    }
}

#[tokio::test]
async fn progress_reports_completed_ranges() {
    let runner = runner_with_head(99);
    let request = BlocksRequest::new(counter_package(0), "map_count", 42, 50).with_production_mode(true);
    let result = runner.run(request).await;

    assert_success(&result);
    let last = result
        .progress()
        .into_iter()
        .filter(|p| !p.stages.is_empty())
        .last()
        .cloned()
        .unwrap();
    let stores = &last.stages[0].completed_ranges;
    assert_eq!(stores.len(), 1);
    assert_eq!((stores[0].start_block, stores[0].end_block), (0, 40));
    let outputs = &last.stages[1].completed_ranges;
    assert_eq!((outputs[0].start_block, outputs[0].end_block), (40, 50));
}

#[tokio::test]
async fn debug_snapshots_are_rejected_in_production() {
    let runner = runner_with_head(99);
    let request = BlocksRequest::new(counter_package(0), "map_count", 42, 50)
        .with_production_mode(true)
        .with_debug_snapshots(vec!["store_count".to_string()]);
    assert_eq!(runner.run(request).await.error.unwrap().code(), "E101");
}

#[tokio::test]
async fn job_metrics_are_recorded() {
    let runner = runner_with_head(99);
    let request = BlocksRequest::new(counter_package(0), "map_count", 42, 50).with_production_mode(true);
    assert_success(&runner.run(request).await);

    let encoded = runner.metrics.encode();
    assert!(encoded.contains("strata_jobs_started_total"));
    assert!(encoded.contains("strata_blocks_processed_total"));
}

#[tokio::test]
async fn cached_artifacts_survive_a_restart_on_local_storage() {
    let dir = tempfile::tempdir().unwrap();
    let local = || -> Arc<dyn ObjectStore> { Arc::new(LocalStore::new(dir.path())) };
    let request = BlocksRequest::new(counter_package(0), "map_count", 12, 28).with_production_mode(true);

    let first = StreamRunner::builder()
        .with_config(test_config())
        .with_source(MemoryBlockSource::new().with_final_range(0..100))
        .with_base(local())
        .build()
        .unwrap();
    let before = first.run(request.clone()).await;
    assert_success(&before);
    assert!(!first.client.jobs().is_empty());

    let second = StreamRunner::builder()
        .with_config(test_config())
        .with_source(MemoryBlockSource::new().with_final_range(0..100))
        .with_base(local())
        .build()
        .unwrap();
    let after = second.run(request).await;
    assert_success(&after);
    assert!(second.client.jobs().is_empty());
    assert_eq!(after.outputs(), expected_counts(12..28, 0));
    assert_eq!(after.outputs(), before.outputs());
}
