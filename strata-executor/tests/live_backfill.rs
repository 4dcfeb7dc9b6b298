//! Cache extension behind the live pipeline.

mod common;

use common::*;
use strata_core::store::FileInfo;
use strata_core::types::{BlockEvent, ForkStep};
use strata_executor::manifest::OutputGraph;
use strata_executor::service::BlocksRequest;
use strata_executor::testing::{block, counter_package, MemoryBlockSource};

#[tokio::test]
async fn finished_segments_are_cached_while_streaming() {
    let source = MemoryBlockSource::new()
        .with_final_range(0..20)
        .with_live_events((20..36).map(|n| BlockEvent::new(ForkStep::Final, block(n))));
    let runner = runner(source);
    let package = counter_package(0);
    let result = runner
        .run(BlocksRequest::new(package.clone(), "map_count", 20, 0))
        .await;

    assert_success(&result);
    assert_eq!(result.outputs(), expected_counts(20..36, 0));
    let jobs = sorted_jobs(&runner);
    assert_eq!(jobs, vec![(0, 0), (0, 1), (0, 2)]);

    let graph = OutputGraph::new(&package, "map_count", false).unwrap();
    let config = graph
        .store_config("store_count", &runner.base, runner.config.store_limits)
        .unwrap();
    assert_eq!(config.existing_full_kv(30).await.unwrap(), Some(FileInfo::full(0, 30)));

    let mut store = config.new_full_kv();
    store.load(30).await.unwrap();
    assert_eq!(store.get_last("count"), Some(&b"30"[..]));
}

#[tokio::test]
async fn non_boundary_start_does_not_backfill() {
    let source = MemoryBlockSource::new()
        .with_final_range(0..20)
        .with_live_events((20..36).map(|n| BlockEvent::new(ForkStep::Final, block(n))));
    let runner = runner(source);
    let result = runner
        .run(BlocksRequest::new(counter_package(5), "map_count", 5, 0))
        .await;

    assert_success(&result);
    assert!(runner.client.jobs().is_empty());
    assert_eq!(result.outputs(), expected_counts(5..36, 5));
}
