//! Development-mode requests: stores built in the background, everything
//! from the start block executed live.

mod common;

use common::*;
use strata_core::pb::store_delta::Operation;
use strata_executor::service::BlocksRequest;
use strata_executor::testing::{counter_package, echo_package, full_package};

#[tokio::test]
async fn stores_are_built_before_streaming() {
    let runner = runner_with_head(99);
    let result = runner
        .run(BlocksRequest::new(counter_package(0), "map_count", 42, 50))
        .await;

    assert_success(&result);
    assert_eq!(result.outputs(), expected_counts(42..50, 0));
    assert_eq!(sorted_jobs(&runner), vec![(0, 0), (0, 1), (0, 2), (0, 3)]);

    let session = result.session().unwrap();
    assert_eq!(session.resolved_start_block, 42);
    assert_eq!(session.linear_handoff_block, 42);
    assert_eq!(session.max_parallel_workers, 2);
    assert!(!session.trace_id.is_empty());
}

#[tokio::test]
async fn second_request_reuses_built_stores() {
    let runner = runner_with_head(99);
    let request = BlocksRequest::new(counter_package(0), "map_count", 42, 50);
    let first = runner.run(request.clone()).await;
    assert_success(&first);

    runner.client.clear();
    let second = runner.run(request).await;
    assert_success(&second);
    assert!(runner.client.jobs().is_empty());
    assert_eq!(second.outputs(), first.outputs());
}

#[tokio::test]
async fn later_request_only_builds_new_segments() {
    let runner = runner_with_head(99);
    assert_success(
        &runner
            .run(BlocksRequest::new(counter_package(0), "map_count", 25, 27))
            .await,
    );

    runner.client.clear();
    let result = runner
        .run(BlocksRequest::new(counter_package(0), "map_count", 63, 65))
        .await;
    assert_success(&result);
    assert_eq!(sorted_jobs(&runner), vec![(0, 2), (0, 3), (0, 4), (0, 5)]);
    assert_eq!(result.outputs(), expected_counts(63..65, 0));
}

#[tokio::test]
async fn initial_block_offsets_segments() {
    let runner = runner_with_head(99);
    let result = runner
        .run(BlocksRequest::new(counter_package(7), "map_count", 31, 34))
        .await;

    assert_success(&result);
    assert_eq!(result.outputs(), expected_counts(31..34, 7));
    assert_eq!(sorted_jobs(&runner), vec![(0, 0), (0, 1), (0, 2)]);
}

#[tokio::test]
async fn maps_without_stores_run_live_only() {
    let runner = runner_with_head(50);
    let result = runner.run(BlocksRequest::new(echo_package(0), "map_echo", 12, 15)).await;

    assert_success(&result);
    assert!(runner.client.jobs().is_empty());
    assert_eq!(
        result.outputs(),
        vec![
            (12, b"block-12".to_vec()),
            (13, b"block-13".to_vec()),
            (14, b"block-14".to_vec()),
        ]
    );
    assert!(result.data().iter().all(|d| !d.output.as_ref().unwrap().cached));
}

#[tokio::test]
async fn debug_outputs_include_other_modules() {
    let runner = runner_with_head(50);
    let result = runner
        .run(BlocksRequest::new(full_package(0), "map_count", 20, 21))
        .await;

    assert_success(&result);
    let data = result.data();
    assert_eq!(data.len(), 1);
    let stores: Vec<&str> = data[0].debug_store_outputs.iter().map(|s| s.name.as_str()).collect();
    assert!(stores.contains(&"store_count"));
}

#[tokio::test]
async fn initial_store_snapshots_come_first() {
    let runner = runner_with_head(50);
    let request = BlocksRequest::new(counter_package(0), "map_count", 20, 23)
        .with_debug_snapshots(vec!["store_count".to_string()]);
    let result = runner.run(request).await;

    assert_success(&result);
    let data = result.data();
    let snapshot = &data[0].debug_store_outputs[0];
    assert_eq!(snapshot.name, "store_count");
    assert_eq!(snapshot.deltas.len(), 1);
    assert_eq!(snapshot.deltas[0].key, "count");
    assert_eq!(snapshot.deltas[0].operation, Operation::Create as i32);
    assert_eq!(snapshot.deltas[0].new_value, b"20".to_vec());

    assert!(data[1..]
        .iter()
        .all(|d| d.debug_store_outputs.iter().all(|s| s.deltas.len() == 1 && s.deltas[0].operation == Operation::Update as i32)));
}

#[tokio::test]
async fn start_before_initial_block_is_rejected() {
    let runner = runner_with_head(50);
    let result = runner
        .run(BlocksRequest::new(counter_package(10), "map_count", 5, 20))
        .await;

    assert_eq!(result.error.unwrap().code(), "E205");
    assert!(result.responses.is_empty());
}

#[tokio::test]
async fn store_output_module_is_rejected() {
    let runner = runner_with_head(50);
    let result = runner
        .run(BlocksRequest::new(counter_package(0), "store_count", 5, 20))
        .await;
    assert_eq!(result.error.unwrap().code(), "E103");
}

#[tokio::test]
async fn cursor_resumes_after_the_block() {
    let runner = runner_with_head(50);
    let first = runner.run(BlocksRequest::new(echo_package(0), "map_echo", 12, 15)).await;
    assert_success(&first);
    let cursor = first.data()[1].cursor.clone();

    let resumed = runner
        .run(BlocksRequest::new(echo_package(0), "map_echo", 0, 16).with_cursor(cursor))
        .await;
    assert_success(&resumed);
    assert_eq!(resumed.block_numbers(), vec![14, 15]);
}
