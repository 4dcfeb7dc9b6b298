//! Segment jobs run directly against the Tier-2 service.

mod common;

use common::*;
use strata_core::pb::{process_range_response, ProcessRangeResponse};
use strata_core::store::{FileInfo, StoreLimits};
use strata_executor::manifest::OutputGraph;
use strata_executor::service::ProcessRangeRequest;
use strata_executor::testing::{
    append_package, counter_package, panic_package, MemoryBlockSource, StreamRunner, BLOCK_TYPE,
};
use tokio::sync::mpsc;

fn job(stage: usize, segment: u64) -> ProcessRangeRequest {
    ProcessRangeRequest {
        package: counter_package(0),
        output_module: "map_count".to_string(),
        stage,
        segment_number: segment,
        segment_size: SEGMENT,
        block_type: BLOCK_TYPE.to_string(),
        production_mode: true,
        ..ProcessRangeRequest::default()
    }
}

async fn run_job(runner: &StreamRunner, request: ProcessRangeRequest) -> Vec<ProcessRangeResponse> {
    let (tx, mut rx) = mpsc::channel(16);
    let _ = runner.tier2.process_range(request, tx).await;
    let mut responses = Vec::new();
    while let Some(response) = rx.recv().await {
        responses.push(response);
    }
    responses
}

#[tokio::test]
async fn store_stage_writes_snapshots() {
    let runner = runner_with_head(99);
    let responses = run_job(&runner, job(0, 0)).await;
    let Some(process_range_response::Type::Completed(completed)) = responses.last().and_then(|r| r.r#type.clone()) else {
        panic!("job did not complete: {responses:?}");
    };
    assert_eq!(completed.processed_ranges[0].start_block, 0);
    assert_eq!(completed.processed_ranges[0].end_block, 10);

    let responses = run_job(&runner, job(0, 1)).await;
    assert!(matches!(
        responses.last().and_then(|r| r.r#type.as_ref()),
        Some(process_range_response::Type::Completed(_))
    ));

    let graph = OutputGraph::new(&counter_package(0), "map_count", true).unwrap();
    let config = graph
        .store_config("store_count", &runner.base, runner.config.store_limits)
        .unwrap();
    let files = config.list_snapshot_files().await.unwrap();
    assert!(files.contains(&FileInfo::full(0, 10)));
    assert!(files.contains(&FileInfo::partial(10, 20)));
}

#[tokio::test]
async fn output_stage_caches_outputs() {
    let runner = runner_with_head(99);
    run_job(&runner, job(0, 0)).await;
    let responses = run_job(&runner, job(1, 0)).await;
    assert!(matches!(
        responses.last().and_then(|r| r.r#type.as_ref()),
        Some(process_range_response::Type::Completed(_))
    ));

    let graph = OutputGraph::new(&counter_package(0), "map_count", true).unwrap();
    let config = graph.exec_out_config("map_count", &runner.base).unwrap();
    let files = config.list_existing_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!((files[0].start, files[0].exclusive_end), (0, 10));
}

#[tokio::test]
async fn segment_before_first_streamable_block_fails() {
    let runner = runner_with_head(99);
    let request = ProcessRangeRequest {
        first_streamable_block: 30,
        ..job(0, 1)
    };
    let responses = run_job(&runner, request).await;
    let Some(process_range_response::Type::Failed(failed)) = responses.last().and_then(|r| r.r#type.clone()) else {
        panic!("job did not fail: {responses:?}");
    };
    assert_eq!(failed.code, "E104");
}

#[tokio::test]
async fn unknown_stage_fails() {
    let runner = runner_with_head(99);
    let responses = run_job(&runner, job(5, 0)).await;
    let Some(process_range_response::Type::Failed(failed)) = responses.last().and_then(|r| r.r#type.clone()) else {
        panic!("job did not fail: {responses:?}");
    };
    assert_eq!(failed.code, "E101");
    assert!(failed.reason.contains("stage 5"));
}

#[tokio::test]
async fn append_over_limit_fails_without_partial() {
    // Five 8-byte appends reach the limit at block 14.
    let limits = StoreLimits {
        append_limit: 40,
        ..StoreLimits::default()
    };
    let runner = StreamRunner::builder()
        .with_config(test_config().with_store_limits(limits))
        .with_source(MemoryBlockSource::new().with_final_range(0..100))
        .build()
        .unwrap();
    let request = ProcessRangeRequest {
        package: append_package(0),
        output_module: "map_log".to_string(),
        ..job(0, 1)
    };
    let responses = run_job(&runner, request).await;
    let Some(process_range_response::Type::Failed(failed)) = responses.last().and_then(|r| r.r#type.clone()) else {
        panic!("job did not fail: {responses:?}");
    };
    assert_eq!(failed.code, "E301");
    assert!(failed.reason.contains("append limit"), "{}", failed.reason);

    let graph = OutputGraph::new(&append_package(0), "map_log", true).unwrap();
    let config = graph.store_config("store_log", &runner.base, limits).unwrap();
    let files = config.list_snapshot_files().await.unwrap();
    assert!(!files.contains(&FileInfo::partial(10, 20)));
    assert!(files.iter().all(|f| !f.partial), "{files:?}");
}

#[tokio::test]
async fn module_fault_reports_failing_block() {
    let runner = runner_with_head(99);
    let request = ProcessRangeRequest {
        package: panic_package(0),
        output_module: "map_panic".to_string(),
        ..job(0, 1)
    };
    let responses = run_job(&runner, request).await;
    let Some(process_range_response::Type::Failed(failed)) = responses.last().and_then(|r| r.r#type.clone()) else {
        panic!("job did not fail: {responses:?}");
    };
    assert_eq!(failed.code, "E302");
    assert_eq!(failed.failed_block, Some(10));
}
