//! Stream runner wiring both tiers over in-memory storage.

use super::guests::BLOCK_TYPE;
use super::source::MemoryBlockSource;
use crate::config::RuntimeConfig;
use crate::metrics::Metrics;
use crate::observability::{self, LogConfig};
use crate::service::{
    BlocksRequest, InProcessTier2Client, ProcessRangeRequest, ResponseStream, Tier1Service,
    Tier2Client, Tier2Service,
};
use crate::wasm::{ExtensionRegistry, WasmRuntime, WasmRuntimeConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_core::error::{Result, StrataError};
use strata_core::pb::{response, BlockScopedData, BlockUndoSignal, ModulesProgress, Response, SessionInit};
use strata_core::storage::{MemoryStore, ObjectStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::TestWriter;

/// Everything a request streamed back.
#[derive(Debug)]
pub struct StreamResult {
    pub responses: Vec<Response>,
    pub error: Option<StrataError>,
}

impl StreamResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn session(&self) -> Option<&SessionInit> {
        self.messages().find_map(|m| match m {
            response::Message::Session(session) => Some(session),
            _ => None,
        })
    }

    pub fn data(&self) -> Vec<&BlockScopedData> {
        self.messages()
            .filter_map(|m| match m {
                response::Message::BlockScopedData(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn undo_signals(&self) -> Vec<&BlockUndoSignal> {
        self.messages()
            .filter_map(|m| match m {
                response::Message::BlockUndoSignal(undo) => Some(undo),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<&ModulesProgress> {
        self.messages()
            .filter_map(|m| match m {
                response::Message::Progress(progress) => Some(progress),
                _ => None,
            })
            .collect()
    }

    /// Block numbers of the data messages, in order.
    pub fn block_numbers(&self) -> Vec<u64> {
        self.data()
            .iter()
            .filter_map(|d| d.clock.as_ref().map(|c| c.number))
            .collect()
    }

    /// `(block, payload)` of each data message carrying an output.
    pub fn outputs(&self) -> Vec<(u64, Vec<u8>)> {
        self.data()
            .iter()
            .filter_map(|d| {
                let number = d.clock.as_ref()?.number;
                d.output.as_ref().map(|o| (number, o.payload.clone()))
            })
            .collect()
    }

    fn messages(&self) -> impl Iterator<Item = &response::Message> {
        self.responses.iter().filter_map(|r| r.message.as_ref())
    }
}

/// Records the Tier-2 requests it forwards.
#[derive(Debug)]
pub struct RecordingTier2Client {
    inner: Arc<dyn Tier2Client>,
    requests: Mutex<Vec<ProcessRangeRequest>>,
}

impl RecordingTier2Client {
    pub fn new(inner: Arc<dyn Tier2Client>) -> Self {
        Self {
            inner,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `(stage, segment)` of every forwarded request.
    pub fn jobs(&self) -> Vec<(usize, u64)> {
        self.requests
            .lock()
            .iter()
            .map(|r| (r.stage, r.segment_number))
            .collect()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl Tier2Client for RecordingTier2Client {
    async fn process_range(&self, request: ProcessRangeRequest) -> Result<ResponseStream> {
        self.requests.lock().push(request.clone());
        self.inner.process_range(request).await
    }
}

/// Builder for [`StreamRunner`].
#[derive(Debug, Default)]
pub struct StreamRunnerBuilder {
    config: Option<RuntimeConfig>,
    source: Option<MemoryBlockSource>,
    base: Option<Arc<dyn ObjectStore>>,
    wasm: Option<WasmRuntimeConfig>,
    logging: Option<LogConfig>,
}

impl StreamRunnerBuilder {
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_source(mut self, source: MemoryBlockSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Share storage with another runner.
    pub fn with_base(mut self, base: Arc<dyn ObjectStore>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_wasm_config(mut self, config: WasmRuntimeConfig) -> Self {
        self.wasm = Some(config);
        self
    }

    /// Send logs to the test output. The first runner built with logging
    /// installs the global subscriber.
    pub fn with_logging(mut self, config: LogConfig) -> Self {
        self.logging = Some(config);
        self
    }

    pub fn build(self) -> Result<StreamRunner> {
        let config = self.config.unwrap_or_else(|| {
            RuntimeConfig::default()
                .with_segment_size(10)
                .with_parallel_workers(2)
                .with_backfiller_delay(2)
        });
        config.validate()?;
        if let Some(logging) = &self.logging {
            let subscriber = observability::subscriber(logging, TestWriter::new())?;
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        let wasm = self.wasm.unwrap_or_else(|| WasmRuntimeConfig::from_runtime(&config));
        let runtime = Arc::new(WasmRuntime::new(wasm, &ExtensionRegistry::new())?);
        let base = self.base.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let source = Arc::new(self.source.unwrap_or_default());
        let metrics = Arc::new(Metrics::new());

        let tier2 = Arc::new(
            Tier2Service::new(Arc::clone(&runtime), Arc::clone(&base), source.clone(), config.clone())
                .with_metrics(Arc::clone(&metrics)),
        );
        let client = Arc::new(RecordingTier2Client::new(Arc::new(InProcessTier2Client::new(
            Arc::clone(&tier2),
        ))));
        let tier1 = Tier1Service::new(
            runtime,
            Arc::clone(&base),
            source.clone(),
            client.clone(),
            config.clone(),
            BLOCK_TYPE,
        )
        .with_metrics(Arc::clone(&metrics));

        Ok(StreamRunner {
            config,
            base,
            source,
            client,
            tier1,
            tier2,
            metrics,
        })
    }
}

/// Both tiers over one in-memory store, driven request by request.
#[derive(Debug)]
pub struct StreamRunner {
    pub config: RuntimeConfig,
    pub base: Arc<dyn ObjectStore>,
    pub source: Arc<MemoryBlockSource>,
    pub client: Arc<RecordingTier2Client>,
    pub tier1: Tier1Service,
    pub tier2: Arc<Tier2Service>,
    pub metrics: Arc<Metrics>,
}

impl StreamRunner {
    pub fn builder() -> StreamRunnerBuilder {
        StreamRunnerBuilder::default()
    }

    /// Serve `request` to completion, collecting every response.
    pub async fn run(&self, request: BlocksRequest) -> StreamResult {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(&self, request: BlocksRequest, cancel: CancellationToken) -> StreamResult {
        let (tx, mut rx) = mpsc::channel(self.config.response_buffer.max(1));
        let serve = self.tier1.blocks(request, tx, cancel);
        let collect = async {
            let mut responses = Vec::new();
            while let Some(response) = rx.recv().await {
                responses.push(response);
            }
            responses
        };
        let (result, responses) = tokio::join!(serve, collect);
        StreamResult {
            responses,
            error: result.err(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::echo_package;

    #[tokio::test]
    async fn runs_a_development_request() {
        let runner = StreamRunner::builder()
            .with_source(MemoryBlockSource::new().with_final_range(0..30))
            .build()
            .unwrap();
        let request = BlocksRequest::new(echo_package(0), "map_echo", 5, 8);
        let result = runner.run(request).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.block_numbers(), vec![5, 6, 7]);
        assert_eq!(result.outputs()[0].1, b"block-5".to_vec());
        assert_eq!(result.session().unwrap().linear_handoff_block, 5);
    }
}
