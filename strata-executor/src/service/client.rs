//! Transport between Tier-1 and Tier-2.

use super::request::ProcessRangeRequest;
use super::tier2::Tier2Service;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::sync::Arc;
use strata_core::error::Result;
use strata_core::pb::ProcessRangeResponse;
use tokio::sync::mpsc;
use tracing::debug;

/// Responses of one Tier-2 call.
pub type ResponseStream = BoxStream<'static, Result<ProcessRangeResponse>>;

/// How Tier-1 reaches Tier-2 workers.
#[async_trait]
pub trait Tier2Client: Send + Sync + fmt::Debug {
    /// Start a segment job and stream its responses. The stream ends after
    /// a `Completed` or `Failed` message.
    async fn process_range(&self, request: ProcessRangeRequest) -> Result<ResponseStream>;
}

/// Runs Tier-2 jobs on a local [`Tier2Service`], each on its own task.
#[derive(Debug, Clone)]
pub struct InProcessTier2Client {
    service: Arc<Tier2Service>,
    buffer: usize,
}

impl InProcessTier2Client {
    pub fn new(service: Arc<Tier2Service>) -> Self {
        Self { service, buffer: 16 }
    }
}

#[async_trait]
impl Tier2Client for InProcessTier2Client {
    async fn process_range(&self, request: ProcessRangeRequest) -> Result<ResponseStream> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            let segment = request.segment_number;
            if let Err(err) = service.process_range(request, tx).await {
                debug!(segment, error = %err, "tier2 job ended with an error");
            }
        });

        Ok(receiver_stream(rx))
    }
}

/// Turn a response channel into a stream.
pub(crate) fn receiver_stream(rx: mpsc::Receiver<ProcessRangeResponse>) -> ResponseStream {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|response| (Ok(response), rx))
    })
    .boxed()
}
