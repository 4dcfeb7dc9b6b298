use super::job::Job;
use crate::pipeline::ResponseSender;
use crate::plan::ExecutionStages;
use strata_core::error::{Result, StrataError};
use strata_core::pb::{response, ModulesProgress, PbBlockRange, Response, StageProgress};

/// Completed ranges per stage, streamed to the client as jobs finish.
#[derive(Debug)]
pub struct ProgressReporter {
    sender: Option<ResponseSender>,
    stages: Vec<StageProgress>,
}

impl ProgressReporter {
    pub fn new(sender: Option<ResponseSender>, stages: &ExecutionStages) -> Self {
        let stages = (0..stages.len())
            .map(|index| StageProgress {
                modules: stages.names_of(index),
                completed_ranges: Vec::new(),
            })
            .collect();
        Self { sender, stages }
    }

    /// Record `job` as done and send the updated progress.
    pub async fn job_completed(&mut self, job: &Job) -> Result<()> {
        if let Some(stage) = self.stages.get_mut(job.stage) {
            add_range(
                &mut stage.completed_ranges,
                job.range.start,
                job.range.exclusive_end,
            );
        }
        self.send().await
    }

    /// Completed ranges of `stage`, merged and sorted.
    pub fn completed_ranges(&self, stage: usize) -> &[PbBlockRange] {
        self.stages
            .get(stage)
            .map(|s| s.completed_ranges.as_slice())
            .unwrap_or_default()
    }

    async fn send(&self) -> Result<()> {
        let Some(sender) = &self.sender else {
            return Ok(());
        };
        let progress = ModulesProgress {
            stages: self.stages.clone(),
            modules: Vec::new(),
        };
        sender
            .send(Response {
                message: Some(response::Message::Progress(progress)),
            })
            .await
            .map_err(|_| StrataError::StreamClosed {
                cause: "response receiver dropped".to_string(),
            })
    }
}

/// Insert `[start, end)` keeping ranges sorted and contiguous ones merged.
fn add_range(ranges: &mut Vec<PbBlockRange>, start: u64, end: u64) {
    ranges.push(PbBlockRange {
        start_block: start,
        end_block: end,
    });
    ranges.sort_by_key(|r| r.start_block);

    let mut merged: Vec<PbBlockRange> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        match merged.last_mut() {
            Some(last) if range.start_block <= last.end_block => {
                last.end_block = last.end_block.max(range.end_block);
            }
            _ => merged.push(range),
        }
    }
    *ranges = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_ranges_merge() {
        let mut ranges = Vec::new();
        add_range(&mut ranges, 200, 300);
        add_range(&mut ranges, 0, 100);
        assert_eq!(ranges.len(), 2);
        add_range(&mut ranges, 100, 200);
        assert_eq!(
            ranges,
            vec![PbBlockRange {
                start_block: 0,
                end_block: 300
            }]
        );
    }
}
