//! Reversible block bookkeeping.
//!
//! Blocks that are not final yet keep their outputs and store deltas here
//! until the chain either finalizes them or undoes them. Nothing derived
//! from a reversible block is ever persisted.

use strata_core::execout::ExecOutputBuffer;
use strata_core::pb::{Clock, StoreDelta};
use strata_core::store::StoreMap;
use tracing::{debug, warn};

/// Everything produced by one reversible block.
#[derive(Debug, Clone)]
pub struct ReversibleBlock {
    /// Block clock.
    pub clock: Clock,
    /// Module outputs.
    pub buffer: ExecOutputBuffer,
    /// Deltas applied to each store, in module order.
    pub store_deltas: Vec<(String, Vec<StoreDelta>)>,
    /// Keys emitted by each block index module.
    pub index_keys: Vec<(String, Vec<String>)>,
}

/// Outcome of an undo.
#[derive(Debug, Clone, PartialEq)]
pub struct Undone {
    /// Clocks of the reverted blocks, most recent first.
    pub reverted: Vec<Clock>,
    /// Most recent block still standing: a reversible block or the last
    /// final one.
    pub last_valid: Option<Clock>,
}

/// Tracks reversible blocks in arrival order.
#[derive(Debug, Default)]
pub struct ForkHandler {
    reversible: Vec<ReversibleBlock>,
    last_final: Option<Clock>,
}

impl ForkHandler {
    /// Empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `block` until it is finalized or undone.
    pub fn add_reversible(&mut self, block: ReversibleBlock) {
        self.reversible.push(block);
    }

    /// Whether the block with `id` is held as reversible.
    pub fn is_reversible(&self, id: &str) -> bool {
        self.reversible.iter().any(|b| b.clock.id == id)
    }

    /// Number of reversible blocks held.
    pub fn len(&self) -> usize {
        self.reversible.len()
    }

    /// True when no reversible block is held.
    pub fn is_empty(&self) -> bool {
        self.reversible.is_empty()
    }

    /// Last finalized block.
    pub fn last_final(&self) -> Option<&Clock> {
        self.last_final.as_ref()
    }

    /// Undo the block of `clock` and every reversible block after it,
    /// reverting their store deltas newest first.
    ///
    /// Returns `None` when the block is unknown.
    pub fn undo(&mut self, clock: &Clock, stores: &StoreMap) -> Option<Undone> {
        let Some(position) = self.reversible.iter().position(|b| b.clock.id == clock.id) else {
            warn!(block_num = clock.number, block_id = %clock.id, "undo of an unknown block");
            return None;
        };

        let mut reverted = Vec::new();
        for block in self.reversible.drain(position..).rev() {
            for (name, deltas) in block.store_deltas.iter().rev() {
                if let Some(store) = stores.get(name) {
                    store.lock().apply_deltas_reverse(deltas);
                }
            }
            debug!(block_num = block.clock.number, block_id = %block.clock.id, "reverted reversible block");
            reverted.push(block.clock);
        }

        let last_valid = self
            .reversible
            .last()
            .map(|b| b.clock.clone())
            .or_else(|| self.last_final.clone());
        Some(Undone {
            reverted,
            last_valid,
        })
    }

    /// Finalize the block of `clock`, releasing and returning its reversible
    /// record. `None` when the block was never seen as reversible.
    pub fn finalize(&mut self, clock: &Clock) -> Option<ReversibleBlock> {
        let block = self
            .reversible
            .iter()
            .position(|b| b.clock.id == clock.id)
            .map(|position| self.reversible.remove(position));
        self.mark_final(clock);
        block
    }

    /// Record `clock` as the last final block.
    pub fn mark_final(&mut self, clock: &Clock) {
        if self.last_final.as_ref().map_or(true, |c| c.number <= clock.number) {
            self.last_final = Some(clock.clone());
        }
    }
}
