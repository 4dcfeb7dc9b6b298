//! Suppression of outputs before the requested start block.
//!
//! A pipeline may have to start before the block a client asked for, so
//! that its stores reach the right state. Blocks before the start are
//! processed but never sent.

use tracing::info;

/// Opens once the first block at or past the start is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputGate {
    start_block: u64,
    open: bool,
}

impl OutputGate {
    /// Gate opening at `start_block`.
    pub fn new(start_block: u64) -> Self {
        Self {
            start_block,
            open: false,
        }
    }

    /// First block sent to the client.
    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    /// Whether outputs are currently sent.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether the outputs of `block_num` are sent. Opens the gate on the
    /// first block at or past the start.
    pub fn should_send(&mut self, block_num: u64) -> bool {
        if !self.open && block_num >= self.start_block {
            info!(block_num, start_block = self.start_block, "output gate opened");
            self.open = true;
        }
        self.open
    }

    /// Whether an undo of `block_num` concerns a block that was sent.
    pub fn should_send_undo(&self, block_num: u64) -> bool {
        self.open && block_num >= self.start_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_at_start_and_stays_open() {
        let mut gate = OutputGate::new(738);
        assert!(!gate.should_send(700));
        assert!(!gate.should_send(737));
        assert!(!gate.is_open());
        assert!(gate.should_send(738));
        assert!(gate.should_send(739));
        assert!(gate.is_open());
    }

    #[test]
    fn opens_when_first_block_is_past_start() {
        let mut gate = OutputGate::new(10);
        assert!(gate.should_send(12));
    }

    #[test]
    fn undo_before_start_is_not_sent() {
        let mut gate = OutputGate::new(10);
        assert!(!gate.should_send_undo(11));
        gate.should_send(11);
        assert!(gate.should_send_undo(11));
        assert!(!gate.should_send_undo(9));
    }
}
