//! Collaborators plugged into a session

use crate::channel::CHANNEL_CAPACITY;
use crate::dispatch::Exchange;
use crate::error::Result;

/// Decodes control messages and produces replies
pub trait MessageHandler: Send + 'static {
    /// How many bytes of the control buffer to copy in per request
    ///
    /// Clamped to the channel capacity and to at least the kind prefix.
    fn read_size(&self) -> usize {
        CHANNEL_CAPACITY
    }

    /// Handle one control request
    ///
    /// The request sits at the start of `exchange`'s buffer. Write the reply
    /// into the same buffer and return its length. Replies larger than a
    /// channel can be streamed by filling the buffer and calling
    /// [`Exchange::send_chunk`] before returning the final piece.
    fn standard_message(&mut self, kind: u32, exchange: &mut Exchange<'_>) -> Result<usize>;

    /// Called once, after the last telemetry block has been persisted
    fn complete(&mut self);
}

/// Durable sink for telemetry blocks
pub trait Persistence: Send + 'static {
    /// Store one block; called in delivery order
    fn save_block(&mut self, block: &[u8]);

    /// End of stream
    fn finish(&mut self) {}
}

/// Persistence that keeps every block in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryPersistence {
    pub blocks: Vec<Vec<u8>>,
    pub finished: bool,
}

impl Persistence for MemoryPersistence {
    fn save_block(&mut self, block: &[u8]) {
        self.blocks.push(block.to_vec());
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}
