// Item Collaborator Ports - sources, transformers and sinks of a chunk step

use crate::domain::ExecutionContext;
use crate::error::ItemError;
use async_trait::async_trait;

/// Checkpoint lifecycle shared by readers and writers
#[async_trait]
pub trait ItemStream: Send {
    /// Restore position from a (possibly empty) checkpoint
    async fn open(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    /// Record the current position into the checkpoint before commit
    async fn update(&mut self, _context: &mut ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }

    /// Release resources
    async fn close(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        Ok(())
    }
}

/// Item source
#[async_trait]
pub trait ItemReader<T: Send>: ItemStream {
    /// Next item, or `None` at end of input
    async fn read(&mut self) -> Result<Option<T>, ItemError>;

    /// Remember the current position (called at chunk start)
    fn mark(&mut self) -> Result<(), ItemError>;

    /// Rewind to the last mark (called after a chunk rollback)
    fn reset(&mut self) -> Result<(), ItemError>;
}

/// Optional transformation between read and write. `Ok(None)` filters the item.
#[async_trait]
pub trait ItemProcessor<I: Send + 'static, O: Send>: Send + Sync {
    async fn process(&self, item: I) -> Result<Option<O>, ItemError>;
}

/// Item sink. Writers may buffer; `flush` runs before the chunk commits and
/// `clear` discards buffered items after a rollback.
#[async_trait]
pub trait ItemWriter<T: Send>: ItemStream {
    async fn write(&mut self, item: T) -> Result<(), ItemError>;

    async fn flush(&mut self) -> Result<(), ItemError> {
        Ok(())
    }

    fn clear(&mut self) {}
}
