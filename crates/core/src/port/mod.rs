// Port Layer - Interfaces for external collaborators

pub mod execution_repository;
pub mod item;
pub mod listener;
pub mod time_provider;
pub mod transaction;

// Re-exports
pub use execution_repository::ExecutionRepository;
pub use item::{ItemProcessor, ItemReader, ItemStream, ItemWriter};
pub use listener::{
    ChunkListener, Composite, ItemReadListener, ItemWriteListener, JobListener, SkipListener,
    StepListener,
};
pub use time_provider::TimeProvider;
pub use transaction::{StepTransaction, Transaction, TransactionManager};
