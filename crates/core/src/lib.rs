// Chunkline Core - Domain Model, Ports & Batch Engines
// NO infrastructure dependencies: adapters live in the infra crates

pub mod application;
pub mod domain;
pub mod error;
pub mod memory;
pub mod port;
pub mod support;

pub use error::{BatchError, FailureKind, ItemError, Result};
pub use memory::InMemoryExecutionRepository;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
