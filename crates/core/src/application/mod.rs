// Application Layer - Batch engines built on the domain model and ports

pub mod classify;
pub mod constants;
pub mod job;
pub mod panic_guard;
pub mod repeat;
pub mod step;
pub mod stop;

// Re-exports
pub use job::{Job, JobBuilder, JobLauncher, StepHandler};
pub use step::{ChunkStep, ChunkStepBuilder, Step, StepSettings, Tasklet, TaskletStep};
pub use stop::{stop_channel, StopSignal, StopToken};
