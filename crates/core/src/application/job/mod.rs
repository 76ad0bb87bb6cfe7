// Job driver: sequence steps, aggregate their outcomes, launch and stop jobs

pub mod driver;
pub mod launcher;
pub mod step_handler;

pub use driver::{Job, JobBuilder};
pub use launcher::JobLauncher;
pub use step_handler::StepHandler;
