// Listener Ports - pure observation hooks, one trait per concern
//
// Hooks cannot alter control flow except by returning an error, which the
// engine treats like any other failure at that point.

use crate::domain::{JobExecution, StepExecution};
use crate::error::{BatchError, ItemError, Result};
use std::sync::Arc;

/// Job-level hooks
pub trait JobListener: Send + Sync {
    fn before_job(&self, _execution: &mut JobExecution) -> Result<()> {
        Ok(())
    }

    /// Runs on success and failure; context mutations are persisted
    fn after_job(&self, _execution: &mut JobExecution) -> Result<()> {
        Ok(())
    }
}

/// Step-level hooks
pub trait StepListener: Send + Sync {
    fn before_step(&self, _step_execution: &mut StepExecution) -> Result<()> {
        Ok(())
    }

    /// Runs on success and failure; context mutations are persisted
    fn after_step(&self, _step_execution: &mut StepExecution) -> Result<()> {
        Ok(())
    }

    fn on_step_error(&self, _step_execution: &StepExecution, _error: &BatchError) {}
}

/// Chunk boundary hooks
pub trait ChunkListener: Send + Sync {
    fn before_chunk(&self) -> Result<()> {
        Ok(())
    }

    fn after_chunk(&self) -> Result<()> {
        Ok(())
    }
}

pub trait ItemReadListener<T>: Send + Sync {
    fn before_read(&self) -> Result<()> {
        Ok(())
    }

    fn after_read(&self, _item: &T) -> Result<()> {
        Ok(())
    }

    fn on_read_error(&self, _error: &ItemError) {}
}

pub trait ItemWriteListener<T>: Send + Sync {
    fn before_write(&self, _item: &T) -> Result<()> {
        Ok(())
    }

    fn after_write(&self, _item: &T) -> Result<()> {
        Ok(())
    }

    fn on_write_error(&self, _item: &T, _error: &ItemError) {}
}

/// Notified once per skipped item
pub trait SkipListener<I, O>: Send + Sync {
    fn on_skip_in_read(&self, _error: &ItemError) {}

    fn on_skip_in_process(&self, _item: &I, _error: &ItemError) {}

    fn on_skip_in_write(&self, _item: &O, _error: &ItemError) {}
}

/// Ordered dispatcher for one listener concern.
///
/// "before" hooks run in registration order, "after" hooks in reverse, so
/// nested listeners observe symmetrical open/close pairs.
pub struct Composite<L: ?Sized> {
    listeners: Vec<Arc<L>>,
}

impl<L: ?Sized> Composite<L> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn register(&mut self, listener: Arc<L>) {
        self.listeners.push(listener);
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    fn forward(&self) -> impl Iterator<Item = &Arc<L>> {
        self.listeners.iter()
    }

    fn reverse(&self) -> impl Iterator<Item = &Arc<L>> {
        self.listeners.iter().rev()
    }
}

impl<L: ?Sized> Default for Composite<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> Clone for Composite<L> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl JobListener for Composite<dyn JobListener> {
    fn before_job(&self, execution: &mut JobExecution) -> Result<()> {
        for listener in self.forward() {
            listener.before_job(execution)?;
        }
        Ok(())
    }

    fn after_job(&self, execution: &mut JobExecution) -> Result<()> {
        for listener in self.reverse() {
            listener.after_job(execution)?;
        }
        Ok(())
    }
}

impl StepListener for Composite<dyn StepListener> {
    fn before_step(&self, step_execution: &mut StepExecution) -> Result<()> {
        for listener in self.forward() {
            listener.before_step(step_execution)?;
        }
        Ok(())
    }

    fn after_step(&self, step_execution: &mut StepExecution) -> Result<()> {
        for listener in self.reverse() {
            listener.after_step(step_execution)?;
        }
        Ok(())
    }

    fn on_step_error(&self, step_execution: &StepExecution, error: &BatchError) {
        for listener in self.reverse() {
            listener.on_step_error(step_execution, error);
        }
    }
}

impl ChunkListener for Composite<dyn ChunkListener> {
    fn before_chunk(&self) -> Result<()> {
        for listener in self.forward() {
            listener.before_chunk()?;
        }
        Ok(())
    }

    fn after_chunk(&self) -> Result<()> {
        for listener in self.reverse() {
            listener.after_chunk()?;
        }
        Ok(())
    }
}

impl<T: 'static> ItemReadListener<T> for Composite<dyn ItemReadListener<T>> {
    fn before_read(&self) -> Result<()> {
        for listener in self.forward() {
            listener.before_read()?;
        }
        Ok(())
    }

    fn after_read(&self, item: &T) -> Result<()> {
        for listener in self.reverse() {
            listener.after_read(item)?;
        }
        Ok(())
    }

    fn on_read_error(&self, error: &ItemError) {
        for listener in self.reverse() {
            listener.on_read_error(error);
        }
    }
}

impl<T: 'static> ItemWriteListener<T> for Composite<dyn ItemWriteListener<T>> {
    fn before_write(&self, item: &T) -> Result<()> {
        for listener in self.forward() {
            listener.before_write(item)?;
        }
        Ok(())
    }

    fn after_write(&self, item: &T) -> Result<()> {
        for listener in self.reverse() {
            listener.after_write(item)?;
        }
        Ok(())
    }

    fn on_write_error(&self, item: &T, error: &ItemError) {
        for listener in self.reverse() {
            listener.on_write_error(item, error);
        }
    }
}

impl<I: 'static, O: 'static> SkipListener<I, O> for Composite<dyn SkipListener<I, O>> {
    fn on_skip_in_read(&self, error: &ItemError) {
        for listener in self.forward() {
            listener.on_skip_in_read(error);
        }
    }

    fn on_skip_in_process(&self, item: &I, error: &ItemError) {
        for listener in self.forward() {
            listener.on_skip_in_process(item, error);
        }
    }

    fn on_skip_in_write(&self, item: &O, error: &ItemError) {
        for listener in self.forward() {
            listener.on_skip_in_write(item, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl StepListener for Recording {
        fn before_step(&self, _step_execution: &mut StepExecution) -> Result<()> {
            self.log.lock().unwrap().push(format!("before:{}", self.name));
            Ok(())
        }

        fn after_step(&self, _step_execution: &mut StepExecution) -> Result<()> {
            self.log.lock().unwrap().push(format!("after:{}", self.name));
            Ok(())
        }
    }

    #[test]
    fn test_after_hooks_run_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut composite: Composite<dyn StepListener> = Composite::new();
        composite.register(Arc::new(Recording { name: "a", log: log.clone() }));
        composite.register(Arc::new(Recording { name: "b", log: log.clone() }));

        let mut step = StepExecution::new("s", 1, 1);
        composite.before_step(&mut step).unwrap();
        composite.after_step(&mut step).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["before:a", "before:b", "after:b", "after:a"]
        );
    }
}
