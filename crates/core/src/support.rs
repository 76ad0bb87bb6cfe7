// Ready-made item collaborators over in-process collections

use crate::domain::ExecutionContext;
use crate::error::ItemError;
use crate::port::{ItemReader, ItemStream, ItemWriter};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Restartable reader over a vector.
///
/// The read position is checkpointed under `<name>.position`, so a restarted
/// step resumes after the last committed item.
pub struct ListItemReader<T> {
    items: Vec<T>,
    position: usize,
    marked: usize,
    key: String,
}

impl<T> ListItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self::named("list_reader", items)
    }

    pub fn named(name: &str, items: Vec<T>) -> Self {
        Self {
            items,
            position: 0,
            marked: 0,
            key: format!("{}.position", name),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

#[async_trait]
impl<T: Send> ItemStream for ListItemReader<T> {
    async fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        let position = context.get_long(&self.key)?.unwrap_or(0);
        if position < 0 || position as usize > self.items.len() {
            return Err(format!(
                "checkpoint {} = {} is outside the {} available items",
                self.key,
                position,
                self.items.len()
            )
            .into());
        }
        self.position = position as usize;
        self.marked = self.position;
        Ok(())
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context.put_long(self.key.clone(), self.position as i64);
        Ok(())
    }
}

#[async_trait]
impl<T: Clone + Send> ItemReader<T> for ListItemReader<T> {
    async fn read(&mut self) -> Result<Option<T>, ItemError> {
        let item = self.items.get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        Ok(item)
    }

    fn mark(&mut self) -> Result<(), ItemError> {
        self.marked = self.position;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ItemError> {
        self.position = self.marked;
        Ok(())
    }
}

/// Handle onto the items a [`CollectingItemWriter`] has flushed
#[derive(Clone)]
pub struct Collected<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Collected<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writer that buffers a chunk and publishes it on flush.
///
/// Items written in a chunk that rolls back are discarded by `clear`.
pub struct CollectingItemWriter<T> {
    buffer: Vec<T>,
    output: Arc<Mutex<Vec<T>>>,
}

impl<T> CollectingItemWriter<T> {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            output: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn collected(&self) -> Collected<T> {
        Collected {
            items: self.output.clone(),
        }
    }
}

impl<T> Default for CollectingItemWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> ItemStream for CollectingItemWriter<T> {}

#[async_trait]
impl<T: Send> ItemWriter<T> for CollectingItemWriter<T> {
    async fn write(&mut self, item: T) -> Result<(), ItemError> {
        self.buffer.push(item);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ItemError> {
        let mut output = self
            .output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        output.append(&mut self.buffer);
        Ok(())
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_reset_rewinds_to_mark() {
        let mut reader = ListItemReader::new(vec![1, 2, 3]);
        reader.open(&ExecutionContext::new()).await.unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        reader.mark().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(2));
        assert_eq!(reader.read().await.unwrap(), Some(3));
        reader.reset().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_reader_resumes_from_checkpoint() {
        let mut context = ExecutionContext::new();
        let mut first = ListItemReader::named("numbers", vec!["a", "b", "c"]);
        first.open(&context).await.unwrap();
        first.read().await.unwrap();
        first.read().await.unwrap();
        first.update(&mut context).await.unwrap();
        assert_eq!(context.get_long("numbers.position").unwrap(), Some(2));

        let mut restarted = ListItemReader::named("numbers", vec!["a", "b", "c"]);
        restarted.open(&context).await.unwrap();
        assert_eq!(restarted.read().await.unwrap(), Some("c"));
        assert_eq!(restarted.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_rejects_checkpoint_past_end() {
        let mut context = ExecutionContext::new();
        context.put_long("list_reader.position", 9);
        let mut reader = ListItemReader::new(vec![1]);
        assert!(reader.open(&context).await.is_err());
    }

    #[tokio::test]
    async fn test_writer_publishes_on_flush_only() {
        let mut writer = CollectingItemWriter::new();
        let collected = writer.collected();

        writer.write(1).await.unwrap();
        writer.write(2).await.unwrap();
        writer.clear();
        assert!(collected.is_empty());

        writer.write(3).await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(collected.snapshot(), vec![3]);
    }
}
