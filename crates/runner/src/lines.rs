// Line-file item collaborators
//
// Reader checkpoint: number of lines consumed. Writer checkpoint: byte length
// of committed output. A restarted writer truncates everything past that
// length, so output flushed by a chunk that never committed is discarded.
// That includes a crash between flush and commit: the stored offset predates
// the flushed chunk, and the restart rewrites those lines exactly once.

use async_trait::async_trait;
use chunkline_core::domain::ExecutionContext;
use chunkline_core::port::{ItemProcessor, ItemReader, ItemStream, ItemWriter};
use chunkline_core::ItemError;
use std::collections::VecDeque;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

const READER_KEY: &str = "line_reader.line";
const WRITER_KEY: &str = "line_writer.offset";

/// One input line with its 1-based line number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub number: u64,
    pub text: String,
}

/// A line the processor refuses to copy; skippable
#[derive(Debug, Error)]
#[error("line {number} is malformed: {reason}")]
pub struct MalformedLine {
    pub number: u64,
    pub reason: String,
}

pub struct LineFileReader {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    consumed: u64,
    marked: u64,
    /// Lines handed out since the last mark, replayed after a reset
    since_mark: Vec<Line>,
    replay: VecDeque<Line>,
}

impl LineFileReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: None,
            consumed: 0,
            marked: 0,
            since_mark: Vec::new(),
            replay: VecDeque::new(),
        }
    }

    async fn next_from_file(&mut self) -> Result<Option<String>, ItemError> {
        let path = &self.path;
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| format!("{} was read before open", path.display()))?;
        Ok(lines.next_line().await?)
    }
}

#[async_trait]
impl ItemStream for LineFileReader {
    async fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| format!("cannot open {}: {}", self.path.display(), e))?;
        self.lines = Some(BufReader::new(file).lines());
        self.since_mark.clear();
        self.replay.clear();
        self.consumed = 0;

        let resume_at = context.get_long(READER_KEY)?.unwrap_or(0);
        while self.consumed < resume_at as u64 {
            if self.next_from_file().await?.is_none() {
                return Err(format!(
                    "{} has fewer than the {} lines already processed",
                    self.path.display(),
                    resume_at
                )
                .into());
            }
            self.consumed += 1;
        }
        self.marked = self.consumed;
        Ok(())
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context.put_long(READER_KEY, self.consumed as i64);
        Ok(())
    }

    async fn close(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        self.lines = None;
        Ok(())
    }
}

#[async_trait]
impl ItemReader<Line> for LineFileReader {
    async fn read(&mut self) -> Result<Option<Line>, ItemError> {
        let line = match self.replay.pop_front() {
            Some(line) => line,
            None => match self.next_from_file().await? {
                Some(text) => Line {
                    number: self.consumed + 1,
                    text,
                },
                None => return Ok(None),
            },
        };
        self.consumed = line.number;
        self.since_mark.push(line.clone());
        Ok(Some(line))
    }

    fn mark(&mut self) -> Result<(), ItemError> {
        self.marked = self.consumed;
        self.since_mark.clear();
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ItemError> {
        for line in self.since_mark.drain(..).rev() {
            self.replay.push_front(line);
        }
        self.consumed = self.marked;
        Ok(())
    }
}

/// Trims lines, filters blanks and `#` comments, rejects control characters
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizeLine;

#[async_trait]
impl ItemProcessor<Line, String> for NormalizeLine {
    async fn process(&self, line: Line) -> Result<Option<String>, ItemError> {
        let text = line.text.trim();
        if text.is_empty() || text.starts_with('#') {
            return Ok(None);
        }
        if let Some(c) = text.chars().find(|c| c.is_control() && *c != '\t') {
            return Err(Box::new(MalformedLine {
                number: line.number,
                reason: format!("control character {:?}", c),
            }));
        }
        Ok(Some(text.split_whitespace().collect::<Vec<_>>().join(" ")))
    }
}

pub struct LineFileWriter {
    path: PathBuf,
    file: Option<File>,
    buffer: Vec<String>,
    /// Bytes of output on disk written by this writer
    offset: u64,
    chunk_start: u64,
    in_chunk: bool,
    truncate_to: Option<u64>,
}

impl LineFileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            buffer: Vec::new(),
            offset: 0,
            chunk_start: 0,
            in_chunk: false,
            truncate_to: None,
        }
    }
}

#[async_trait]
impl ItemStream for LineFileWriter {
    async fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| format!("cannot open {}: {}", self.path.display(), e))?;

        let committed = context.get_long(WRITER_KEY)?.unwrap_or(0) as u64;
        let length = file.metadata().await?.len();
        if committed > length {
            return Err(format!(
                "{} is {} bytes but {} were committed",
                self.path.display(),
                length,
                committed
            )
            .into());
        }
        file.set_len(committed).await?;

        self.file = Some(file);
        self.offset = committed;
        self.buffer.clear();
        self.in_chunk = false;
        self.truncate_to = None;
        Ok(())
    }

    async fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context.put_long(WRITER_KEY, self.offset as i64);
        self.in_chunk = false;
        Ok(())
    }

    async fn close(&mut self, _context: &ExecutionContext) -> Result<(), ItemError> {
        if let Some(file) = self.file.take() {
            file.sync_all().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ItemWriter<String> for LineFileWriter {
    async fn write(&mut self, item: String) -> Result<(), ItemError> {
        if !self.in_chunk {
            self.chunk_start = self.offset;
            self.in_chunk = true;
        }
        self.buffer.push(item);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ItemError> {
        let path = &self.path;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| format!("{} was written before open", path.display()))?;
        if let Some(length) = self.truncate_to.take() {
            file.set_len(length).await?;
        }
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut bytes = String::new();
        for line in self.buffer.drain(..) {
            bytes.push_str(&line);
            bytes.push('\n');
        }
        file.write_all(bytes.as_bytes()).await?;
        file.sync_data().await?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn clear(&mut self) {
        self.buffer.clear();
        if self.in_chunk {
            // Drop whatever the rolled-back chunk already flushed
            self.truncate_to = Some(self.chunk_start);
            self.offset = self.chunk_start;
            self.in_chunk = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn input(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("input.txt");
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    async fn read_all(reader: &mut LineFileReader) -> Vec<String> {
        let mut texts = Vec::new();
        while let Some(line) = reader.read().await.unwrap() {
            texts.push(line.text);
        }
        texts
    }

    #[tokio::test]
    async fn test_reader_resumes_from_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = input(&dir, "a\nb\nc\nd\n").await;

        let mut reader = LineFileReader::new(&path);
        reader.open(&ExecutionContext::new()).await.unwrap();
        reader.read().await.unwrap();
        reader.read().await.unwrap();
        let mut context = ExecutionContext::new();
        reader.update(&mut context).await.unwrap();
        assert_eq!(context.get_long(READER_KEY).unwrap(), Some(2));

        let mut restarted = LineFileReader::new(&path);
        restarted.open(&context).await.unwrap();
        let line = restarted.read().await.unwrap().unwrap();
        assert_eq!(line, Line { number: 3, text: "c".into() });
    }

    #[tokio::test]
    async fn test_reader_reset_replays_since_mark() {
        let dir = TempDir::new().unwrap();
        let path = input(&dir, "a\nb\nc\n").await;

        let mut reader = LineFileReader::new(&path);
        reader.open(&ExecutionContext::new()).await.unwrap();
        reader.read().await.unwrap();
        reader.mark().unwrap();
        reader.read().await.unwrap();
        reader.read().await.unwrap();
        reader.reset().unwrap();

        assert_eq!(read_all(&mut reader).await, vec!["b", "c"]);
        let mut context = ExecutionContext::new();
        reader.update(&mut context).await.unwrap();
        assert_eq!(context.get_long(READER_KEY).unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_reader_rejects_checkpoint_past_end() {
        let dir = TempDir::new().unwrap();
        let path = input(&dir, "a\n").await;
        let mut context = ExecutionContext::new();
        context.put_long(READER_KEY, 5);

        let mut reader = LineFileReader::new(&path);
        assert!(reader.open(&context).await.is_err());
    }

    #[tokio::test]
    async fn test_normalize_filters_and_rejects() {
        let line = |number, text: &str| Line {
            number,
            text: text.to_string(),
        };
        let processor = NormalizeLine;
        assert_eq!(
            processor.process(line(1, "  many   spaces ")).await.unwrap(),
            Some("many spaces".to_string())
        );
        assert_eq!(processor.process(line(2, "   ")).await.unwrap(), None);
        assert_eq!(processor.process(line(3, "# note")).await.unwrap(), None);

        let err = processor.process(line(4, "bad\u{7}bell")).await.unwrap_err();
        let malformed = err.downcast_ref::<MalformedLine>().unwrap();
        assert_eq!(malformed.number, 4);
    }

    #[tokio::test]
    async fn test_writer_truncates_to_committed_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");

        let mut writer = LineFileWriter::new(&path);
        writer.open(&ExecutionContext::new()).await.unwrap();
        writer.write("one".into()).await.unwrap();
        writer.flush().await.unwrap();
        let mut committed = ExecutionContext::new();
        writer.update(&mut committed).await.unwrap();

        // Flushed but never checkpointed
        writer.write("two".into()).await.unwrap();
        writer.flush().await.unwrap();
        writer.close(&committed).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "one\ntwo\n");

        let mut restarted = LineFileWriter::new(&path);
        restarted.open(&committed).await.unwrap();
        restarted.write("three".into()).await.unwrap();
        restarted.flush().await.unwrap();
        restarted.close(&committed).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "one\nthree\n");
    }

    #[tokio::test]
    async fn test_crash_after_flush_does_not_duplicate_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");

        let mut committed = ExecutionContext::new();
        {
            let mut writer = LineFileWriter::new(&path);
            writer.open(&ExecutionContext::new()).await.unwrap();
            writer.write("1".into()).await.unwrap();
            writer.flush().await.unwrap();
            writer.update(&mut committed).await.unwrap();

            // Second chunk reaches the file; the process dies before commit
            writer.write("2".into()).await.unwrap();
            writer.flush().await.unwrap();
            let mut staged = committed.clone();
            writer.update(&mut staged).await.unwrap();
        }

        let mut restarted = LineFileWriter::new(&path);
        restarted.open(&committed).await.unwrap();
        restarted.write("2".into()).await.unwrap();
        restarted.flush().await.unwrap();
        restarted.close(&committed).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "1\n2\n");
    }

    #[tokio::test]
    async fn test_writer_clear_discards_flushed_chunk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");

        let mut writer = LineFileWriter::new(&path);
        writer.open(&ExecutionContext::new()).await.unwrap();
        writer.write("kept".into()).await.unwrap();
        writer.flush().await.unwrap();
        writer.update(&mut ExecutionContext::new()).await.unwrap();

        writer.write("lost".into()).await.unwrap();
        writer.flush().await.unwrap();
        writer.clear();
        writer.write("again".into()).await.unwrap();
        writer.flush().await.unwrap();
        writer.close(&ExecutionContext::new()).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "kept\nagain\n");
    }
}
