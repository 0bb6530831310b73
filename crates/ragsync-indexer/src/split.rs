//! Splitter boundary and a line-window splitter.

use crate::IndexerError;

/// Cuts file content into ordered chunk texts.
///
/// Implementations must be deterministic: identical input yields identical
/// chunks in the same order.
pub trait Splitter: Send + Sync {
    fn split(&self, path: &str, content: &str) -> Result<Vec<String>, IndexerError>;
}

/// Fixed-size line windows with overlap.
#[derive(Debug, Clone)]
pub struct LineSplitter {
    chunk_lines: usize,
    overlap: usize,
}

impl LineSplitter {
    /// `overlap` is clamped below `chunk_lines`.
    pub fn new(chunk_lines: usize, overlap: usize) -> Self {
        let chunk_lines = chunk_lines.max(1);
        Self {
            chunk_lines,
            overlap: overlap.min(chunk_lines - 1),
        }
    }
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new(80, 20)
    }
}

impl Splitter for LineSplitter {
    fn split(&self, _path: &str, content: &str) -> Result<Vec<String>, IndexerError> {
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let step = self.chunk_lines - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.chunk_lines).min(lines.len());
            chunks.push(lines[start..end].concat());
            if end == lines.len() {
                break;
            }
            start += step;
        }

        Ok(chunks)
    }
}
