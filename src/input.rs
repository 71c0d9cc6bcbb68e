use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::warn;

use crate::types::ScanTarget;

/// Lazily yields scan targets, one per input line.
///
/// Every line is a candidate URL and is yielded as written, minus its line
/// terminator. Only empty lines are skipped; anything else that is not a URL
/// fails later as a per-target error.
pub struct JobSource<R> {
    lines: Lines<R>,
}

impl JobSource<BufReader<File>> {
    /// Open a target list file. Errors if it is missing, not a regular file, or unreadable.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("input file path does not exist: {}", path.display()))?;
        if !meta.is_file() {
            bail!("input path is not a regular file: {}", path.display());
        }
        let file = File::open(path)
            .await
            .with_context(|| format!("failed to open input file: {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: AsyncBufRead + Unpin> JobSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next non-empty line, or `None` once the input is exhausted.
    /// A read error mid-stream ends the sequence.
    pub async fn next_target(&mut self) -> Option<ScanTarget> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(mut line)) => {
                    if line.ends_with('\r') {
                        line.pop();
                    }
                    if line.is_empty() {
                        continue;
                    }
                    return Some(line);
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "input read failed, treating as end of input");
                    return None;
                }
            }
        }
    }
}
