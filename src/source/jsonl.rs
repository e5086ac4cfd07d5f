//! # JSON-Lines Source
//!
//! Reads newline-delimited JSON objects from a single file or from every
//! regular file of a directory, in lexical file-name order. Files are
//! streamed line by line, so memory use does not grow with the source.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

use super::traits::{Record, RecordSource, RecordStream, SourceError};

#[derive(Debug, Clone, Default)]
pub struct JsonLinesSource {
    /// Relative source refs resolve against this directory
    root: Option<PathBuf>,
}

impl JsonLinesSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, source_ref: &str) -> PathBuf {
        let path = Path::new(source_ref);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    async fn files_for(&self, source_ref: &str) -> Result<VecDeque<PathBuf>, SourceError> {
        let path = self.resolve(source_ref);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| SourceError::unavailable(source_ref, e.to_string()))?;

        if metadata.is_file() {
            return Ok(VecDeque::from([path]));
        }

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| SourceError::io(&path, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::io(&path, e))?
        {
            let is_hidden = entry.file_name().to_string_lossy().starts_with('.');
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| SourceError::io(&entry.path(), e))?;
            if file_type.is_file() && !is_hidden {
                files.push(entry.path());
            }
        }
        files.sort();
        debug!(source_ref, files = files.len(), "Resolved directory source");
        Ok(files.into())
    }
}

struct OpenFile {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

struct ScanState {
    files: VecDeque<PathBuf>,
    current: Option<OpenFile>,
    columns: Option<Vec<String>>,
}

impl ScanState {
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        loop {
            if self.current.is_none() {
                let Some(path) = self.files.pop_front() else {
                    return Ok(None);
                };
                let file = File::open(&path)
                    .await
                    .map_err(|e| SourceError::io(&path, e))?;
                self.current = Some(OpenFile {
                    path,
                    lines: BufReader::new(file).lines(),
                    line_no: 0,
                });
            }

            let Some(open) = self.current.as_mut() else {
                continue;
            };
            let line = open
                .lines
                .next_line()
                .await
                .map_err(|e| SourceError::io(&open.path, e))?;

            let Some(line) = line else {
                self.current = None;
                continue;
            };
            open.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record = Record::from_json_str(&line).map_err(|reason| SourceError::Parse {
                location: format!("{}:{}", open.path.display(), open.line_no),
                reason,
            })?;
            return Ok(Some(match &self.columns {
                Some(columns) => record.project(columns),
                None => record,
            }));
        }
    }
}

#[async_trait]
impl RecordSource for JsonLinesSource {
    async fn scan(
        &self,
        source_ref: &str,
        columns: Option<&[String]>,
    ) -> Result<RecordStream, SourceError> {
        let state = ScanState {
            files: self.files_for(source_ref).await?,
            current: None,
            columns: columns.map(<[String]>::to_vec),
        };

        let records = stream::try_unfold(state, |mut state| async move {
            Ok(state.next_record().await?.map(|record| (record, state)))
        });
        Ok(records.boxed())
    }
}
