//! Delimited text input
//!
//! A [`DelimitedSource`] validates the header up front and then yields one
//! [`RawRecord`] per data row, lazily, so a file is never held in memory.

use crate::error::{IngestError, PipelineResult};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a raw record came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub file: Arc<str>,
    /// 1-based line number in the source file
    pub line: u64,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// An untyped row, used only until it is validated and encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub fields: Vec<String>,
    pub provenance: Provenance,
}

/// Streaming reader over one delimited file
pub struct DelimitedSource {
    path: PathBuf,
    label: Arc<str>,
    header: Vec<String>,
    reader: csv::Reader<File>,
    record: csv::StringRecord,
    done: bool,
}

impl fmt::Debug for DelimitedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelimitedSource")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish()
    }
}

impl DelimitedSource {
    /// Open a file and validate its header row
    ///
    /// A missing header, an empty column name or a duplicated column name make
    /// the whole file malformed.
    pub fn open(path: &Path, delimiter: u8) -> PipelineResult<Self> {
        let label: Arc<str> = Arc::from(path.display().to_string());
        let malformed = |message: String| IngestError::MalformedInput {
            file: label.to_string(),
            message,
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| IngestError::Csv {
                file: label.to_string(),
                source: e,
            })?;

        let raw_header = reader.headers().map_err(|e| IngestError::Csv {
            file: label.to_string(),
            source: e,
        })?;
        if raw_header.is_empty() {
            return Err(malformed("missing header row".to_string()));
        }

        let mut header = Vec::with_capacity(raw_header.len());
        let mut seen = HashSet::new();
        for (idx, name) in raw_header.iter().enumerate() {
            let name = name.trim();
            if name.is_empty() {
                return Err(malformed(format!("column {} has an empty name", idx + 1)));
            }
            if !seen.insert(name.to_string()) {
                return Err(malformed(format!("duplicate column '{}'", name)));
            }
            header.push(name.to_string());
        }

        Ok(Self {
            path: path.to_path_buf(),
            label,
            header,
            reader,
            record: csv::StringRecord::new(),
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column names from the header row
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Bytes consumed from the file so far
    pub fn bytes_read(&self) -> u64 {
        self.reader.position().byte()
    }
}

impl Iterator for DelimitedSource {
    type Item = PipelineResult<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                let line = self.record.position().map_or(0, |p| p.line());
                Some(Ok(RawRecord {
                    fields: self.record.iter().map(str::to_string).collect(),
                    provenance: Provenance {
                        file: Arc::clone(&self.label),
                        line,
                    },
                }))
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(IngestError::Csv {
                    file: self.label.to_string(),
                    source: e,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_reads_records_with_line_numbers() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "sales.csv", " region ,units\nnorth,3\nsouth,4\n");
        let source = DelimitedSource::open(&path, b',').unwrap();
        assert_eq!(source.header(), ["region", "units"]);

        let records: Vec<RawRecord> = source.collect::<PipelineResult<_>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].fields, vec!["south", "4"]);
        assert_eq!(records[1].provenance.line, 3);
        assert!(records[0].provenance.to_string().ends_with("sales.csv:2"));
    }

    #[test]
    fn test_short_rows_are_yielded_not_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "t.csv", "a,b,c\n1,2,3\n4,5\n");
        let records: Vec<RawRecord> = DelimitedSource::open(&path, b',')
            .unwrap()
            .collect::<PipelineResult<_>>()
            .unwrap();
        assert_eq!(records[1].fields.len(), 2);
    }

    #[test]
    fn test_semicolon_delimiter() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "t.csv", "a;b\n1;2\n");
        let mut source = DelimitedSource::open(&path, b';').unwrap();
        assert_eq!(source.next().unwrap().unwrap().fields, vec!["1", "2"]);
        assert!(source.next().is_none());
        assert!(source.bytes_read() > 0);
    }

    #[test]
    fn test_empty_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "t.csv", "");
        assert!(matches!(
            DelimitedSource::open(&path, b','),
            Err(IngestError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_empty_columns_are_malformed() {
        let dir = TempDir::new().unwrap();
        let dup = write(&dir, "dup.csv", "a,b,a\n1,2,3\n");
        let err = DelimitedSource::open(&dup, b',').unwrap_err();
        assert!(err.to_string().contains("duplicate column 'a'"));

        let empty = write(&dir, "empty.csv", "a,,c\n1,2,3\n");
        assert!(matches!(
            DelimitedSource::open(&empty, b','),
            Err(IngestError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            DelimitedSource::open(&dir.path().join("nope.csv"), b','),
            Err(IngestError::Csv { .. })
        ));
    }
}
