//! Streaming CSV source.
//!
//! Reads the bulk export row by row through a fixed-size buffer. Never loads
//! the entire file into memory, and stops buffering a row as soon as it grows
//! past the configured ceiling. Tolerant of:
//!
//! - Mixed `\n` and `\r\n` line endings
//! - Quoted fields spanning several lines, with `""` escapes
//! - Stray quotes inside unquoted fields (kept literally)
//! - A UTF-8 BOM at the start of the file
//! - Non-UTF-8 bytes (decoded as Windows-1252)
//! - An unterminated quoted field at EOF (logs a warning)

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{MailIndexError, Result};

/// One row produced by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRow {
    /// A row within the size ceiling, split into decoded fields.
    Fields {
        line: u64,
        size: u64,
        fields: Vec<String>,
    },
    /// A row over the size ceiling. Its content was discarded while reading.
    Oversize { line: u64, size: u64 },
}

impl SourceRow {
    /// 1-based line where the row starts.
    pub fn line(&self) -> u64 {
        match self {
            SourceRow::Fields { line, .. } | SourceRow::Oversize { line, .. } => *line,
        }
    }
}

/// A CSV file on disk. Each call to [`CsvSource::rows`] restarts from the top.
pub struct CsvSource {
    path: PathBuf,
    file_size: u64,
    max_record_size: u64,
    buffer_size: usize,
}

impl CsvSource {
    /// Open a source, verifying that the file exists and is readable.
    pub fn open(path: impl AsRef<Path>, max_record_size: u64, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata =
            std::fs::metadata(&path).map_err(|e| MailIndexError::unreadable(&path, &e))?;
        Ok(Self {
            path,
            file_size: metadata.len(),
            max_record_size,
            buffer_size,
        })
    }

    /// Total size of the underlying file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header and the first `n` data rows, for a quick look at the file.
    pub fn head(&self, n: usize) -> Result<(Vec<String>, Vec<SourceRow>)> {
        let mut rows = self.rows()?;
        let header = rows.header().to_vec();
        let head = rows.by_ref().take(n).collect::<Result<Vec<_>>>()?;
        Ok((header, head))
    }

    /// Start a fresh pass over the file. The header row is read immediately.
    pub fn rows(&self) -> Result<CsvRows<BufReader<File>>> {
        let file = File::open(&self.path).map_err(|e| MailIndexError::unreadable(&self.path, &e))?;
        let reader = BufReader::with_capacity(self.buffer_size, file);
        CsvRows::new(reader, &self.path, self.max_record_size)
    }
}

/// Lazy iterator over the data rows of a CSV stream.
pub struct CsvRows<R: BufRead> {
    reader: R,
    path: PathBuf,
    max_record_size: u64,
    header: Vec<String>,
    state: RowState,
    lines_consumed: u64,
    bytes_read: u64,
    done: bool,
}

impl<R: BufRead> CsvRows<R> {
    /// Wrap a reader and consume its header row.
    pub fn new(reader: R, path: impl Into<PathBuf>, max_record_size: u64) -> Result<Self> {
        let mut rows = Self {
            reader,
            path: path.into(),
            max_record_size,
            header: Vec::new(),
            state: RowState::new(1),
            lines_consumed: 0,
            bytes_read: 0,
            done: false,
        };
        rows.skip_bom()?;
        rows.header = match rows.next_row()? {
            Some(SourceRow::Fields { fields, .. }) => fields,
            Some(SourceRow::Oversize { line, size }) => {
                return Err(MailIndexError::SourceUnreadable {
                    path: rows.path.clone(),
                    reason: format!("header row at line {line} is {size} bytes"),
                });
            }
            None => Vec::new(),
        };
        Ok(rows)
    }

    /// Column names from the first row (empty for an empty file).
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Bytes consumed from the underlying reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn skip_bom(&mut self) -> Result<()> {
        let buf = self
            .reader
            .fill_buf()
            .map_err(|e| MailIndexError::unreadable(&self.path, &e))?;
        if buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
            self.reader.consume(3);
            self.bytes_read += 3;
        }
        Ok(())
    }

    /// Read the next row, skipping blank lines.
    fn next_row(&mut self) -> Result<Option<SourceRow>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let (consumed, finished) = {
                let buf = self
                    .reader
                    .fill_buf()
                    .map_err(|e| MailIndexError::unreadable(&self.path, &e))?;
                if buf.is_empty() {
                    break; // EOF
                }
                let mut consumed = buf.len();
                let mut finished = false;
                for (i, &b) in buf.iter().enumerate() {
                    if b == b'\n' {
                        self.lines_consumed += 1;
                    }
                    if self.state.push_byte(b, self.max_record_size) {
                        consumed = i + 1;
                        finished = true;
                        break;
                    }
                }
                (consumed, finished)
            };
            self.reader.consume(consumed);
            self.bytes_read += consumed as u64;

            if finished {
                let state = std::mem::replace(&mut self.state, RowState::new(self.lines_consumed + 1));
                if let Some(row) = state.finish() {
                    return Ok(Some(row));
                }
            }
        }

        self.done = true;
        let state = std::mem::replace(&mut self.state, RowState::new(self.lines_consumed + 1));
        if state.in_quotes {
            warn!(
                line = state.start_line,
                path = %self.path.display(),
                "Unterminated quoted field at end of file"
            );
        }
        Ok(state.finish())
    }
}

impl<R: BufRead> Iterator for CsvRows<R> {
    type Item = Result<SourceRow>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Parser state for the row currently being read.
struct RowState {
    start_line: u64,
    fields: Vec<String>,
    field: Vec<u8>,
    field_started: bool,
    in_quotes: bool,
    after_quote: bool,
    /// A `\r` outside quotes, dropped only if `\n` follows.
    pending_cr: bool,
    size: u64,
    oversize: bool,
}

impl RowState {
    fn new(start_line: u64) -> Self {
        Self {
            start_line,
            fields: Vec::new(),
            field: Vec::new(),
            field_started: false,
            in_quotes: false,
            after_quote: false,
            pending_cr: false,
            size: 0,
            oversize: false,
        }
    }

    /// Feed one byte. Returns `true` when the row terminator was consumed.
    fn push_byte(&mut self, b: u8, max_record_size: u64) -> bool {
        if !self.in_quotes {
            if std::mem::take(&mut self.pending_cr) {
                if b == b'\n' {
                    return true;
                }
                self.accept(b'\r', max_record_size);
            }
            match b {
                b'\n' => return true,
                b'\r' => {
                    self.pending_cr = true;
                    return false;
                }
                _ => {}
            }
        }
        self.accept(b, max_record_size);
        false
    }

    /// Count one content byte toward the row size and route it.
    fn accept(&mut self, b: u8, max_record_size: u64) {
        self.size += 1;
        if !self.oversize && self.size > max_record_size {
            self.oversize = true;
            self.fields = Vec::new();
            self.field = Vec::new();
        }

        if self.in_quotes {
            if b == b'"' {
                self.in_quotes = false;
                self.after_quote = true;
            } else {
                self.push_content(b);
            }
            return;
        }

        let after_quote = std::mem::take(&mut self.after_quote);
        match b {
            b'"' if after_quote => {
                // Doubled quote inside a quoted field
                self.push_content(b'"');
                self.in_quotes = true;
            }
            b'"' if !self.field_started => {
                self.in_quotes = true;
                self.field_started = true;
            }
            b',' => self.end_field(),
            _ => self.push_content(b),
        }
    }

    fn push_content(&mut self, b: u8) {
        self.field_started = true;
        if !self.oversize {
            self.field.push(b);
        }
    }

    fn end_field(&mut self) {
        if !self.oversize {
            let bytes = std::mem::take(&mut self.field);
            self.fields.push(decode_field(bytes));
        }
        self.field_started = false;
    }

    /// Close the row. Blank lines produce `None`.
    fn finish(mut self) -> Option<SourceRow> {
        if self.size == 0 && self.fields.is_empty() {
            return None;
        }
        if self.oversize {
            return Some(SourceRow::Oversize {
                line: self.start_line,
                size: self.size,
            });
        }
        self.end_field();
        Some(SourceRow::Fields {
            line: self.start_line,
            size: self.size,
            fields: self.fields,
        })
    }
}

/// Decode field bytes as UTF-8, falling back to Windows-1252.
fn decode_field(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(e.as_bytes());
            decoded.into_owned()
        }
    }
}
