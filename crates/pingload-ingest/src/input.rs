//! Input file access
//!
//! Input files are comma-delimited with a header row, usually gzip-compressed
//! (possibly as several concatenated members). A backslash escapes the next
//! byte both inside and outside quotes, which the `csv` crate cannot express,
//! so [`Requoting`] rewrites the stream into plain RFC 4180 quoting first.
//! NUL bytes are dropped before either stage sees them.

use std::fs::File;
use std::collections::VecDeque;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use flate2::read::MultiGzDecoder;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::FileError;
use crate::header::HeaderIndex;

/// Extension that marks gzip input.
pub const GZIP_EXTENSION: &str = "gz";

/// Removes every NUL byte from the wrapped stream.
pub struct NulStripping<R> {
    inner: R,
}

impl<R: Read> NulStripping<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for NulStripping<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }

            let mut kept = 0;
            for i in 0..n {
                if buf[i] != 0 {
                    buf[kept] = buf[i];
                    kept += 1;
                }
            }

            // A chunk of nothing but NULs is not end of stream
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

const DELIMITER: u8 = b',';
const QUOTE: u8 = b'"';
const ESCAPE: u8 = b'\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    /// Before the first byte of a record
    RecordStart,
    /// Directly after a delimiter
    FieldStart,
    Unquoted,
    UnquotedEscape,
    Quoted,
    QuotedEscape,
    /// A quote seen inside a quoted field: closes it unless doubled
    QuotedQuote,
}

/// Rewrites backslash-escaped CSV into fully quoted RFC 4180 CSV.
///
/// Every field is emitted between quotes with embedded quotes doubled, so an
/// escaped delimiter, quote or newline reaches the parser as field content.
/// Unescaped input parses to the same fields before and after the rewrite.
pub struct Requoting<R> {
    inner: R,
    state: Field,
    pending: VecDeque<u8>,
    chunk: Vec<u8>,
    done: bool,
}

impl<R: Read> Requoting<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: Field::RecordStart,
            pending: VecDeque::new(),
            chunk: vec![0; 8 * 1024],
            done: false,
        }
    }

    fn literal(&mut self, byte: u8) {
        if byte == QUOTE {
            self.pending.push_back(QUOTE);
        }
        self.pending.push_back(byte);
    }

    fn close_field(&mut self, terminator: u8) {
        self.pending.push_back(QUOTE);
        self.pending.push_back(terminator);
        self.state = if terminator == DELIMITER {
            Field::FieldStart
        } else {
            Field::RecordStart
        };
    }

    fn unquoted(&mut self, byte: u8) {
        match byte {
            ESCAPE => self.state = Field::UnquotedEscape,
            DELIMITER | b'\n' | b'\r' => self.close_field(byte),
            _ => {
                self.literal(byte);
                self.state = Field::Unquoted;
            },
        }
    }

    fn push(&mut self, byte: u8) {
        match self.state {
            Field::RecordStart if byte == b'\n' || byte == b'\r' => self.pending.push_back(byte),
            Field::RecordStart | Field::FieldStart => {
                self.pending.push_back(QUOTE);
                if byte == QUOTE {
                    self.state = Field::Quoted;
                } else {
                    self.unquoted(byte);
                }
            },
            Field::Unquoted => self.unquoted(byte),
            Field::UnquotedEscape => {
                self.literal(byte);
                self.state = Field::Unquoted;
            },
            Field::Quoted => match byte {
                ESCAPE => self.state = Field::QuotedEscape,
                QUOTE => self.state = Field::QuotedQuote,
                _ => self.pending.push_back(byte),
            },
            Field::QuotedEscape => {
                self.literal(byte);
                self.state = Field::Quoted;
            },
            Field::QuotedQuote if byte == QUOTE => {
                self.literal(QUOTE);
                self.state = Field::Quoted;
            },
            Field::QuotedQuote => self.unquoted(byte),
        }
    }

    fn finish(&mut self) {
        if !matches!(self.state, Field::RecordStart | Field::FieldStart) {
            self.pending.push_back(QUOTE);
        }
        self.state = Field::RecordStart;
        self.done = true;
    }
}

impl<R: Read> Read for Requoting<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() && !self.done {
            let n = self.inner.read(&mut self.chunk)?;
            if n == 0 {
                self.finish();
            } else {
                for i in 0..n {
                    let byte = self.chunk[i];
                    self.push(byte);
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

pub type RecordReader = csv::Reader<Box<dyn Read + Send>>;

/// An opened input file positioned at its first data row.
pub struct InputFile {
    pub reader: RecordReader,
    pub header: HeaderIndex,
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(GZIP_EXTENSION))
}

/// Build the CSV reader used for every input, over any byte source.
pub fn record_reader<R: Read + Send + 'static>(source: R) -> RecordReader {
    let source: Box<dyn Read + Send> = Box::new(Requoting::new(NulStripping::new(source)));
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source)
}

fn read_error(path: &Path, error: csv::Error) -> FileError {
    FileError::Read {
        path: path.display().to_string(),
        source: io::Error::from(error),
    }
}

/// Open `path`, decompressing when it ends in `.gz`, and index its header.
pub fn open_input(path: &Path) -> Result<InputFile, FileError> {
    let file = File::open(path).map_err(|source| FileError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let source: Box<dyn Read + Send> = if is_gzip(path) {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut reader = record_reader(source);
    let header_row = reader.headers().map_err(|e| read_error(path, e))?.clone();
    let header = index_header(path, &header_row)?;

    debug!(path = %path.display(), columns = header_row.len(), "Input opened");
    Ok(InputFile { reader, header })
}

fn index_header(path: &Path, header_row: &StringRecord) -> Result<HeaderIndex, FileError> {
    if header_row.iter().all(|field| field.trim().is_empty()) {
        return Err(FileError::EmptyFile {
            path: path.display().to_string(),
            skipped: 0,
        });
    }

    HeaderIndex::from_header(header_row.iter()).map_err(|source| FileError::HeaderMismatch {
        path: path.display().to_string(),
        source,
    })
}

/// Every `*.gz` file under `dir`, recursively, in lexicographic path order.
pub fn discover_inputs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && is_gzip(entry.path()) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}
