//! Incremental record decoder
//!
//! Turns a [`ChunkStream`] into [`RawRecord`]s without ever holding more than
//! one partial line in memory. Chunks may split lines (and multi-byte
//! characters) anywhere; bytes are carried over until a newline arrives and
//! only complete lines are decoded.

use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;

use super::source::ChunkStream;
use super::workbook::WorkbookReader;
use super::{ImportError, Result};

const BOM: char = '\u{feff}';

/// Lower-case a column name and fold every non-alphanumeric run to `_`
///
/// `"First Name"`, `first_name` and `First-Name` all become `first_name`.
/// Camel case is split too, so `FirstName` also becomes `first_name`.
pub fn normalize_column(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;

    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower {
                out.push('_');
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            out.extend(c.to_lowercase());
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }

    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Column names of a source, in order
#[derive(Debug, Clone)]
pub struct Header {
    names: Vec<String>,
    exact: HashMap<String, usize>,
    normalized: HashMap<String, usize>,
}

impl Header {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|n| n.as_ref().trim_start_matches(BOM).trim().to_string())
            .collect();

        let mut exact = HashMap::new();
        let mut normalized = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            exact.entry(name.clone()).or_insert(i);
            normalized.entry(normalize_column(name)).or_insert(i);
        }

        Self {
            names,
            exact,
            normalized,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Column position by exact name, falling back to the normalized form
    pub fn position(&self, name: &str) -> Option<usize> {
        self.exact
            .get(name)
            .or_else(|| self.normalized.get(&normalize_column(name)))
            .copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }
}

/// One decoded row, values in header order
#[derive(Debug, Clone)]
pub struct RawRecord {
    header: Arc<Header>,
    values: Vec<String>,
    row_number: u64,
}

impl RawRecord {
    /// Missing trailing values become empty strings; surplus values are dropped
    pub fn new(header: Arc<Header>, mut values: Vec<String>, row_number: u64) -> Self {
        values.resize(header.len(), String::new());
        Self {
            header,
            values,
            row_number,
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .position(column)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// Row number in the source; the header is row 1
    pub fn row_number(&self) -> u64 {
        self.row_number
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Splits a byte stream into complete lines
#[derive(Debug)]
pub struct LineSplitter {
    carry: Vec<u8>,
    max_line_bytes: usize,
    /// Inside an over-long line; drop bytes until the next newline
    discarding: bool,
    line_number: u64,
}

impl LineSplitter {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            carry: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
            line_number: 0,
        }
    }

    /// Feed a chunk; complete lines are appended to `out` with their line numbers
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<(u64, String)>) {
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.append(&rest[..pos]);
            out.push(self.take_line());
            self.discarding = false;
            rest = &rest[pos + 1..];
        }

        self.append(rest);
    }

    /// Emit the unterminated tail, if any
    pub fn finish(&mut self) -> Option<(u64, String)> {
        if self.carry.is_empty() && !self.discarding {
            return None;
        }
        self.discarding = false;
        Some(self.take_line())
    }

    fn append(&mut self, bytes: &[u8]) {
        if self.discarding {
            return;
        }

        let room = self.max_line_bytes.saturating_sub(self.carry.len());
        if bytes.len() > room {
            self.carry.extend_from_slice(&bytes[..room]);
            self.discarding = true;
            warn!(
                line = self.line_number + 1,
                max_line_bytes = self.max_line_bytes,
                "Line exceeds maximum length, truncating"
            );
        } else {
            self.carry.extend_from_slice(bytes);
        }
    }

    fn take_line(&mut self) -> (u64, String) {
        if self.carry.last() == Some(&b'\r') {
            self.carry.pop();
        }
        self.line_number += 1;
        let line = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        (self.line_number, line)
    }
}

/// Split one delimited line into fields
///
/// Quoted fields may contain commas, and `""` inside quotes is a literal quote.
pub fn parse_fields(line: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .buffer_capacity(line.len() + 1)
        .from_reader(line.as_bytes());

    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => record.iter().map(str::to_string).collect(),
        Ok(false) => Vec::new(),
        Err(e) => {
            warn!("Malformed delimited line, splitting on commas: {}", e);
            line.split(',').map(str::to_string).collect()
        },
    }
}

/// Whitespace-only lines, a lone BOM included, carry no record
pub(crate) fn is_blank(line: &str) -> bool {
    line.trim_matches(|c: char| c.is_whitespace() || c == BOM).is_empty()
}

/// Turns complete lines into a header and records
#[derive(Debug, Default)]
pub struct RecordDecoder {
    header: Option<Arc<Header>>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> Option<&Arc<Header>> {
        self.header.as_ref()
    }

    /// Decode one line; the first non-blank line becomes the header
    pub fn decode(&mut self, line_number: u64, line: &str) -> Option<RawRecord> {
        if is_blank(line) {
            return None;
        }

        match &self.header {
            None => {
                self.header = Some(Arc::new(Header::new(parse_fields(line))));
                None
            },
            Some(header) => Some(RawRecord::new(
                Arc::clone(header),
                parse_fields(line),
                line_number,
            )),
        }
    }
}

/// Pulls records out of a delimited chunk stream
pub struct RecordReader {
    chunks: ChunkStream,
    splitter: LineSplitter,
    decoder: RecordDecoder,
    pending: VecDeque<RawRecord>,
    exhausted: bool,
    bytes_read: u64,
}

impl RecordReader {
    pub fn new(chunks: ChunkStream, max_line_bytes: usize) -> Self {
        Self {
            chunks,
            splitter: LineSplitter::new(max_line_bytes),
            decoder: RecordDecoder::new(),
            pending: VecDeque::new(),
            exhausted: false,
            bytes_read: 0,
        }
    }

    /// Read up to and including the header line
    pub async fn header(&mut self) -> Result<Arc<Header>> {
        loop {
            if let Some(header) = self.decoder.header() {
                return Ok(Arc::clone(header));
            }
            if self.exhausted {
                return Err(ImportError::ParseFatal("source has no header row".to_string()));
            }
            self.fill().await?;
        }
    }

    pub async fn next_record(&mut self) -> Result<Option<RawRecord>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill().await?;
        }
    }

    /// Bytes received from the underlying stream so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    async fn fill(&mut self) -> Result<()> {
        let mut lines = Vec::new();

        match self.chunks.next().await {
            Some(chunk) => {
                let chunk = chunk?;
                self.bytes_read += chunk.len() as u64;
                self.splitter.push(&chunk, &mut lines);
            },
            None => {
                self.exhausted = true;
                lines.extend(self.splitter.finish());
            },
        }

        for (line_number, line) in lines {
            if let Some(record) = self.decoder.decode(line_number, &line) {
                self.pending.push_back(record);
            }
        }
        Ok(())
    }
}

/// A record source of either shape
pub enum RecordSource {
    Delimited(RecordReader),
    Workbook(WorkbookReader),
}

impl RecordSource {
    pub async fn header(&mut self) -> Result<Arc<Header>> {
        match self {
            RecordSource::Delimited(reader) => reader.header().await,
            RecordSource::Workbook(reader) => Ok(reader.header()),
        }
    }

    pub async fn next_record(&mut self) -> Result<Option<RawRecord>> {
        match self {
            RecordSource::Delimited(reader) => reader.next_record().await,
            RecordSource::Workbook(reader) => Ok(reader.next_record()),
        }
    }

    pub fn bytes_read(&self) -> u64 {
        match self {
            RecordSource::Delimited(reader) => reader.bytes_read(),
            RecordSource::Workbook(reader) => reader.byte_len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::source::chunked;
    use bytes::Bytes;

    async fn decode_all(data: &'static [u8], chunk_size: usize) -> Vec<(u64, Vec<String>)> {
        let mut reader = RecordReader::new(chunked(Bytes::from_static(data), chunk_size), 1024);
        reader.header().await.unwrap();

        let mut out = Vec::new();
        while let Some(record) = reader.next_record().await.unwrap() {
            out.push((record.row_number(), record.values().to_vec()));
        }
        out
    }

    #[test]
    fn test_quoted_field_keeps_delimiter() {
        assert_eq!(
            parse_fields(r#""Acme, Inc.",Austin,TX"#),
            vec!["Acme, Inc.", "Austin", "TX"]
        );
    }

    #[test]
    fn test_doubled_quote_is_literal() {
        assert_eq!(
            parse_fields(r#""The ""Best"" Clinic",x"#),
            vec![r#"The "Best" Clinic"#, "x"]
        );
    }

    #[test]
    fn test_normalize_column() {
        assert_eq!(normalize_column("First Name"), "first_name");
        assert_eq!(normalize_column("first_name"), "first_name");
        assert_eq!(normalize_column("FirstName"), "first_name");
        assert_eq!(normalize_column("  ZIP-Code "), "zip_code");
        assert_eq!(normalize_column("Address Line 1"), "address_line_1");
    }

    #[test]
    fn test_header_strips_bom_and_matches_normalized() {
        let header = Header::new(["\u{feff}First Name", " Last Name "]);
        assert_eq!(header.names(), &["First Name", "Last Name"]);
        assert_eq!(header.position("first_name"), Some(0));
        assert_eq!(header.position("Last Name"), Some(1));
        assert!(!header.contains("city"));
    }

    #[test]
    fn test_record_pads_and_truncates_values() {
        let header = Arc::new(Header::new(["a", "b", "c"]));
        let short = RawRecord::new(Arc::clone(&header), vec!["1".into()], 2);
        assert_eq!(short.get("c"), Some(""));

        let long = RawRecord::new(header, vec!["1".into(), "2".into(), "3".into(), "4".into()], 3);
        assert_eq!(long.values().len(), 3);
    }

    #[test]
    fn test_splitter_joins_lines_across_chunks() {
        let mut splitter = LineSplitter::new(1024);
        let mut lines = Vec::new();
        splitter.push(b"ab", &mut lines);
        splitter.push(b"c\r\nde", &mut lines);
        splitter.push(b"f\n", &mut lines);
        assert!(splitter.finish().is_none());

        assert_eq!(lines, vec![(1, "abc".to_string()), (2, "def".to_string())]);
    }

    #[test]
    fn test_splitter_keeps_multibyte_characters_split_across_chunks() {
        let text = "name\nJosé\n".as_bytes();
        let split_at = text.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut splitter = LineSplitter::new(1024);
        let mut lines = Vec::new();
        splitter.push(&text[..split_at], &mut lines);
        splitter.push(&text[split_at..], &mut lines);

        assert_eq!(lines[1].1, "José");
    }

    #[test]
    fn test_splitter_truncates_overlong_line() {
        let mut splitter = LineSplitter::new(4);
        let mut lines = Vec::new();
        splitter.push(b"abcdefgh", &mut lines);
        splitter.push(b"ij\nok\n", &mut lines);

        assert_eq!(lines, vec![(1, "abcd".to_string()), (2, "ok".to_string())]);
    }

    #[test]
    fn test_splitter_finish_emits_tail() {
        let mut splitter = LineSplitter::new(1024);
        let mut lines = Vec::new();
        splitter.push(b"a\nb", &mut lines);
        assert_eq!(splitter.finish(), Some((2, "b".to_string())));
    }

    #[tokio::test]
    async fn test_row_numbers_follow_source_lines() {
        let records = decode_all(b"name,city\nA,X\n\nB,Y", 3).await;
        assert_eq!(
            records,
            vec![
                (2, vec!["A".to_string(), "X".to_string()]),
                (4, vec!["B".to_string(), "Y".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_decoding_is_independent_of_chunking() {
        const DATA: &[u8] = b"name,city\n\"Acme, Inc.\",Austin\nBeta,\"San Jose\"\r\n";
        let whole = decode_all(DATA, DATA.len()).await;
        for chunk_size in [1, 2, 5, 7] {
            assert_eq!(decode_all(DATA, chunk_size).await, whole);
        }
    }

    #[tokio::test]
    async fn test_empty_source_has_no_header() {
        let mut reader = RecordReader::new(chunked(Bytes::from_static(b"\n\n"), 8), 1024);
        let err = reader.header().await.unwrap_err();
        assert!(matches!(err, ImportError::ParseFatal(_)));
    }

    #[tokio::test]
    async fn test_bytes_read_tracks_stream() {
        let mut reader = RecordReader::new(chunked(Bytes::from_static(b"a\n1\n2\n"), 2), 1024);
        reader.header().await.unwrap();
        while reader.next_record().await.unwrap().is_some() {}
        assert_eq!(reader.bytes_read(), 6);
    }
}
