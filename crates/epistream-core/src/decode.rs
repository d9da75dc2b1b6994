//! Keyed stream decoder.
//!
//! Reads a top-level JSON object `{"<key>": <value>, ...}` and yields its
//! members one at a time, in file order, without materializing the whole
//! document. Only the value currently being decoded is buffered.
//!
//! ```text
//! {"60": {...}, "120": {...}, ...}
//!  ^^^^  ^^^^^ one (key, value) pair per `next()`
//! ```
//!
//! Input may be plain or gzip-compressed. A decode failure is terminal: the
//! iterator yields the error once and then ends.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::marker::PhantomData;
use std::path::Path;

use flate2::read::MultiGzDecoder;
use serde::de::DeserializeOwned;

use crate::error::{PipelineError, PipelineResult};
use crate::model::{InfectionRecord, MovementRecord};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    Gzip,
    /// Gzip if the path ends in `.gz` or the file starts with the gzip magic.
    #[default]
    Auto,
}

/// Boxed reader over a possibly-decompressed source file.
pub type SourceReader = Box<dyn BufRead + Send>;

/// Decoder over the simdata stream.
pub type InfectionStream = KeyedStream<SourceReader, InfectionRecord>;

/// Decoder over the patterns stream.
pub type MovementStream = KeyedStream<SourceReader, MovementRecord>;

/// Open `path`, transparently decompressing gzip input.
pub fn open_source(path: &Path, compression: Compression) -> PipelineResult<SourceReader> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let gzip = match compression {
        Compression::None => false,
        Compression::Gzip => true,
        Compression::Auto => {
            path.extension().is_some_and(|ext| ext == "gz")
                || reader.fill_buf()?.starts_with(&GZIP_MAGIC)
        }
    };

    if gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Members { first: bool },
    Done,
}

/// Forward-only iterator over the members of a top-level JSON object.
pub struct KeyedStream<R: BufRead, T> {
    reader: R,
    source_name: String,
    offset: u64,
    state: State,
    key_buf: Vec<u8>,
    value_buf: Vec<u8>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> KeyedStream<SourceReader, T> {
    /// Open a keyed stream over a file.
    pub fn open(path: &Path, compression: Compression) -> PipelineResult<Self> {
        let reader = open_source(path, compression)?;
        Ok(Self::new(reader, path.display().to_string()))
    }
}

impl<R: BufRead, T: DeserializeOwned> KeyedStream<R, T> {
    /// Wrap an already-open reader. `source_name` is used in error messages.
    pub fn new(reader: R, source_name: impl Into<String>) -> Self {
        Self {
            reader,
            source_name: source_name.into(),
            offset: 0,
            state: State::Start,
            key_buf: Vec::new(),
            value_buf: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Bytes consumed so far (of the decompressed input).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    fn error(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::decode(self.source_name.clone(), self.offset, message)
    }

    fn peek(&mut self) -> PipelineResult<Option<u8>> {
        match self.reader.fill_buf() {
            Ok(buf) => Ok(buf.first().copied()),
            Err(e) => Err(self.error(e.to_string())),
        }
    }

    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    fn skip_whitespace(&mut self) -> PipelineResult<()> {
        while let Some(b) = self.peek()? {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.bump();
        }
        Ok(())
    }

    fn expect(&mut self, expected: u8) -> PipelineResult<()> {
        match self.peek()? {
            Some(b) if b == expected => {
                self.bump();
                Ok(())
            }
            Some(b) => Err(self.error(format!(
                "expected '{}', found '{}'",
                expected as char,
                b.escape_ascii()
            ))),
            None => Err(self.error(format!(
                "expected '{}', found end of input",
                expected as char
            ))),
        }
    }

    /// Copy one complete JSON value from the reader into `out`.
    fn read_raw_value(&mut self, out: &mut Vec<u8>) -> PipelineResult<()> {
        out.clear();
        let first = self
            .peek()?
            .ok_or_else(|| self.error("unexpected end of input"))?;
        let mut scanner = ValueScanner::new(first);

        loop {
            let chunk = match self.reader.fill_buf() {
                Ok(chunk) => chunk,
                Err(e) => return Err(self.error(e.to_string())),
            };
            if chunk.is_empty() {
                return Err(self.error("unexpected end of input inside value"));
            }

            let mut take = chunk.len();
            let mut finished = false;
            for (i, &b) in chunk.iter().enumerate() {
                match scanner.feed(b) {
                    Step::Continue => {}
                    Step::EndInclusive => {
                        take = i + 1;
                        finished = true;
                        break;
                    }
                    Step::EndExclusive => {
                        take = i;
                        finished = true;
                        break;
                    }
                }
            }

            out.extend_from_slice(&chunk[..take]);
            self.reader.consume(take);
            self.offset += take as u64;

            if finished {
                return Ok(());
            }
        }
    }

    fn read_member(&mut self) -> PipelineResult<Option<(String, T)>> {
        if self.state == State::Start {
            self.skip_whitespace()?;
            self.expect(b'{')?;
            self.state = State::Members { first: true };
        }

        let State::Members { first } = self.state else {
            return Ok(None);
        };

        self.skip_whitespace()?;
        if self.peek()? == Some(b'}') {
            self.bump();
            self.skip_whitespace()?;
            if let Some(b) = self.peek()? {
                return Err(self.error(format!(
                    "trailing data after document: '{}'",
                    b.escape_ascii()
                )));
            }
            self.state = State::Done;
            return Ok(None);
        }

        if !first {
            self.expect(b',')?;
            self.skip_whitespace()?;
        }

        if self.peek()? != Some(b'"') {
            return Err(self.error("expected string key"));
        }
        let mut key_buf = std::mem::take(&mut self.key_buf);
        self.read_raw_value(&mut key_buf)?;
        let key: String = serde_json::from_slice(&key_buf)
            .map_err(|e| self.error(format!("invalid key: {}", e)))?;
        self.key_buf = key_buf;

        self.skip_whitespace()?;
        self.expect(b':')?;
        self.skip_whitespace()?;

        let value_start = self.offset;
        let mut value_buf = std::mem::take(&mut self.value_buf);
        self.read_raw_value(&mut value_buf)?;
        let value: T = serde_json::from_slice(&value_buf).map_err(|e| {
            PipelineError::decode(
                self.source_name.clone(),
                value_start,
                format!("invalid value for key {:?}: {}", key, e),
            )
        })?;
        self.value_buf = value_buf;

        self.state = State::Members { first: false };
        Ok(Some((key, value)))
    }
}

impl<R: BufRead, T: DeserializeOwned> Iterator for KeyedStream<R, T> {
    type Item = PipelineResult<(String, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }
        match self.read_member() {
            Ok(Some(member)) => Some(Ok(member)),
            Ok(None) => None,
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}

enum Step {
    Continue,
    /// The byte just fed closes the value.
    EndInclusive,
    /// The byte just fed belongs to whatever follows the value.
    EndExclusive,
}

enum ValueKind {
    Container,
    String,
    Scalar,
}

/// Finds the end of one JSON value without interpreting it.
struct ValueScanner {
    kind: ValueKind,
    depth: usize,
    in_string: bool,
    escaped: bool,
    started: bool,
}

impl ValueScanner {
    fn new(first: u8) -> Self {
        let kind = match first {
            b'{' | b'[' => ValueKind::Container,
            b'"' => ValueKind::String,
            _ => ValueKind::Scalar,
        };
        Self {
            kind,
            depth: 0,
            in_string: false,
            escaped: false,
            started: false,
        }
    }

    fn feed(&mut self, b: u8) -> Step {
        let first = !self.started;
        self.started = true;

        match self.kind {
            ValueKind::Scalar => {
                if !first && (b == b',' || b == b'}' || b == b']' || b.is_ascii_whitespace()) {
                    Step::EndExclusive
                } else {
                    Step::Continue
                }
            }
            ValueKind::String => {
                if first {
                    self.in_string = true;
                    return Step::Continue;
                }
                if self.string_byte(b) {
                    Step::EndInclusive
                } else {
                    Step::Continue
                }
            }
            ValueKind::Container => {
                if self.in_string {
                    self.string_byte(b);
                    return Step::Continue;
                }
                match b {
                    b'"' => self.in_string = true,
                    b'{' | b'[' => self.depth += 1,
                    b'}' | b']' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            return Step::EndInclusive;
                        }
                    }
                    _ => {}
                }
                Step::Continue
            }
        }
    }

    /// Advance string state; returns true when the closing quote is seen.
    fn string_byte(&mut self, b: u8) -> bool {
        if self.escaped {
            self.escaped = false;
        } else if b == b'\\' {
            self.escaped = true;
        } else if b == b'"' {
            self.in_string = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn decode<T: DeserializeOwned>(input: &str) -> Vec<PipelineResult<(String, T)>> {
        KeyedStream::<_, T>::new(Cursor::new(input.as_bytes().to_vec()), "test").collect()
    }

    #[test]
    fn test_yields_members_in_file_order() {
        let items = decode::<serde_json::Value>(
            r#" { "60" : {"a": [1, 2]}, "120":{"b":"}{"} , "30": [] } "#,
        );
        let keys: Vec<_> = items
            .into_iter()
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec!["60", "120", "30"]);
    }

    #[test]
    fn test_empty_object_yields_nothing() {
        assert!(decode::<serde_json::Value>("{}").is_empty());
        assert!(decode::<serde_json::Value>("  {\n}\n").is_empty());
    }

    #[test]
    fn test_escaped_quotes_and_braces_inside_strings() {
        let items = decode::<serde_json::Value>(r#"{"k\"1":{"s":"a\\\"}]b"},"k2":"x\"y"}"#);
        let items: Vec<_> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items[0].0, "k\"1");
        assert_eq!(items[0].1["s"], "a\\\"}]b");
        assert_eq!(items[1].1, "x\"y");
    }

    #[test]
    fn test_scalar_values() {
        let items: Vec<_> = decode::<serde_json::Value>(r#"{"a":12,"b":true,"c":null}"#)
            .into_iter()
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(items, vec![serde_json::json!(12), serde_json::json!(true), serde_json::json!(null)]);
    }

    #[test]
    fn test_truncated_input_is_terminal_error() {
        let mut items = decode::<serde_json::Value>(r#"{"60":{"flu":{"p1":1}},"120":{"flu""#).into_iter();
        assert!(items.next().unwrap().is_ok());
        let err = items.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
        assert!(items.next().is_none());
    }

    #[test]
    fn test_non_object_document_rejected() {
        let items = decode::<serde_json::Value>("[1,2]");
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn test_missing_comma_rejected() {
        let items = decode::<serde_json::Value>(r#"{"a":{} "b":{}}"#);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn test_typed_value_mismatch_reports_key() {
        let items = decode::<InfectionRecord>(r#"{"60":{"flu":{"p1":"sick"}}}"#);
        let err = items.into_iter().next().unwrap().unwrap_err();
        assert!(err.to_string().contains("\"60\""));
    }

    #[test]
    fn test_open_gzip_by_magic_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("simdata.json");
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(br#"{"60":{"flu":{"p1":1}},"120":{}}"#)
            .unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let stream = InfectionStream::open(&path, Compression::Auto).unwrap();
        let items: Vec<_> = stream.map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].1.diseases["flu"]["p1"], 1);
    }

    #[test]
    fn test_small_buffer_reader_spans_chunks() {
        let input = r#"{"60":{"homes":{"h1":["p1","p2"]},"places":{"x":["p3"]}}}"#;
        let reader = BufReader::with_capacity(3, Cursor::new(input.as_bytes().to_vec()));
        let items: Vec<_> = KeyedStream::<_, MovementRecord>::new(reader, "patterns")
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(items[0].1.homes["h1"].len(), 2);
        assert_eq!(items[0].1.places["x"], vec!["p3".to_string()]);
    }
}
