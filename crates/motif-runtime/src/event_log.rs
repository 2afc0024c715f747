//! Forward-only, restartable event log scanning.
//!
//! The log is newline-delimited JSON, one [`Event`] per line, pre-sorted by
//! user and then by ascending timestamp. Every pass over the log starts a new
//! scan from the beginning; nothing is buffered between passes.
//!
//! ```text
//! {"uid":"u1","ujt":0,"en":"view","et":10,"epr":{"page":"/pricing"}}
//! {"uid":"u1","ujt":0,"en":"signup","et":42,"upr":{"country":"IN"}}
//! {"uid":"u2","ujt":5,"en":"view","et":7}
//! ```

use crate::event::Event;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, ErrorKind};
use std::path::{Path, PathBuf};

/// Maximum accepted line length (1 MB).
pub const MAX_LINE_LENGTH: usize = 1_048_576;

/// Errors raised while reading the event log.
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("Failed to open event log {0}: {1}")]
    Open(PathBuf, String),

    #[error("Read error at line {line}: {message}")]
    Read { line: usize, message: String },

    #[error("Malformed event at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("Line {line} exceeds {max} bytes ({len} bytes)")]
    LineTooLong { line: usize, len: usize, max: usize },
}

impl EventLogError {
    /// Line number the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            EventLogError::Open(..) => None,
            EventLogError::Read { line, .. }
            | EventLogError::Malformed { line, .. }
            | EventLogError::LineTooLong { line, .. } => Some(*line),
        }
    }
}

/// Streaming reader yielding one event per non-blank line.
///
/// The reader is fused after an I/O error: it yields one `Read` error and
/// then ends.
pub struct EventLogReader<R: BufRead> {
    reader: R,
    line_buffer: String,
    line_number: usize,
    events_read: usize,
    failed: bool,
}

impl<R: BufRead> EventLogReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buffer: String::new(),
            line_number: 0,
            events_read: 0,
            failed: false,
        }
    }

    /// Count of events decoded so far
    pub fn events_read(&self) -> usize {
        self.events_read
    }

    /// Number of lines consumed so far, including blank and rejected ones
    pub fn line_number(&self) -> usize {
        self.line_number
    }
}

/// Decode one log line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str, line_number: usize) -> Result<Option<Event>, EventLogError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let mut event: Event =
        serde_json::from_str(line).map_err(|e| EventLogError::Malformed {
            line: line_number,
            message: e.to_string(),
        })?;
    if event.user_id.is_empty() {
        return Err(EventLogError::Malformed {
            line: line_number,
            message: "empty user id".to_string(),
        });
    }
    if event.event_name.is_empty() {
        return Err(EventLogError::Malformed {
            line: line_number,
            message: "empty event name".to_string(),
        });
    }
    event.cardinality = event.cardinality.max(1);
    Ok(Some(event))
}

impl<R: BufRead> Iterator for EventLogReader<R> {
    type Item = Result<Event, EventLogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            self.line_buffer.clear();
            match self.reader.read_line(&mut self.line_buffer) {
                Ok(0) => return None, // EOF
                Ok(len) => {
                    self.line_number += 1;
                    if len > MAX_LINE_LENGTH {
                        return Some(Err(EventLogError::LineTooLong {
                            line: self.line_number,
                            len,
                            max: MAX_LINE_LENGTH,
                        }));
                    }
                    match parse_line(&self.line_buffer, self.line_number) {
                        Ok(Some(event)) => {
                            self.events_read += 1;
                            return Some(Ok(event));
                        }
                        Ok(None) => continue,
                        Err(e) => return Some(Err(e)),
                    }
                }
                // The offending line is consumed, so scanning can go on.
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    self.line_number += 1;
                    return Some(Err(EventLogError::Malformed {
                        line: self.line_number,
                        message: e.to_string(),
                    }));
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(EventLogError::Read {
                        line: self.line_number + 1,
                        message: e.to_string(),
                    }));
                }
            }
        }
    }
}

/// A log that can be scanned from the start any number of times.
pub trait EventLog {
    fn scan(&self) -> Result<EventLogReader<Box<dyn BufRead + '_>>, EventLogError>;
}

/// Event log backed by a file on disk.
#[derive(Debug, Clone)]
pub struct FileEventLog {
    path: PathBuf,
}

impl FileEventLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLog for FileEventLog {
    fn scan(&self) -> Result<EventLogReader<Box<dyn BufRead + '_>>, EventLogError> {
        let file =
            File::open(&self.path).map_err(|e| EventLogError::Open(self.path.clone(), e.to_string()))?;
        // 64KB buffer for sequential scans
        let reader: Box<dyn BufRead + '_> = Box::new(BufReader::with_capacity(64 * 1024, file));
        Ok(EventLogReader::new(reader))
    }
}

/// Event log held in memory, mostly for tests and small batches.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    data: String,
}

impl InMemoryEventLog {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }

    /// Encode events one per line. The caller is responsible for ordering.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut data = String::new();
        for event in events {
            data.push_str(&event.to_line());
            data.push('\n');
        }
        Self { data }
    }
}

impl EventLog for InMemoryEventLog {
    fn scan(&self) -> Result<EventLogReader<Box<dyn BufRead + '_>>, EventLogError> {
        let reader: Box<dyn BufRead + '_> = Box::new(Cursor::new(self.data.as_bytes()));
        Ok(EventLogReader::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reader_skips_blank_lines() {
        let log = InMemoryEventLog::new(
            "{\"uid\":\"u1\",\"en\":\"A\",\"et\":1}\n\n   \n{\"uid\":\"u1\",\"en\":\"B\",\"et\":2}\n",
        );
        let mut reader = log.scan().unwrap();
        let events: Vec<_> = reader.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(reader.events_read(), 2);
        assert_eq!(reader.line_number(), 4);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let log = InMemoryEventLog::new("{\"uid\":\"u1\",\"en\":\"A\",\"et\":1}\nnot json\n");
        let results: Vec<_> = log.scan().unwrap().collect();
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(matches!(err, EventLogError::Malformed { .. }));
    }

    struct Broken;

    impl std::io::Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn test_io_error_ends_the_scan() {
        let mut reader = EventLogReader::new(BufReader::new(Broken));
        assert!(matches!(reader.next(), Some(Err(EventLogError::Read { line: 1, .. }))));
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_invalid_utf8_line_is_malformed() {
        let mut data = b"\xff\xfe\n".to_vec();
        data.extend_from_slice(b"{\"uid\":\"u1\",\"en\":\"A\",\"et\":1}\n");
        let results: Vec<_> = EventLogReader::new(Cursor::new(data)).collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(EventLogError::Malformed { line: 1, .. })));
        assert_eq!(results[1].as_ref().unwrap().event_name.as_ref(), "A");
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        assert!(parse_line(r#"{"uid":"u1","et":1}"#, 1).is_err());
        assert!(parse_line(r#"{"uid":"","en":"A","et":1}"#, 1).is_err());
        assert!(parse_line(r#"{"uid":"u1","en":"","et":1}"#, 1).is_err());
    }

    #[test]
    fn test_zero_cardinality_clamped() {
        let event = parse_line(r#"{"uid":"u1","en":"A","et":1,"ecd":0}"#, 1)
            .unwrap()
            .unwrap();
        assert_eq!(event.cardinality, 1);
    }

    #[test]
    fn test_scan_is_restartable() {
        let events = vec![Event::new("u1", "A", 1), Event::new("u1", "B", 2)];
        let log = InMemoryEventLog::from_events(&events);
        let first: Vec<_> = log.scan().unwrap().map(|e| e.unwrap()).collect();
        let second: Vec<_> = log.scan().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(first, events);
        assert_eq!(second, events);
    }

    #[test]
    fn test_file_log() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", Event::new("u1", "A", 1).to_line()).unwrap();
        writeln!(file, "{}", Event::new("u2", "B", 3).to_line()).unwrap();
        let log = FileEventLog::new(file.path());
        let events: Vec<_> = log.scan().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].user_id, "u2");
    }

    #[test]
    fn test_missing_file() {
        let log = FileEventLog::new("/nonexistent/motif/events.ndjson");
        assert!(matches!(log.scan(), Err(EventLogError::Open(..))));
    }
}
