//! Incremental `text/event-stream` parser.
//!
//! Bytes are buffered across [`EventRecordParser::feed`] calls. Records are cut
//! at blank-line boundaries (`\n\n` or `\r\n\r\n`); whatever follows the last
//! boundary stays buffered until more bytes arrive or the stream ends.

use std::collections::BTreeMap;

use bytes::{Buf, BytesMut};

use crate::sse::record::EventRecord;

#[derive(Debug, Default)]
pub struct EventRecordParser {
    buffer: BytesMut,
    scanned: usize,
}

impl EventRecordParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<EventRecord> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some((end, boundary_len)) = find_boundary(&self.buffer, self.scanned) {
            let raw = self.buffer.split_to(end);
            self.buffer.advance(boundary_len);
            self.scanned = 0;
            if let Some(record) = parse_record(&String::from_utf8_lossy(&raw)) {
                records.push(record);
            }
        }
        // A boundary can straddle chunks by at most three bytes.
        self.scanned = self.buffer.len().saturating_sub(3);
        records
    }

    pub fn finish(&mut self) -> Option<EventRecord> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let raw = self.buffer.split();
        parse_record(&String::from_utf8_lossy(&raw))
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn find_boundary(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buffer.len()).find_map(|index| {
        let rest = &buffer[index..];
        if rest.starts_with(b"\r\n\r\n") {
            Some((index, 4))
        } else if rest.starts_with(b"\n\n") {
            Some((index, 2))
        } else {
            None
        }
    })
}

pub fn parse_record(text: &str) -> Option<EventRecord> {
    let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.trim_start()),
            None => (line, ""),
        };
        fields
            .entry(name.to_owned())
            .or_default()
            .push(value.to_owned());
    }
    EventRecord::from_fields(fields)
}

#[cfg(test)]
mod tests {
    use super::{EventRecordParser, parse_record};

    #[test]
    fn record_split_across_chunks_is_reassembled() {
        let mut parser = EventRecordParser::new();
        assert!(parser.feed(b"id: 1\ndata: a").is_empty());
        let records = parser.feed(b"bc\n\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_deref(), Some("1"));
        assert_eq!(records[0].data.as_deref(), Some("abc"));
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn crlf_boundary_split_between_chunks() {
        let mut parser = EventRecordParser::new();
        assert!(parser.feed(b"data: one\r\n\r").is_empty());
        let records = parser.feed(b"\ndata: two\r\n\r\n");
        let data: Vec<_> = records.iter().map(|record| record.data()).collect();
        assert_eq!(data, vec!["one", "two"]);
    }

    #[test]
    fn several_records_in_one_chunk_keep_trailing_fragment() {
        let mut parser = EventRecordParser::new();
        let records = parser.feed(b"data: a\n\ndata: b\n\ndata: c");
        assert_eq!(records.len(), 2);
        assert_eq!(parser.buffered_len(), "data: c".len());
        let last = parser.finish().expect("residual record");
        assert_eq!(last.data(), "c");
        assert!(parser.finish().is_none());
    }

    #[test]
    fn multiple_data_lines_join_and_last_id_wins() {
        let record = parse_record("id: 1\ndata: first\ndata: second\nid: 2\nevent: a\nevent: b")
            .expect("record");
        assert_eq!(record.data(), "first\nsecond");
        assert_eq!(record.id.as_deref(), Some("2"));
        assert_eq!(record.event_type(), "b");
        assert_eq!(record.raw_fields["data"], vec!["first", "second"]);
    }

    #[test]
    fn comments_only_yield_nothing() {
        let mut parser = EventRecordParser::new();
        assert!(parser.feed(b": ping\n\n:another\n\n").is_empty());
    }

    #[test]
    fn retry_takes_last_numeric_value() {
        assert_eq!(
            parse_record("retry: 1000\nretry: 5000").and_then(|record| record.retry_ms),
            Some(5000)
        );
        assert_eq!(
            parse_record("retry: 1000\nretry: soon").and_then(|record| record.retry_ms),
            None
        );
    }

    #[test]
    fn line_without_colon_is_field_with_empty_value() {
        let record = parse_record("data\nid").expect("record");
        assert_eq!(record.data.as_deref(), Some(""));
        assert_eq!(record.id.as_deref(), Some(""));
        assert!(record.is_keep_alive());
    }

    #[test]
    fn value_is_left_trimmed_only() {
        let record = parse_record("data:   padded  ").expect("record");
        assert_eq!(record.data(), "padded  ");
        let record = parse_record("data: a:b").expect("record");
        assert_eq!(record.data(), "a:b");
    }

    #[test]
    fn byte_at_a_time_feeding_matches_whole_feed() {
        let text = b"event: tick\nid: 9\ndata: {\"n\":1}\n\n: keepalive\n\ndata: tail\r\n\r\n";
        let mut whole = EventRecordParser::new();
        let expected = whole.feed(text);

        let mut incremental = EventRecordParser::new();
        let mut collected = Vec::new();
        for byte in text {
            collected.extend(incremental.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(collected, expected);
        assert_eq!(collected.len(), 2);
    }
}
