/// Point manifest scanning and record parsing.
///
/// A manifest is plain text, one record per line: `x y z [source]`.
use constants::manifest::{FALLBACK_SOURCE, MAX_SOURCE_LEN, RECORD_DELIMITER, SCAN_BLOCK_SIZE};
use std::io::{self, BufRead, Read, Seek, SeekFrom};

/// Result of pre-reading a manifest stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestScan {
    /// Record delimiters in the stream.
    pub delimiters: u64,
    /// The stream ends with a non-blank record that has no delimiter.
    pub trailing_record: bool,
}

impl ManifestScan {
    /// Records the pipeline will read, including an unterminated last one.
    pub fn record_count(&self) -> u64 {
        self.delimiters + u64::from(self.trailing_record)
    }
}

/// Counts record delimiters, then rewinds the stream to its start.
pub fn scan_manifest<R: Read + Seek>(reader: &mut R) -> io::Result<ManifestScan> {
    let mut block = vec![0u8; SCAN_BLOCK_SIZE];
    let mut delimiters = 0u64;
    let mut tail_has_content = false;

    loop {
        let n = match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        for &byte in &block[..n] {
            if byte == RECORD_DELIMITER {
                delimiters += 1;
                tail_has_content = false;
            } else if !is_blank_byte(byte) {
                tail_has_content = true;
            }
        }
    }

    reader.seek(SeekFrom::Start(0))?;

    Ok(ManifestScan {
        delimiters,
        trailing_record: tail_has_content,
    })
}

/// Bytes that do not make an unterminated tail a record.
/// Shared by the scanner and the reader so both count the same records.
fn is_blank_byte(byte: u8) -> bool {
    byte.is_ascii_whitespace()
}

/// One parsed manifest line.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    /// World position.
    pub position: [f32; 3],
    /// Image source as written, or the fallback name.
    pub source: String,
    /// The line named no source and `source` is the fallback name.
    pub fallback_source: bool,
    /// A coordinate was missing or unparseable and was read as zero.
    pub malformed: bool,
}

impl ManifestRecord {
    /// Parses `x y z [source]`. Never fails: bad coordinates become zero
    /// and a missing source becomes the fallback name.
    pub fn parse(line: &str) -> Self {
        let mut fields = line.split_whitespace();
        let mut position = [0.0f32; 3];
        let mut malformed = false;

        for axis in &mut position {
            match fields.next().map(str::parse::<f32>) {
                Some(Ok(value)) => *axis = value,
                _ => malformed = true,
            }
        }

        let (source, fallback_source) = match fields.next() {
            Some(token) if !token.is_empty() => (truncate_source(token).to_string(), false),
            _ => (FALLBACK_SOURCE.to_string(), true),
        };

        Self {
            position,
            source,
            fallback_source,
            malformed,
        }
    }

    /// Source string after applying the configured prefix.
    /// The fallback name is never prefixed.
    pub fn resolved_source(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(prefix) if !self.fallback_source => format!("{}{}", prefix, self.source),
            _ => self.source.clone(),
        }
    }
}

/// Cuts a source token to the bounded length on a char boundary.
fn truncate_source(token: &str) -> &str {
    if token.len() <= MAX_SOURCE_LEN {
        return token;
    }
    let mut end = MAX_SOURCE_LEN;
    while !token.is_char_boundary(end) {
        end -= 1;
    }
    &token[..end]
}

/// Sequential record reader over a rewound manifest stream.
pub struct ManifestReader<R> {
    reader: R,
    line: Vec<u8>,
    next_index: u64,
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(256),
            next_index: 0,
        }
    }

    /// Reads the next record with its manifest position.
    /// Returns `None` at end of stream.
    pub fn next_record(&mut self) -> io::Result<Option<(u64, ManifestRecord)>> {
        self.line.clear();
        let n = self.reader.read_until(RECORD_DELIMITER, &mut self.line)?;
        if n == 0 {
            return Ok(None);
        }

        let terminated = self.line.last() == Some(&RECORD_DELIMITER);

        // A blank unterminated tail is not a record.
        if !terminated && self.line.iter().all(|&b| is_blank_byte(b)) {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&self.line);

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some((index, ManifestRecord::parse(&text))))
    }

    /// Records returned so far.
    pub fn records_read(&self) -> u64 {
        self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_scan_counts_delimiters_and_rewinds() {
        let mut cursor = Cursor::new(b"0 0 0 a.jpg\n1 1 1 b.jpg\n".to_vec());

        let scan = scan_manifest(&mut cursor).unwrap();
        assert_eq!(scan.delimiters, 2);
        assert!(!scan.trailing_record);
        assert_eq!(scan.record_count(), 2);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_scan_reports_unterminated_tail() {
        let mut cursor = Cursor::new(b"0 0 0 a.jpg\n1 1 1 b.jpg".to_vec());
        let scan = scan_manifest(&mut cursor).unwrap();
        assert_eq!(scan.delimiters, 1);
        assert!(scan.trailing_record);
        assert_eq!(scan.record_count(), 2);

        let mut blank_tail = Cursor::new(b"0 0 0 a.jpg\n  \t".to_vec());
        let scan = scan_manifest(&mut blank_tail).unwrap();
        assert_eq!(scan.record_count(), 1);
    }

    #[test]
    fn test_scan_empty_stream() {
        let mut cursor = Cursor::new(Vec::new());
        let scan = scan_manifest(&mut cursor).unwrap();
        assert_eq!(scan.record_count(), 0);
    }

    #[test]
    fn test_parse_full_record() {
        let record = ManifestRecord::parse("1.5 -2 3e1 photos/a.jpg extra\n");
        assert_eq!(record.position, [1.5, -2.0, 30.0]);
        assert_eq!(record.source, "photos/a.jpg");
        assert!(!record.fallback_source);
        assert!(!record.malformed);
    }

    #[test]
    fn test_parse_missing_source_uses_fallback() {
        let record = ManifestRecord::parse("1 2 3");
        assert_eq!(record.source, FALLBACK_SOURCE);
        assert!(record.fallback_source);
        assert!(!record.malformed);
    }

    #[test]
    fn test_parse_bad_coordinates() {
        let record = ManifestRecord::parse("1 nope 3 a.jpg");
        assert_eq!(record.position, [1.0, 0.0, 3.0]);
        assert!(record.malformed);

        let blank = ManifestRecord::parse("\n");
        assert_eq!(blank.position, [0.0; 3]);
        assert!(blank.malformed);
        assert!(blank.fallback_source);
    }

    #[test]
    fn test_source_truncated_to_bound() {
        let long = "x".repeat(MAX_SOURCE_LEN + 50);
        let record = ManifestRecord::parse(&format!("0 0 0 {}", long));
        assert_eq!(record.source.len(), MAX_SOURCE_LEN);

        let multibyte = "é".repeat(MAX_SOURCE_LEN);
        let record = ManifestRecord::parse(&format!("0 0 0 {}", multibyte));
        assert!(record.source.len() <= MAX_SOURCE_LEN);
        assert!(record.source.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_prefix_applies_to_named_sources_only() {
        let named = ManifestRecord::parse("0 0 0 a.jpg");
        assert_eq!(
            named.resolved_source(Some("https://cdn.example/")),
            "https://cdn.example/a.jpg"
        );
        assert_eq!(named.resolved_source(None), "a.jpg");

        let unnamed = ManifestRecord::parse("0 0 0");
        assert_eq!(unnamed.resolved_source(Some("https://cdn.example/")), FALLBACK_SOURCE);
    }

    #[test]
    fn test_reader_yields_indexed_records() {
        let data = b"0 0 0 a.jpg\n\n2 2 2 c.jpg";
        let mut reader = ManifestReader::new(Cursor::new(&data[..]));

        let (i0, r0) = reader.next_record().unwrap().unwrap();
        assert_eq!((i0, r0.source.as_str()), (0, "a.jpg"));

        let (i1, r1) = reader.next_record().unwrap().unwrap();
        assert_eq!(i1, 1);
        assert!(r1.malformed);

        let (i2, r2) = reader.next_record().unwrap().unwrap();
        assert_eq!((i2, r2.position), (2, [2.0, 2.0, 2.0]));

        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.records_read(), 3);
    }

    #[test]
    fn test_scan_and_reader_agree_on_unusual_tails() {
        let tails: [&[u8]; 5] = [b"\x0B", "\u{a0}".as_bytes(), b" \t\r", b"\x0C", b"1 2 3"];
        for tail in tails {
            let mut data = b"0 0 0 a.jpg\n".to_vec();
            data.extend_from_slice(tail);

            let mut cursor = Cursor::new(data);
            let planned = scan_manifest(&mut cursor).unwrap().record_count();

            let mut reader = ManifestReader::new(cursor);
            while reader.next_record().unwrap().is_some() {}
            assert_eq!(reader.records_read(), planned, "tail {:?}", tail);
        }
    }
}
