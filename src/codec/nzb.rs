//! NZB XML document parsing.
//!
//! An NZB file describes a Usenet download as `<file>` elements, each
//! holding a subject line (the filename is embedded in quotes), a poster,
//! a list of newsgroups, and an ordered list of `<segment>` elements
//! (article `message-id`s). Real-world NZBs sometimes omit the namespace
//! declared in the DTD, so this parser detects it per-document from the
//! root element rather than assuming it.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{EngineError, EngineResult};

/// One NNTP article segment within a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub number: u32,
    pub bytes: u64,
    pub message_id: String,
}

/// A file within an NZB, composed of ordered segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NzbFile {
    pub subject: String,
    pub poster: String,
    pub date: i64,
    pub groups: Vec<String>,
    pub segments: Vec<Segment>,
}

impl NzbFile {
    /// Extract the filename from the subject line, which typically looks
    /// like `Some.Release.Name "filename.ext" yEnc (1/10)`. Falls back to
    /// the subject itself with filesystem-illegal characters stripped.
    pub fn filename(&self) -> String {
        if let Some(start) = self.subject.find('"') {
            if let Some(end) = self.subject[start + 1..].find('"') {
                return self.subject[start + 1..start + 1 + end].to_string();
            }
        }
        let safe: String = self
            .subject
            .chars()
            .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
            .collect();
        if safe.is_empty() {
            "unknown".to_string()
        } else {
            safe.chars().take(200).collect()
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }
}

/// A fully parsed NZB document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nzb {
    pub files: Vec<NzbFile>,
}

impl Nzb {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.total_bytes()).sum()
    }

    pub fn total_segments(&self) -> usize {
        self.files.iter().map(|f| f.segments.len()).sum()
    }
}

/// Parse NZB XML content into an [`Nzb`]. Tolerates a missing namespace,
/// missing `<groups>`/`<segments>` blocks, and malformed `<segment>`
/// attributes (skipped rather than rejecting the whole document), matching
/// the reference parser this is grounded on.
pub fn parse(content: &str) -> EngineResult<Nzb> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut nzb = Nzb::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| EngineError::Parse(e.to_string()))? {
            Event::Eof => break,
            Event::Start(tag) if local_name(&tag.name().as_ref().to_vec()) == "file" => {
                let mut subject = String::new();
                let mut poster = String::new();
                let mut date = 0i64;
                for attr in tag.attributes().flatten() {
                    let key = local_name(attr.key.as_ref());
                    let value = attr.unescape_value().unwrap_or_default().to_string();
                    match key.as_str() {
                        "subject" => subject = value,
                        "poster" => poster = value,
                        "date" => date = value.parse().unwrap_or(0),
                        _ => {}
                    }
                }
                let (groups, segments) = parse_file_children(&mut reader)?;
                nzb.files.push(NzbFile { subject, poster, date, groups, segments });
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(nzb)
}

/// Read `<groups>`/`<segments>` inside an already-opened `<file>` element,
/// stopping at its matching close tag.
fn parse_file_children(reader: &mut Reader<&[u8]>) -> EngineResult<(Vec<String>, Vec<Segment>)> {
    let mut groups = Vec::new();
    let mut segments = Vec::new();
    let mut buf = Vec::new();
    let mut depth = 0u32;

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| EngineError::Parse(e.to_string()))? {
            Event::Eof => break,
            Event::Start(tag) => {
                let name = local_name(&tag.name().as_ref().to_vec());
                if name == "file" {
                    depth += 1;
                } else if name == "group" {
                    let text = read_text(reader)?;
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        groups.push(trimmed.to_string());
                    }
                } else if name == "segment" {
                    let mut number = None;
                    let mut bytes = None;
                    for attr in tag.attributes().flatten() {
                        let key = local_name(attr.key.as_ref());
                        let value = attr.unescape_value().unwrap_or_default().to_string();
                        match key.as_str() {
                            "number" => number = value.parse::<u32>().ok(),
                            "bytes" => bytes = value.parse::<u64>().ok(),
                            _ => {}
                        }
                    }
                    let message_id = read_text(reader)?.trim().to_string();
                    if let (Some(number), Some(bytes)) = (number, bytes) {
                        if !message_id.is_empty() {
                            segments.push(Segment { number, bytes, message_id });
                        }
                    }
                }
            }
            Event::End(tag) => {
                let name = local_name(&tag.name().as_ref().to_vec());
                if name == "file" {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    segments.sort_by_key(|s| s.number);
    Ok((groups, segments))
}

/// Consume text content up to the next end tag (used for leaf elements
/// like `<group>` and `<segment>` whose body is plain text).
fn read_text(reader: &mut Reader<&[u8]>) -> EngineResult<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| EngineError::Parse(e.to_string()))? {
            Event::Text(t) => {
                text.push_str(&t.unescape().unwrap_or_default());
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

/// Strip a `prefix:` namespace off a qualified XML name, matching the
/// reference parser's `{namespace}tag` / bare-`tag` tolerance.
fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    match s.rfind(':') {
        Some(idx) => s[idx + 1..].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nzb xmlns="http://www.newznab.com/DTD/2003/nzb">
  <file subject='Some.Release "movie.mkv" yEnc (1/2)' poster="anon@example.com" date="1700000000">
    <groups>
      <group>alt.binaries.test</group>
    </groups>
    <segments>
      <segment bytes="2" number="2">bbb@example</segment>
      <segment bytes="1" number="1">aaa@example</segment>
    </segments>
  </file>
</nzb>"#;

    #[test]
    fn parses_files_segments_ordered_and_groups() {
        let nzb = parse(SAMPLE).unwrap();
        assert_eq!(nzb.files.len(), 1);
        let file = &nzb.files[0];
        assert_eq!(file.filename(), "movie.mkv");
        assert_eq!(file.groups, vec!["alt.binaries.test".to_string()]);
        assert_eq!(
            file.segments,
            vec![
                Segment { number: 1, bytes: 1, message_id: "aaa@example".to_string() },
                Segment { number: 2, bytes: 2, message_id: "bbb@example".to_string() },
            ]
        );
    }

    #[test]
    fn tolerates_missing_namespace() {
        let bare = SAMPLE.replace(r#" xmlns="http://www.newznab.com/DTD/2003/nzb""#, "");
        let nzb = parse(&bare).unwrap();
        assert_eq!(nzb.files.len(), 1);
        assert_eq!(nzb.total_segments(), 2);
    }

    #[test]
    fn skips_segment_with_unparseable_attributes() {
        let xml = r#"<nzb><file subject="x" poster="p" date="0">
          <segments>
            <segment bytes="notanumber" number="1">a@b</segment>
            <segment bytes="5" number="2">c@d</segment>
          </segments>
        </file></nzb>"#;
        let nzb = parse(xml).unwrap();
        assert_eq!(nzb.files[0].segments.len(), 1);
        assert_eq!(nzb.files[0].segments[0].message_id, "c@d");
    }

    #[test]
    fn filename_falls_back_when_no_quoted_name() {
        let xml = r#"<nzb><file subject="no quotes here" poster="p" date="0"></file></nzb>"#;
        let nzb = parse(xml).unwrap();
        assert_eq!(nzb.files[0].filename(), "no quotes here");
    }
}
