//! Newznab response parsing: JSON and RSS2/XML, dispatched on the first
//! non-whitespace byte of the body per spec.md §4.8.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

use crate::indexer::candidate::Candidate;

/// Parse a search response body, auto-detecting JSON vs XML.
pub fn parse_response(body: &str) -> Vec<Candidate> {
    match body.trim_start().chars().next() {
        Some('{') => parse_json(body),
        Some(_) => parse_xml(body),
        None => Vec::new(),
    }
}

fn parse_json(body: &str) -> Vec<Candidate> {
    let root: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let items = root
        .get("channel")
        .and_then(|c| c.get("item"))
        .or_else(|| root.get("items"))
        .or_else(|| root.get("item"));

    let items = match items {
        Some(Value::Array(a)) => a.clone(),
        Some(single) => vec![single.clone()],
        None => return Vec::new(),
    };

    items.iter().filter_map(json_candidate).collect()
}

fn json_candidate(item: &Value) -> Option<Candidate> {
    let title = item.get("title")?.as_str()?.to_string();

    let nzb_url = first_non_empty_str(&[
        item.pointer("/enclosure/@url"),
        item.pointer("/enclosure/url"),
        item.get("link"),
    ])?;

    let size_bytes = item
        .get("size")
        .and_then(Value::as_u64)
        .or_else(|| item.pointer("/enclosure/@length").and_then(json_number))
        .or_else(|| item.pointer("/enclosure/length").and_then(json_number))
        .or_else(|| newznab_attr_size(item))
        .unwrap_or(0);

    Some(Candidate { title, nzb_url, size_bytes })
}

fn json_number(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn newznab_attr_size(item: &Value) -> Option<u64> {
    let attrs = item.get("newznab:attr").or_else(|| item.get("attr"))?;
    let attrs = match attrs {
        Value::Array(a) => a.clone(),
        single => vec![single.clone()],
    };
    attrs
        .iter()
        .find(|a| a.get("@name").and_then(Value::as_str) == Some("size") || a.get("name").and_then(Value::as_str) == Some("size"))
        .and_then(|a| a.get("@value").or_else(|| a.get("value")))
        .and_then(json_number)
}

fn first_non_empty_str(candidates: &[Option<&Value>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|c| c.and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// RSS2/Newznab XML. Walks `<item>` elements inside `<channel>`,
/// collecting `title`, `link`/`enclosure@url`, `enclosure@length`, and
/// `newznab:attr[name=size]`.
fn parse_xml(body: &str) -> Vec<Candidate> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut candidates = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(tag)) if local_name(tag.name().as_ref()) == "item" => {
                if let Ok(candidate) = parse_item(&mut reader) {
                    if let Some(c) = candidate {
                        candidates.push(c);
                    }
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
        buf.clear();
    }

    candidates
}

fn parse_item(reader: &mut Reader<&[u8]>) -> Result<Option<Candidate>, quick_xml::Error> {
    let mut title = String::new();
    let mut link = String::new();
    let mut enclosure_url = String::new();
    let mut enclosure_length = 0u64;
    let mut attr_size = 0u64;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::End(tag) if local_name(tag.name().as_ref()) == "item" => break,
            Event::Start(tag) | Event::Empty(tag) => {
                let name = local_name(tag.name().as_ref());
                match name.as_str() {
                    "enclosure" => {
                        for attr in tag.attributes().flatten() {
                            let key = local_name(attr.key.as_ref());
                            let value = attr.unescape_value().unwrap_or_default().to_string();
                            match key.as_str() {
                                "url" => enclosure_url = value,
                                "length" => enclosure_length = value.parse().unwrap_or(0),
                                _ => {}
                            }
                        }
                    }
                    "attr" => {
                        let mut attr_name = String::new();
                        let mut attr_value = String::new();
                        for attr in tag.attributes().flatten() {
                            let key = local_name(attr.key.as_ref());
                            let value = attr.unescape_value().unwrap_or_default().to_string();
                            match key.as_str() {
                                "name" => attr_name = value,
                                "value" => attr_value = value,
                                _ => {}
                            }
                        }
                        if attr_name == "size" {
                            attr_size = attr_value.parse().unwrap_or(0);
                        }
                    }
                    "title" => title = read_text(reader)?,
                    "link" => link = read_text(reader)?,
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if title.is_empty() {
        return Ok(None);
    }

    let nzb_url = if !enclosure_url.is_empty() { enclosure_url } else { link };
    let size_bytes = if enclosure_length > 0 { enclosure_length } else { attr_size };

    Ok(Some(Candidate { title, nzb_url, size_bytes }))
}

fn read_text(reader: &mut Reader<&[u8]>) -> Result<String, quick_xml::Error> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(t) => text.push_str(&t.unescape().unwrap_or_default()),
            Event::CData(t) => text.push_str(&String::from_utf8_lossy(&t.into_inner())),
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

fn local_name(qname: &[u8]) -> String {
    let name = String::from_utf8_lossy(qname);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.to_string(),
    }
}

/// A Newznab `<error code="100|101|102">` element anywhere in the body
/// indicates an auth failure (spec.md §4.8 `validate_api_key`).
pub fn has_auth_error(body: &str) -> bool {
    let lower = body.to_lowercase();
    if lower.contains("invalid api key") || lower.contains("unauthorized") || lower.contains("api key incorrect") {
        return true;
    }
    for code in ["code=\"100\"", "code=\"101\"", "code=\"102\""] {
        if lower.contains(code) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xml_item_with_enclosure() {
        let body = r#"<?xml version="1.0"?>
<rss><channel><item>
  <title>Some.Release.2160p</title>
  <enclosure url="https://idx.example/get/1" length="123456" />
  <newznab:attr name="size" value="999" />
</item></channel></rss>"#;
        let candidates = parse_response(body);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Some.Release.2160p");
        assert_eq!(candidates[0].nzb_url, "https://idx.example/get/1");
        assert_eq!(candidates[0].size_bytes, 123456);
    }

    #[test]
    fn falls_back_to_link_and_newznab_attr() {
        let body = r#"<rss><channel><item>
  <title>Foo</title>
  <link>https://idx.example/get/2</link>
  <newznab:attr name="size" value="42" />
</item></channel></rss>"#;
        let candidates = parse_response(body);
        assert_eq!(candidates[0].nzb_url, "https://idx.example/get/2");
        assert_eq!(candidates[0].size_bytes, 42);
    }

    #[test]
    fn parses_json_channel_item_array() {
        let body = r#"{"channel":{"item":[{"title":"Bar","link":"https://idx.example/get/3","size":777}]}}"#;
        let candidates = parse_response(body);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Bar");
        assert_eq!(candidates[0].size_bytes, 777);
    }

    #[test]
    fn malformed_body_yields_empty_list() {
        assert!(parse_response("not xml or json").is_empty());
    }

    #[test]
    fn detects_newznab_error_codes() {
        assert!(has_auth_error(r#"<error code="100" description="Incorrect API key"/>"#));
        assert!(has_auth_error("Invalid API Key"));
        assert!(!has_auth_error(r#"<error code="200" description="missing parameter"/>"#));
    }
}
