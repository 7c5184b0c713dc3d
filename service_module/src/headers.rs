//! Header-blob normalization.
//!
//! Inbound providers deliver headers in whichever shape their webhook
//! happens to use: a Postmark-style array of `{Name, Value}` pairs, a plain
//! JSON object, or raw RFC 822 header lines. Some mail clients omit
//! threading headers entirely; that is a normal delivery, not an error.
//! The blob is decoded exactly once here and downstream code only ever sees
//! [`ParsedHeaders`].

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

#[derive(Debug)]
enum HeaderBlob {
    Pairs(Vec<HeaderPair>),
    Object(serde_json::Map<String, serde_json::Value>),
    RawLines(String),
    Absent,
}

#[derive(Debug, Deserialize)]
struct HeaderPair {
    #[serde(rename = "Name", alias = "name")]
    name: String,
    #[serde(rename = "Value", alias = "value")]
    value: String,
}

pub fn parse_header_blob(raw: Option<&str>) -> ParsedHeaders {
    let blob = classify_blob(raw);
    let references = header_value(&blob, "References")
        .map(|value| split_references(&value))
        .unwrap_or_default();
    ParsedHeaders {
        message_id: header_value(&blob, "Message-ID"),
        in_reply_to: header_value(&blob, "In-Reply-To"),
        references,
    }
}

fn classify_blob(raw: Option<&str>) -> HeaderBlob {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return HeaderBlob::Absent;
    };
    if let Ok(pairs) = serde_json::from_str::<Vec<HeaderPair>>(raw) {
        return HeaderBlob::Pairs(pairs);
    }
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(raw) {
        return HeaderBlob::Object(map);
    }
    HeaderBlob::RawLines(raw.to_string())
}

fn header_value(blob: &HeaderBlob, name: &str) -> Option<String> {
    let value = match blob {
        HeaderBlob::Pairs(pairs) => pairs
            .iter()
            .find(|pair| pair.name.eq_ignore_ascii_case(name))
            .map(|pair| pair.value.clone()),
        HeaderBlob::Object(map) => map
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_str())
            .map(|value| value.to_string()),
        HeaderBlob::RawLines(raw) => raw_header_value(raw, name),
        HeaderBlob::Absent => None,
    };
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Look up a header in raw `Name: value` lines, folding whitespace
/// continuation lines into the value.
fn raw_header_value(raw: &str, name: &str) -> Option<String> {
    let lines: Vec<&str> = raw.lines().collect();
    let mut index = 0;
    while index < lines.len() {
        let line = lines[index];
        index += 1;
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case(name) {
            continue;
        }
        let mut folded = value.trim().to_string();
        while index < lines.len()
            && (lines[index].starts_with(' ') || lines[index].starts_with('\t'))
        {
            if !folded.is_empty() {
                folded.push(' ');
            }
            folded.push_str(lines[index].trim());
            index += 1;
        }
        return Some(folded);
    }
    None
}

/// Split a References value into its message-id tokens. Tokens are kept
/// verbatim (angle brackets included); strip them only at comparison time
/// via [`message_id_key`].
pub fn split_references(value: &str) -> Vec<String> {
    value
        .split(|ch| matches!(ch, ' ' | '\t' | '\n' | '\r' | ',' | ';'))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

/// Comparison form of a message-id token: angle brackets dropped,
/// case-folded. Stored tokens stay verbatim.
pub fn message_id_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|ch| matches!(ch, '<' | '>'));
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postmark_pair_array() {
        let raw = r#"[
            {"Name": "Message-ID", "Value": "<msg-1@example.com>"},
            {"Name": "In-Reply-To", "Value": "<root@example.com>"},
            {"Name": "References", "Value": "<root@example.com> <mid@example.com>"}
        ]"#;
        let parsed = parse_header_blob(Some(raw));
        assert_eq!(parsed.message_id.as_deref(), Some("<msg-1@example.com>"));
        assert_eq!(parsed.in_reply_to.as_deref(), Some("<root@example.com>"));
        assert_eq!(
            parsed.references,
            vec!["<root@example.com>", "<mid@example.com>"]
        );
    }

    #[test]
    fn parses_json_object_case_insensitively() {
        let raw = r#"{"message-id": "<a@x>", "REFERENCES": "<a@x>, <b@x>"}"#;
        let parsed = parse_header_blob(Some(raw));
        assert_eq!(parsed.message_id.as_deref(), Some("<a@x>"));
        assert_eq!(parsed.references, vec!["<a@x>", "<b@x>"]);
        assert_eq!(parsed.in_reply_to, None);
    }

    #[test]
    fn parses_raw_lines_with_continuation() {
        let raw = "Subject: hi\nMessage-ID: <m@x>\nReferences: <a@x>\n <b@x>\nIn-Reply-To: <a@x>";
        let parsed = parse_header_blob(Some(raw));
        assert_eq!(parsed.message_id.as_deref(), Some("<m@x>"));
        assert_eq!(parsed.references, vec!["<a@x>", "<b@x>"]);
        assert_eq!(parsed.in_reply_to.as_deref(), Some("<a@x>"));
    }

    #[test]
    fn absent_and_unparseable_blobs_yield_empty_headers() {
        assert_eq!(parse_header_blob(None), ParsedHeaders::default());
        assert_eq!(parse_header_blob(Some("")), ParsedHeaders::default());
        assert_eq!(parse_header_blob(Some("   ")), ParsedHeaders::default());
        // Not a header shape at all; still no panic, just nothing found.
        assert_eq!(
            parse_header_blob(Some("no colons here")),
            ParsedHeaders::default()
        );
        assert_eq!(parse_header_blob(Some("{}")), ParsedHeaders::default());
    }

    #[test]
    fn reference_tokens_stay_verbatim() {
        let parsed = parse_header_blob(Some(r#"{"References": "<A@X> plain-token"}"#));
        assert_eq!(parsed.references, vec!["<A@X>", "plain-token"]);
    }

    #[test]
    fn message_id_key_strips_brackets_and_case_only_for_comparison() {
        assert_eq!(message_id_key("<MSG@Example.Com>").as_deref(), Some("msg@example.com"));
        assert_eq!(message_id_key("msg@example.com").as_deref(), Some("msg@example.com"));
        assert_eq!(message_id_key("<>"), None);
        assert_eq!(message_id_key("  "), None);
    }
}
