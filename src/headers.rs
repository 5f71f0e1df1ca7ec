use crate::diagnostics::Diagnostic;
use serde::Serialize;
use std::collections::HashMap;

/// One header field as it appeared in the message, unfolded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// The header block of one message.
///
/// Fields keep their source order, so the values of a repeated header such as
/// `Received` come back top to bottom (most recent relay first). Lookups by
/// name are case-insensitive.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawHeaders {
    fields: Vec<HeaderField>,
    #[serde(skip)]
    index: HashMap<String, Vec<usize>>,
}

impl RawHeaders {
    pub fn from_fields(fields: Vec<HeaderField>) -> Self {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, field) in fields.iter().enumerate() {
            index
                .entry(field.name.to_ascii_lowercase())
                .or_default()
                .push(position);
        }
        Self { fields, index }
    }

    /// All values of `name`, in source order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|positions| {
                positions
                    .iter()
                    .map(|&p| self.fields[p].value.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The first (topmost) value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .and_then(|positions| positions.first())
            .map(|&p| self.fields[p].value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// RFC 5322 field names are printable ASCII without colon or space.
fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

/// Split raw message source into its header fields.
///
/// Reading stops at the first blank line. Folded lines are joined to the
/// previous value with a single space. Lines that cannot be split into a
/// name and a value are skipped and reported.
pub fn extract_headers(source: &str) -> (RawHeaders, Vec<Diagnostic>) {
    let mut fields: Vec<HeaderField> = Vec::new();
    let mut diagnostics = Vec::new();

    for (offset, line) in source.lines().enumerate() {
        let line_number = offset + 1;
        let line = line.trim_end_matches('\r');

        if line.trim().is_empty() {
            break;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation of previous header
            match fields.last_mut() {
                Some(field) => {
                    let folded = line.trim();
                    if field.value.is_empty() {
                        field.value.push_str(folded);
                    } else {
                        field.value.push(' ');
                        field.value.push_str(folded);
                    }
                }
                None => diagnostics.push(Diagnostic::OrphanContinuation {
                    line_number,
                    line: line.to_string(),
                }),
            }
            continue;
        }

        match line.split_once(':') {
            Some((name, value)) if is_valid_field_name(name.trim_end()) => {
                fields.push(HeaderField {
                    name: name.trim_end().to_string(),
                    value: value.trim().to_string(),
                });
            }
            _ => diagnostics.push(Diagnostic::MalformedHeaderLine {
                line_number,
                line: line.to_string(),
            }),
        }
    }

    for diagnostic in &diagnostics {
        diagnostic.log();
    }
    log::debug!(
        "Extracted {} header fields ({} skipped lines)",
        fields.len(),
        diagnostics.len()
    );

    (RawHeaders::from_fields(fields), diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Received: from mail.example.org (mail.example.org [8.8.8.8])\r
\tby inbound.example.net with ESMTPS id 12345\r
    for <user@example.net>; Tue, 17 Sep 2024 12:34:56 +0000\r
Received: by mail.example.org; Tue, 17 Sep 2024 12:34:10 +0000\r
Subject: Hello\r
\r
Not-A-Header: body text\r
";

    #[test]
    fn test_folded_lines_are_joined() {
        let (headers, diagnostics) = extract_headers(SAMPLE);
        assert!(diagnostics.is_empty());
        let received = headers.get_all("received");
        assert_eq!(received.len(), 2);
        assert_eq!(
            received[0],
            "from mail.example.org (mail.example.org [8.8.8.8]) by inbound.example.net with ESMTPS id 12345 for <user@example.net>; Tue, 17 Sep 2024 12:34:56 +0000"
        );
    }

    #[test]
    fn test_stops_at_blank_line() {
        let (headers, _) = extract_headers(SAMPLE);
        assert!(!headers.contains("Not-A-Header"));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_case_insensitive_lookup_preserves_value_case() {
        let (headers, _) = extract_headers("SUBJECT: Hello World\n");
        assert_eq!(headers.get("subject"), Some("Hello World"));
        assert_eq!(headers.fields()[0].name, "SUBJECT");
    }

    #[test]
    fn test_malformed_lines_are_reported() {
        let source = "From sender@example.com Mon Jan  1 00:00:00 2024\nno colon here\nSubject: ok\n";
        let (headers, diagnostics) = extract_headers(source);
        assert_eq!(headers.get("subject"), Some("ok"));
        assert_eq!(diagnostics.len(), 2);
        assert!(matches!(
            diagnostics[1],
            Diagnostic::MalformedHeaderLine { line_number: 2, .. }
        ));
    }

    #[test]
    fn test_orphan_continuation() {
        let (headers, diagnostics) = extract_headers("  dangling\nSubject: ok\n");
        assert_eq!(headers.len(), 1);
        assert!(matches!(
            diagnostics[0],
            Diagnostic::OrphanContinuation { line_number: 1, .. }
        ));
    }

    #[test]
    fn test_empty_value_is_kept() {
        let (headers, _) = extract_headers("Received:\nX-Empty:\n  folded\n");
        assert_eq!(headers.get_all("Received"), vec![""]);
        assert_eq!(headers.get("x-empty"), Some("folded"));
    }
}
