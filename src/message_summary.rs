use crate::domain_utils::DomainUtils;
use crate::encoded_words::decode_header_value;
use crate::headers::RawHeaders;
use serde::Serialize;
use std::collections::BTreeMap;

/// Identifying headers shown next to the delivery path in reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageSummary {
    pub subject: Option<String>,
    pub subject_decoded: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub date: Option<String>,
    pub message_id: Option<String>,
    pub return_path: Option<String>,
    pub from_domain: Option<String>,
    pub return_path_domain: Option<String>,
    pub user_agent: Option<String>,
    pub mime_version: Option<String>,
    pub content_type: Option<String>,
    /// Signing domains (`d=`) of every DKIM-Signature header.
    pub dkim_signature_domains: Vec<String>,
    pub received_spf: Vec<String>,
    /// All `X-` headers; repeated names keep the topmost value.
    pub x_headers: BTreeMap<String, String>,
}

impl MessageSummary {
    pub fn from_headers(headers: &RawHeaders) -> Self {
        let owned = |name: &str| headers.get(name).map(|v| v.to_string());

        let mut x_headers = BTreeMap::new();
        for field in headers.fields() {
            if field.name.len() > 2 && field.name[..2].eq_ignore_ascii_case("x-") {
                x_headers
                    .entry(field.name.clone())
                    .or_insert_with(|| field.value.clone());
            }
        }

        Self {
            subject: owned("Subject"),
            subject_decoded: headers.get("Subject").map(decode_header_value),
            from: owned("From"),
            to: owned("To"),
            date: owned("Date"),
            message_id: owned("Message-ID"),
            return_path: owned("Return-Path"),
            from_domain: headers.get("From").and_then(DomainUtils::extract_domain),
            return_path_domain: headers
                .get("Return-Path")
                .and_then(DomainUtils::extract_domain),
            user_agent: owned("User-Agent").or_else(|| owned("X-Mailer")),
            mime_version: owned("MIME-Version"),
            content_type: headers
                .get("Content-Type")
                .and_then(|v| v.split(';').next())
                .map(|v| v.trim().to_lowercase()),
            dkim_signature_domains: headers
                .get_all("DKIM-Signature")
                .into_iter()
                .filter_map(extract_dkim_domain)
                .collect(),
            received_spf: headers
                .get_all("Received-SPF")
                .into_iter()
                .map(|v| v.to_string())
                .collect(),
            x_headers,
        }
    }
}

fn extract_dkim_domain(dkim_sig: &str) -> Option<String> {
    for part in dkim_sig.split(';') {
        let part = part.trim();
        if let Some(stripped) = part.strip_prefix("d=") {
            return Some(stripped.trim().to_lowercase());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::extract_headers;

    #[test]
    fn test_dkim_domain_extraction() {
        let sig = "v=1; a=rsa-sha256; d=Example.com; s=selector; h=from:to:subject";
        assert_eq!(extract_dkim_domain(sig), Some("example.com".to_string()));
        assert_eq!(extract_dkim_domain("v=1; s=selector"), None);
    }

    #[test]
    fn test_summary_fields() {
        let (headers, _) = extract_headers(
            "Subject: =?UTF-8?B?SGVsbG8=?=\n\
             From: Alice <alice@example.com>\n\
             X-Mailer: Mailer 1.0\n\
             X-Spam-Score: 0.1\n\
             Content-Type: text/plain; charset=utf-8\n\
             DKIM-Signature: v=1; d=example.com; s=s1\n",
        );
        let summary = MessageSummary::from_headers(&headers);
        assert_eq!(summary.subject_decoded.as_deref(), Some("Hello"));
        assert_eq!(summary.user_agent.as_deref(), Some("Mailer 1.0"));
        assert_eq!(summary.content_type.as_deref(), Some("text/plain"));
        assert_eq!(summary.dkim_signature_domains, vec!["example.com"]);
        assert_eq!(summary.x_headers.len(), 2);
        assert_eq!(summary.from_domain.as_deref(), Some("example.com"));
        assert_eq!(summary.to, None);
    }
}
