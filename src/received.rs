//! Parser for the value of a single `Received:` header.
//!
//! There is no grammar that every MTA follows. The parser therefore works as a
//! tolerant tokenizer: the value is split into words and parenthesized
//! comments, and each keyword (`from`, `by`, `via`, `with`, `id`, `for`) opens a
//! clause that runs until the next keyword. The date-time after the last `;`
//! is parsed separately. Every clause is optional.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

lazy_static! {
    static ref BRACKETED_IP: Regex = Regex::new(r"(?i)\[(?:ipv6:)?([0-9a-f:.]+)\]").unwrap();
    static ref BARE_IP: Regex =
        Regex::new(r"(?i)\b(\d{1,3}(?:\.\d{1,3}){3}|[0-9a-f]*:[0-9a-f:.]*:[0-9a-f.]*)").unwrap();
    static ref COMMENT: Regex = Regex::new(r"\([^()]*\)").unwrap();
    static ref LEADING_WEEKDAY: Regex = Regex::new(r"^[A-Za-z]{3,9},?\s+").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Formats tried after RFC 2822 parsing fails.
const ZONED_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%a %b %d %H:%M:%S %Y %z",
    "%Y-%m-%d %H:%M:%S %z",
];
const NAIVE_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S",
    "%a %b %d %H:%M:%S %Y",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopParseError {
    /// Nothing but whitespace
    Empty,
    /// No keyword clause and no timestamp
    NoClauses,
}

impl fmt::Display for HopParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HopParseError::Empty => write!(f, "empty Received value"),
            HopParseError::NoClauses => write!(f, "no from/by/with/id/for clause or timestamp"),
        }
    }
}

impl std::error::Error for HopParseError {}

/// One parsed `Received:` entry.
///
/// Fields are set once by [`parse_received`] and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopRecord {
    from_host: Option<String>,
    from_resolved: Option<String>,
    from_ip: Option<IpAddr>,
    by_host: Option<String>,
    via: Option<String>,
    with_protocol: Option<String>,
    id: Option<String>,
    for_recipient: Option<String>,
    timestamp: Option<DateTime<FixedOffset>>,
    comments: Vec<String>,
    raw_line: String,
}

impl HopRecord {
    /// Sending host as stated in the `from` clause (hostname or IP literal).
    pub fn from_host(&self) -> Option<&str> {
        self.from_host.as_deref()
    }

    /// Reverse-resolved name the receiver recorded for the sender.
    pub fn from_resolved(&self) -> Option<&str> {
        self.from_resolved.as_deref()
    }

    pub fn from_ip(&self) -> Option<IpAddr> {
        self.from_ip
    }

    pub fn by_host(&self) -> Option<&str> {
        self.by_host.as_deref()
    }

    pub fn via(&self) -> Option<&str> {
        self.via.as_deref()
    }

    pub fn with_protocol(&self) -> Option<&str> {
        self.with_protocol.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn for_recipient(&self) -> Option<&str> {
        self.for_recipient.as_deref()
    }

    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
    }

    /// Every top-level parenthesized comment, without the parentheses.
    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn raw_line(&self) -> &str {
        &self.raw_line
    }
}

/// Renders the record back into `Received:` syntax.
impl fmt::Display for HopRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();

        if self.from_host.is_some() || self.from_ip.is_some() {
            let mut clause = String::from("from");
            if let Some(host) = &self.from_host {
                clause.push(' ');
                clause.push_str(host);
            }
            match (&self.from_resolved, self.from_ip) {
                (Some(resolved), Some(ip)) => clause.push_str(&format!(" ({} [{}])", resolved, ip)),
                (Some(resolved), None) => clause.push_str(&format!(" ({})", resolved)),
                (None, Some(ip)) => clause.push_str(&format!(" ([{}])", ip)),
                (None, None) => {}
            }
            parts.push(clause);
        }
        if let Some(by) = &self.by_host {
            parts.push(format!("by {}", by));
        }
        if let Some(via) = &self.via {
            parts.push(format!("via {}", via));
        }
        if let Some(protocol) = &self.with_protocol {
            parts.push(format!("with {}", protocol));
        }
        if let Some(id) = &self.id {
            parts.push(format!("id {}", id));
        }
        if let Some(recipient) = &self.for_recipient {
            parts.push(format!("for <{}>", recipient));
        }

        write!(f, "{}", parts.join(" "))?;
        if let Some(timestamp) = &self.timestamp {
            write!(f, "; {}", timestamp.to_rfc2822())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Comment(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    From,
    By,
    Via,
    With,
    Id,
    For,
}

impl Keyword {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "from" => Some(Keyword::From),
            "by" => Some(Keyword::By),
            "via" => Some(Keyword::Via),
            "with" => Some(Keyword::With),
            "id" => Some(Keyword::Id),
            "for" => Some(Keyword::For),
            _ => None,
        }
    }
}

/// Split into whitespace-separated words and top-level comments. Nested and
/// unterminated comments are kept whole.
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;
    let mut chars = text.char_indices();

    while let Some((position, c)) = chars.next() {
        if c == '(' {
            if let Some(start) = word_start.take() {
                tokens.push(Token::Word(&text[start..position]));
            }
            let mut depth = 1;
            let mut end = text.len();
            while let Some((inner, ic)) = chars.next() {
                match ic {
                    '\\' => {
                        chars.next();
                    }
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            end = inner;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            tokens.push(Token::Comment(text[position + 1..end].trim()));
        } else if c.is_whitespace() {
            if let Some(start) = word_start.take() {
                tokens.push(Token::Word(&text[start..position]));
            }
        } else if word_start.is_none() {
            word_start = Some(position);
        }
    }
    if let Some(start) = word_start {
        tokens.push(Token::Word(&text[start..]));
    }

    tokens
}

/// Parse `[1.2.3.4]`, `[IPv6:2001:db8::1]` or a bare address.
pub fn parse_ip_literal(word: &str) -> Option<IpAddr> {
    let trimmed = word.trim_matches(|c: char| matches!(c, '[' | ']' | ',' | ';'));
    let without_tag = match trimmed.get(..5) {
        Some(tag) if tag.eq_ignore_ascii_case("ipv6:") => &trimmed[5..],
        _ => trimmed,
    };
    without_tag.parse::<IpAddr>().ok()
}

/// First IP address mentioned in a comment, preferring bracketed literals.
fn find_ip_in_comment(comment: &str) -> Option<IpAddr> {
    BRACKETED_IP
        .captures_iter(comment)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| m.as_str().parse::<IpAddr>().ok())
        .or_else(|| {
            BARE_IP
                .captures_iter(comment)
                .filter_map(|caps| caps.get(1))
                .find_map(|m| m.as_str().parse::<IpAddr>().ok())
        })
}

/// A hostname candidate inside a comment: the first word that is neither an
/// address nor a `key=value` pair.
fn find_host_in_comment(comment: &str) -> Option<String> {
    comment
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, ',' | ';')))
        .find(|w| {
            !w.is_empty()
                && !w.contains('=')
                && !w.starts_with('[')
                && parse_ip_literal(w).is_none()
        })
        .map(|w| w.to_string())
}

fn first_word<'a>(tokens: &[Token<'a>]) -> Option<&'a str> {
    tokens.iter().find_map(|t| match t {
        Token::Word(w) => Some(*w),
        Token::Comment(_) => None,
    })
}

struct FromClause {
    host: Option<String>,
    resolved: Option<String>,
    ip: Option<IpAddr>,
}

fn parse_from_clause(tokens: &[Token<'_>]) -> FromClause {
    let leading = match tokens.first() {
        Some(Token::Word(w)) => Some(*w),
        _ => None,
    };
    let comments: Vec<&str> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Comment(c) => Some(*c),
            Token::Word(_) => None,
        })
        .collect();

    let comment_ip = comments
        .iter()
        .enumerate()
        .find_map(|(i, c)| find_ip_in_comment(c).map(|ip| (i, ip)));

    let ip = comment_ip
        .map(|(_, ip)| ip)
        .or_else(|| leading.and_then(parse_ip_literal));

    // The resolved name sits next to the address, e.g. `(mail.example.org [192.0.2.1])`
    let resolved_source = comment_ip
        .map(|(i, _)| comments[i])
        .or_else(|| comments.first().copied());
    let resolved = resolved_source.and_then(find_host_in_comment);

    let host = match leading {
        Some(word) => Some(word.to_string()),
        None => comments.first().and_then(|c| find_host_in_comment(c)),
    };

    FromClause { host, resolved, ip }
}

/// Parse the date-time that follows the last `;` of a Received value.
pub fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    let without_comments = COMMENT.replace_all(text, " ");
    let cleaned = WHITESPACE.replace_all(without_comments.trim(), " ");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc2822(cleaned) {
        return Some(parsed);
    }

    // A weekday that disagrees with the date makes the strict parser bail
    let without_weekday = LEADING_WEEKDAY.replace(cleaned, "");
    if let Ok(parsed) = DateTime::parse_from_rfc2822(&without_weekday) {
        return Some(parsed);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(parsed);
    }
    for format in ZONED_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(&without_weekday, format) {
            return Some(parsed);
        }
        if let Ok(parsed) = DateTime::parse_from_str(cleaned, format) {
            return Some(parsed);
        }
    }
    let utc = FixedOffset::east_opt(0)?;
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&without_weekday, format) {
            return Some(utc.from_utc_datetime(&naive));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(cleaned, format) {
            return Some(utc.from_utc_datetime(&naive));
        }
    }

    None
}

/// Body of the first clause opened by `keyword`. Repeated keywords are ignored.
fn find_clause<'t, 'a>(
    clauses: &'t [(Keyword, Vec<Token<'a>>)],
    keyword: Keyword,
) -> Option<&'t [Token<'a>]> {
    clauses
        .iter()
        .find(|(k, _)| *k == keyword)
        .map(|(_, body)| body.as_slice())
}

fn clause_word(clauses: &[(Keyword, Vec<Token<'_>>)], keyword: Keyword) -> Option<String> {
    find_clause(clauses, keyword)
        .and_then(first_word)
        .map(|w| w.trim_end_matches(';').to_string())
        .filter(|w| !w.is_empty())
}

/// Parse one `Received:` header value into a [`HopRecord`].
pub fn parse_received(raw: &str) -> Result<HopRecord, HopParseError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(HopParseError::Empty);
    }

    let (clause_text, timestamp) = match value.rfind(';') {
        Some(position) => (&value[..position], parse_timestamp(&value[position + 1..])),
        None => (value, None),
    };

    let tokens = tokenize(clause_text);
    let comments: Vec<String> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Comment(c) => Some(c.to_string()),
            Token::Word(_) => None,
        })
        .collect();

    let mut clauses: Vec<(Keyword, Vec<Token<'_>>)> = Vec::new();
    for token in tokens {
        let keyword = match &token {
            Token::Word(w) => Keyword::parse(w),
            Token::Comment(_) => None,
        };
        match (keyword, clauses.last_mut()) {
            (Some(keyword), _) => clauses.push((keyword, Vec::new())),
            (None, Some((_, body))) => body.push(token),
            // Text before the first keyword is not attributable to a clause
            (None, None) => {}
        }
    }

    if clauses.is_empty() && timestamp.is_none() {
        return Err(HopParseError::NoClauses);
    }

    let from = find_clause(&clauses, Keyword::From).map(parse_from_clause);
    let record = HopRecord {
        from_host: from.as_ref().and_then(|f| f.host.clone()),
        from_resolved: from.as_ref().and_then(|f| f.resolved.clone()),
        from_ip: from.as_ref().and_then(|f| f.ip),
        by_host: clause_word(&clauses, Keyword::By),
        via: clause_word(&clauses, Keyword::Via),
        with_protocol: clause_word(&clauses, Keyword::With),
        id: clause_word(&clauses, Keyword::Id),
        for_recipient: clause_word(&clauses, Keyword::For)
            .map(|w| w.trim_matches(|c: char| c == '<' || c == '>').to_string())
            .filter(|w| !w.is_empty()),
        timestamp,
        comments,
        raw_line: raw.to_string(),
    };

    log::debug!(
        "Parsed hop from={:?} by={:?} with={:?} ip={:?}",
        record.from_host,
        record.by_host,
        record.with_protocol,
        record.from_ip
    );

    Ok(record)
}
