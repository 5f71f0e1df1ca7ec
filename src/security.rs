//! Security Annotator
//!
//! Attaches TLS-in-transit flags and the SPF, DKIM and DMARC verdicts stated
//! in `Authentication-Results` and `Received-SPF` headers to the hop chain.
//! Verdict tokens are read as stated; nothing is re-verified.
//!
//! Authentication headers are not scoped to a hop. Verdicts are therefore
//! exposed twice: once for the path as a whole (every header, most recent
//! wins) and once on the final hop (only headers added by the final
//! receiver).

use crate::diagnostics::Diagnostic;
use crate::domain_utils::DomainUtils;
use crate::headers::RawHeaders;
use crate::hop_chain::ChainedHop;
use crate::received::HopRecord;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

lazy_static! {
    static ref VERDICT_PAIR: Regex =
        Regex::new(r"(?i)(?:^|[\s;(])(spf|dkim|dmarc)\s*=\s*([a-z0-9_.-]+)").unwrap();
    static ref SPF_RECEIVER: Regex = Regex::new(r"(?i)\breceiver=([^\s;]+)").unwrap();
    static ref TLS_COMMENT: Regex = Regex::new(
        r"(?i)\b(?:using\s+tls\w*|version=tls\w*|tlsv1(?:\.[0-3])?|tls1_[0-3]|starttls)\b"
    )
    .unwrap();
}

/// Protocol substrings that indicate an encrypted transfer.
pub const DEFAULT_TLS_TOKENS: &[&str] = &["esmtps", "smtps", "lmtps", "tls", "ssl", "encrypted"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMechanism {
    Spf,
    Dkim,
    Dmarc,
}

impl AuthMechanism {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "spf" => Some(AuthMechanism::Spf),
            "dkim" => Some(AuthMechanism::Dkim),
            "dmarc" => Some(AuthMechanism::Dmarc),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMechanism::Spf => write!(f, "spf"),
            AuthMechanism::Dkim => write!(f, "dkim"),
            AuthMechanism::Dmarc => write!(f, "dmarc"),
        }
    }
}

/// A verdict token as stated by an authenticating server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Verdict {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    None,
    TempError,
    PermError,
    /// Any other literal, lowercased
    Other(String),
}

impl Verdict {
    pub fn from_token(token: &str) -> Self {
        let lower = token.trim().to_ascii_lowercase();
        match lower.as_str() {
            "pass" => Verdict::Pass,
            "fail" => Verdict::Fail,
            "softfail" => Verdict::SoftFail,
            "neutral" => Verdict::Neutral,
            "none" => Verdict::None,
            "temperror" => Verdict::TempError,
            "permerror" => Verdict::PermError,
            _ => Verdict::Other(lower),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::SoftFail => "softfail",
            Verdict::Neutral => "neutral",
            Verdict::None => "none",
            Verdict::TempError => "temperror",
            Verdict::PermError => "permerror",
            Verdict::Other(literal) => literal,
        }
    }
}

impl From<String> for Verdict {
    fn from(token: String) -> Self {
        Verdict::from_token(&token)
    }
}

impl From<Verdict> for String {
    fn from(verdict: Verdict) -> Self {
        verdict.as_str().to_string()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Verdict per mechanism; mechanisms that were never stated are absent.
pub type AuthVerdicts = BTreeMap<AuthMechanism, Verdict>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthSource {
    AuthenticationResults,
    ReceivedSpf,
}

/// Verdicts read from one authentication header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthResult {
    pub source: AuthSource,
    /// The server that stated the verdicts, when the header names it.
    pub authserv_id: Option<String>,
    pub verdicts: AuthVerdicts,
    pub raw: String,
}

/// Scan `key=token` pairs for the three mechanisms. The first occurrence of a
/// mechanism wins.
pub fn scan_verdicts(value: &str) -> AuthVerdicts {
    let mut verdicts = AuthVerdicts::new();
    for caps in VERDICT_PAIR.captures_iter(value) {
        if let (Some(name), Some(token)) = (caps.get(1), caps.get(2)) {
            if let Some(mechanism) = AuthMechanism::parse(name.as_str()) {
                verdicts
                    .entry(mechanism)
                    .or_insert_with(|| Verdict::from_token(token.as_str()));
            }
        }
    }
    verdicts
}

/// Parse an `Authentication-Results` value.
pub fn parse_authentication_results(value: &str) -> AuthResult {
    let authserv_id = value
        .split(';')
        .next()
        .and_then(|first| first.split_whitespace().next())
        .filter(|id| !id.contains('='))
        .map(|id| id.to_string());

    AuthResult {
        source: AuthSource::AuthenticationResults,
        authserv_id,
        verdicts: scan_verdicts(value),
        raw: value.to_string(),
    }
}

/// Parse a `Received-SPF` value. The verdict is either an explicit `spf=`
/// pair or the leading result word.
pub fn parse_received_spf(value: &str) -> AuthResult {
    let mut verdicts = scan_verdicts(value);
    verdicts.retain(|mechanism, _| *mechanism == AuthMechanism::Spf);
    if verdicts.is_empty() {
        if let Some(word) = value.split_whitespace().next() {
            let word = word.trim_end_matches(|c: char| c == ';' || c == ',');
            if !word.is_empty() && word.chars().all(|c| c.is_ascii_alphabetic()) {
                verdicts.insert(AuthMechanism::Spf, Verdict::from_token(word));
            }
        }
    }

    AuthResult {
        source: AuthSource::ReceivedSpf,
        authserv_id: SPF_RECEIVER
            .captures(value)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string()),
        verdicts,
        raw: value.to_string(),
    }
}

/// A hop in delivery order with its security annotations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedHop {
    /// Position in the path, 0 = origin.
    pub index: usize,
    #[serde(flatten)]
    pub record: HopRecord,
    pub tls_used: bool,
    /// Only populated on the final hop.
    pub auth_verdicts: AuthVerdicts,
    pub out_of_order: bool,
    pub discontinuity: bool,
}

/// The reconstructed route of a message, origin first.
///
/// Authentication headers are not scoped to a hop, so verdicts are offered
/// two ways: `path_verdicts` aggregates every header (most recent wins) and
/// the final hop carries only what its own receiver stated. Earlier relays
/// that authenticated the message are not attributed to their hop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryPath {
    pub hops: Vec<AnnotatedHop>,
    /// Verdicts from every authentication header, most recent wins.
    pub path_verdicts: AuthVerdicts,
    pub auth_results: Vec<AuthResult>,
    /// `Received` headers that could not be parsed and are not in `hops`.
    pub unparsed_hops: usize,
}

impl DeliveryPath {
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn origin(&self) -> Option<&AnnotatedHop> {
        self.hops.first()
    }

    pub fn final_hop(&self) -> Option<&AnnotatedHop> {
        self.hops.last()
    }

    /// Verdicts bound to the final receiver, empty for an empty path.
    pub fn last_hop_verdicts(&self) -> AuthVerdicts {
        self.final_hop()
            .map(|hop| hop.auth_verdicts.clone())
            .unwrap_or_default()
    }
}

pub struct SecurityAnnotator {
    tls_tokens: Vec<String>,
    detect_tls_comments: bool,
}

impl Default for SecurityAnnotator {
    fn default() -> Self {
        Self::new(
            DEFAULT_TLS_TOKENS.iter().map(|t| t.to_string()).collect(),
            true,
        )
    }
}

impl SecurityAnnotator {
    pub fn new(tls_tokens: Vec<String>, detect_tls_comments: bool) -> Self {
        Self {
            tls_tokens: tls_tokens.into_iter().map(|t| t.to_lowercase()).collect(),
            detect_tls_comments,
        }
    }

    pub fn tls_used(&self, record: &HopRecord) -> bool {
        let by_protocol = record.with_protocol().is_some_and(|protocol| {
            let protocol = protocol.to_lowercase();
            self.tls_tokens
                .iter()
                .any(|token| protocol.contains(token.as_str()))
        });

        by_protocol
            || (self.detect_tls_comments
                && record
                    .comments()
                    .iter()
                    .any(|comment| TLS_COMMENT.is_match(comment)))
    }

    /// Authentication headers in source order, most recent first.
    pub fn collect_auth_results(headers: &RawHeaders) -> Vec<AuthResult> {
        headers
            .fields()
            .iter()
            .filter_map(|field| {
                if field.name.eq_ignore_ascii_case("Authentication-Results") {
                    Some(parse_authentication_results(&field.value))
                } else if field.name.eq_ignore_ascii_case("Received-SPF") {
                    Some(parse_received_spf(&field.value))
                } else {
                    None
                }
            })
            .collect()
    }

    fn aggregate(results: &[AuthResult], diagnostics: &mut Vec<Diagnostic>) -> AuthVerdicts {
        let mut aggregate = AuthVerdicts::new();
        for result in results {
            for (mechanism, verdict) in &result.verdicts {
                match aggregate.get(mechanism) {
                    None => {
                        aggregate.insert(*mechanism, verdict.clone());
                    }
                    Some(kept) if kept != verdict => {
                        diagnostics.push(Diagnostic::ConflictingVerdict {
                            mechanism: *mechanism,
                            kept: kept.clone(),
                            ignored: verdict.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        aggregate
    }

    /// Verdicts stated by the final receiver. Headers whose authserv-id names
    /// the final hop's receiving host (or a parent domain of it) are used;
    /// without such a header the topmost header of each kind stands in, since
    /// the final receiver adds its headers on top.
    fn final_hop_verdicts(results: &[AuthResult], final_hop: &HopRecord) -> AuthVerdicts {
        let matching: Vec<&AuthResult> = match final_hop.by_host() {
            Some(by_host) => results
                .iter()
                .filter(|result| {
                    result.authserv_id.as_deref().is_some_and(|id| {
                        DomainUtils::hosts_match(id, by_host)
                            || DomainUtils::is_subdomain_of(by_host, id)
                    })
                })
                .collect(),
            None => Vec::new(),
        };

        let chosen: Vec<&AuthResult> = if matching.is_empty() {
            [AuthSource::AuthenticationResults, AuthSource::ReceivedSpf]
                .iter()
                .filter_map(|source| results.iter().find(|r| r.source == *source))
                .collect()
        } else {
            matching
        };

        let mut verdicts = AuthVerdicts::new();
        for result in chosen {
            for (mechanism, verdict) in &result.verdicts {
                verdicts.entry(*mechanism).or_insert_with(|| verdict.clone());
            }
        }
        verdicts
    }

    pub fn annotate(
        &self,
        chain: Vec<ChainedHop>,
        headers: &RawHeaders,
        unparsed_hops: usize,
    ) -> (DeliveryPath, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let auth_results = Self::collect_auth_results(headers);
        let path_verdicts = Self::aggregate(&auth_results, &mut diagnostics);

        let last_index = chain.len().saturating_sub(1);
        let final_verdicts = chain
            .last()
            .map(|hop| Self::final_hop_verdicts(&auth_results, &hop.record))
            .unwrap_or_default();

        let hops: Vec<AnnotatedHop> = chain
            .into_iter()
            .enumerate()
            .map(|(index, hop)| AnnotatedHop {
                index,
                tls_used: self.tls_used(&hop.record),
                auth_verdicts: if index == last_index {
                    final_verdicts.clone()
                } else {
                    AuthVerdicts::new()
                },
                out_of_order: hop.out_of_order,
                discontinuity: hop.discontinuity,
                record: hop.record,
            })
            .collect();

        for window in hops.windows(3) {
            if window[0].tls_used && !window[1].tls_used && window[2].tls_used {
                diagnostics.push(Diagnostic::TlsGap {
                    hop_index: window[1].index,
                });
            }
        }

        for diagnostic in &diagnostics {
            diagnostic.log();
        }

        (
            DeliveryPath {
                hops,
                path_verdicts,
                auth_results,
                unparsed_hops,
            },
            diagnostics,
        )
    }
}
