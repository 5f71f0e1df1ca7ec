//! Data-quality records emitted by every analysis stage.
//!
//! Nothing in the analysis is fatal. Whenever a stage skips input or spots
//! something suspicious it pushes a [`Diagnostic`] so the report can surface
//! the caveat instead of silently losing data.

use crate::received::HopParseError;
use crate::security::{AuthMechanism, Verdict};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Input was skipped
    Error,
    /// Input parsed but looks suspicious
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A header line with no usable `name: value` split.
    MalformedHeaderLine { line_number: usize, line: String },
    /// A folded line that appeared before any header.
    OrphanContinuation { line_number: usize, line: String },
    /// A `Received` value that could not be segmented at all.
    HopParseFailure {
        header_index: usize,
        reason: HopParseError,
        raw: String,
    },
    /// Timestamp went backwards between two consecutive hops.
    OutOfOrder {
        hop_index: usize,
        previous: String,
        current: String,
    },
    /// The sender of a hop is not the receiver of the hop before it.
    Discontinuity {
        hop_index: usize,
        expected: String,
        found: String,
    },
    /// Plain-text hop sandwiched between two encrypted hops.
    TlsGap { hop_index: usize },
    /// Two authentication headers disagree on one mechanism.
    ConflictingVerdict {
        mechanism: AuthMechanism,
        kept: Verdict,
        ignored: Verdict,
    },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::MalformedHeaderLine { .. }
            | Diagnostic::OrphanContinuation { .. }
            | Diagnostic::HopParseFailure { .. } => Severity::Error,
            _ => Severity::Warning,
        }
    }

    /// Every diagnostic is something the reader should see, anomalies included.
    pub(crate) fn log_level(&self) -> log::Level {
        log::Level::Warn
    }

    pub(crate) fn log(&self) {
        log::log!(self.log_level(), "{} ({:?})", self, self.severity());
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MalformedHeaderLine { line_number, line } => {
                write!(f, "line {}: skipped malformed header line '{}'", line_number, line)
            }
            Diagnostic::OrphanContinuation { line_number, line } => {
                write!(
                    f,
                    "line {}: continuation line with no preceding header '{}'",
                    line_number, line
                )
            }
            Diagnostic::HopParseFailure {
                header_index,
                reason,
                raw,
            } => write!(
                f,
                "Received header #{} could not be parsed ({}): '{}'",
                header_index, reason, raw
            ),
            Diagnostic::OutOfOrder {
                hop_index,
                previous,
                current,
            } => write!(
                f,
                "hop {} timestamp {} is earlier than previous hop {}",
                hop_index, current, previous
            ),
            Diagnostic::Discontinuity {
                hop_index,
                expected,
                found,
            } => write!(
                f,
                "hop {} claims to come from '{}' but previous hop was received by '{}'",
                hop_index, found, expected
            ),
            Diagnostic::TlsGap { hop_index } => write!(
                f,
                "hop {} was not encrypted although its neighbours were",
                hop_index
            ),
            Diagnostic::ConflictingVerdict {
                mechanism,
                kept,
                ignored,
            } => write!(
                f,
                "conflicting {} verdicts: kept '{}', ignored '{}'",
                mechanism, kept, ignored
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        let failure = Diagnostic::HopParseFailure {
            header_index: 0,
            reason: HopParseError::Empty,
            raw: String::new(),
        };
        assert_eq!(failure.severity(), Severity::Error);
        assert_eq!(Diagnostic::TlsGap { hop_index: 1 }.severity(), Severity::Warning);
    }

    #[test]
    fn test_anomalies_log_at_warn() {
        let anomalies = [
            Diagnostic::TlsGap { hop_index: 1 },
            Diagnostic::OutOfOrder {
                hop_index: 1,
                previous: "2024-01-01T10:00:00+00:00".to_string(),
                current: "2024-01-01T09:00:00+00:00".to_string(),
            },
            Diagnostic::MalformedHeaderLine {
                line_number: 3,
                line: "garbage".to_string(),
            },
        ];
        for diagnostic in &anomalies {
            assert_eq!(diagnostic.log_level(), log::Level::Warn);
        }
    }

    #[test]
    fn test_serialized_kind_tag() {
        let diagnostic = Diagnostic::Discontinuity {
            hop_index: 2,
            expected: "a.example.com".to_string(),
            found: "b.example.com".to_string(),
        };
        let json = serde_json::to_value(&diagnostic).unwrap();
        assert_eq!(json["kind"], "discontinuity");
        assert_eq!(json["hop_index"], 2);
    }
}
