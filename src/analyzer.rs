use crate::config::AnalysisConfig;
use crate::diagnostics::Diagnostic;
use crate::headers::{extract_headers, RawHeaders};
use crate::hop_chain::HopChainBuilder;
use crate::message_summary::MessageSummary;
use crate::received::parse_received;
use crate::security::{DeliveryPath, SecurityAnnotator};
use serde::Serialize;

/// Everything learned from one message's header block.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Analysis {
    #[serde(skip)]
    pub headers: RawHeaders,
    pub summary: MessageSummary,
    pub path: DeliveryPath,
    pub diagnostics: Vec<Diagnostic>,
}

impl Analysis {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity() == crate::diagnostics::Severity::Error)
    }
}

/// Runs the extractor, parser, chain builder and annotator in sequence.
pub struct HopAnalyzer {
    chain_builder: HopChainBuilder,
    annotator: SecurityAnnotator,
}

impl Default for HopAnalyzer {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}

impl HopAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            chain_builder: HopChainBuilder::new(config.clock_skew_tolerance_seconds),
            annotator: SecurityAnnotator::new(
                config.tls_protocol_tokens.clone(),
                config.detect_tls_comments,
            ),
        }
    }

    /// Analyze raw message text. Never fails: whatever could not be used
    /// shows up in [`Analysis::diagnostics`].
    pub fn analyze(&self, source: &str) -> Analysis {
        let (headers, mut diagnostics) = extract_headers(source);

        let mut records = Vec::new();
        let mut unparsed = 0;
        for (header_index, raw) in headers.get_all("Received").into_iter().enumerate() {
            match parse_received(raw) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    let diagnostic = Diagnostic::HopParseFailure {
                        header_index,
                        reason,
                        raw: raw.to_string(),
                    };
                    diagnostic.log();
                    diagnostics.push(diagnostic);
                    unparsed += 1;
                }
            }
        }

        let (chain, chain_diagnostics) = self.chain_builder.build(records);
        diagnostics.extend(chain_diagnostics);

        let (path, security_diagnostics) = self.annotator.annotate(chain, &headers, unparsed);
        diagnostics.extend(security_diagnostics);

        log::info!(
            "Reconstructed {} hops ({} unparsed, {} diagnostics)",
            path.len(),
            unparsed,
            diagnostics.len()
        );

        Analysis {
            summary: MessageSummary::from_headers(&headers),
            headers,
            path,
            diagnostics,
        }
    }
}
