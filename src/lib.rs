pub mod analyzer;
pub mod batch;
pub mod config;
pub mod diagnostics;
pub mod domain_utils;
pub mod encoded_words;
pub mod fetch;
pub mod geolocate;
pub mod graph;
pub mod headers;
pub mod hop_chain;
pub mod map;
pub mod message_summary;
pub mod received;
pub mod report;
pub mod security;

pub use analyzer::{Analysis, HopAnalyzer};
pub use config::Config;
pub use diagnostics::{Diagnostic, Severity};
pub use headers::{extract_headers, RawHeaders};
pub use hop_chain::{ChainedHop, HopChainBuilder};
pub use received::{parse_received, HopParseError, HopRecord};
pub use security::{AnnotatedHop, AuthMechanism, DeliveryPath, SecurityAnnotator, Verdict};
