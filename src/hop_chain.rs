//! Orders parsed hops into a delivery path.
//!
//! Every relay prepends its `Received` header, so header order is the reverse
//! of delivery order. Reversal is the only ordering rule: relay clocks are not
//! trustworthy enough to re-sort by, so timestamp and host-name disagreements
//! are flagged on the hop instead.

use crate::diagnostics::Diagnostic;
use crate::domain_utils::DomainUtils;
use crate::received::{parse_ip_literal, HopRecord};
use chrono::Duration;
use serde::Serialize;

/// A hop in delivery order with its consistency flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainedHop {
    pub record: HopRecord,
    /// Timestamp is earlier than the previous hop's.
    pub out_of_order: bool,
    /// Sender does not match the previous hop's receiver.
    pub discontinuity: bool,
}

pub struct HopChainBuilder {
    clock_skew_tolerance: Duration,
}

impl Default for HopChainBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl HopChainBuilder {
    pub fn new(clock_skew_tolerance_seconds: i64) -> Self {
        Self {
            clock_skew_tolerance: Duration::try_seconds(clock_skew_tolerance_seconds.max(0))
                .unwrap_or(Duration::MAX),
        }
    }

    /// Turn records in header order (most recent first) into a path that
    /// starts at the origin.
    pub fn build(&self, records: Vec<HopRecord>) -> (Vec<ChainedHop>, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let mut hops: Vec<ChainedHop> = records
            .into_iter()
            .rev()
            .map(|record| ChainedHop {
                record,
                out_of_order: false,
                discontinuity: false,
            })
            .collect();

        for index in 1..hops.len() {
            let (before, after) = hops.split_at_mut(index);
            let earlier = &before[index - 1].record;
            let later = &mut after[0];

            if let (Some(previous), Some(current)) =
                (earlier.timestamp(), later.record.timestamp())
            {
                // A tolerance reaching past the representable range covers any gap
                let behind = current
                    .checked_add_signed(self.clock_skew_tolerance)
                    .is_some_and(|latest| latest < previous);
                if behind {
                    later.out_of_order = true;
                    diagnostics.push(Diagnostic::OutOfOrder {
                        hop_index: index,
                        previous: previous.to_rfc3339(),
                        current: current.to_rfc3339(),
                    });
                }
            }

            if let (Some(by_host), Some(from_host)) = (earlier.by_host(), later.record.from_host())
            {
                if !Self::is_continuous(by_host, &later.record) {
                    later.discontinuity = true;
                    diagnostics.push(Diagnostic::Discontinuity {
                        hop_index: index,
                        expected: by_host.to_string(),
                        found: from_host.to_string(),
                    });
                }
            }
        }

        for diagnostic in &diagnostics {
            diagnostic.log();
        }
        log::debug!("Built hop chain of {} hops", hops.len());

        (hops, diagnostics)
    }

    /// The previous receiver may appear as the stated sender, as the name the
    /// next receiver resolved, or as the connecting address.
    fn is_continuous(previous_by: &str, later: &HopRecord) -> bool {
        if later
            .from_host()
            .is_some_and(|host| DomainUtils::hosts_match(previous_by, host))
        {
            return true;
        }
        if later
            .from_resolved()
            .is_some_and(|resolved| DomainUtils::hosts_match(previous_by, resolved))
        {
            return true;
        }
        matches!(
            (parse_ip_literal(previous_by), later.from_ip()),
            (Some(by_ip), Some(from_ip)) if by_ip == from_ip
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::received::parse_received;

    fn records(values: &[&str]) -> Vec<HopRecord> {
        values.iter().map(|v| parse_received(v).unwrap()).collect()
    }

    #[test]
    fn test_chain_is_reversed_header_order() {
        let input = records(&[
            "from b.example.com by c.example.com with ESMTP; Mon, 1 Jan 2024 10:02:00 +0000",
            "from a.example.com by b.example.com with ESMTP; Mon, 1 Jan 2024 10:01:00 +0000",
            "from origin.example.com by a.example.com with ESMTP; Mon, 1 Jan 2024 10:00:00 +0000",
        ]);
        let expected: Vec<HopRecord> = input.iter().rev().cloned().collect();

        let (hops, diagnostics) = HopChainBuilder::default().build(input);
        assert!(diagnostics.is_empty());
        assert_eq!(hops.len(), 3);
        for (hop, record) in hops.iter().zip(expected.iter()) {
            assert_eq!(&hop.record, record);
            assert!(!hop.out_of_order);
            assert!(!hop.discontinuity);
        }
        assert_eq!(hops[0].record.by_host(), Some("a.example.com"));
    }

    #[test]
    fn test_discontinuity_is_flagged_on_later_hop() {
        let input = records(&[
            "from b.example.com by mx.example.net; Mon, 1 Jan 2024 10:01:00 +0000",
            "from origin.example.com by a.example.com; Mon, 1 Jan 2024 10:00:00 +0000",
        ]);
        let (hops, diagnostics) = HopChainBuilder::default().build(input);
        assert!(!hops[0].discontinuity);
        assert!(hops[1].discontinuity);
        assert_eq!(
            diagnostics,
            vec![Diagnostic::Discontinuity {
                hop_index: 1,
                expected: "a.example.com".to_string(),
                found: "b.example.com".to_string(),
            }]
        );
    }

    #[test]
    fn test_resolved_name_and_truncation_keep_continuity() {
        let input = records(&[
            "from relay (relay.example.com [192.0.2.5]) by mx.example.net; Mon, 1 Jan 2024 10:01:00 +0000",
            "from origin.example.com by RELAY.example.com.; Mon, 1 Jan 2024 10:00:00 +0000",
        ]);
        let (hops, diagnostics) = HopChainBuilder::default().build(input);
        assert!(!hops[1].discontinuity);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_out_of_order_is_flagged_without_resorting() {
        let input = records(&[
            "from a.example.com by b.example.com; Mon, 1 Jan 2024 09:00:00 +0000",
            "from origin.example.com by a.example.com; Mon, 1 Jan 2024 10:00:00 +0000",
        ]);
        let (hops, diagnostics) = HopChainBuilder::default().build(input);
        assert_eq!(hops[0].record.by_host(), Some("a.example.com"));
        assert!(hops[1].out_of_order);
        assert!(matches!(
            diagnostics[0],
            Diagnostic::OutOfOrder { hop_index: 1, .. }
        ));
    }

    #[test]
    fn test_clock_skew_tolerance() {
        let input = records(&[
            "by b.example.com; Mon, 1 Jan 2024 09:59:30 +0000",
            "by a.example.com; Mon, 1 Jan 2024 10:00:00 +0000",
        ]);
        let (hops, _) = HopChainBuilder::new(60).build(input.clone());
        assert!(!hops[1].out_of_order);
        let (hops, _) = HopChainBuilder::new(0).build(input);
        assert!(hops[1].out_of_order);
    }

    #[test]
    fn test_non_ascii_hosts_compare_without_failing() {
        let input = records(&[
            "from abcdé.example by mx.example.com; Mon, 1 Jan 2024 10:01:00 +0000",
            "from origin.example by abcdé.example; Mon, 1 Jan 2024 10:00:00 +0000",
        ]);
        let (hops, diagnostics) = HopChainBuilder::default().build(input);
        assert!(!hops[1].discontinuity);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_huge_tolerance_accepts_any_gap() {
        let input = records(&[
            "by b.example.com; Mon, 1 Jan 2024 09:00:00 +0000",
            "by a.example.com; Mon, 1 Jan 2024 10:00:00 +0000",
        ]);
        for tolerance in [1_000_000_000_000_000, i64::MAX] {
            let (hops, diagnostics) = HopChainBuilder::new(tolerance).build(input.clone());
            assert!(!hops[1].out_of_order);
            assert!(diagnostics.is_empty());
        }
    }

    #[test]
    fn test_missing_fields_skip_checks() {
        let input = records(&["by b.example.com", "from x by a.example.com"]);
        let (hops, diagnostics) = HopChainBuilder::default().build(input);
        assert_eq!(hops.len(), 2);
        assert!(diagnostics.is_empty());
    }
}
