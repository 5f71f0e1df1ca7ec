//! Graphviz DOT rendering of a delivery path.

use crate::security::{AnnotatedHop, DeliveryPath};
use std::fmt::Write as _;

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn node_label(hop: &AnnotatedHop) -> String {
    let record = &hop.record;
    let mut lines = vec![format!("hop {}", hop.index)];
    if let Some(from) = record.from_host() {
        lines.push(format!("from: {}", from));
    }
    if let Some(ip) = record.from_ip() {
        lines.push(format!("ip: {}", ip));
    }
    if let Some(by) = record.by_host() {
        lines.push(format!("by: {}", by));
    }
    if let Some(timestamp) = record.timestamp() {
        lines.push(timestamp.to_rfc2822());
    }
    lines
        .iter()
        .map(|line| escape(line))
        .collect::<Vec<_>>()
        .join("\\n")
}

fn edge_label(hop: &AnnotatedHop) -> String {
    let transport = if hop.tls_used { "TLS" } else { "plain" };
    match hop.record.with_protocol() {
        Some(protocol) => format!("{} ({})", escape(protocol), transport),
        None => transport.to_string(),
    }
}

/// Render the path as a DOT digraph: a node per hop, an edge per handoff.
/// Edges carry the receiving hop's protocol and transport security; edges
/// into a discontinuous hop are dashed.
pub fn render_dot(path: &DeliveryPath) -> String {
    let mut dot = String::from("digraph delivery_path {\n    rankdir=LR;\n    node [shape=box];\n");

    for hop in &path.hops {
        let color = if hop.out_of_order { ", color=red" } else { "" };
        let _ = writeln!(dot, "    hop{} [label=\"{}\"{}];", hop.index, node_label(hop), color);
    }

    for pair in path.hops.windows(2) {
        let (sender, receiver) = (&pair[0], &pair[1]);
        let style = if receiver.discontinuity { ", style=dashed" } else { "" };
        let _ = writeln!(
            dot,
            "    hop{} -> hop{} [label=\"{}\"{}];",
            sender.index,
            receiver.index,
            edge_label(receiver),
            style
        );
    }

    dot.push_str("}\n");
    dot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::HopAnalyzer;

    #[test]
    fn test_nodes_and_edges() {
        let analysis = HopAnalyzer::default().analyze(
            "Received: from gateway by inbox with ESMTPS; Mon, 1 Jan 2024 10:00:01 +0000\n\
             Received: from laptop by relay with SMTP; Mon, 1 Jan 2024 10:00:00 +0000\n\n",
        );
        let dot = render_dot(&analysis.path);

        assert!(dot.starts_with("digraph delivery_path {"));
        assert!(dot.contains("hop0 [label=\"hop 0\\nfrom: laptop"));
        assert!(dot.contains("by: inbox"));
        assert!(dot.contains("hop0 -> hop1 [label=\"ESMTPS (TLS)\", style=dashed];"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape(r#"a "b" \c"#), r#"a \"b\" \\c"#);
    }

    #[test]
    fn test_empty_path() {
        let dot = render_dot(&DeliveryPath::default());
        assert!(!dot.contains("->"));
    }
}
