//! Canonical text serializer for a parsed `Graph`.
//!
//! Produces a deterministic `digraph` document suitable for storage hashing
//! and round-trip: node order follows `graph.node_order`, attribute keys sort
//! lexically (mirrors `Attributes`'s `BTreeMap` backing), and values that would
//! be ambiguous as bare DOT tokens are quoted and escaped the same way
//! `parse_dot` unescapes them. Two successive parse→serialize passes are
//! idempotent.

use crate::{AttrValue, Attributes, Graph};

pub fn serialize_graph(graph: &Graph) -> String {
    let mut out = String::new();
    out.push_str("digraph ");
    out.push_str(&quote_identifier(&graph.id));
    out.push_str(" {\n");

    if let Some(block) = attribute_block(&graph.attrs) {
        out.push_str("  graph ");
        out.push_str(&block);
        out.push_str(";\n");
    }

    for node_id in &graph.node_order {
        let Some(node) = graph.nodes.get(node_id) else {
            continue;
        };
        out.push_str("  ");
        out.push_str(&quote_identifier(node_id));
        if let Some(block) = attribute_block(&node.attrs) {
            out.push(' ');
            out.push_str(&block);
        }
        out.push_str(";\n");
    }

    for edge in &graph.edges {
        out.push_str("  ");
        out.push_str(&quote_identifier(&edge.from));
        out.push_str(" -> ");
        out.push_str(&quote_identifier(&edge.to));
        if let Some(block) = attribute_block(&edge.attrs) {
            out.push(' ');
            out.push_str(&block);
        }
        out.push_str(";\n");
    }

    out.push_str("}\n");
    out
}

fn attribute_block(attrs: &Attributes) -> Option<String> {
    let values = attrs.values();
    if values.is_empty() {
        return None;
    }

    let mut block = String::from("[");
    for (index, (key, value)) in values.iter().enumerate() {
        if index > 0 {
            block.push_str(", ");
        }
        block.push_str(key);
        block.push('=');
        block.push_str(&format_value(value));
    }
    block.push(']');
    Some(block)
}

fn format_value(value: &AttrValue) -> String {
    match value {
        AttrValue::Boolean(value) => value.to_string(),
        AttrValue::Integer(value) => value.to_string(),
        AttrValue::Float(value) => value.to_string(),
        AttrValue::Duration(value) => value.raw.clone(),
        AttrValue::String(raw) => {
            if needs_quoting(raw) {
                quote_string(raw)
            } else {
                raw.clone()
            }
        }
    }
}

fn needs_quoting(raw: &str) -> bool {
    if raw.is_empty() || !is_bare_token(raw) {
        return true;
    }
    false
}

fn is_bare_token(raw: &str) -> bool {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-')
}

fn quote_identifier(raw: &str) -> String {
    if is_bare_token(raw) {
        raw.to_string()
    } else {
        quote_string(raw)
    }
}

fn quote_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
