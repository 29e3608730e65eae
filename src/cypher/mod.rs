//! # Cypher Rendering
//!
//! Merge and index statements as parameterised Cypher, plus literal
//! rendering for dumps. Labels, relationship types and index names cannot be
//! parameters, so they are backtick-quoted here; everything else travels as
//! a parameter. Pure functions, no I/O.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::index::VectorIndexSpec;
use crate::model::{PropertyMap, Value};
use crate::storage::KEY_PROPERTY;
use crate::tx::WriteOp;

/// One statement of a Neo4j HTTP transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    #[serde(rename = "statement")]
    pub text: String,
    #[serde(rename = "parameters")]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), params: serde_json::Map::new() }
    }

    pub fn param(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

/// Backtick-quoted identifier.
pub fn ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn props_json(props: &PropertyMap) -> serde_json::Value {
    let sorted: BTreeMap<&String, serde_json::Value> = props.iter().map(|(k, v)| (k, v.to_json())).collect();
    serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
}

/// `MERGE` on `(label, key)`, then `SET +=` and extra labels.
pub fn merge_node(label: &str, key: &str, extra_labels: &[String], props: &PropertyMap) -> Statement {
    let mut text = format!("MERGE (n:{} {{{KEY_PROPERTY}: $key}}) SET n += $props", ident(label));
    for extra in extra_labels {
        text.push_str(&format!(", n:{}", ident(extra)));
    }
    Statement::new(text).param("key", key).param("props", props_json(props))
}

/// `MERGE` on `(src, dst, type)` between nodes matched by key.
pub fn merge_edge(src_label: &str, src: &str, dst_label: &str, dst: &str, rel_type: &str, props: &PropertyMap) -> Statement {
    let text = format!(
        "MATCH (a:{} {{{KEY_PROPERTY}: $src}}) MATCH (b:{} {{{KEY_PROPERTY}: $dst}}) \
         MERGE (a)-[r:{}]->(b) SET r += $props",
        ident(src_label),
        ident(dst_label),
        ident(rel_type)
    );
    Statement::new(text).param("src", src).param("dst", dst).param("props", props_json(props))
}

pub fn write_op(op: &WriteOp) -> Statement {
    match op {
        WriteOp::MergeNode { label, key, extra_labels, props } => merge_node(label, key, extra_labels, props),
        WriteOp::MergeEdge { edge, src_label, dst_label, props } => {
            merge_edge(src_label, &edge.src, dst_label, &edge.dst, &edge.rel_type, props)
        }
    }
}

pub fn key_constraint(label: &str) -> Statement {
    let name = format!("{}_key_unique", label.to_ascii_lowercase());
    Statement::new(format!(
        "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{KEY_PROPERTY} IS UNIQUE",
        ident(&name),
        ident(label)
    ))
}

/// `CREATE VECTOR INDEX ... IF NOT EXISTS` (Neo4j 5.x).
pub fn vector_index(spec: &VectorIndexSpec) -> Statement {
    Statement::new(format!(
        "CREATE VECTOR INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{}) \
         OPTIONS {{indexConfig: {{`vector.dimensions`: {}, `vector.similarity_function`: '{}'}}}}",
        ident(&spec.name),
        ident(&spec.label),
        ident(&spec.property),
        spec.dimensions,
        spec.similarity.as_str()
    ))
}

/// Value as a Cypher literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format!("{f:?}"),
        Value::Float(_) => "null".to_string(),
        Value::String(s) => string_literal(s),
        Value::List(items) => format!("[{}]", items.iter().map(literal).collect::<Vec<_>>().join(", ")),
        Value::Map(m) => map_literal(m),
        Value::Vector(v) => {
            let items: Vec<String> = v.iter().map(|f| format!("{:?}", *f as f64)).collect();
            format!("[{}]", items.join(", "))
        }
        Value::DateTime(dt) => format!("datetime({})", string_literal(&dt.to_rfc3339())),
    }
}

/// Map literal with keys in sorted order.
pub fn map_literal(props: &PropertyMap) -> String {
    let mut keys: Vec<&String> = props.keys().collect();
    keys.sort();
    let parts: Vec<String> = keys.into_iter().map(|k| format!("{}: {}", ident(k), literal(&props[k]))).collect();
    format!("{{{}}}", parts.join(", "))
}

fn string_literal(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('\'', "\\'").replace('\n', "\\n").replace('\r', "\\r");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::props;

    #[test]
    fn test_merge_node_statement() {
        let s = merge_node("Table", "public.orders", &["JunctionTable".to_string()], &props([("purpose", "x")]));
        assert_eq!(s.text, "MERGE (n:`Table` {key: $key}) SET n += $props, n:`JunctionTable`");
        assert_eq!(s.params["key"], "public.orders");
        assert_eq!(s.params["props"]["purpose"], "x");
    }

    #[test]
    fn test_merge_edge_statement() {
        let s = merge_edge("Table", "a", "Table", "b", "EXPLICIT_FK_TO", &PropertyMap::new());
        assert!(s.text.contains("MERGE (a)-[r:`EXPLICIT_FK_TO`]->(b)"));
        assert_eq!(s.params["src"], "a");
        assert_eq!(s.params["dst"], "b");
    }

    #[test]
    fn test_vector_index_statement() {
        let s = vector_index(&VectorIndexSpec::cosine("table_embeddings", "Table", "embedding", 1536));
        assert!(s.text.starts_with("CREATE VECTOR INDEX `table_embeddings` IF NOT EXISTS FOR (n:`Table`)"));
        assert!(s.text.contains("`vector.dimensions`: 1536"));
        assert!(s.text.contains("'cosine'"));
    }

    #[test]
    fn test_literal() {
        assert_eq!(literal(&Value::String("it's".into())), "'it\\'s'");
        assert_eq!(literal(&Value::Int(42)), "42");
        assert_eq!(literal(&Value::Float(3.0)), "3.0");
        assert_eq!(literal(&Value::Bool(true)), "true");
        assert_eq!(literal(&Value::Null), "null");
        assert_eq!(literal(&Value::Vector(vec![0.5, 1.0])), "[0.5, 1.0]");
        assert_eq!(ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_map_literal_is_sorted() {
        let m = props([("b", 2), ("a", 1)]);
        assert_eq!(map_literal(&m), "{`a`: 1, `b`: 2}");
    }
}
