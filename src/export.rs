//! Cypher DUMP export: serialize a graph store as `MERGE` statements.
//!
//! The script is idempotent: loading it twice into Neo4j yields the same
//! graph as loading it once, and loading it over an existing twin merges
//! rather than duplicates.
//!
//! ```text
//! GraphStore → export_cypher_dump() → MERGE statements
//!   → cypher-shell, or paste into Neo4j Browser
//! ```

use std::collections::HashMap;
use std::io::Write;

use crate::cypher::{ident, literal, map_literal};
use crate::model::*;
use crate::storage::{GraphStore, KEY_PROPERTY};
use crate::{Error, Result};

/// Write every node and relationship of `store` as a MERGE script.
///
/// Nodes are ordered by (primary label, key) and relationships by their
/// endpoint keys and type, so the output is stable across runs.
pub async fn export_cypher_dump<G: GraphStore>(store: &G, writer: &mut dyn Write) -> Result<()> {
    let mut nodes = store.all_nodes().await?;
    let rels = store.all_relationships().await?;
    nodes.sort_by(|a, b| (a.labels.first(), &a.key).cmp(&(b.labels.first(), &b.key)));

    writeln!(writer, "// genesis Cypher DUMP")?;
    writeln!(writer, "// Nodes: {}", nodes.len())?;
    writeln!(writer, "// Relationships: {}", rels.len())?;
    writeln!(writer)?;

    for node in &nodes {
        let Some((label, extra)) = node.labels.split_first() else {
            return Err(Error::Storage(format!("node {} has no label", node.id)));
        };
        write!(
            writer,
            "MERGE (n:{} {{{KEY_PROPERTY}: {}}}) SET n += {}",
            ident(label),
            literal(&Value::from(node.key.as_str())),
            map_literal(&node.properties)
        )?;
        for l in extra {
            write!(writer, ", n:{}", ident(l))?;
        }
        writeln!(writer, ";")?;
    }

    writeln!(writer)?;
    writeln!(writer, "// Relationships")?;

    let by_id: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();
    let mut edges: Vec<(&Node, &Node, &Relationship)> = rels
        .iter()
        .filter_map(|r| Some((*by_id.get(&r.src)?, *by_id.get(&r.dst)?, r)))
        .collect();
    edges.sort_by(|a, b| (&a.0.key, &a.1.key, &a.2.rel_type).cmp(&(&b.0.key, &b.1.key, &b.2.rel_type)));

    for (src, dst, rel) in edges {
        let (Some(src_label), Some(dst_label)) = (src.labels.first(), dst.labels.first()) else {
            continue;
        };
        writeln!(
            writer,
            "MATCH (a:{} {{{KEY_PROPERTY}: {}}}), (b:{} {{{KEY_PROPERTY}: {}}}) MERGE (a)-[r:{}]->(b) SET r += {};",
            ident(src_label),
            literal(&Value::from(src.key.as_str())),
            ident(dst_label),
            literal(&Value::from(dst.key.as_str())),
            ident(&rel.rel_type),
            map_literal(&rel.properties),
        )?;
    }

    Ok(())
}
