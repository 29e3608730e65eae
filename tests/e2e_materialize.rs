//! Materialization is an idempotent merge: the same input always converges
//! on the same graph.

use chrono::{TimeZone, Utc};
use genesis::export::export_cypher_dump;
use genesis::introspect::build_extraction;
use genesis::source::RawTable;
use genesis::storage::MemoryGraph;
use genesis::{
    CandidateRelation, GenesisConfig, GraphMaterializer, GraphStore, QualifiedName, SemanticProfile, Stereotype,
    TableDescriptor, ValidationStatus, Value,
};
use pretty_assertions::assert_eq;

const DIMS: usize = 3;

fn config() -> GenesisConfig {
    let mut config = GenesisConfig::default();
    config.models.embedding_dimensions = DIMS;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config
}

fn name(table: &str) -> QualifiedName {
    QualifiedName::new("public", table)
}

fn tables() -> Vec<TableDescriptor> {
    build_extraction(vec![
        RawTable::new("public", "customers").column("id", "integer", false).column("name", "text", false).primary_key(["id"]),
        RawTable::new("public", "products").column("id", "integer", false).primary_key(["id"]),
        RawTable::new("public", "orders")
            .column("id", "integer", false)
            .column("customer_id", "integer", false)
            .primary_key(["id"])
            .foreign_key_with_actions(["customer_id"], "customers", ["id"], "CASCADE", "NO ACTION"),
        RawTable::new("public", "orders_lines")
            .column("order_id", "integer", false)
            .column("product_id", "integer", false)
            .primary_key(["order_id", "product_id"])
            .foreign_key(["order_id"], "orders", ["id"])
            .foreign_key(["product_id"], "products", ["id"]),
        RawTable::new("public", "invoices")
            .column("id", "integer", false)
            .column("customer_id", "integer", false)
            .primary_key(["id"]),
    ])
    .tables
}

fn profile(table: &str, stereotype: &str, embedding: Vec<f32>) -> SemanticProfile {
    SemanticProfile {
        entity: name(table),
        purpose: format!("Holds {table}"),
        business_logic: Some("none".into()),
        stereotype: Stereotype::new(stereotype),
        summary: format!("{table} summary"),
        confidence: 0.75,
        embedding,
        model: "test-model".into(),
        dossier_digest: format!("digest-{table}"),
        synthesized_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
    }
}

fn profiles() -> Vec<SemanticProfile> {
    vec![
        profile("customers", "master_data", vec![1.0, 0.0, 0.0]),
        profile("orders", "transaction", vec![0.0, 1.0, 0.0]),
        profile("orders_lines", "junction", vec![0.0, 0.0, 1.0]),
        profile("invoices", "transaction", vec![0.9, 0.1, 0.0]),
    ]
}

fn relations() -> Vec<CandidateRelation> {
    let mut validated = CandidateRelation::pending(name("invoices"), name("customers"), 0.93);
    validated.status = ValidationStatus::Validated;
    validated.relation_type = Some("REFERENCES".into());
    validated.via = Some(("customer_id".into(), "id".into()));
    validated.confidence = Some(0.8);
    let rejected = CandidateRelation { status: ValidationStatus::Rejected, ..CandidateRelation::pending(name("products"), name("invoices"), 0.9) };
    vec![validated, rejected]
}

async fn dump(graph: &MemoryGraph) -> String {
    let mut out = Vec::new();
    export_cypher_dump(graph, &mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_materializing_twice_is_identical() {
    let graph = MemoryGraph::new();
    let materializer = GraphMaterializer::new(graph.clone(), &config());

    let first = materializer.upsert(&tables(), &profiles(), &relations()).await.unwrap();
    assert!(first.failed.is_empty());
    assert_eq!(first.relations_written, 1);
    let nodes = graph.node_count().await.unwrap();
    let edges = graph.relationship_count().await.unwrap();
    let snapshot = dump(&graph).await;

    let second = materializer.upsert(&tables(), &profiles(), &relations()).await.unwrap();
    assert_eq!(second.nodes_merged, first.nodes_merged);
    assert_eq!(graph.node_count().await.unwrap(), nodes);
    assert_eq!(graph.relationship_count().await.unwrap(), edges);
    assert_eq!(dump(&graph).await, snapshot);
}

#[tokio::test]
async fn test_graph_layout() {
    let graph = MemoryGraph::new();
    let materializer = GraphMaterializer::new(graph.clone(), &config());
    materializer.upsert(&tables(), &profiles(), &relations()).await.unwrap();

    // 5 tables and 9 columns.
    assert_eq!(graph.node_count().await.unwrap(), 14);

    let junction = graph.node_by_key("Table", "public.orders_lines").await.unwrap().unwrap();
    assert!(junction.has_label("JunctionTable"));
    assert_eq!(junction.get("stereotype"), Some(&Value::from("junction")));

    let products = graph.node_by_key("Table", "public.products").await.unwrap().unwrap();
    assert_eq!(products.get("is_enriched"), None);
    assert_eq!(products.get("column_count"), Some(&Value::Int(1)));

    let column = graph.node_by_key("Column", "public.orders.customer_id").await.unwrap().unwrap();
    assert_eq!(column.get("is_foreign_key"), Some(&Value::Bool(true)));

    let types: Vec<String> = graph.all_relationships().await.unwrap().into_iter().map(|r| r.rel_type).collect();
    assert_eq!(types.iter().filter(|t| *t == "HAS_COLUMN").count(), 9);
    assert_eq!(types.iter().filter(|t| *t == "EXPLICIT_FK_TO").count(), 3);
    assert_eq!(types.iter().filter(|t| *t == "IMPLICIT_RELATION_TO").count(), 1);

    let orders_id = graph.node_by_key("Table", "public.orders").await.unwrap().unwrap().id;
    let fk = graph
        .all_relationships()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.rel_type == "EXPLICIT_FK_TO" && r.src == orders_id)
        .unwrap();
    assert_eq!(fk.properties.get("on_delete"), Some(&Value::from(vec!["CASCADE".to_string()])));
}

#[tokio::test]
async fn test_enrichment_survives_structural_rewrite() {
    let graph = MemoryGraph::new();
    let materializer = GraphMaterializer::new(graph.clone(), &config());
    materializer.upsert(&tables(), &profiles(), &[]).await.unwrap();
    // Structure only: merge keeps earlier enrichment.
    materializer.upsert(&tables(), &[], &[]).await.unwrap();

    let customers = graph.node_by_key("Table", "public.customers").await.unwrap().unwrap();
    assert_eq!(customers.get("is_enriched"), Some(&Value::Bool(true)));
    assert_eq!(customers.get("dossier_digest"), Some(&Value::from("digest-customers")));
}

#[tokio::test]
async fn test_vector_index_covers_enriched_tables() {
    let graph = MemoryGraph::new();
    let materializer = GraphMaterializer::new(graph.clone(), &config());
    let outcome = materializer.upsert(&tables(), &profiles(), &[]).await.unwrap();
    assert!(outcome.index_refreshed);

    let spec = graph.index("table_embeddings").unwrap();
    assert_eq!(spec.dimensions, DIMS);

    let hits = graph.vector_query("table_embeddings", 2, &[1.0, 0.0, 0.0]).await.unwrap();
    let keys: Vec<&str> = hits.iter().map(|(n, _)| n.key.as_str()).collect();
    assert_eq!(keys, vec!["public.customers", "public.invoices"]);
}
