//! End-to-end runs of the pipeline against the in-memory collaborators.
//!
//! Each test wires MemorySource -> PipelineController -> MemoryGraph with a
//! ScriptedLlm and checks what the run leaves behind: the summary, the
//! checkpoints and the graph.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use genesis::checkpoint::{CheckpointStore, EntityState, FileCheckpoints, MemoryCheckpoints};
use genesis::pipeline::{AutoApprove, AutoDecline};
use genesis::source::{MemorySource, RawTable};
use genesis::storage::MemoryGraph;
use genesis::synth::{Embedding, LlmCompletion, LlmRequest, LlmService, ScriptedLlm};
use genesis::{GenesisConfig, GraphStore, PipelineController, QualifiedName};
use pretty_assertions::assert_eq;

const DIMS: usize = 16;

fn config() -> GenesisConfig {
    let mut config = GenesisConfig::default();
    config.sampling.seed = Some(42);
    config.models.embedding_dimensions = DIMS;
    config.retry.max_retries = 3;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config
}

fn only(entities: &[&str]) -> GenesisConfig {
    let mut config = config();
    config.sampling.entities = Some(entities.iter().map(|e| e.to_string()).collect());
    config
}

fn erp_source() -> MemorySource {
    MemorySource::new()
        .with_table(
            RawTable::new("public", "customers")
                .column("id", "integer", false)
                .column("name", "text", false)
                .primary_key(["id"]),
        )
        .with_table(
            RawTable::new("public", "products")
                .column("id", "integer", false)
                .column("name", "text", false)
                .column("sku", "text", true)
                .primary_key(["id"]),
        )
        .with_table(
            RawTable::new("public", "orders")
                .column("id", "integer", false)
                .column("customer_id", "integer", false)
                .primary_key(["id"])
                .foreign_key(["customer_id"], "customers", ["id"]),
        )
        .with_table(
            RawTable::new("public", "orders_lines")
                .column("order_id", "integer", false)
                .column("product_id", "integer", false)
                .primary_key(["order_id", "product_id"])
                .foreign_key(["order_id"], "orders", ["id"])
                .foreign_key(["product_id"], "products", ["id"]),
        )
}

fn name(table: &str) -> QualifiedName {
    QualifiedName::new("public", table)
}

/// Keys of every node and `(src, dst, type)` of every edge.
async fn graph_shape(graph: &MemoryGraph) -> (Vec<String>, Vec<(u64, u64, String)>) {
    let mut nodes: Vec<String> = graph.all_nodes().await.unwrap().into_iter().map(|n| n.key).collect();
    nodes.sort();
    let mut edges: Vec<(u64, u64, String)> =
        graph.all_relationships().await.unwrap().into_iter().map(|r| (r.src.0, r.dst.0, r.rel_type)).collect();
    edges.sort();
    (nodes, edges)
}

// ============================================================================
// 1. A full run enriches every sampled table
// ============================================================================

#[tokio::test]
async fn test_full_run_enriches_every_table() {
    let graph = MemoryGraph::new();
    let llm = Arc::new(ScriptedLlm::offline(DIMS));
    let controller = PipelineController::new(config(), erp_source(), graph.clone(), llm.clone(), MemoryCheckpoints::new(), AutoApprove);

    let summary = controller.run().await.unwrap();
    assert_eq!(summary.sampled, 4);
    assert_eq!(summary.succeeded_count(), 4);
    assert_eq!(summary.failed_count(), 0);
    assert_eq!(llm.completions(), 4);

    let junction = graph.node_by_key("Table", "public.orders_lines").await.unwrap().unwrap();
    assert!(junction.has_label("JunctionTable"));
    assert_eq!(junction.get("is_enriched"), Some(&genesis::Value::Bool(true)));
    assert_eq!(junction.get("stereotype"), Some(&genesis::Value::from("junction")));
    assert!(graph.index("table_embeddings").is_some());
    assert!(summary.usage.calls > 0);
}

// ============================================================================
// 2. No LLM call before the gate approves
// ============================================================================

#[tokio::test]
async fn test_declined_gate_makes_no_llm_calls() {
    let graph = MemoryGraph::new();
    let llm = Arc::new(ScriptedLlm::offline(DIMS));
    let checkpoints = MemoryCheckpoints::new();
    let controller = PipelineController::new(config(), erp_source(), graph.clone(), llm.clone(), checkpoints.clone(), AutoDecline);

    let summary = controller.run().await.unwrap();
    assert_eq!(llm.calls(), 0);
    assert!(summary.was_declined());
    assert_eq!(summary.declined.len(), 4);
    assert_eq!(summary.succeeded_count(), 0);
    assert_eq!(summary.relations_discovered, 0);
    assert_eq!(graph.node_count().await.unwrap(), 0);

    let states: Vec<&str> = checkpoints.all().await.unwrap().iter().map(|c| c.state.label()).collect();
    assert_eq!(states, vec!["declined"; 4]);
}

#[tokio::test]
async fn test_decline_keeps_earlier_batches() {
    struct FirstBatchOnly(std::sync::atomic::AtomicUsize);

    #[async_trait::async_trait]
    impl genesis::ConfirmationGate for FirstBatchOnly {
        async fn confirm(&self, _estimate: &genesis::synth::CostEstimate) -> bool {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0
        }
    }

    let mut cfg = config();
    cfg.sampling.batch_size = Some(2);
    let graph = MemoryGraph::new();
    let llm = Arc::new(ScriptedLlm::offline(DIMS));
    let gate = FirstBatchOnly(std::sync::atomic::AtomicUsize::new(0));
    let controller = PipelineController::new(cfg, erp_source(), graph.clone(), llm.clone(), MemoryCheckpoints::new(), gate);

    let summary = controller.run().await.unwrap();
    assert_eq!(summary.succeeded_count(), 2);
    assert_eq!(summary.declined.len(), 2);
    assert_eq!(llm.completions(), 2);
    for entity in &summary.succeeded {
        let node = graph.node_by_key("Table", &entity.to_string()).await.unwrap().unwrap();
        assert_eq!(node.get("is_enriched"), Some(&genesis::Value::Bool(true)));
    }
}

// ============================================================================
// 3. Exhausted retries leave the entity unresolved, never fatal
// ============================================================================

#[tokio::test]
async fn test_missing_stereotype_three_times_is_unresolved() {
    let reply = r#"{"purpose": "Customer orders", "business_logic": null, "summary": "orders", "confidence": 0.8}"#;
    let llm = Arc::new(ScriptedLlm::offline(DIMS).script_forever("public.orders", reply));
    let graph = MemoryGraph::new();
    let checkpoints = MemoryCheckpoints::new();
    let controller =
        PipelineController::new(only(&["orders"]), erp_source(), graph.clone(), llm.clone(), checkpoints.clone(), AutoApprove);

    let summary = controller.run().await.unwrap();
    assert_eq!(llm.completions(), 3);
    assert_eq!(summary.unresolved.len(), 1);
    assert_eq!(summary.unresolved[0].0, name("orders"));
    assert_eq!(summary.succeeded_count(), 0);
    assert!(graph.node_by_key("Table", "public.orders").await.unwrap().is_none());

    let checkpoint = checkpoints.load(&name("orders")).await.unwrap().unwrap();
    assert!(matches!(checkpoint.state, EntityState::Unresolved { attempts: 3, .. }));
    assert!(checkpoint.state.profile().is_none());
}

#[tokio::test]
async fn test_one_bad_entity_does_not_stop_the_others() {
    let llm = ScriptedLlm::offline(DIMS).script_forever("public.products", "not json at all");
    let controller = PipelineController::new(config(), erp_source(), MemoryGraph::new(), llm, MemoryCheckpoints::new(), AutoApprove);

    let summary = controller.run().await.unwrap();
    assert_eq!(summary.succeeded_count(), 3);
    assert_eq!(summary.unresolved.iter().map(|(e, _)| e.clone()).collect::<Vec<_>>(), vec![name("products")]);
}

// ============================================================================
// 4. Reruns converge on the same graph
// ============================================================================

#[tokio::test]
async fn test_overlapping_rerun_creates_no_duplicates() {
    let graph = MemoryGraph::new();
    let first = PipelineController::new(
        only(&["customers", "orders"]),
        erp_source(),
        graph.clone(),
        ScriptedLlm::offline(DIMS),
        MemoryCheckpoints::new(),
        AutoApprove,
    );
    first.run().await.unwrap();

    // Fresh checkpoints: `orders` is synthesized and merged a second time.
    let second = PipelineController::new(
        only(&["orders", "products"]),
        erp_source(),
        graph.clone(),
        ScriptedLlm::offline(DIMS),
        MemoryCheckpoints::new(),
        AutoApprove,
    );
    let summary = second.run().await.unwrap();
    assert_eq!(summary.succeeded_count(), 2);

    let (nodes, edges) = graph_shape(&graph).await;
    assert_eq!(nodes.len(), nodes.iter().collect::<BTreeSet<_>>().len());
    assert_eq!(edges.len(), edges.iter().collect::<BTreeSet<_>>().len());

    let union = MemoryGraph::new();
    PipelineController::new(
        only(&["customers", "orders", "products"]),
        erp_source(),
        union.clone(),
        ScriptedLlm::offline(DIMS),
        MemoryCheckpoints::new(),
        AutoApprove,
    )
    .run()
    .await
    .unwrap();
    let (union_nodes, union_edges) = graph_shape(&union).await;
    assert_eq!(nodes, union_nodes);
    assert_eq!(edges.len(), union_edges.len());
}

#[tokio::test]
async fn test_rerun_skips_materialized_entities() {
    let graph = MemoryGraph::new();
    let llm = Arc::new(ScriptedLlm::offline(DIMS));
    let checkpoints = MemoryCheckpoints::new();
    let controller = PipelineController::new(config(), erp_source(), graph.clone(), llm.clone(), checkpoints, AutoApprove);

    controller.run().await.unwrap();
    let calls = llm.calls();
    let before = graph_shape(&graph).await;

    let summary = controller.run().await.unwrap();
    assert_eq!(summary.skipped_count(), 4);
    assert_eq!(summary.succeeded_count(), 0);
    assert_eq!(llm.calls(), calls);
    assert_eq!(graph_shape(&graph).await, before);
}

#[tokio::test]
async fn test_unseeded_rerun_reuses_the_recorded_seed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.json");
    let mut cfg = only(&["customers", "orders"]);
    cfg.sampling.seed = None;
    // More rows than the sample takes, so a different seed would show up in
    // the evidence.
    let rows = (1..=60).map(|i| vec![Some(i.to_string()), Some(format!("customer {i}"))]).collect();
    let source = erp_source().with_rows(&name("customers"), &["id", "name"], rows);
    let graph = MemoryGraph::new();

    let first_llm = Arc::new(ScriptedLlm::offline(DIMS));
    let first = PipelineController::new(
        cfg.clone(),
        source.clone(),
        graph.clone(),
        first_llm.clone(),
        FileCheckpoints::open(&path).unwrap(),
        AutoApprove,
    );
    let summary = first.run().await.unwrap();
    assert_eq!(summary.succeeded_count(), 2);
    assert_eq!(first_llm.completions(), 2);
    drop(first);

    let llm = Arc::new(ScriptedLlm::offline(DIMS));
    let checkpoints = FileCheckpoints::open(&path).unwrap();
    assert_eq!(checkpoints.run_seed().await.unwrap(), Some(summary.seed));
    let second = PipelineController::new(cfg, source, graph, llm.clone(), checkpoints, AutoApprove);
    let rerun = second.run().await.unwrap();
    assert_eq!(rerun.seed, summary.seed);
    assert_eq!(rerun.skipped_count(), 2);
    assert_eq!(llm.completions(), 0);
}

#[tokio::test]
async fn test_changed_evidence_is_synthesized_again() {
    let source = erp_source();
    let llm = Arc::new(ScriptedLlm::offline(DIMS));
    let controller =
        PipelineController::new(config(), source.clone(), MemoryGraph::new(), llm.clone(), MemoryCheckpoints::new(), AutoApprove);
    controller.run().await.unwrap();

    source.add_table(
        RawTable::new("public", "customers")
            .column("id", "integer", false)
            .column("name", "text", false)
            .column("email", "text", true)
            .primary_key(["id"]),
    );
    let summary = controller.run().await.unwrap();
    assert_eq!(summary.succeeded, vec![name("customers")]);
    assert_eq!(summary.skipped_count(), 3);
    assert_eq!(llm.completions(), 5);
}

// ============================================================================
// 5. Failed writes are reported and resumed without new spend
// ============================================================================

#[tokio::test]
async fn test_failed_write_resumes_from_checkpoint() {
    let graph = MemoryGraph::new();
    let llm = Arc::new(ScriptedLlm::offline(DIMS));
    let controller =
        PipelineController::new(only(&["customers"]), erp_source(), graph.clone(), llm.clone(), MemoryCheckpoints::new(), AutoApprove);

    graph.fail_next_commits(3);
    let summary = controller.run().await.unwrap();
    assert_eq!(summary.write_failed.len(), 1);
    assert_eq!(summary.succeeded_count(), 0);
    assert_eq!(llm.completions(), 1);

    let summary = controller.run().await.unwrap();
    assert_eq!(summary.succeeded, vec![name("customers")]);
    assert_eq!(llm.completions(), 1);
    assert!(graph.node_by_key("Table", "public.customers").await.unwrap().is_some());
}

// ============================================================================
// 6. Anomalies, connectivity, sampling
// ============================================================================

#[tokio::test]
async fn test_malformed_table_is_reported_as_anomaly() {
    let source = erp_source().with_table(RawTable::new("public", "broken"));
    let controller =
        PipelineController::new(config(), source, MemoryGraph::new(), ScriptedLlm::offline(DIMS), MemoryCheckpoints::new(), AutoApprove);

    let summary = controller.run().await.unwrap();
    assert_eq!(summary.anomalies.len(), 1);
    assert_eq!(summary.anomalies[0].table, name("broken"));
    assert_eq!(summary.succeeded_count(), 4);
    assert!(summary.to_string().contains("[anomaly] public.broken"));
}

#[tokio::test]
async fn test_unreachable_graph_aborts_and_keeps_progress() {
    let graph = MemoryGraph::new();
    let checkpoints = MemoryCheckpoints::new();
    let controller = PipelineController::new(
        only(&["customers"]),
        erp_source(),
        graph.clone(),
        ScriptedLlm::offline(DIMS),
        checkpoints.clone(),
        AutoApprove,
    );
    controller.run().await.unwrap();

    graph.set_unreachable(true);
    let err = controller.run().await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(checkpoints.load(&name("customers")).await.unwrap().unwrap().state.label(), "materialized");
}

#[tokio::test]
async fn test_seeded_sample_is_reproducible() {
    let mut cfg = config();
    cfg.sampling.sample_size = Some(2);
    let run = |cfg: GenesisConfig| async move {
        PipelineController::new(cfg, erp_source(), MemoryGraph::new(), ScriptedLlm::offline(DIMS), MemoryCheckpoints::new(), AutoApprove)
            .run()
            .await
            .unwrap()
    };
    let a = run(cfg.clone()).await;
    let b = run(cfg).await;
    assert_eq!(a.sampled, 2);
    assert_eq!(a.succeeded, b.succeeded);
    assert_eq!(a.seed, 42);
}

#[tokio::test]
async fn test_file_checkpoints_resume_across_processes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.json");
    let graph = MemoryGraph::new();

    let first = PipelineController::new(
        config(),
        erp_source(),
        graph.clone(),
        ScriptedLlm::offline(DIMS),
        FileCheckpoints::open(&path).unwrap(),
        AutoApprove,
    );
    assert_eq!(first.run().await.unwrap().succeeded_count(), 4);
    drop(first);

    let llm = Arc::new(ScriptedLlm::offline(DIMS));
    let second =
        PipelineController::new(config(), erp_source(), graph, llm.clone(), FileCheckpoints::open(&path).unwrap(), AutoApprove);
    let summary = second.run().await.unwrap();
    assert_eq!(summary.skipped_count(), 4);
    assert_eq!(llm.calls(), 0);
}

// ============================================================================
// 7. Synthesis fans out no wider than workers.concurrency
// ============================================================================

/// Delegates to a ScriptedLlm and records how many completions overlap.
struct InFlight {
    inner: ScriptedLlm,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn new() -> Self {
        Self { inner: ScriptedLlm::offline(DIMS), current: AtomicUsize::new(0), peak: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl LlmService for InFlight {
    async fn complete(&self, request: &LlmRequest) -> genesis::Result<LlmCompletion> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let reply = self.inner.complete(request).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        reply
    }

    async fn embed(&self, model: &str, text: &str) -> genesis::Result<Embedding> {
        self.inner.embed(model, text).await
    }
}

#[tokio::test]
async fn test_completions_never_exceed_worker_concurrency() {
    let source = erp_source()
        .with_table(
            RawTable::new("public", "invoices")
                .column("id", "integer", false)
                .column("order_id", "integer", false)
                .primary_key(["id"])
                .foreign_key(["order_id"], "orders", ["id"]),
        )
        .with_table(
            RawTable::new("public", "payments")
                .column("id", "integer", false)
                .column("invoice_id", "integer", false)
                .primary_key(["id"])
                .foreign_key(["invoice_id"], "invoices", ["id"]),
        );
    let mut cfg = config();
    cfg.workers.concurrency = 2;
    let llm = Arc::new(InFlight::new());

    let controller = PipelineController::new(cfg, source, MemoryGraph::new(), llm.clone(), MemoryCheckpoints::new(), AutoApprove);
    let summary = controller.run().await.unwrap();

    assert_eq!(summary.succeeded_count(), 6);
    assert_eq!(llm.inner.completions(), 6);
    let peak = llm.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak of {peak} concurrent completions");
    assert!(peak > 1, "completions never overlapped");
}
