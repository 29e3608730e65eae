//! Neo4j graph store over the HTTP transaction API.
//!
//! Every commit posts the staged merges as one request to
//! `/db/{database}/tx/commit`, which Neo4j runs as a single transaction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use super::{GraphStore, KEY_PROPERTY};
use crate::cypher::{self, Statement};
use crate::index::VectorIndexSpec;
use crate::model::*;
use crate::tx::{Transaction, TxId, TxMode, WriteBuffer};
use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    statements: &'a [Statement],
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    row: Vec<Json>,
}

#[derive(Debug, Deserialize)]
struct Neo4jError {
    code: String,
    message: String,
}

/// Staged writes of one Neo4j HTTP transaction.
pub struct Neo4jHttpTx {
    id: TxId,
    mode: TxMode,
    buffer: WriteBuffer,
}

impl Transaction for Neo4jHttpTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
    fn buffer(&self) -> &WriteBuffer { &self.buffer }
    fn buffer_mut(&mut self) -> &mut WriteBuffer { &mut self.buffer }
}

pub struct Neo4jHttpStore {
    http_client: HttpClient,
    endpoint: String,
    user: String,
    password: String,
    timeout: Duration,
    next_tx_id: AtomicU64,
}

impl std::fmt::Debug for Neo4jHttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jHttpStore").field("endpoint", &self.endpoint).field("user", &self.user).finish()
    }
}

impl Neo4jHttpStore {
    /// `url` is the HTTP root, e.g. `http://localhost:7474`.
    pub fn new(url: &str, database: &str, user: &str, password: &str, timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::connection("graph store", e))?;
        Ok(Self {
            http_client,
            endpoint: format!("{}/db/{database}/tx/commit", url.trim_end_matches('/')),
            user: user.to_string(),
            password: password.to_string(),
            timeout,
            next_tx_id: AtomicU64::new(1),
        })
    }

    async fn run(&self, statements: &[Statement]) -> Result<Vec<StatementResult>> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&CommitRequest { statements })
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::connection("graph store", format!("authentication failed ({status})")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!("HTTP {status}: {body}")));
        }

        let body: CommitResponse = response
            .json()
            .await
            .map_err(|e| Error::Storage(format!("unreadable Neo4j response: {e}")))?;
        if let Some(err) = body.errors.first() {
            return Err(Error::Storage(format!("{}: {}", err.code, err.message)));
        }
        Ok(body.results)
    }

    /// Only a refused or failed connection is fatal; a slow or broken
    /// exchange is retried like any other write failure.
    fn send_error(&self, e: reqwest::Error) -> Error {
        if e.is_connect() {
            Error::connection("graph store", e)
        } else if e.is_timeout() {
            Error::Timeout { operation: "graph request".into(), secs: self.timeout.as_secs() }
        } else {
            Error::Storage(e.to_string())
        }
    }

    async fn query(&self, statement: Statement) -> Result<Vec<Vec<Json>>> {
        let results = self.run(std::slice::from_ref(&statement)).await?;
        Ok(results.into_iter().next().map(|r| r.data.into_iter().map(|d| d.row).collect()).unwrap_or_default())
    }
}

/// Node from a `[id, key, labels, properties]` row.
fn node_from_row(row: &[Json]) -> Option<Node> {
    let id = row.first()?.as_u64()?;
    let key = row.get(1)?.as_str()?;
    let labels: Vec<String> = row.get(2)?.as_array()?.iter().filter_map(|l| l.as_str().map(String::from)).collect();
    let mut node = Node::new(NodeId(id), key).with_labels(labels);
    if let Some(props) = row.get(3).and_then(Json::as_object) {
        for (k, v) in props {
            if k != KEY_PROPERTY {
                node.properties.insert(k.clone(), Value::from_json(v));
            }
        }
    }
    Some(node)
}

const NODE_COLUMNS: &str = "id(n), n.key, labels(n), properties(n)";

#[async_trait]
impl GraphStore for Neo4jHttpStore {
    type Tx = Neo4jHttpTx;

    async fn ping(&self) -> Result<()> {
        self.query(Statement::new("RETURN 1")).await.map(|_| ())
    }

    async fn begin_tx(&self, mode: TxMode) -> Result<Neo4jHttpTx> {
        let id = TxId(self.next_tx_id.fetch_add(1, Ordering::Relaxed));
        Ok(Neo4jHttpTx { id, mode, buffer: WriteBuffer::default() })
    }

    async fn commit_tx(&self, mut tx: Neo4jHttpTx) -> Result<()> {
        let statements: Vec<Statement> = tx.buffer.drain().iter().map(cypher::write_op).collect();
        if statements.is_empty() {
            return Ok(());
        }
        debug!(tx = tx.id.0, statements = statements.len(), "committing to Neo4j");
        self.run(&statements).await.map(|_| ())
    }

    async fn rollback_tx(&self, mut tx: Neo4jHttpTx) -> Result<()> {
        tx.buffer.drain();
        Ok(())
    }

    async fn ensure_key_constraint(&self, label: &str) -> Result<()> {
        self.query(cypher::key_constraint(label)).await.map(|_| ())
    }

    async fn create_vector_index(&self, spec: &VectorIndexSpec) -> Result<()> {
        self.query(cypher::vector_index(spec)).await?;
        // Vector indexes populate asynchronously; wait until it is online.
        self.query(Statement::new("CALL db.awaitIndex($name)").param("name", spec.name.as_str())).await?;
        Ok(())
    }

    async fn node_by_key(&self, label: &str, key: &str) -> Result<Option<Node>> {
        let text = format!("MATCH (n:{} {{{KEY_PROPERTY}: $key}}) RETURN {NODE_COLUMNS}", cypher::ident(label));
        let rows = self.query(Statement::new(text).param("key", key)).await?;
        Ok(rows.first().and_then(|r| node_from_row(r)))
    }

    async fn all_nodes(&self) -> Result<Vec<Node>> {
        let text = format!("MATCH (n) WHERE n.{KEY_PROPERTY} IS NOT NULL RETURN {NODE_COLUMNS} ORDER BY id(n)");
        let rows = self.query(Statement::new(text)).await?;
        Ok(rows.iter().filter_map(|r| node_from_row(r)).collect())
    }

    async fn all_relationships(&self) -> Result<Vec<Relationship>> {
        let rows = self
            .query(Statement::new(
                "MATCH (a)-[r]->(b) WHERE a.key IS NOT NULL AND b.key IS NOT NULL \
                 RETURN id(r), id(a), id(b), type(r), properties(r) ORDER BY id(r)",
            ))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let mut rel = Relationship::new(
                    RelId(row.first()?.as_u64()?),
                    NodeId(row.get(1)?.as_u64()?),
                    NodeId(row.get(2)?.as_u64()?),
                    row.get(3)?.as_str()?,
                );
                if let Some(props) = row.get(4).and_then(Json::as_object) {
                    rel.properties = props.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect();
                }
                Some(rel)
            })
            .collect())
    }

    async fn node_count(&self) -> Result<u64> {
        let rows = self.query(Statement::new("MATCH (n) WHERE n.key IS NOT NULL RETURN count(n)")).await?;
        Ok(rows.first().and_then(|r| r.first()).and_then(Json::as_u64).unwrap_or(0))
    }

    async fn relationship_count(&self) -> Result<u64> {
        let rows = self.query(Statement::new("MATCH ()-[r]->() RETURN count(r)")).await?;
        Ok(rows.first().and_then(|r| r.first()).and_then(Json::as_u64).unwrap_or(0))
    }

    async fn vector_query(&self, index_name: &str, k: usize, query: &[f32]) -> Result<Vec<(Node, f64)>> {
        let text = format!(
            "CALL db.index.vector.queryNodes($index, $k, $vector) YIELD node AS n, score RETURN {NODE_COLUMNS}, score"
        );
        let rows = self
            .query(
                Statement::new(text)
                    .param("index", index_name)
                    .param("k", k as u64)
                    .param("vector", Value::Vector(query.to_vec()).to_json()),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| Some((node_from_row(r)?, r.get(4)?.as_f64()?)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let store = Neo4jHttpStore::new("http://localhost:7474/", "neo4j", "neo4j", "pw", Duration::from_secs(5)).unwrap();
        assert_eq!(store.endpoint, "http://localhost:7474/db/neo4j/tx/commit");
        assert!(!format!("{store:?}").contains("pw"));
    }

    #[test]
    fn test_node_from_row() {
        let row = serde_json::json!([7, "public.orders", ["Table"], {"key": "public.orders", "purpose": "x", "confidence": 0.5}]);
        let node = node_from_row(row.as_array().unwrap()).unwrap();
        assert_eq!(node.id, NodeId(7));
        assert_eq!(node.key, "public.orders");
        assert_eq!(node.get("purpose"), Some(&Value::from("x")));
        assert_eq!(node.get("confidence"), Some(&Value::Float(0.5)));
        assert!(node.get("key").is_none());
    }

    #[tokio::test]
    async fn test_refused_connection_is_fatal() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = Neo4jHttpStore::new(&format!("http://{addr}"), "neo4j", "neo4j", "pw", Duration::from_secs(2)).unwrap();
        let err = store.ping().await.unwrap_err();
        assert!(err.is_fatal(), "{err}");
    }

    #[tokio::test]
    async fn test_slow_response_is_a_retryable_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer.
        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let store = Neo4jHttpStore::new(&format!("http://{addr}"), "neo4j", "neo4j", "pw", Duration::from_millis(200)).unwrap();
        let err = store.ping().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "{err}");
        assert!(!err.is_fatal());
        assert!(err.is_transient());
        server.abort();
    }

    #[test]
    fn test_commit_request_shape() {
        let statements = [Statement::new("RETURN 1").param("a", 1)];
        let json = serde_json::to_value(CommitRequest { statements: &statements }).unwrap();
        assert_eq!(json["statements"][0]["statement"], "RETURN 1");
        assert_eq!(json["statements"][0]["parameters"]["a"], 1);
    }
}
