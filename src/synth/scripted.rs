//! Scripted, offline LLM service.
//!
//! Answers from per-entity scripts first, then falls back to a rule-based
//! reply built from the prompt itself. Embeddings come from a feature-hashing
//! embedder, so texts sharing words land close together. Used in tests and
//! for dry runs without an API key.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;

use super::cost::{estimate_tokens, TokenUsage};
use super::llm::{Embedding, LlmCompletion, LlmRequest, LlmService};
use super::prompt::prompt_entity;
use crate::discover::RELATION_CHECK_MARKER;
use crate::evidence::naming::{singular, tokenize};
use crate::{Error, Result};

/// Deterministic bag-of-words embedding via the hashing trick.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// L2-normalised vector; the zero vector for text without words.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let token = singular(&token);
            let h = fnv1a(token.as_bytes());
            let index = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[index] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<String>,
    /// Reply once the queue is empty; offline reply when `None`.
    forever: Option<String>,
}

#[derive(Default)]
struct ScriptState {
    scripts: HashMap<String, Script>,
    embeddings: Vec<(String, Vec<f32>)>,
    confirmation: Option<String>,
}

/// Offline [`LlmService`].
pub struct ScriptedLlm {
    embedder: HashingEmbedder,
    state: Mutex<ScriptState>,
    completions: AtomicUsize,
    embeddings: AtomicUsize,
}

impl ScriptedLlm {
    /// Rule-based replies, `dims`-dimensional hashed embeddings.
    pub fn offline(dims: usize) -> Self {
        Self {
            embedder: HashingEmbedder::new(dims),
            state: Mutex::new(ScriptState::default()),
            completions: AtomicUsize::new(0),
            embeddings: AtomicUsize::new(0),
        }
    }

    /// Queue replies for synthesis prompts about `entity` (`schema.table`).
    pub fn script(self, entity: &str, replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.state
            .lock()
            .scripts
            .entry(entity.to_string())
            .or_default()
            .replies
            .extend(replies.into_iter().map(Into::into));
        self
    }

    /// Answer every synthesis prompt about `entity` with `reply`.
    pub fn script_forever(self, entity: &str, reply: impl Into<String>) -> Self {
        self.state.lock().scripts.entry(entity.to_string()).or_default().forever = Some(reply.into());
        self
    }

    /// Fixed embedding for any text containing `fragment`.
    pub fn with_embedding(self, fragment: &str, vector: Vec<f32>) -> Self {
        self.state.lock().embeddings.push((fragment.to_string(), vector));
        self
    }

    /// Fixed reply to relation-confirmation prompts.
    pub fn with_confirmation(self, reply: impl Into<String>) -> Self {
        self.state.lock().confirmation = Some(reply.into());
        self
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn embeddings(&self) -> usize {
        self.embeddings.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.completions() + self.embeddings()
    }

    fn reply_for(&self, prompt: &str) -> String {
        let mut state = self.state.lock();
        if prompt.contains(RELATION_CHECK_MARKER) {
            return state.confirmation.clone().unwrap_or_else(|| {
                r#"{"relationship_exists": true, "relationship_type": "RELATED_TO", "confidence_score": 0.9, "justification": "offline confirmation"}"#.to_string()
            });
        }
        if let Some(script) = prompt_entity(prompt).and_then(|e| state.scripts.get_mut(e)) {
            if let Some(reply) = script.replies.pop_front() {
                return reply;
            }
            if let Some(reply) = &script.forever {
                return reply.clone();
            }
        }
        drop(state);
        offline_reply(prompt)
    }
}

/// Rule-based synthesis reply derived from the evidence in the prompt.
fn offline_reply(prompt: &str) -> String {
    let entity = prompt_entity(prompt).unwrap_or("unknown");
    let table = entity.rsplit('.').next().unwrap_or(entity);
    let words = tokenize(table).join(" ");

    let stereotype = if prompt.contains("is_junction: true") {
        "junction"
    } else if prompt.contains("detail_table_suffix") {
        "detail"
    } else if prompt.contains("log_table_suffix") {
        "audit"
    } else if prompt.contains("settings_table_suffix") || prompt.contains("system_internal_prefix") {
        "configuration"
    } else if prompt.contains("master_data_prefix") {
        "master_data"
    } else {
        "transaction"
    };

    // Column names from the structure section: "- name type ...".
    let columns: Vec<&str> = prompt
        .lines()
        .filter_map(|l| l.strip_prefix("- "))
        .filter(|l| !l.starts_with("Entity:") && !l.contains(':'))
        .filter_map(|l| l.split_whitespace().next())
        .collect();

    serde_json::json!({
        "purpose": format!("Stores {words} records."),
        "business_logic": null,
        "stereotype": stereotype,
        "summary": format!("{entity} {words} {stereotype} entity with columns {}", columns.join(" ")),
        "confidence": 0.6,
    })
    .to_string()
}

#[async_trait]
impl LlmService for ScriptedLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        let text = self.reply_for(&request.prompt);
        let usage = TokenUsage::new(estimate_tokens(&request.prompt), estimate_tokens(&text));
        Ok(LlmCompletion { text, usage })
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Embedding> {
        self.embeddings.fetch_add(1, Ordering::SeqCst);
        if text.trim().is_empty() {
            return Err(Error::Llm("empty embedding input".into()));
        }
        let fixed = self
            .state
            .lock()
            .embeddings
            .iter()
            .find(|(fragment, _)| text.contains(fragment.as_str()))
            .map(|(_, v)| v.clone());
        let vector = fixed.unwrap_or_else(|| self.embedder.embed(text));
        Ok(Embedding { vector, tokens: estimate_tokens(text) })
    }
}
