//! Scripted model and static index used by the engine's tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use verity_ai::{LanguageModel, ModelError, Prompt, parse_json_reply};
use verity_core::{CharSpan, ChunkId, PolicySection, RegulatoryChunk, RetrievedEvidence};
use verity_store::{IndexHit, RetrievalClient, RetrievalError, RetryPolicy, VectorIndex};

#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Text(String),
    Fail(String),
    /// Never answers.
    Hang,
}

type Responder = Box<dyn Fn(&Prompt) -> Reply + Send + Sync>;

pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    responder: Option<Responder>,
    prompts: Mutex<Vec<Prompt>>,
    calls: AtomicU32,
}

impl ScriptedModel {
    /// Answers with `replies` in order, then fails.
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            responder: None,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Answers every prompt with `f`.
    pub fn from_fn(f: impl Fn(&Prompt) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Box::new(f)),
            ..Self::new([])
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    fn next(&self, prompt: &Prompt) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        match &self.responder {
            Some(f) => f(prompt),
            None => self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Reply::Fail("script exhausted".into())),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
        match self.next(prompt) {
            Reply::Json(v) => Ok(v.to_string()),
            Reply::Text(s) => Ok(s),
            Reply::Fail(msg) => Err(ModelError::Call(msg)),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn generate_structured(
        &self,
        prompt: &Prompt,
        _schema: &Value,
    ) -> Result<Value, ModelError> {
        match self.next(prompt) {
            Reply::Json(v) => Ok(v),
            Reply::Text(s) => parse_json_reply(&s),
            Reply::Fail(msg) => Err(ModelError::Call(msg)),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Index with canned answers.
#[derive(Default)]
pub struct StaticIndex {
    hits: Vec<IndexHit>,
    keyed: Vec<(String, Vec<IndexHit>)>,
    unavailable: bool,
    delay: Option<Duration>,
}

impl StaticIndex {
    pub fn new(hits: Vec<IndexHit>) -> Self {
        Self {
            hits,
            ..Self::default()
        }
    }

    /// Queries containing `keyword` get `hits` instead of the default set.
    pub fn with_keyed(mut self, keyword: &str, hits: Vec<IndexHit>) -> Self {
        self.keyed.push((keyword.to_string(), hits));
        self
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, RetrievalError> {
        if self.unavailable {
            return Err(RetrievalError::Unavailable("index offline".into()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let hits = self
            .keyed
            .iter()
            .find(|(kw, _)| text.contains(kw.as_str()))
            .map_or(&self.hits, |(_, hits)| hits);
        Ok(hits.iter().take(k).cloned().collect())
    }
}

pub fn chunk(id: &str, text: &str) -> RegulatoryChunk {
    RegulatoryChunk {
        id: ChunkId::new(id),
        text: text.into(),
        source_document_id: "iso27001".into(),
        offset: 0,
    }
}

pub fn hit(id: &str, similarity: f64) -> IndexHit {
    IndexHit {
        chunk: chunk(id, &format!("Control text for {id}.")),
        similarity,
    }
}

pub fn evidence(id: &str, similarity: f64) -> RetrievedEvidence {
    RetrievedEvidence {
        chunk: chunk(id, &format!("Control text for {id}.")),
        similarity,
    }
}

pub fn section(order_index: usize, text: &str) -> PolicySection {
    PolicySection {
        id: format!("sec-{order_index:04}-test"),
        order_index,
        text: text.into(),
        char_span: CharSpan {
            start: 0,
            end: text.len(),
        },
    }
}

/// A well-formed draft reply.
pub fn verdict(status: &str, severity: &str, citations: &[&str], self_score: f64) -> Value {
    json!({
        "status": status,
        "severity": severity,
        "rationale": format!("The policy is {status} with the cited controls."),
        "citations": citations,
        "self_score": self_score,
        "recommendation": "Document the control owner."
    })
}

/// Retrieval client with short timeouts and near-zero backoff.
pub fn client(index: Arc<dyn VectorIndex>) -> RetrievalClient {
    RetrievalClient::new(
        index,
        Duration::from_millis(500),
        RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
        },
    )
}
