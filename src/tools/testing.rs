//! Scripted query engine for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::engine::{EngineOutput, EngineQuery, QueryEngine};
use crate::error::EngineError;

/// Engine returning a fixed answer and counting calls.
pub struct MockEngine {
    answer: Result<EngineOutput, EngineError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last: Mutex<Option<EngineQuery>>,
}

impl MockEngine {
    /// Answers with `n` small rows.
    pub fn rows(n: usize) -> Self {
        let rows: Vec<Value> = (0..n).map(|i| json!({"row": i})).collect();
        Self::answering(EngineOutput::Json(Value::Array(rows)))
    }

    /// Answers with one text item of `len` bytes.
    pub fn text(len: usize) -> Self {
        Self::answering(EngineOutput::Text("x".repeat(len)))
    }

    /// Answers with `output`.
    pub fn answering(output: EngineOutput) -> Self {
        Self {
            answer: Ok(output),
            delay: None,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    /// Fails every call with `error`.
    pub fn failing(error: EngineError) -> Self {
        Self {
            answer: Err(error),
            delay: None,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    /// Sleeps before answering.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `execute` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Command of the most recent call.
    pub fn last_command(&self) -> Option<String> {
        self.last
            .lock()
            .ok()
            .and_then(|q| q.as_ref().map(|q| q.command.clone()))
    }

    /// Headers of the most recent call.
    pub fn last_headers(&self) -> BTreeMap<String, String> {
        self.last
            .lock()
            .ok()
            .and_then(|q| q.as_ref().map(|q| q.headers.clone()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueryEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn execute(&self, query: &EngineQuery) -> Result<EngineOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last.lock() {
            *last = Some(query.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer.clone()
    }
}
