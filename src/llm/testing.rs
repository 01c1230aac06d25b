//! Scripted provider used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};

/// Replays canned replies in order, wrapping around, and records requests.
pub struct ScriptedProvider {
    responses: Vec<String>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
    fail: bool,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(String::from).collect(),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A provider whose every call fails with a request error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    /// User messages of every recorded request, in order.
    pub fn user_prompts(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| {
                r.messages
                    .into_iter()
                    .find(|m| m.role == "user")
                    .map(|m| m.content)
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.requests.lock().expect("lock poisoned").push(request);
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(LlmError::RequestFailed("scripted failure".to_string()));
        }

        let content = if self.responses.is_empty() {
            String::new()
        } else {
            self.responses[idx % self.responses.len()].clone()
        };

        Ok(GenerationResponse {
            id: format!("scripted-{}", idx),
            model: "scripted".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}
