//! Test-only scripted generator.

use crate::manual::llm::{ChatMessage, Generator};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<Result<String, String>>,
    attempts: usize,
    prompts: Vec<Vec<ChatMessage>>,
}

/// Replays queued responses in order; a queued `Err` makes that attempt
/// fail. Once the queue is empty every call returns `default_response`.
#[derive(Debug, Clone)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<Script>>,
    pub default_response: String,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<&str, &str>>) -> Self {
        let queue = responses
            .into_iter()
            .map(|r| r.map(str::to_string).map_err(str::to_string))
            .collect();
        Self {
            script: Arc::new(Mutex::new(Script {
                queue,
                ..Script::default()
            })),
            default_response: "mock response".to_string(),
        }
    }

    pub fn replies(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(*r)).collect())
    }

    pub fn attempts(&self) -> usize {
        self.script.lock().unwrap().attempts
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.script.lock().unwrap().prompts.clone()
    }
}

impl Generator for ScriptedGenerator {
    fn label(&self) -> &str {
        "mock"
    }

    fn generate(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        let mut script = self.script.lock().unwrap();
        script.attempts += 1;
        script.prompts.push(messages.to_vec());
        match script.queue.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(err)) => Err(anyhow::anyhow!(err)),
            None => Ok(self.default_response.clone()),
        }
    }
}
