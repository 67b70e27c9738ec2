//! Test doubles for the pipeline's external collaborators.
//!
//! [`ScriptedCodeGenerator`] answers generation requests from per-file
//! scripts, so pipeline tests never need a model endpoint.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::generation::{CodeGenerator, GenerationRequest};

enum Scripted {
    Respond(String),
    Fail(String),
}

/// Queue-based generator keyed by request target (the file's display path).
/// Each request pops the next scripted answer for its target; targets with
/// no script fall back to the default answer, or an error.
#[derive(Default)]
pub struct ScriptedCodeGenerator {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    delays: HashMap<String, Duration>,
    fallback: Option<String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedCodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, target: &str, answer: Scripted) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(target.to_string())
                .or_default()
                .push_back(answer);
        }
        self
    }

    pub fn respond(self, target: &str, code: &str) -> Self {
        self.push(target, Scripted::Respond(code.to_string()))
    }

    pub fn fail(self, target: &str, message: &str) -> Self {
        self.push(target, Scripted::Fail(message.to_string()))
    }

    pub fn delay(mut self, target: &str, delay: Duration) -> Self {
        self.delays.insert(target.to_string(), delay);
        self
    }

    /// Answer for targets without a script.
    pub fn fallback(mut self, code: &str) -> Self {
        self.fallback = Some(code.to_string());
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedCodeGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        if let Some(delay) = self.delays.get(&request.target) {
            tokio::time::sleep(*delay).await;
        }

        let next = {
            let mut scripts = self
                .scripts
                .lock()
                .map_err(|e| anyhow::anyhow!("ScriptedCodeGenerator lock poisoned: {}", e))?;
            scripts
                .get_mut(&request.target)
                .and_then(|queue| queue.pop_front())
        };
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }

        match next {
            Some(Scripted::Respond(code)) => Ok(code),
            Some(Scripted::Fail(message)) => Err(anyhow::anyhow!(message)),
            None => self.fallback.clone().ok_or_else(|| {
                anyhow::anyhow!("ScriptedCodeGenerator: no response scripted for {}", request.target)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: &str) -> GenerationRequest {
        GenerationRequest {
            original_code: String::new(),
            instruction: String::new(),
            context: String::new(),
            target: target.to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripts_pop_in_order_per_target() {
        let gen = ScriptedCodeGenerator::new()
            .respond("a.rs", "one")
            .respond("a.rs", "two")
            .fail("b.rs", "down");
        assert_eq!(gen.generate(request("a.rs")).await.unwrap(), "one");
        assert!(gen.generate(request("b.rs")).await.is_err());
        assert_eq!(gen.generate(request("a.rs")).await.unwrap(), "two");
        assert!(gen.generate(request("a.rs")).await.is_err());
        assert_eq!(gen.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_fallback() {
        let gen = ScriptedCodeGenerator::new().fallback("fn x() {}");
        assert_eq!(gen.generate(request("any.rs")).await.unwrap(), "fn x() {}");
    }
}
