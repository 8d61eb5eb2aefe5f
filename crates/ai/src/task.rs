//! Per-task generation budgets.

use std::time::Duration;

use crate::generator::GenerationRequest;

/// Response-size budget, sampling temperature and timeout for one task type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskProfile {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl TaskProfile {
    pub const WORD_ENRICHMENT: Self = Self {
        max_tokens: 1000,
        temperature: 0.7,
        timeout: Duration::from_secs(30),
    };

    pub const SENTENCE_ANALYSIS: Self = Self {
        max_tokens: 1500,
        temperature: 0.7,
        timeout: Duration::from_secs(30),
    };

    pub const CONVERSATION: Self = Self {
        max_tokens: 2000,
        temperature: 0.7,
        timeout: Duration::from_secs(60),
    };

    pub fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.timeout,
        }
    }
}
