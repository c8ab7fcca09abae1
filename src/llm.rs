//! Text-generation collaborator
//!
//! Gemini-backed narrative generation behind a small trait so the
//! orchestrator can synthesize without knowing the provider. Uses a
//! long-lived reqwest::Client for connection pooling.

use crate::error::OrchestrationError;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, error};

const GEMINI_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

const SYSTEM_INSTRUCTION: &str = r#"You are a professional financial advisor.

Guidelines:
- Synthesize the analysis you are given into one cohesive recommendation
- Be structured and concise
- Quantify amounts and timelines where the analysis provides them
- Emphasize risk awareness

Format: a short narrative a retail investor can act on."#;

/// Trait for producing free-form text from a prompt.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiGenerator {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_URL.to_string(),
        })
    }

    /// Builds a generator from `GEMINI_API_KEY`, or `None` when unset so the
    /// caller can run with templated synthesis only.
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty())?;
        Self::new(api_key).ok()
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: max_tokens,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
        };

        debug!("calling Gemini API");

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::Llm(format!(
                "Gemini API returned {status}: {error_text}"
            )));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| OrchestrationError::Llm(format!("Gemini parse error: {e}")))?;

        let answer = gemini_response
            .candidates
            .first()
            .and_then(|candidate| candidate.content.parts.first())
            .map(|part| part.text.clone())
            .ok_or_else(|| OrchestrationError::Llm("empty response from Gemini".to_string()))?;

        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Mock generator returning a fixed narrative.
    pub struct StaticGenerator {
        pub response: String,
    }

    impl StaticGenerator {
        pub fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
            }
        }
    }

    #[async_trait::async_trait]
    impl TextGenerator for StaticGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String> {
            Ok(self.response.clone())
        }
    }

    /// Mock generator that always fails, for fallback-path tests.
    pub struct FailingGenerator;

    #[async_trait::async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String> {
            Err(OrchestrationError::Llm("generator offline".to_string()))
        }
    }

    #[test]
    fn request_serializes_with_prompt_text() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "Summarize the plan".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.4,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: "You are a financial advisor".to_string(),
                }],
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("Summarize the plan"));
        assert!(json.contains("max_output_tokens"));
    }

    #[test]
    fn response_parses_first_candidate() {
        let body = r#"{
            "candidates": [
                { "content": { "parts": [ { "text": "Invest steadily." } ] } }
            ]
        }"#;
        let parsed: GeminiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.candidates[0].content.parts[0].text, "Invest steadily.");
    }

    #[tokio::test]
    async fn static_generator_echoes_configured_response() {
        let generator = StaticGenerator::new("canned narrative");
        let out = generator.generate("anything", 128, 0.4).await.unwrap();
        assert_eq!(out, "canned narrative");
    }
}
