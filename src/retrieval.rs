//! RAG retrieval collaborator
//!
//! Fetches semantically relevant documents for a query from the external
//! retrieval service. Anonymous requests short-circuit to an empty result
//! set; the orchestrator treats retrieval failures as degradation, never as
//! request failures.

use crate::error::OrchestrationError;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub score_threshold: f64,
    pub diversity_weight: f64,
    pub recency_weight: f64,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.7,
            diversity_weight: 0.3,
            recency_weight: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Value,
}

/// Trait for the semantic-retrieval collaborator.
#[async_trait::async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve_context(
        &self,
        query: &str,
        user_id: Option<Uuid>,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>>;
}

/// HTTP-backed retriever for the external RAG service.
pub struct HttpRetriever {
    client: Client,
    base_url: String,
}

impl HttpRetriever {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Option<Self> {
        let base_url = env::var("RETRIEVAL_API_BASE_URL")
            .or_else(|_| env::var("RAG_API_BASE_URL"))
            .ok()?;
        Self::new(base_url).ok()
    }
}

#[derive(Debug, Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    documents: Vec<RetrievedDocument>,
}

#[async_trait::async_trait]
impl ContextRetriever for HttpRetriever {
    async fn retrieve_context(
        &self,
        query: &str,
        user_id: Option<Uuid>,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>> {
        // No user, no personalized corpus to search.
        let Some(user_id) = user_id else {
            return Ok(Vec::new());
        };

        let url = format!("{}/api/v1/retrieve", self.base_url);
        let body = json!({
            "query": query,
            "user_id": user_id,
            "top_k": options.top_k,
            "score_threshold": options.score_threshold,
            "diversity_weight": options.diversity_weight,
            "recency_weight": options.recency_weight,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestrationError::Retrieval(format!("retrieval request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OrchestrationError::Retrieval(format!(
                "retrieval service returned {}",
                response.status()
            )));
        }

        let parsed: RetrievalResponse = response
            .json()
            .await
            .map_err(|e| OrchestrationError::Retrieval(format!("invalid retrieval response: {e}")))?;

        debug!(
            count = parsed.documents.len(),
            top_k = options.top_k,
            "retrieved context documents"
        );
        Ok(parsed.documents)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Mock retriever returning fixed documents.
    pub struct StaticRetriever {
        pub documents: Vec<RetrievedDocument>,
    }

    impl StaticRetriever {
        pub fn with_texts(texts: &[&str]) -> Self {
            Self {
                documents: texts
                    .iter()
                    .map(|t| RetrievedDocument {
                        text: t.to_string(),
                        score: 0.9,
                        metadata: Value::Null,
                    })
                    .collect(),
            }
        }
    }

    #[async_trait::async_trait]
    impl ContextRetriever for StaticRetriever {
        async fn retrieve_context(
            &self,
            _query: &str,
            user_id: Option<Uuid>,
            _options: &RetrievalOptions,
        ) -> Result<Vec<RetrievedDocument>> {
            if user_id.is_none() {
                return Ok(Vec::new());
            }
            Ok(self.documents.clone())
        }
    }

    /// Mock retriever that always fails, for degradation tests.
    pub struct FailingRetriever;

    #[async_trait::async_trait]
    impl ContextRetriever for FailingRetriever {
        async fn retrieve_context(
            &self,
            _query: &str,
            _user_id: Option<Uuid>,
            _options: &RetrievalOptions,
        ) -> Result<Vec<RetrievedDocument>> {
            Err(OrchestrationError::Retrieval(
                "vector store unavailable".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn http_retriever_short_circuits_for_anonymous_users() {
        let retriever = HttpRetriever::new("http://localhost:9999").unwrap();
        let docs = retriever
            .retrieve_context("any query", None, &RetrievalOptions::default())
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn static_retriever_serves_documents_for_known_users() {
        let retriever = StaticRetriever::with_texts(&["doc one", "doc two"]);
        let docs = retriever
            .retrieve_context(
                "query",
                Some(Uuid::new_v4()),
                &RetrievalOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "doc one");
    }

    #[test]
    fn default_options_keep_five_documents() {
        let options = RetrievalOptions::default();
        assert_eq!(options.top_k, 5);
        assert!(options.score_threshold > 0.0);
    }
}
