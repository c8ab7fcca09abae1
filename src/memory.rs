//! User memory collaborator
//!
//! Stores per-user advisory preferences and past exchanges, and answers the
//! orchestrator's enrichment queries. Unknown users get documented defaults
//! rather than errors so enrichment never blocks a request.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Retained exchanges per user; older ones are evicted first.
const MAX_CONVERSATIONS_PER_USER: usize = 50;

/// Stored advisory preferences for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPreferences {
    pub risk_tolerance: String,
    pub investment_style: String,
    pub preferred_agents: Vec<String>,
    pub communication_style: String,
}

impl Default for UserPreferences {
    /// Defaults served for unknown users: moderate risk, balanced style,
    /// no preferred agents, detailed communication.
    fn default() -> Self {
        Self {
            risk_tolerance: "moderate".to_string(),
            investment_style: "balanced".to_string(),
            preferred_agents: Vec::new(),
            communication_style: "detailed".to_string(),
        }
    }
}

/// One past user exchange, written back after each orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub user_id: Uuid,
    pub query: String,
    pub response: String,
    pub intent: String,
    pub timestamp: DateTime<Utc>,
}

/// Trait for preference and conversation persistence
#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>>;
    async fn put_preferences(&self, user_id: Uuid, preferences: UserPreferences) -> Result<()>;
    async fn recent_conversations(&self, user_id: Uuid, limit: usize)
        -> Result<Vec<ConversationEntry>>;
    async fn append_conversation(&self, entry: ConversationEntry) -> Result<()>;
}

/// In-memory store for development and tests. Last write wins per key.
pub struct InMemoryPreferenceStore {
    preferences: Arc<RwLock<HashMap<Uuid, UserPreferences>>>,
    conversations: Arc<RwLock<HashMap<Uuid, VecDeque<ConversationEntry>>>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self {
            preferences: Arc::new(RwLock::new(HashMap::new())),
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryPreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn get_preferences(&self, user_id: Uuid) -> Result<Option<UserPreferences>> {
        let preferences = self.preferences.read().await;
        Ok(preferences.get(&user_id).cloned())
    }

    async fn put_preferences(&self, user_id: Uuid, prefs: UserPreferences) -> Result<()> {
        let mut preferences = self.preferences.write().await;
        preferences.insert(user_id, prefs);
        Ok(())
    }

    async fn recent_conversations(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(&user_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn append_conversation(&self, entry: ConversationEntry) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let entries = conversations.entry(entry.user_id).or_default();
        entries.push_back(entry);
        while entries.len() > MAX_CONVERSATIONS_PER_USER {
            entries.pop_front();
        }
        Ok(())
    }
}

/// Memory collaborator consumed by the orchestrator.
pub struct MemoryService {
    store: Arc<dyn PreferenceStore>,
}

impl MemoryService {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryPreferenceStore::new()))
    }

    /// Preferences for a user, falling back to defaults when none stored.
    pub async fn get_user_preferences(&self, user_id: Uuid) -> Result<UserPreferences> {
        Ok(self.store.get_preferences(user_id).await?.unwrap_or_default())
    }

    pub async fn set_user_preferences(
        &self,
        user_id: Uuid,
        preferences: UserPreferences,
    ) -> Result<()> {
        self.store.put_preferences(user_id, preferences).await
    }

    /// Past exchanges relevant to `topic`, most relevant first. Relevance is
    /// keyword overlap between the topic and the stored query/response text;
    /// exchanges with no overlap are not returned.
    pub async fn get_relevant_conversations(
        &self,
        user_id: Uuid,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>> {
        let window = self
            .store
            .recent_conversations(user_id, MAX_CONVERSATIONS_PER_USER)
            .await?;

        let topic_words: Vec<String> = topic
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() >= 3)
            .map(|w| w.to_string())
            .collect();

        let mut scored: Vec<(usize, ConversationEntry)> = window
            .into_iter()
            .filter_map(|entry| {
                let haystack =
                    format!("{} {}", entry.query, entry.response).to_lowercase();
                let score = topic_words
                    .iter()
                    .filter(|w| haystack.contains(w.as_str()))
                    .count();
                (score > 0).then_some((score, entry))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.timestamp.cmp(&a.1.timestamp))
        });

        Ok(scored.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    /// Writes one completed exchange back so future requests can recall it.
    pub async fn record_exchange(
        &self,
        user_id: Uuid,
        query: &str,
        response: &str,
        intent: &str,
    ) -> Result<()> {
        self.store
            .append_conversation(ConversationEntry {
                user_id,
                query: query.to_string(),
                response: response.to_string(),
                intent: intent.to_string(),
                timestamp: Utc::now(),
            })
            .await
    }
}
