//! Shared task context passed between agents
//!
//! A thin wrapper over a JSON object map. Step results are written back under
//! `{agent_type}_result` / `{agent_type}_success` keys so downstream steps in
//! a sequential plan can read what upstream steps produced.

use crate::models::AgentType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct TaskContext(Map<String, Value>);

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Builder form of `insert` for literal construction.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Trace id carried alongside the task, when the orchestrator set one.
    pub fn trace_id(&self) -> Option<uuid::Uuid> {
        self.get_str("trace_id")
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
    }

    /// Copies every entry of `other` into `self`, overwriting on collision.
    pub fn merge(&mut self, other: &TaskContext) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Records the outcome of one executed step under the keys downstream
    /// steps look up.
    pub fn record_step_outcome(&mut self, agent: AgentType, result: Value, success: bool) {
        self.0.insert(format!("{}_result", agent.as_str()), result);
        self.0
            .insert(format!("{}_success", agent.as_str()), Value::Bool(success));
    }

    pub fn step_result(&self, agent: AgentType) -> Option<&Value> {
        self.0.get(&format!("{}_result", agent.as_str()))
    }

    pub fn step_succeeded(&self, agent: AgentType) -> Option<bool> {
        self.0
            .get(&format!("{}_success", agent.as_str()))
            .and_then(Value::as_bool)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for TaskContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for TaskContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
