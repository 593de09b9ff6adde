use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::FeedbackError;

/// Persistence seam for the stat-bearing entities (fingerprints, veto
/// templates, budget and calibration state). The concrete backend is out of
/// scope; anything that can store JSON documents by (kind, id) works.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, kind: &str, id: &str, value: Value) -> Result<(), FeedbackError>;
    async fn load_all(&self, kind: &str) -> Result<Vec<(String, Value)>, FeedbackError>;
}

/// In-memory store used in tests and as a default for ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entities: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, kind: &str, id: &str, value: Value) -> Result<(), FeedbackError> {
        let mut entities = self.entities.lock().await;
        entities
            .entry(kind.to_string())
            .or_default()
            .insert(id.to_string(), value);
        Ok(())
    }

    async fn load_all(&self, kind: &str) -> Result<Vec<(String, Value)>, FeedbackError> {
        let entities = self.entities.lock().await;
        Ok(entities
            .get(kind)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}
