//! Per-session provider instances.
//!
//! The emulated driver's duplicate tracker and the capability probe cache live on
//! a `Provider`, so each session id gets its own adapter. Sessions are in memory only
//! and bounded: once the store is full, the least recently created session is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::llm::{LlmError, Provider};

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Builds a fresh adapter for a new session.
pub type ProviderFactory = Arc<dyn Fn() -> Result<Provider, LlmError> + Send + Sync>;

pub const DEFAULT_MAX_SESSIONS: usize = 256;

#[derive(Default)]
struct Sessions {
    by_id: HashMap<SessionId, Arc<Provider>>,
    /// Creation order, oldest first.
    order: VecDeque<SessionId>,
}

impl Sessions {
    fn insert(&mut self, id: SessionId, provider: Arc<Provider>, capacity: usize) {
        while self.by_id.len() >= capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.by_id.remove(&oldest).is_some() {
                log::debug!("session store full, dropped {}", oldest);
            }
        }
        self.order.push_back(id.clone());
        self.by_id.insert(id, provider);
    }

    fn remove(&mut self, id: &str) -> bool {
        let removed = self.by_id.remove(id).is_some();
        if removed {
            self.order.retain(|s| s != id);
        }
        removed
    }
}

/// In-memory store mapping session id to its adapter.
pub struct SessionStore {
    inner: Arc<RwLock<Sessions>>,
    factory: ProviderFactory,
    capacity: usize,
}

impl SessionStore {
    pub fn new(factory: ProviderFactory) -> Self {
        Self::with_capacity(factory, DEFAULT_MAX_SESSIONS)
    }

    /// Store holding at most `capacity` sessions (at least one).
    pub fn with_capacity(factory: ProviderFactory, capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Sessions::default())),
            factory,
            capacity: capacity.max(1),
        }
    }

    /// Create a new session with a generated id.
    pub async fn create(&self) -> Result<(SessionId, Arc<Provider>), LlmError> {
        let id = format!("sess-{}", uuid::Uuid::new_v4());
        let provider = Arc::new((self.factory)()?);
        self.inner
            .write()
            .await
            .insert(id.clone(), Arc::clone(&provider), self.capacity);
        Ok((id, provider))
    }

    /// The session's adapter, creating the session if it does not exist.
    pub async fn get_or_create(&self, id: &str) -> Result<Arc<Provider>, LlmError> {
        if let Some(p) = self.inner.read().await.by_id.get(id) {
            return Ok(Arc::clone(p));
        }
        let mut g = self.inner.write().await;
        if let Some(p) = g.by_id.get(id) {
            return Ok(Arc::clone(p));
        }
        let provider = Arc::new((self.factory)()?);
        g.insert(id.to_string(), Arc::clone(&provider), self.capacity);
        Ok(provider)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Provider>> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// Drop a session; returns false if it did not exist.
    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        ChatReply, ChatRequest, ChatTransport, DeltaHandler, ProviderKind, ProviderOptions,
    };
    use async_trait::async_trait;

    struct Silent;

    #[async_trait]
    impl ChatTransport for Silent {
        async fn chat(&self, _: &ChatRequest) -> Result<ChatReply, LlmError> {
            Ok(ChatReply::default())
        }
        async fn chat_stream(
            &self,
            _: &ChatRequest,
            _: &mut DeltaHandler<'_>,
        ) -> Result<(), LlmError> {
            Ok(())
        }
        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(Vec::new())
        }
        async fn embed(&self, _: &str, _: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            Ok(Vec::new())
        }
    }

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(|| {
            Ok(Provider::new(
                ProviderKind::Ollama,
                Arc::new(Silent),
                ProviderOptions::new("m"),
            ))
        }))
    }

    #[tokio::test]
    async fn sessions_get_distinct_providers() {
        let store = store();
        let (a, pa) = store.create().await.unwrap();
        let (b, pb) = store.create().await.unwrap();
        assert_ne!(a, b);
        assert!(!Arc::ptr_eq(&pa, &pb));
        assert!(Arc::ptr_eq(&store.get(&a).await.unwrap(), &pa));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn get_or_create_reuses_existing() {
        let store = store();
        let first = store.get_or_create("s1").await.unwrap();
        let again = store.get_or_create("s1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(store.remove("s1").await);
        assert!(!store.remove("s1").await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn full_store_drops_oldest_session() {
        let store = SessionStore::with_capacity(
            Arc::new(|| {
                Ok(Provider::new(
                    ProviderKind::Ollama,
                    Arc::new(Silent),
                    ProviderOptions::new("m"),
                ))
            }),
            2,
        );
        let (a, _) = store.create().await.unwrap();
        let (b, _) = store.create().await.unwrap();
        store.get_or_create("named").await.unwrap();
        assert_eq!(store.len().await, 2);
        assert!(store.get(&a).await.is_none());
        assert!(store.get(&b).await.is_some());

        assert!(store.remove(&b).await);
        store.create().await.unwrap();
        assert!(store.get("named").await.is_some());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn factory_errors_propagate() {
        let store = SessionStore::new(Arc::new(|| Err(LlmError::Config("no model".into()))));
        assert!(matches!(store.create().await, Err(LlmError::Config(_))));
        assert!(store.is_empty().await);
    }
}
