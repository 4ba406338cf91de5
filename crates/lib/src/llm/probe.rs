//! Capability probe: should native tool calling be attempted for this provider
//! and model?
//!
//! Resolved once per adapter and cached. A failed metadata query never surfaces
//! as an error.

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::transport::ChatTransport;

/// Capability labels that mean the model accepts tools.
const TOOL_LABELS: &[&str] = &["tools", "tool_use", "function_calling"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSupport {
    Supported,
    Unsupported,
    /// The metadata query failed. Treated as unsupported.
    Unknown,
}

impl ToolSupport {
    pub fn is_supported(self) -> bool {
        self == ToolSupport::Supported
    }
}

/// True if the comma-separated `allow_list` names `provider_key`
/// (case-insensitive, blanks ignored).
pub fn allow_list_includes(allow_list: &str, provider_key: &str) -> bool {
    allow_list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .any(|s| s.eq_ignore_ascii_case(provider_key))
}

#[derive(Debug, Default)]
pub struct CapabilityProbe {
    /// Explicitly enabled (allow-list or a provider with documented tool support).
    forced: bool,
    resolved: OnceCell<ToolSupport>,
}

impl CapabilityProbe {
    pub fn new(forced: bool) -> Self {
        Self {
            forced,
            resolved: OnceCell::new(),
        }
    }

    /// Cached answer, if already resolved.
    pub fn cached(&self) -> Option<ToolSupport> {
        self.resolved.get().copied()
    }

    /// Resolve (first call) or return the cached answer.
    pub async fn resolve(&self, transport: &dyn ChatTransport, model: &str) -> ToolSupport {
        *self
            .resolved
            .get_or_init(|| async {
                let support = self.query(transport, model).await;
                log::debug!("native tool calling for model {}: {:?}", model, support);
                support
            })
            .await
    }

    async fn query(&self, transport: &dyn ChatTransport, model: &str) -> ToolSupport {
        if self.forced {
            return ToolSupport::Supported;
        }
        match transport.model_capabilities(model).await {
            Ok(Some(labels)) => {
                if labels
                    .iter()
                    .any(|l| TOOL_LABELS.iter().any(|t| l.eq_ignore_ascii_case(t)))
                {
                    ToolSupport::Supported
                } else {
                    ToolSupport::Unsupported
                }
            }
            Ok(None) => ToolSupport::Unsupported,
            Err(e) => {
                log::debug!("capability probe for model {} failed: {}", model, e);
                ToolSupport::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::error::LlmError;
    use crate::llm::transport::{ChatReply, ChatRequest, DeltaHandler};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Caps {
        answer: fn() -> Result<Option<Vec<String>>, LlmError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatTransport for Caps {
        async fn chat(&self, _: &ChatRequest) -> Result<ChatReply, LlmError> {
            unreachable!()
        }
        async fn chat_stream(
            &self,
            _: &ChatRequest,
            _: &mut DeltaHandler<'_>,
        ) -> Result<(), LlmError> {
            unreachable!()
        }
        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(Vec::new())
        }
        async fn model_capabilities(&self, _: &str) -> Result<Option<Vec<String>>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.answer)()
        }
        async fn embed(&self, _: &str, _: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            Ok(Vec::new())
        }
    }

    fn caps(answer: fn() -> Result<Option<Vec<String>>, LlmError>) -> Caps {
        Caps {
            answer,
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn allow_list_matching() {
        assert!(allow_list_includes("openai, lmstudio", "lmstudio"));
        assert!(allow_list_includes("LMStudio", "lmstudio"));
        assert!(!allow_list_includes("openai,,", "ollama"));
        assert!(!allow_list_includes("", "ollama"));
    }

    #[tokio::test]
    async fn forced_skips_metadata_query() {
        let t = caps(|| Ok(None));
        let probe = CapabilityProbe::new(true);
        assert_eq!(probe.resolve(&t, "m").await, ToolSupport::Supported);
        assert_eq!(t.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn labels_decide_and_result_is_cached() {
        let t = caps(|| Ok(Some(vec!["completion".into(), "tools".into()])));
        let probe = CapabilityProbe::new(false);
        assert_eq!(probe.resolve(&t, "m").await, ToolSupport::Supported);
        assert_eq!(probe.resolve(&t, "m").await, ToolSupport::Supported);
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);

        let t = caps(|| Ok(Some(vec!["completion".into()])));
        assert_eq!(
            CapabilityProbe::new(false).resolve(&t, "m").await,
            ToolSupport::Unsupported
        );
    }

    #[tokio::test]
    async fn no_metadata_defaults_to_unsupported() {
        let t = caps(|| Ok(None));
        assert_eq!(
            CapabilityProbe::new(false).resolve(&t, "m").await,
            ToolSupport::Unsupported
        );
    }

    #[tokio::test]
    async fn failure_resolves_to_unknown() {
        let t = caps(|| Err(LlmError::in_band("connection refused")));
        let probe = CapabilityProbe::new(false);
        let support = probe.resolve(&t, "m").await;
        assert_eq!(support, ToolSupport::Unknown);
        assert!(!support.is_supported());
        assert_eq!(probe.cached(), Some(ToolSupport::Unknown));
    }
}
