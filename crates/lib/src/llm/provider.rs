//! Provider adapter: one per configured backend. Chooses the native or the
//! emulated tool path for each request and exposes `stream`, `complete` and `cost`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::error::LlmError;
use super::events::EventSink;
use super::format::format_tools;
use super::history::{reconcile, ReconcileOptions};
use super::native::{self, NativeOutcome};
use super::ollama::OllamaClient;
use super::openai::{CapabilitySource, OpenAiCompatClient};
use super::probe::{allow_list_includes, CapabilityProbe, ToolSupport};
use super::transport::{ChatRequest, ChatTransport};
use super::types::{ChatMessage, CompletionResult, ToolDefinition, Usage};
use super::untooled::{RequestSettings, UnTooled};
use crate::config::{self, Config};

/// Request/response shape a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    OpenAi,
    Ollama,
}

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Groq,
    TogetherAi,
    Mistral,
    DeepSeek,
    OpenRouter,
    Xai,
    LmStudio,
    LocalAi,
    KoboldCpp,
    TextGenWebUi,
    LiteLlm,
    GenericOpenAi,
    Ollama,
}

impl ProviderKind {
    pub const ALL: &'static [ProviderKind] = &[
        ProviderKind::OpenAi,
        ProviderKind::Groq,
        ProviderKind::TogetherAi,
        ProviderKind::Mistral,
        ProviderKind::DeepSeek,
        ProviderKind::OpenRouter,
        ProviderKind::Xai,
        ProviderKind::LmStudio,
        ProviderKind::LocalAi,
        ProviderKind::KoboldCpp,
        ProviderKind::TextGenWebUi,
        ProviderKind::LiteLlm,
        ProviderKind::GenericOpenAi,
        ProviderKind::Ollama,
    ];

    /// Key used in config and in the native tool-calling allow-list.
    pub fn key(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Groq => "groq",
            ProviderKind::TogetherAi => "togetherai",
            ProviderKind::Mistral => "mistral",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Xai => "xai",
            ProviderKind::LmStudio => "lmstudio",
            ProviderKind::LocalAi => "localai",
            ProviderKind::KoboldCpp => "koboldcpp",
            ProviderKind::TextGenWebUi => "textgenwebui",
            ProviderKind::LiteLlm => "litellm",
            ProviderKind::GenericOpenAi => "generic-openai",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn protocol(self) -> WireProtocol {
        match self {
            ProviderKind::Ollama => WireProtocol::Ollama,
            _ => WireProtocol::OpenAi,
        }
    }

    /// Endpoint used when none is configured. None: must be configured.
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            ProviderKind::Groq => Some("https://api.groq.com/openai/v1"),
            ProviderKind::TogetherAi => Some("https://api.together.xyz/v1"),
            ProviderKind::Mistral => Some("https://api.mistral.ai/v1"),
            ProviderKind::DeepSeek => Some("https://api.deepseek.com/v1"),
            ProviderKind::OpenRouter => Some("https://openrouter.ai/api/v1"),
            ProviderKind::Xai => Some("https://api.x.ai/v1"),
            ProviderKind::LmStudio => Some("http://127.0.0.1:1234/v1"),
            ProviderKind::LocalAi => Some("http://127.0.0.1:8080/v1"),
            ProviderKind::KoboldCpp => Some("http://127.0.0.1:5001/v1"),
            ProviderKind::TextGenWebUi => Some("http://127.0.0.1:5000/v1"),
            ProviderKind::LiteLlm => Some("http://127.0.0.1:4000/v1"),
            ProviderKind::GenericOpenAi => None,
            ProviderKind::Ollama => Some(super::ollama::DEFAULT_BASE_URL),
        }
    }

    /// Conventional environment variable holding this provider's API key.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Groq => Some("GROQ_API_KEY"),
            ProviderKind::TogetherAi => Some("TOGETHER_AI_API_KEY"),
            ProviderKind::Mistral => Some("MISTRAL_API_KEY"),
            ProviderKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Xai => Some("XAI_API_KEY"),
            ProviderKind::LocalAi => Some("LOCAL_AI_API_KEY"),
            ProviderKind::LiteLlm => Some("LITE_LLM_API_KEY"),
            ProviderKind::GenericOpenAi => Some("GENERIC_OPEN_AI_API_KEY"),
            ProviderKind::LmStudio
            | ProviderKind::KoboldCpp
            | ProviderKind::TextGenWebUi
            | ProviderKind::Ollama => None,
        }
    }

    /// Hosted APIs refuse unauthenticated requests.
    pub fn requires_api_key(self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi
                | ProviderKind::Groq
                | ProviderKind::TogetherAi
                | ProviderKind::Mistral
                | ProviderKind::DeepSeek
                | ProviderKind::OpenRouter
                | ProviderKind::Xai
        )
    }

    /// Providers whose chat API documents tool support for every model.
    pub fn always_native(self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi
                | ProviderKind::Groq
                | ProviderKind::Mistral
                | ProviderKind::DeepSeek
                | ProviderKind::Xai
        )
    }

    /// Capability metadata endpoint for the OpenAI-compatible client. Only LM Studio
    /// has one. Ollama kinds do not use this: `OllamaClient` always asks `/api/show`.
    pub fn capability_source(self) -> CapabilitySource {
        match self {
            ProviderKind::LmStudio => CapabilitySource::LmStudio,
            _ => CapabilitySource::None,
        }
    }

    /// DeepSeek rejects assistant tool-call turns without `reasoning_content`.
    pub fn reasoning_content_default(self) -> bool {
        self == ProviderKind::DeepSeek
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let key = match key.as_str() {
            "lm_studio" | "lm-studio" => "lmstudio",
            "generic_openai" | "genericopenai" => "generic-openai",
            other => other,
        };
        ProviderKind::ALL
            .iter()
            .copied()
            .find(|k| k.key() == key)
            .ok_or_else(|| LlmError::Config(format!("unknown provider {:?}", s.trim())))
    }
}

/// Pluggable price hook. Most backends publish no pricing at call time.
pub trait CostModel: Send + Sync {
    fn cost(&self, usage: &Usage) -> f64;
}

pub struct ZeroCost;

impl CostModel for ZeroCost {
    fn cost(&self, _usage: &Usage) -> f64 {
        0.0
    }
}

/// Fixed prices per 1000 prompt and completion tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerTokenCost {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl CostModel for PerTokenCost {
    fn cost(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 * self.prompt_per_1k
            + usage.completion_tokens as f64 * self.completion_per_1k)
            / 1000.0
    }
}

/// Adapter behavior that does not depend on the backend.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub model: String,
    pub embedding_model: Option<String>,
    /// Comma-separated provider keys for which native tool calling is forced on.
    pub native_tool_calling: String,
    /// Overrides the kind's reasoning-content default.
    pub reasoning_content: Option<bool>,
    pub max_malformed_retries: u32,
    pub dedup_cooldown: Option<Duration>,
    pub temperature: Option<f32>,
}

impl ProviderOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            embedding_model: None,
            native_tool_calling: String::new(),
            reasoning_content: None,
            max_malformed_retries: 1,
            dedup_cooldown: None,
            temperature: None,
        }
    }
}

pub struct Provider {
    kind: ProviderKind,
    options: ProviderOptions,
    transport: Arc<dyn ChatTransport>,
    probe: CapabilityProbe,
    untooled: UnTooled,
    cost: Arc<dyn CostModel>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("kind", &self.kind)
            .field("model", &self.options.model)
            .finish_non_exhaustive()
    }
}

impl Provider {
    pub fn new(kind: ProviderKind, transport: Arc<dyn ChatTransport>, options: ProviderOptions) -> Self {
        let forced =
            kind.always_native() || allow_list_includes(&options.native_tool_calling, kind.key());
        Self {
            kind,
            probe: CapabilityProbe::new(forced),
            untooled: UnTooled::new(options.dedup_cooldown),
            options,
            transport,
            cost: Arc::new(ZeroCost),
        }
    }

    pub fn with_cost_model(mut self, cost: Arc<dyn CostModel>) -> Self {
        self.cost = cost;
        self
    }

    /// Build the adapter and its HTTP transport from config (env overrides applied).
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let kind: ProviderKind = config::resolve_provider_kind(config).parse()?;
        let model = config::resolve_model(config).ok_or_else(|| {
            LlmError::Config(format!(
                "no model configured for {kind} (set provider.model or SWITCHYARD_MODEL)"
            ))
        })?;
        let base_url = config::resolve_base_url(config)
            .or_else(|| kind.default_base_url().map(str::to_string))
            .ok_or_else(|| {
                LlmError::Config(format!(
                    "{kind} has no default endpoint (set provider.baseUrl or SWITCHYARD_BASE_URL)"
                ))
            })?;
        let api_key = config::resolve_api_key(config, kind.api_key_env());
        if kind.requires_api_key() && api_key.is_none() {
            return Err(LlmError::Auth(format!(
                "{kind} requires an API key (set {} or SWITCHYARD_API_KEY)",
                kind.api_key_env().unwrap_or("provider.apiKey")
            )));
        }
        let transport_config = config::resolve_transport(config);
        let transport: Arc<dyn ChatTransport> = match kind.protocol() {
            WireProtocol::Ollama => Arc::new(OllamaClient::new(Some(&base_url), &transport_config)?),
            WireProtocol::OpenAi => Arc::new(OpenAiCompatClient::new(
                &base_url,
                api_key,
                kind.capability_source(),
                &transport_config,
            )?),
        };
        let options = ProviderOptions {
            model,
            embedding_model: config.provider.embedding_model.clone(),
            native_tool_calling: config::resolve_native_tool_calling(config),
            reasoning_content: config.provider.reasoning_content,
            max_malformed_retries: config.agent.max_malformed_retries,
            dedup_cooldown: config.agent.dedup_cooldown_secs.map(Duration::from_secs),
            temperature: config.agent.temperature,
        };
        let mut provider = Self::new(kind, transport, options);
        if let Some(p) = config.provider.pricing {
            provider = provider.with_cost_model(Arc::new(PerTokenCost {
                prompt_per_1k: p.prompt_per_1k,
                completion_per_1k: p.completion_per_1k,
            }));
        }
        Ok(provider)
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.options.model
    }

    /// Probe result for this adapter (resolved once, then cached).
    pub async fn supports_native_tools(&self) -> ToolSupport {
        self.probe
            .resolve(self.transport.as_ref(), &self.options.model)
            .await
    }

    /// Native calling is used only when tools are supplied and the probe says yes.
    async fn use_native(&self, tools: &[ToolDefinition]) -> bool {
        !tools.is_empty() && self.supports_native_tools().await.is_supported()
    }

    fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            reasoning_content: self
                .options
                .reasoning_content
                .unwrap_or_else(|| self.kind.reasoning_content_default()),
        }
    }

    fn native_request(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> ChatRequest {
        ChatRequest {
            model: self.options.model.clone(),
            messages: reconcile(messages, self.reconcile_options()),
            tools: format_tools(tools),
            temperature: self.options.temperature,
        }
    }

    fn settings(&self) -> RequestSettings {
        RequestSettings {
            model: self.options.model.clone(),
            temperature: self.options.temperature,
        }
    }

    /// Streamed completion. Progress goes to `sink`; streamed replies cost zero.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        sink: &dyn EventSink,
    ) -> Result<CompletionResult, LlmError> {
        if self.use_native(tools).await {
            let request = self.native_request(messages, tools);
            return native::stream(self.transport.as_ref(), &request, sink).await;
        }
        self.untooled
            .stream(self.transport.as_ref(), &self.settings(), messages, tools, sink)
            .await
    }

    /// Non-streamed completion. A native call with malformed arguments is sent
    /// back to the model at most `max_malformed_retries` times.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<CompletionResult, LlmError> {
        if !self.use_native(tools).await {
            let (mut result, usage) = self
                .untooled
                .complete(self.transport.as_ref(), &self.settings(), messages, tools)
                .await?;
            result.cost = self.cost(&usage);
            return Ok(result);
        }

        let mut history = messages.to_vec();
        let mut usage = Usage::default();
        let mut retries = 0;
        loop {
            let request = self.native_request(&history, tools);
            let mut reply = self.transport.chat(&request).await?;
            usage += reply.usage.take().unwrap_or_default();
            match native::interpret_reply(reply) {
                NativeOutcome::Done(mut result) => {
                    result.cost = self.cost(&usage);
                    return Ok(result);
                }
                NativeOutcome::Retry { message, text } => {
                    if retries >= self.options.max_malformed_retries {
                        log::warn!(
                            "giving up on malformed tool call after {} retries",
                            retries
                        );
                        return Ok(CompletionResult {
                            text_response: text,
                            function_call: None,
                            cost: self.cost(&usage),
                        });
                    }
                    retries += 1;
                    history.push(message);
                }
            }
        }
    }

    /// Price of `usage` under this adapter's cost model.
    pub fn cost(&self, usage: &Usage) -> f64 {
        self.cost.cost(usage)
    }

    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        self.transport.list_models().await
    }

    /// One vector per input, using the embedding model (or the chat model).
    pub async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let model = self
            .options
            .embedding_model
            .as_deref()
            .unwrap_or(&self.options.model);
        self.transport.embed(model, inputs).await
    }
}
