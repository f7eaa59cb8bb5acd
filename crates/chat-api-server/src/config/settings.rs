use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub history: HistoryConfig,
    pub rag: RagConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Explicit CORS origins; empty means any origin is accepted.
    pub cors_origins: Vec<String>,
    /// Replies are split into parts no longer than this before delivery.
    pub max_part_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            // 4096-char transport frame minus headroom for part markers
            max_part_len: 4096 - 16,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    /// Overrides the provider preset when set.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout_seconds: u64,
    pub http_referer: Option<String>,
    pub x_title: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            base_url: None,
            api_key: None,
            model: None,
            temperature: 0.7,
            top_p: 0.95,
            timeout_seconds: 60,
            http_referer: None,
            x_title: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub enabled: bool,
    pub rate_per_second: f64,
    pub burst: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_per_second: 2.0,
            burst: 2,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 3,
            base_delay_ms: 700,
            max_delay_ms: 4000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    /// Messages retained per conversation; zero retains nothing.
    pub window: usize,
    /// Tracked conversation bound; unset means unbounded.
    pub max_conversations: Option<usize>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window: 20,
            max_conversations: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RagConfig {
    pub enabled: bool,
    pub search_url: Option<String>,
    pub top_k: usize,
    pub context_max_chars: usize,
    pub timeout_seconds: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            search_url: None,
            top_k: 3,
            context_max_chars: 2000,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    pub system_preamble: String,
    pub context_title: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_preamble: "You are an attentive and concise assistant. \
                When context is provided, ground your answer in the facts it contains. \
                If you are not sure, say so honestly and ask for clarification. \
                Keep answers to the point."
                .to_string(),
            context_title: "Knowledge base context".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
