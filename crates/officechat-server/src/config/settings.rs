use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub user_chat: UserChatConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_url: String,
    pub enable_expire_job: bool,
    pub expire_job_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_url: "sqlite://data/officechat.db".to_string(),
            enable_expire_job: true,
            expire_job_interval_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub token: String,
    pub text_model: String,
    /// Optional HTTP(S) proxy for provider traffic.
    pub proxy_url: String,
    pub timeout_seconds: u64,
    /// Context budget in runes; 0 disables trimming.
    pub input_max_token: usize,
    /// Completion cap sent to the provider; 0 leaves it to the provider.
    pub output_max_token: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081/v1".to_string(),
            token: String::new(),
            text_model: "gpt-4o-mini".to_string(),
            proxy_url: String::new(),
            timeout_seconds: 120,
            input_max_token: 4000,
            output_max_token: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub default_system_message: String,
    /// Max conversations per user; 0 means unlimited.
    pub conversation_limit: usize,
    pub min_sentence_runes: usize,
    /// Upper bound on the newest prompt, in runes; 0 disables the check.
    pub max_prompt_tokens: usize,
    /// `ext` key -> (incoming value -> replacement) for text processor content.
    pub text_processor_ext_transform: HashMap<String, HashMap<String, String>>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_system_message: "You are a helpful assistant embedded in an office document viewer. Answer concisely and accurately.".to_string(),
            conversation_limit: 0,
            min_sentence_runes: 30,
            max_prompt_tokens: 0,
            text_processor_ext_transform: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct UserChatConfig {
    /// Prompts that clear the caller's single-shot context.
    pub reset: Vec<String>,
    /// Idle time after which the single-shot context starts over.
    pub timeout_ms: u64,
    pub support_context: bool,
    /// Period of the idle-context sweep.
    pub cleanup_interval_secs: u64,
}

impl Default for UserChatConfig {
    fn default() -> Self {
        Self {
            reset: vec!["reset".to_string()],
            timeout_ms: 10 * 60 * 1000,
            support_context: true,
            cleanup_interval_secs: 60,
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
                    .list_separator(",")
                    .with_list_parse_key("user_chat.reset")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
