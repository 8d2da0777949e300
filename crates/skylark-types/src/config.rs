//! Configuration types for Skylark.
//!
//! `BotConfig` represents the top-level `config.toml`. Every field has a
//! default so a partial file is always valid input; [`BotConfig::validate`]
//! enforces what must actually be present before the bot can run.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::event::Visibility;
use crate::llm::ApiMode;
use crate::subscription::{SubscriptionSet, Timeline};

// ---------------------------------------------------------------------------
// Limit values
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLimit {
    Int(i64),
    Float(f64),
    Str(String),
}

fn is_unlimited_word(s: &str) -> bool {
    matches!(s, "unlimited" | "none" | "off" | "inf" | "infinite" | "never")
}

/// A duration in seconds where any negative value means "unlimited" / "never".
///
/// Deserializes from an integer (`30`), or a string with an optional unit
/// suffix (`"30s"`, `"5m"`, `"1h"`, `"2d"`, `"unlimited"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i64")]
pub struct LimitDuration(i64);

impl LimitDuration {
    pub const UNLIMITED: LimitDuration = LimitDuration(-1);

    pub fn from_secs(secs: i64) -> Self {
        Self(if secs < 0 { -1 } else { secs })
    }

    pub fn is_unlimited(&self) -> bool {
        self.0 < 0
    }

    /// Seconds, or `None` when unlimited.
    pub fn secs(&self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }

    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let s = input.trim().to_lowercase();
        if is_unlimited_word(&s) {
            return Ok(Self::UNLIMITED);
        }
        let (digits, multiplier) = match s.char_indices().last() {
            Some((idx, 's')) => (&s[..idx], 1),
            Some((idx, 'm')) => (&s[..idx], 60),
            Some((idx, 'h')) => (&s[..idx], 3_600),
            Some((idx, 'd')) => (&s[..idx], 86_400),
            _ => (s.as_str(), 1),
        };
        let value: i64 = digits
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid duration '{input}'")))?;
        Ok(Self::from_secs(value.saturating_mul(multiplier)))
    }
}

impl From<LimitDuration> for i64 {
    fn from(value: LimitDuration) -> Self {
        value.0
    }
}

impl fmt::Display for LimitDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.secs() {
            Some(secs) => write!(f, "{secs}s"),
            None => f.write_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for LimitDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawLimit::deserialize(deserializer)? {
            RawLimit::Int(v) => Ok(Self::from_secs(v)),
            RawLimit::Float(v) => Ok(Self::from_secs(v as i64)),
            RawLimit::Str(s) => Self::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// A count limit where any negative value means "unlimited".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i64")]
pub struct TurnLimit(i64);

impl TurnLimit {
    pub const UNLIMITED: TurnLimit = TurnLimit(-1);

    pub fn new(value: i64) -> Self {
        Self(if value < 0 { -1 } else { value })
    }

    pub fn get(&self) -> Option<u32> {
        u32::try_from(self.0).ok()
    }

    pub fn is_unlimited(&self) -> bool {
        self.0 < 0
    }
}

impl From<TurnLimit> for i64 {
    fn from(value: TurnLimit) -> Self {
        value.0
    }
}

impl fmt::Display for TurnLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(n) => write!(f, "{n}"),
            None => f.write_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for TurnLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawLimit::deserialize(deserializer)? {
            RawLimit::Int(v) => Ok(Self::new(v)),
            RawLimit::Float(v) => Ok(Self::new(v as i64)),
            RawLimit::Str(s) => {
                let s = s.trim().to_lowercase();
                if is_unlimited_word(&s) {
                    return Ok(Self::UNLIMITED);
                }
                s.parse::<i64>()
                    .map(Self::new)
                    .map_err(|_| serde::de::Error::custom(format!("invalid turn limit '{s}'")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Top-level configuration. Loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub instance: InstanceConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub bot: PersonaConfig,
    #[serde(default)]
    pub auto_post: AutoPostConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Base URL, e.g. `https://misskey.example`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub access_token: String,
}

impl InstanceConfig {
    /// Host part of the instance URL (`misskey.example`).
    pub fn host(&self) -> Option<&str> {
        let rest = self
            .url
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let host = rest.split('/').next()?.trim();
        if host.is_empty() { None } else { Some(host) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_mode: ApiMode,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Models the `model` command may switch to. Empty accepts any name.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_concurrency")]
    pub max_concurrency: usize,
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_api_base() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.8
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_llm_concurrency() -> usize {
    4
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            api_base: default_api_base(),
            api_mode: ApiMode::default(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            models: Vec::new(),
            timeout_secs: default_llm_timeout(),
            max_concurrency: default_llm_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default)]
    pub system_prompt: String,
    /// Sent to the user when the language model fails.
    #[serde(default = "default_failure_reply")]
    pub failure_reply: String,
}

fn default_failure_reply() -> String {
    "Sorry, something went wrong on my side. Please try again later.".to_string()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            failure_reply: default_failure_reply(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoPostConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_max_posts_per_day")]
    pub max_posts_per_day: u32,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default)]
    pub local_only: bool,
    #[serde(default)]
    pub prompt: String,
}

fn default_true() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    180
}

fn default_max_posts_per_day() -> u32 {
    8
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

impl Default for AutoPostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_interval_minutes(),
            max_posts_per_day: default_max_posts_per_day(),
            visibility: default_visibility(),
            local_only: false,
            prompt: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default = "default_true")]
    pub mention: bool,
    #[serde(default = "default_true")]
    pub chat: bool,
    /// Number of turns kept per user in the conversation window.
    #[serde(default = "default_chat_memory")]
    pub chat_memory: usize,
    #[serde(default = "unlimited_duration")]
    pub rate_limit: LimitDuration,
    #[serde(default = "unlimited_turns")]
    pub max_turns: TurnLimit,
    #[serde(default = "unlimited_duration")]
    pub max_turns_release: LimitDuration,
    #[serde(default = "default_rate_limit_reply")]
    pub rate_limit_reply: String,
    #[serde(default = "default_max_turns_reply")]
    pub max_turns_reply: String,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

fn default_chat_memory() -> usize {
    10
}

fn unlimited_duration() -> LimitDuration {
    LimitDuration::UNLIMITED
}

fn unlimited_turns() -> TurnLimit {
    TurnLimit::UNLIMITED
}

fn default_rate_limit_reply() -> String {
    "I need to rest a bit, talk to you later.".to_string()
}

fn default_max_turns_reply() -> String {
    "I'm going home now, see you next time.".to_string()
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            mention: true,
            chat: true,
            chat_memory: default_chat_memory(),
            rate_limit: LimitDuration::UNLIMITED,
            max_turns: TurnLimit::UNLIMITED,
            max_turns_release: LimitDuration::UNLIMITED,
            rate_limit_reply: default_rate_limit_reply(),
            max_turns_reply: default_max_turns_reply(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default)]
    pub home: bool,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub hybrid: bool,
    #[serde(default)]
    pub global: bool,
    /// Antenna ids or names to join at startup.
    #[serde(default)]
    pub antenna_ids: Vec<String>,
}

impl TimelineConfig {
    pub fn timelines(&self) -> Vec<Timeline> {
        [
            (self.home, Timeline::Home),
            (self.local, Timeline::Local),
            (self.hybrid, Timeline::Hybrid),
            (self.global, Timeline::Global),
        ]
        .into_iter()
        .filter_map(|(on, t)| on.then_some(t))
        .collect()
    }

    /// The configured subscription set, with antenna selectors taken verbatim.
    pub fn subscription_set(&self) -> SubscriptionSet {
        SubscriptionSet::new(self.timelines(), self.antenna_ids.iter().cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Users allowed to issue operator commands. Empty disables commands.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

fn default_prefix() -> String {
    "^".to_string()
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            allowed_users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "default_plugins_dir")]
    pub dir: String,
}

fn default_plugins_dir() -> String {
    "plugins".to_string()
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugins_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Days to keep conversation state. 0 purges everything, negative never purges.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_db_path() -> String {
    "data/skylark.db".to_string()
}

fn default_retention_days() -> i64 {
    30
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
}

fn default_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_enqueue_timeout_ms() -> u64 {
    1000
}

fn default_dedup_capacity() -> usize {
    2000
}

fn default_dedup_ttl_secs() -> u64 {
    600
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            dedup_capacity: default_dedup_capacity(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub dump_events: bool,
    #[serde(default)]
    pub otel: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dump_events: false,
            otel: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl BotConfig {
    /// Check that the configuration is complete enough to run the bot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance.url.trim().is_empty() || self.instance.host().is_none() {
            return Err(ConfigError::Invalid("instance.url is required".into()));
        }
        if self.instance.access_token.trim().is_empty() {
            return Err(ConfigError::Invalid("instance.access_token is required".into()));
        }
        if self.openai.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("openai.api_key is required".into()));
        }
        if !(0.0..=2.0).contains(&self.openai.temperature) {
            return Err(ConfigError::Invalid(format!(
                "openai.temperature must be within [0, 2], got {}",
                self.openai.temperature
            )));
        }
        if self.openai.max_concurrency == 0 {
            return Err(ConfigError::Invalid("openai.max_concurrency must be > 0".into()));
        }
        if self.auto_post.interval_minutes == 0 {
            return Err(ConfigError::Invalid("auto_post.interval_minutes must be > 0".into()));
        }
        if self.auto_post.visibility == Visibility::Specified {
            return Err(ConfigError::Invalid(
                "auto_post.visibility must be public, home or followers".into(),
            ));
        }
        if self.stream.workers == 0 {
            return Err(ConfigError::Invalid("stream.workers must be > 0".into()));
        }
        if self.commands.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("commands.prefix must not be empty".into()));
        }
        Ok(())
    }

    /// A copy with credentials masked, safe to print.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        out.instance.access_token = mask(&out.instance.access_token);
        out.openai.api_key = mask(&out.openai.api_key);
        out
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "***".to_string()
    }
}
