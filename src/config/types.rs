use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub carrier: CarrierConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CarrierConfig {
    Twilio(TwilioConfig),
    Simulated(SimulatedConfig),
}

impl CarrierConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            CarrierConfig::Twilio(_) => "twilio",
            CarrierConfig::Simulated(_) => "simulated",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    #[serde(default = "default_twilio_base_url")]
    pub base_url: String,
    #[serde(default = "default_carrier_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("from_number", &self.from_number)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn default_twilio_base_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_carrier_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,
    #[serde(default = "default_retain_finished")]
    pub retain_finished: usize,
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            recent_messages: default_recent_messages(),
            retain_finished: default_retain_finished(),
            observer_buffer: default_observer_buffer(),
        }
    }
}

fn default_recent_messages() -> usize {
    10
}

fn default_retain_finished() -> usize {
    256
}

fn default_observer_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Applied to every /api route
    #[serde(default = "default_api_limit")]
    pub api: RateLimitRule,
    /// Applied to batch submissions on top of `api`
    #[serde(default = "default_sms_limit")]
    pub sms: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api: default_api_limit(),
            sms: default_sms_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitRule {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_requests: u32,
}

fn default_api_limit() -> RateLimitRule {
    RateLimitRule {
        window: Duration::from_secs(15 * 60),
        max_requests: 100,
    }
}

fn default_sms_limit() -> RateLimitRule {
    RateLimitRule {
        window: Duration::from_secs(60 * 60),
        max_requests: 15,
    }
}
