//! Process-wide configuration, loaded once from the environment at boot via
//! a `lazy_static` singleton. Every setting comes from an environment
//! variable, so the `config` crate's `Environment` source is the only one
//! wired up.

use config::Config;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::env;

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub app_env: Option<String>,
    #[serde(default)]
    pub node_env: Option<String>,
    #[serde(default)]
    pub demo_mode: bool,
    #[serde(default)]
    pub bypass_business_hours: bool,
    pub database_url: String,
    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    #[serde(default)]
    pub redis_password: Option<String>,
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
    #[serde(default)]
    pub google_client_id: String,
    #[serde(default)]
    pub google_client_secret: String,
    #[serde(default)]
    pub google_redirect_uri: String,
    #[serde(default)]
    pub pubsub_audience: String,
    #[serde(default = "default_web_app_url")]
    pub web_app_url: String,
    #[serde(default = "default_track_api_url")]
    pub track_api_url: String,
    #[serde(default)]
    pub test_email: Option<String>,
}

fn default_port() -> u16 {
    5006
}
fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_queue_prefix() -> String {
    "sequencer".to_string()
}
fn default_web_app_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_track_api_url() -> String {
    "http://localhost:5006".to_string()
}

impl AppConfig {
    fn from_env() -> Self {
        let mut cfg: AppConfig = Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .expect("failed to read environment configuration")
            .try_deserialize()
            .expect("invalid environment configuration");

        // `config::Environment` lower-cases keys, and the spec names both
        // `DEMO_MODE`/`BYPASS_BUSINESS_HOURS` as bare presence flags in some
        // deployments rather than `true`/`false` strings — accept either.
        cfg.demo_mode = cfg.demo_mode || env_flag("DEMO_MODE");
        cfg.bypass_business_hours = cfg.bypass_business_hours || env_flag("BYPASS_BUSINESS_HOURS");
        cfg
    }

    /// Demo mode and the business-hours-only bypass both disable the
    /// scheduler's business-hours adjustment.
    pub fn bypass_business_hours(&self) -> bool {
        self.demo_mode || self.bypass_business_hours
    }

    pub fn is_dev(&self) -> bool {
        let env = self
            .app_env
            .as_deref()
            .or(self.node_env.as_deref())
            .unwrap_or("development");
        env != "production"
    }

    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(pw) => format!("redis://:{pw}@{}:{}", self.redis_host, self.redis_port),
            None => format!("redis://{}:{}", self.redis_host, self.redis_port),
        }
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "port={} dev={} demo_mode={} bypass_business_hours={} queue_prefix={} redis={}:{}",
            self.port,
            self.is_dev(),
            self.demo_mode,
            self.bypass_business_hours,
            self.queue_prefix,
            self.redis_host,
            self.redis_port
        )
    }
}

lazy_static! {
    #[allow(non_upper_case_globals)]
    pub static ref cfg: AppConfig = AppConfig::from_env();
}
