//! Server configuration: defaults, TOML file, then CLI/environment overrides.

use crate::auth::OriginPolicy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use pushgate_core::{GatewayError, GatewayResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub origin: OriginSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between keepalive pings.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Frames buffered per session before a write counts as failed.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            keepalive_secs: default_keepalive_secs(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

/// `[identity]` section: where tickets are validated.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_identity_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            timeout_secs: default_identity_timeout_secs(),
        }
    }
}

impl IdentityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[broker]` section: the AMQP queue directives are consumed from.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// `host` or `host:port`.
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_user")]
    pub user: String,
    #[serde(default = "default_broker_user")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default)]
    pub queue: String,
    #[serde(default = "default_consumer_tag")]
    pub consumer_tag: String,
    /// Unacked deliveries in flight (0 = broker default).
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
    /// Declare the queue (durable) before consuming.
    #[serde(default)]
    pub declare_queue: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            user: default_broker_user(),
            password: default_broker_user(),
            vhost: default_vhost(),
            queue: String::new(),
            consumer_tag: default_consumer_tag(),
            prefetch: default_prefetch(),
            declare_queue: false,
        }
    }
}

impl BrokerConfig {
    /// `amqp://<user>:<password>@<host>/<vhost>`, with user, password and
    /// vhost percent-encoded.
    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}/{}",
            percent_encode(&self.user),
            percent_encode(&self.password),
            self.host,
            percent_encode(&self.vhost)
        )
    }

    /// Broker location without credentials, for logging.
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.host, percent_encode(&self.vhost))
    }
}

/// `[origin]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OriginSection {
    /// Runtime mode; `"prod"` turns origin enforcement on.
    #[serde(default)]
    pub app_env: String,
    /// Explicit switch, overrides `app_env`.
    #[serde(default)]
    pub enforce: Option<bool>,
}

fn default_port() -> u16 {
    8080
}
fn default_keepalive_secs() -> u64 {
    60
}
fn default_outbound_buffer() -> usize {
    256
}
fn default_identity_timeout_secs() -> u64 {
    5
}
fn default_broker_host() -> String {
    "localhost:5672".to_string()
}
fn default_broker_user() -> String {
    "guest".to_string()
}
fn default_vhost() -> String {
    "/".to_string()
}
fn default_consumer_tag() -> String {
    "pushgate".to_string()
}
fn default_prefetch() -> u16 {
    64
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub keepalive_secs: Option<u64>,
    pub identity_url: Option<String>,
    pub identity_token: Option<String>,
    pub broker_host: Option<String>,
    pub broker_user: Option<String>,
    pub broker_password: Option<String>,
    pub broker_vhost: Option<String>,
    pub broker_queue: Option<String>,
    pub app_env: Option<String>,
    pub enforce_origin: Option<bool>,
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub keepalive: Duration,
    pub outbound_buffer: usize,
    pub identity: IdentityConfig,
    pub broker: BrokerConfig,
    pub origin_policy: OriginPolicy,
}

impl ServerConfig {
    /// Load config from TOML file (if present), then apply overrides and validate.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> GatewayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    /// Merge overrides into a parsed file config and validate the result.
    pub fn resolve(file: ConfigFile, overrides: Overrides) -> GatewayResult<Self> {
        let ConfigFile {
            server,
            mut identity,
            mut broker,
            origin,
        } = file;

        if let Some(url) = overrides.identity_url {
            identity.url = url;
        }
        if let Some(token) = overrides.identity_token {
            identity.token = token;
        }
        if let Some(host) = overrides.broker_host {
            broker.host = host;
        }
        if let Some(user) = overrides.broker_user {
            broker.user = user;
        }
        if let Some(password) = overrides.broker_password {
            broker.password = password;
        }
        if let Some(vhost) = overrides.broker_vhost {
            broker.vhost = vhost;
        }
        if let Some(queue) = overrides.broker_queue {
            broker.queue = queue;
        }

        let app_env = overrides.app_env.unwrap_or(origin.app_env);
        let origin_policy = OriginPolicy::resolve(&app_env, overrides.enforce_origin.or(origin.enforce));

        let config = Self {
            port: overrides.port.unwrap_or(server.port),
            keepalive: Duration::from_secs(overrides.keepalive_secs.unwrap_or(server.keepalive_secs)),
            outbound_buffer: server.outbound_buffer,
            identity,
            broker,
            origin_policy,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.identity.url.trim().is_empty() {
            return Err(GatewayError::Config("identity service url is required".into()));
        }
        if self.identity.timeout_secs == 0 {
            return Err(GatewayError::Config("identity timeout must be non-zero".into()));
        }
        if self.broker.queue.trim().is_empty() {
            return Err(GatewayError::Config("broker queue is required".into()));
        }
        if self.keepalive.is_zero() {
            return Err(GatewayError::Config("keepalive interval must be non-zero".into()));
        }
        if self.outbound_buffer == 0 {
            return Err(GatewayError::Config("outbound buffer must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse(content: &str) -> GatewayResult<ConfigFile> {
    toml::from_str(content).map_err(|e| GatewayError::Config(format!("config parse error: {e}")))
}

/// Everything outside the RFC 3986 unreserved set.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, URI_COMPONENT).to_string()
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
