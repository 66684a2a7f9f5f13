use eyre::{Context, Report, bail};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use tracing::{debug, warn};

pub const DATASTORE_URL_KEY: &str = "SUPABASE_URL";
/// Checked in order, the first non-empty value wins.
pub const SERVICE_KEY_KEYS: [&str; 2] = ["SERVICE_ROLE_KEY", "SUPABASE_SERVICE_ROLE_KEY"];
pub const SENTRY_DSN_KEY: &str = "SENTRY_DSN";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub datastore: DatastoreConfig,
    pub sentry: SentryConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::UNSPECIFIED,
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn to_socket_addrs(&self) -> SocketAddr {
        SocketAddr::new(self.host.into(), self.port)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Rest,
    Sqlite,
}

#[derive(Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DatastoreConfig {
    pub backend: Backend,
    pub url: String,
    pub service_key: String,
    pub table: String,
    pub sqlite_path: String,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            url: String::new(),
            service_key: String::new(),
            table: "donations".to_string(),
            sqlite_path: "donations.db".to_string(),
        }
    }
}

impl fmt::Debug for DatastoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatastoreConfig")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("service_key", &"<redacted>")
            .field("table", &self.table)
            .field("sqlite_path", &self.sqlite_path)
            .finish()
    }
}

impl DatastoreConfig {
    /// Overrides the url and service credential from `lookup`, leaving the
    /// file values in place for keys that are unset or empty.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = non_empty(lookup(DATASTORE_URL_KEY)) {
            self.url = url;
        }
        if let Some((key, credential)) = SERVICE_KEY_KEYS
            .iter()
            .find_map(|key| non_empty(lookup(key)).map(|value| (*key, value)))
        {
            debug!("service credential resolved from {key}");
            self.service_key = credential;
        }
    }

    pub fn validate(&self) -> Result<(), Report> {
        if self.backend == Backend::Rest {
            if self.url.trim().is_empty() {
                bail!("datastore url is not configured (set {DATASTORE_URL_KEY} or datastore.url)");
            }
            if self.service_key.is_empty() {
                warn!(
                    "no service credential configured ({}), datastore requests will be unauthenticated",
                    SERVICE_KEY_KEYS.join(" or ")
                );
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SentryConfig {
    pub dsn: Option<String>,
    pub traces_sample_rate: f32,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            traces_sample_rate: 1.0,
        }
    }
}

impl Config {
    /// A missing file yields the defaults so the service can run from the
    /// environment alone.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Report> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let config = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&config)
    }

    pub fn parse(contents: &str) -> Result<Self, Report> {
        toml::from_str(contents).wrap_err("Failed to parse config")
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.datastore.apply_env(&lookup);
        if let Some(dsn) = non_empty(lookup(SENTRY_DSN_KEY)) {
            self.sentry.dsn = Some(dsn);
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
