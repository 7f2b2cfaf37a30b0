// src/config.rs

//! Proxy configuration: TOML, parsed with `serde` + `toml`, following
//! `spineldb::config::Config::from_file`'s load-raw-then-validate pattern
//! (`spec.md` §6's line-oriented `proxy myid` / `proxy router` /
//! `proxy auth-pass` file, re-expressed as TOML per `SPEC_FULL.md` §6).

use std::net::SocketAddr;

use anyhow::{Context, Result, anyhow};
use rand::RngCore;
use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    36379
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_redirect_max_limit() -> usize {
    3
}
fn default_update_slots_min_limit_ms() -> u64 {
    1000
}
fn default_reconnect_period_ms() -> u64 {
    1000
}
fn default_poolsize() -> usize {
    1
}
fn default_metrics_port() -> u16 {
    36380
}

/// A single configured backend router (`spec.md`'s `proxy router` line).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_poolsize")]
    pub poolsize: usize,
}

impl RouterConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid router address '{}:{}'", self.host, self.port))
    }
}

/// A single configured backend authentication secret (`spec.md`'s
/// `proxy auth-pass` line).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl AuthConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid auth address '{}:{}'", self.host, self.port))
    }
}

/// Raw representation of the `[cluster]` table before a `myid` is generated
/// for a fresh config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub myid: String,
    #[serde(default = "default_redirect_max_limit")]
    pub redirect_max_limit: usize,
    #[serde(default = "default_update_slots_min_limit_ms")]
    pub update_slots_min_limit_ms: u64,
    #[serde(default = "default_reconnect_period_ms")]
    pub reconnect_period_ms: u64,
    #[serde(default, rename = "routers")]
    pub routers: Vec<RouterConfig>,
    #[serde(default, rename = "auth")]
    pub auth: Vec<AuthConfig>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            myid: String::new(),
            redirect_max_limit: default_redirect_max_limit(),
            update_slots_min_limit_ms: default_update_slots_min_limit_ms(),
            reconnect_period_ms: default_reconnect_period_ms(),
            routers: Vec::new(),
            auth: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// The final, validated proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// The path this config was loaded from, kept so `PROXY FLUSHCONFIG`
    /// and the `myid`-generation rewrite know where to save. Not
    /// (de)serialized: it is a property of how the file was loaded, not of
    /// its contents.
    #[serde(skip)]
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            cluster: ClusterConfig::default(),
            metrics: MetricsConfig::default(),
            path: String::new(),
        }
    }
}

/// Generates a fresh 40-hex-character node id, the same width Redis
/// Cluster uses for node ids (`spec.md` §6: "`myid` is generated once and
/// persisted").
fn generate_myid() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Config {
    /// Reads and parses `path`, generating and persisting a `myid` on first
    /// run if the file doesn't already carry one.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;
        config.path = path.to_string();

        let mut needs_rewrite = false;
        if config.cluster.myid.is_empty() {
            config.cluster.myid = generate_myid();
            needs_rewrite = true;
        }

        config.validate()?;

        if needs_rewrite {
            config.save()?;
        }

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.cluster.myid.len() != 40 || !self.cluster.myid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!("cluster.myid must be a 40-character hex string"));
        }
        for router in &self.cluster.routers {
            router.addr()?;
            if router.poolsize == 0 {
                return Err(anyhow!(
                    "router '{}:{}' has poolsize 0",
                    router.host,
                    router.port
                ));
            }
        }
        for auth in &self.cluster.auth {
            auth.addr()?;
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0 when metrics are enabled"));
        }
        Ok(())
    }

    /// Rewrites the configuration to `self.path` atomically: write to a
    /// temp file in the same directory, then `rename` over the original.
    /// Grounded in `ClusterState::save_config`'s `nodes.conf` persistence in
    /// `spineldb`, per `SPEC_FULL.md` §6.
    pub fn save(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(anyhow!("cannot save a config with no known file path"));
        }
        let content = toml::to_string_pretty(self)
            .with_context(|| "failed to serialize configuration to TOML")?;
        let temp_path = format!("{}.tmp-{}", self.path, rand::random::<u32>());
        std::fs::write(&temp_path, &content)
            .with_context(|| format!("failed to write temp config file '{temp_path}'"))?;
        std::fs::rename(&temp_path, &self.path).with_context(|| {
            let _ = std::fs::remove_file(&temp_path);
            format!("failed to rename temp config file into place at '{}'", self.path)
        })?;
        Ok(())
    }
}

/// Resolves `RouterConfig`/`AuthConfig` entries into the
/// `(SocketAddr, password)` pairs the `InstanceRegistry` is seeded with.
pub fn resolve_auth(cluster: &ClusterConfig) -> Result<Vec<(SocketAddr, String)>> {
    cluster
        .auth
        .iter()
        .map(|a| Ok((a.addr()?, a.password.clone())))
        .collect()
}

pub fn resolve_routers(cluster: &ClusterConfig) -> Result<Vec<(SocketAddr, usize)>> {
    cluster
        .routers
        .iter()
        .map(|r| Ok((r.addr()?, r.poolsize)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn generates_and_persists_myid_on_first_load() {
        let file = write_temp(
            r#"
            host = "0.0.0.0"
            port = 36379

            [[cluster.routers]]
            host = "127.0.0.1"
            port = 7000
            "#,
        );
        let path = file.path().to_str().unwrap();
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.cluster.myid.len(), 40);

        let reloaded = Config::from_file(path).unwrap();
        assert_eq!(reloaded.cluster.myid, config.cluster.myid);
    }

    #[test]
    fn rejects_zero_port() {
        let file = write_temp("port = 0\n");
        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn rejects_zero_poolsize_router() {
        let file = write_temp(
            r#"
            [[cluster.routers]]
            host = "127.0.0.1"
            port = 7000
            poolsize = 0
            "#,
        );
        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn save_round_trips_through_rename() {
        let file = write_temp("port = 36379\n");
        let path = file.path().to_str().unwrap();
        let mut config = Config::from_file(path).unwrap();
        config.cluster.routers.push(RouterConfig {
            host: "127.0.0.1".to_string(),
            port: 7001,
            poolsize: 2,
        });
        config.save().unwrap();

        let reloaded = Config::from_file(path).unwrap();
        assert_eq!(reloaded.cluster.routers.len(), 1);
        assert_eq!(reloaded.cluster.routers[0].port, 7001);
    }
}
