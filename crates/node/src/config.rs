//! Node configuration loaded from a TOML file.
//!
//! Every key is optional in the file. [`NodeSettings`] is the resolved,
//! immutable view the rest of the node works with; it is built once at
//! startup, wrapped in an `Arc`, and never mutated afterwards.
//!
//! ```toml
//! node_id = "auto"                 # "auto" → random UUID
//! host = "0.0.0.0"
//! port = 9800
//! model_name = "llama-7b"
//! model_path = "./models/llama-7b.bin"
//! program_path = "./programs/llama.bin"
//! dispatcher_url = "http://127.0.0.1:8000"
//! persistence_uri = "file://./data/tasks.jsonl"
//! heartbeat_interval_secs = 10
//! native_runner = ["llama-cli", "-m", "{model}", "-p", "{prompt}"]
//! ```

use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9800;
pub const DEFAULT_PERSISTENCE_URI: &str = "memory://";
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_NATIVE_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Raw file contents. All keys optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    node_id: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    announce_addr: Option<String>,
    model_name: Option<String>,
    model_path: Option<PathBuf>,
    program_path: Option<PathBuf>,
    dispatcher_url: Option<String>,
    persistence_uri: Option<String>,
    heartbeat_interval_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
    native_runner: Option<Vec<String>>,
    native_timeout_ms: Option<u64>,
}

/// Resolved node settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    /// Identity reported in heartbeats.
    pub node_id: String,
    pub host: String,
    pub port: u16,
    /// Endpoint announced to the dispatcher.
    pub announce_addr: String,
    pub model_name: String,
    pub model_path: PathBuf,
    /// Replay program identity: path of the program image.
    pub program_path: PathBuf,
    /// Dispatcher base URL. Empty disables heartbeats.
    pub dispatcher_url: String,
    pub persistence_uri: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// Command template for native inference; `{model}` and `{prompt}` are substituted.
    pub native_runner: Option<Vec<String>>,
    pub native_timeout: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl NodeSettings {
    fn from_file(file: ConfigFile) -> Self {
        let node_id = match file.node_id {
            Some(id) if id != "auto" && !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        let host = file.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = file.port.unwrap_or(DEFAULT_PORT);
        let announce_addr = file
            .announce_addr
            .unwrap_or_else(|| format!("{}:{}", host, port));

        Self {
            node_id,
            host,
            port,
            announce_addr,
            model_name: file.model_name.unwrap_or_default(),
            model_path: file.model_path.unwrap_or_default(),
            program_path: file.program_path.unwrap_or_default(),
            dispatcher_url: file
                .dispatcher_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            persistence_uri: file
                .persistence_uri
                .unwrap_or_else(|| DEFAULT_PERSISTENCE_URI.to_string()),
            heartbeat_interval: Duration::from_secs(
                file.heartbeat_interval_secs
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            ),
            heartbeat_timeout: Duration::from_secs(
                file.heartbeat_timeout_secs
                    .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            ),
            native_runner: file.native_runner.filter(|cmd| !cmd.is_empty()),
            native_timeout: Duration::from_millis(
                file.native_timeout_ms.unwrap_or(DEFAULT_NATIVE_TIMEOUT_MS),
            ),
        }
    }

    /// Parses settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(Self::from_file(file))
    }

    /// Socket address the RPC service binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ConfigError::Invalid(format!("bind address {}:{}: {}", self.host, self.port, e)))?
            .next()
            .ok_or_else(|| ConfigError::Invalid(format!("bind address {}:{} resolves to nothing", self.host, self.port)))
    }

    /// Whether a dispatcher is configured.
    pub fn heartbeat_enabled(&self) -> bool {
        !self.dispatcher_url.is_empty()
    }

    /// Checks the fields the checkpoint mode needs.
    pub fn validate_for_checkpoint(&self) -> Result<(), ConfigError> {
        if self.model_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("model_path is required".into()));
        }
        if self.program_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("program_path is required".into()));
        }
        Ok(())
    }

    /// Checks everything the serving node needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node_id cannot be empty".into()));
        }
        if self.model_name.is_empty() {
            return Err(ConfigError::Invalid("model_name is required".into()));
        }
        self.validate_for_checkpoint()?;
        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_interval_secs must be greater than 0".into(),
            ));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.heartbeat_enabled()
            && !(self.dispatcher_url.starts_with("http://")
                || self.dispatcher_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "dispatcher_url must be an http(s) URL, got {}",
                self.dispatcher_url
            )));
        }
        self.bind_addr()?;
        Ok(())
    }
}

/// Loads settings from a TOML file.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<NodeSettings, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    NodeSettings::from_toml_str(&content)
}

/// Loads `path` if given; otherwise loads [`DEFAULT_CONFIG_PATH`] when it
/// exists, and falls back to defaults when it does not.
pub fn load_or_default(path: Option<&Path>) -> Result<NodeSettings, ConfigError> {
    match path {
        Some(p) => load_from_file(p),
        None if Path::new(DEFAULT_CONFIG_PATH).is_file() => load_from_file(DEFAULT_CONFIG_PATH),
        None => Ok(NodeSettings::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> NodeSettings {
        NodeSettings::from_toml_str(
            r#"
            node_id = "node-1"
            model_name = "llama"
            model_path = "./model.bin"
            program_path = "./program.bin"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let s = NodeSettings::default();
        assert_eq!(s.host, DEFAULT_HOST);
        assert_eq!(s.port, DEFAULT_PORT);
        assert_eq!(s.persistence_uri, DEFAULT_PERSISTENCE_URI);
        assert_eq!(s.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(s.announce_addr, "0.0.0.0:9800");
        assert!(!s.heartbeat_enabled());
        assert!(s.native_runner.is_none());
    }

    #[test]
    fn test_auto_node_id() {
        let s = NodeSettings::from_toml_str(r#"node_id = "auto""#).unwrap();
        assert_ne!(s.node_id, "auto");
        assert!(Uuid::parse_str(&s.node_id).is_ok());
    }

    #[test]
    fn test_full_file() {
        let s = NodeSettings::from_toml_str(
            r#"
            node_id = "node-7"
            host = "127.0.0.1"
            port = 7001
            model_name = "llama"
            model_path = "/models/llama.bin"
            program_path = "/programs/llama.bin"
            dispatcher_url = "http://dispatcher:8000/"
            persistence_uri = "file:///tmp/tasks.jsonl"
            heartbeat_interval_secs = 3
            native_runner = ["runner", "{model}", "{prompt}"]
            native_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(s.node_id, "node-7");
        assert_eq!(s.announce_addr, "127.0.0.1:7001");
        assert_eq!(s.dispatcher_url, "http://dispatcher:8000");
        assert_eq!(s.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(s.native_timeout, Duration::from_millis(1500));
        assert_eq!(s.native_runner.as_ref().map(Vec::len), Some(3));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_validation_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validation_missing_model_name() {
        let mut s = valid();
        s.model_name.clear();
        assert!(s.validate().is_err());
        assert!(s.validate_for_checkpoint().is_ok());
    }

    #[test]
    fn test_validation_missing_program() {
        let mut s = valid();
        s.program_path = PathBuf::new();
        assert!(s.validate_for_checkpoint().is_err());
    }

    #[test]
    fn test_validation_zero_port() {
        let mut s = valid();
        s.port = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validation_zero_interval() {
        let mut s = valid();
        s.heartbeat_interval = Duration::ZERO;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validation_zero_heartbeat_timeout() {
        let parsed = NodeSettings::from_toml_str("heartbeat_timeout_secs = 0").unwrap();
        assert_eq!(parsed.heartbeat_timeout, Duration::ZERO);

        let mut s = valid();
        s.heartbeat_timeout = parsed.heartbeat_timeout;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_timeout_secs"));
    }

    #[test]
    fn test_validation_bad_dispatcher_scheme() {
        let mut s = valid();
        s.dispatcher_url = "dispatcher:8000".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = NodeSettings::from_toml_str("port = \"not a number\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "node_id = \"node-xyz\"\nport = 7010\n").expect("write");

        let s = load_from_file(tmp.path()).expect("load");
        assert_eq!(s.node_id, "node-xyz");
        assert_eq!(s.port, 7010);
    }

    #[test]
    fn test_load_or_default_explicit_missing() {
        let err = load_or_default(Some(Path::new("/nonexistent/opml.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_from_file("/nonexistent/opml/config.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
