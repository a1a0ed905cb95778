//! Server configuration

use std::path::PathBuf;

use crate::constants::DEFAULT_POOL_CONNECTIONS;
use crate::error::{ ChatError, Result };

/// Options for a chat server instance.
///
/// The authentication password travels in here rather than in any global;
/// every component that needs a setting receives it through this object.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Broker URL, e.g. `nats://127.0.0.1:4222`
    pub broker_url: String,
    /// Directory containing `blacklist.json`
    pub filter_dir: PathBuf,
    /// TCP listen address, `host:port`
    pub listen: String,
    /// Shared secret checked by the `auth` handshake line
    pub auth_password: String,
    /// PEM certificate chain path; falls back to a self-signed development
    /// certificate when unset
    pub cert_file: Option<PathBuf>,
    /// PEM private key path
    pub key_file: Option<PathBuf>,
    /// Number of broker connections to keep pooled
    pub pool_connections: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            broker_url: "nats://127.0.0.1:4222".to_string(),
            filter_dir: PathBuf::from("./filter"),
            listen: "0.0.0.0:9999".to_string(),
            auth_password: "pw".to_string(),
            cert_file: None,
            key_file: None,
            pool_connections: DEFAULT_POOL_CONNECTIONS,
        }
    }
}

impl ServerOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the broker URL
    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = url.into();
        self
    }

    /// Set the blacklist directory
    pub fn with_filter_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.filter_dir = dir.into();
        self
    }

    /// Set the listen address
    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    /// Set the shared authentication password
    pub fn with_auth_password(mut self, password: impl Into<String>) -> Self {
        self.auth_password = password.into();
        self
    }

    /// Set the TLS certificate and key paths
    pub fn with_tls_files(
        mut self,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>
    ) -> Self {
        self.cert_file = Some(cert.into());
        self.key_file = Some(key.into());
        self
    }

    /// Set the broker pool size
    pub fn with_pool_connections(mut self, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(ChatError::config("pool must hold at least one connection"));
        }
        self.pool_connections = n;
        Ok(self)
    }

    /// Path of the blacklist file inside the filter directory
    pub fn blacklist_path(&self) -> PathBuf {
        self.filter_dir.join(crate::constants::BLACKLIST_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ServerOptions::new();
        assert_eq!(opts.listen, "0.0.0.0:9999");
        assert_eq!(opts.auth_password, "pw");
        assert_eq!(opts.pool_connections, DEFAULT_POOL_CONNECTIONS);
        assert!(opts.cert_file.is_none());
    }

    #[test]
    fn test_builder() {
        let opts = ServerOptions::new()
            .with_broker_url("nats://broker:4222")
            .with_listen("127.0.0.1:7000")
            .with_auth_password("secret")
            .with_pool_connections(4)
            .unwrap();

        assert_eq!(opts.broker_url, "nats://broker:4222");
        assert_eq!(opts.listen, "127.0.0.1:7000");
        assert_eq!(opts.auth_password, "secret");
        assert_eq!(opts.pool_connections, 4);
    }

    #[test]
    fn test_zero_pool_is_rejected() {
        assert!(ServerOptions::new().with_pool_connections(0).is_err());
    }

    #[test]
    fn test_blacklist_path() {
        let opts = ServerOptions::new().with_filter_dir("/etc/chat");
        assert_eq!(opts.blacklist_path(), PathBuf::from("/etc/chat/blacklist.json"));
    }
}
