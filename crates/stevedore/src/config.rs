use std::net::SocketAddr;

use serde::Deserialize;

use stevedore_driver::DriverConfig;

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    pub storage: DriverConfig,
    #[serde(default)]
    pub uploads: UploadPolicy,
    /// Proxy-cache deployments pull referenced content on demand and may
    /// push manifests before their blobs exist locally.
    #[serde(default)]
    pub skip_dependency_verification: bool,
}

#[derive(Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
    /// Secret for upload session state tokens. Must be shared by every
    /// instance behind one load balancer; omitting it generates an
    /// ephemeral secret at startup.
    pub secret: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            secret: None,
        }
    }
}

fn default_addr() -> SocketAddr {
    "0.0.0.0:13030".parse().expect("default address parses")
}

#[derive(Clone, Deserialize)]
pub struct UploadPolicy {
    /// How often the stale-session sweep runs, in seconds.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
    /// Sessions older than this are swept, in seconds.
    #[serde(default = "default_purge_age")]
    pub purge_age_secs: i64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            purge_interval_secs: default_purge_interval(),
            purge_age_secs: default_purge_age(),
        }
    }
}

fn default_purge_interval() -> u64 {
    15 * 60
}

fn default_purge_age() -> i64 {
    24 * 60 * 60
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let config: Config = serde_yaml::from_str(
            "storage:\n  type: filesystem\n  rootdirectory: /var/lib/stevedore\n",
        )
        .unwrap();
        assert_eq!(config.http.addr, default_addr());
        assert_eq!(config.uploads.purge_age_secs, 24 * 60 * 60);
        assert!(!config.skip_dependency_verification);
    }

    #[test]
    fn full_config_parses() {
        let config: Config = serde_yaml::from_str(
            r#"
http:
  addr: 127.0.0.1:5000
  secret: registry-secret
storage:
  type: inmemory
uploads:
  purge_interval_secs: 60
  purge_age_secs: 3600
skip_dependency_verification: true
"#,
        )
        .unwrap();
        assert_eq!(config.http.addr.port(), 5000);
        assert_eq!(config.http.secret.as_deref(), Some("registry-secret"));
        assert_eq!(config.uploads.purge_interval_secs, 60);
        assert!(config.skip_dependency_verification);
    }
}
