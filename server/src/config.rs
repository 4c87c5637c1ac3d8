//! Runtime configuration read from `HCSIM_*` environment variables

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Cache generation used when `HCSIM_VERSION` is not set
pub const DEFAULT_VERSION: &str = "17b87f59";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which blob store backs the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreKind::Sqlite),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("expected \"sqlite\" or \"memory\", got {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Cache generation tag
    pub version: String,
    /// Origin that requests are fetched from; relative URLs resolve against it
    pub upstream: Url,
    /// Bundle manifest (JSON); no manifest means no bundles
    pub manifest: Option<PathBuf>,
    pub storage_dir: PathBuf,
    pub store: StoreKind,
    pub listen: SocketAddr,
    pub fetch_timeout: Duration,
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        var,
        reason: e.to_string(),
        value,
    })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let version = lookup("HCSIM_VERSION")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());

        let upstream = parse::<Url>(
            "HCSIM_UPSTREAM",
            lookup("HCSIM_UPSTREAM").unwrap_or_else(|| "http://127.0.0.1:8080/".to_string()),
        )?;

        let storage_dir = lookup("HCSIM_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./hcsim-storage"));

        let store = match lookup("HCSIM_STORE") {
            Some(value) => parse::<StoreKind>("HCSIM_STORE", value)?,
            None => StoreKind::Sqlite,
        };

        let listen = parse::<SocketAddr>(
            "HCSIM_LISTEN",
            lookup("HCSIM_LISTEN").unwrap_or_else(|| "127.0.0.1:8724".to_string()),
        )?;

        let fetch_timeout = match lookup("HCSIM_FETCH_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(parse::<u64>("HCSIM_FETCH_TIMEOUT_SECS", value)?),
            None => crate::cache::fetcher::DEFAULT_FETCH_TIMEOUT,
        };

        Ok(Self {
            version,
            upstream,
            manifest: lookup("HCSIM_MANIFEST").map(PathBuf::from),
            storage_dir,
            store,
            listen,
            fetch_timeout,
        })
    }

    /// SQLite database location inside the storage directory
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("cache.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.version, DEFAULT_VERSION);
        assert_eq!(config.upstream.as_str(), "http://127.0.0.1:8080/");
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.listen, "127.0.0.1:8724".parse().unwrap());
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert!(config.manifest.is_none());
        assert_eq!(config.database_path(), PathBuf::from("./hcsim-storage/cache.db"));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("HCSIM_VERSION", "v2"),
            ("HCSIM_UPSTREAM", "https://sim.example/app/"),
            ("HCSIM_STORE", "Memory"),
            ("HCSIM_MANIFEST", "/etc/hcsim/assets.json"),
            ("HCSIM_FETCH_TIMEOUT_SECS", "5"),
        ])
        .unwrap();

        assert_eq!(config.version, "v2");
        assert_eq!(config.upstream.as_str(), "https://sim.example/app/");
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.manifest, Some(PathBuf::from("/etc/hcsim/assets.json")));
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = config(&[("HCSIM_STORE", "redis")]).unwrap_err();
        assert!(err.to_string().contains("HCSIM_STORE"));

        let err = config(&[("HCSIM_LISTEN", "nowhere")]).unwrap_err();
        assert!(err.to_string().contains("HCSIM_LISTEN"));

        assert!(config(&[("HCSIM_UPSTREAM", "not a url")]).is_err());
    }
}
