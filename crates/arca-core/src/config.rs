use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::net;

pub(crate) const STORE_PATH_ENV: &str = "ARCA_STORE_PATH";
pub(crate) const ONLINE_ENV: &str = "ARCA_ONLINE";
pub(crate) const HTTP_TIMEOUT_ENV: &str = "ARCA_HTTP_TIMEOUT";
pub(crate) const KEEP_PROXIES_ENV: &str = "ARCA_KEEP_PROXIES";

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) store: StoreConfig,
    pub(crate) network: NetworkConfig,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if the store root cannot be resolved or a variable
    /// holds an unparsable value.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let root = match snapshot.var(STORE_PATH_ENV) {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => default_store_root()?,
        };
        let timeout = match snapshot.var(HTTP_TIMEOUT_ENV) {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid {HTTP_TIMEOUT_ENV} value '{raw}'"))?;
                if secs == 0 {
                    return Err(anyhow!("{HTTP_TIMEOUT_ENV} must be greater than zero"));
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_HTTP_TIMEOUT,
        };
        Ok(Self {
            store: StoreConfig { root },
            network: NetworkConfig {
                online: match snapshot.var(ONLINE_ENV) {
                    Some(value) => {
                        let lowered = value.trim().to_ascii_lowercase();
                        !matches!(lowered.as_str(), "0" | "false" | "no" | "off")
                    }
                    None => true,
                },
                timeout,
                keep_proxies: net::keep_proxies(snapshot),
            },
        })
    }

    /// Point the store somewhere else, keeping the network settings.
    #[must_use]
    pub fn with_store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store.root = root.into();
        self
    }

    #[must_use]
    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub online: bool,
    pub timeout: Duration,
    pub keep_proxies: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            online: true,
            timeout: DEFAULT_HTTP_TIMEOUT,
            keep_proxies: false,
        }
    }
}

fn default_store_root() -> Result<PathBuf> {
    let home = dirs_next::home_dir().context("failed to resolve HOME for the artifact store")?;
    Ok(home.join(".arca").join("artifacts"))
}
