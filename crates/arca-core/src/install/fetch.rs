use std::fs;
use std::io::Read;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use tracing::debug;
use url::Url;

use super::cancel::CancelToken;
use crate::config::NetworkConfig;

const USER_AGENT: &str = concat!("arca/", env!("CARGO_PKG_VERSION"));
pub(crate) const DOWNLOAD_ATTEMPTS: u64 = 3;
const CHUNK: usize = 64 * 1024;

/// Byte-returning transport used by the installer.
///
/// Implementations must poll `cancel` while blocking so a cancelled install
/// stops promptly.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>>;
}

/// Fetches `http(s)://` over a blocking reqwest client and `file://` from disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    online: bool,
}

impl HttpFetcher {
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        let builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(network.timeout);
        let builder = if network.keep_proxies {
            builder
        } else {
            builder.no_proxy()
        };
        let client = builder.build().context("failed to build HTTP client")?;
        Ok(Self {
            client,
            online: network.online,
        })
    }

    fn fetch_http(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>> {
        if !self.online {
            bail!("ARCA_ONLINE=1 required to download {url}");
        }
        let mut last_err = None;
        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            cancel.check()?;
            match self.fetch_once(url, cancel) {
                Ok(bytes) => return Ok(bytes),
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Retry(err)) => {
                    debug!(url, attempt, error = %format!("{err:#}"), "download attempt failed");
                    last_err = Some(err);
                    if attempt < DOWNLOAD_ATTEMPTS {
                        thread::sleep(Duration::from_millis(150 * attempt));
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("failed to download {url}; no attempts left")))
    }

    fn fetch_once(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, Attempt> {
        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("failed to fetch {url}"))
            .map_err(Attempt::Retry)?;
        let status = response.status();
        if status.is_client_error() {
            return Err(Attempt::Fatal(anyhow!("{url} returned HTTP {status}")));
        }
        if !status.is_success() {
            return Err(Attempt::Retry(anyhow!("{url} returned HTTP {status}")));
        }
        let mut bytes = Vec::new();
        let mut buffer = vec![0_u8; CHUNK];
        loop {
            cancel.check().map_err(|err| Attempt::Fatal(err.into()))?;
            let read = response
                .read(&mut buffer)
                .with_context(|| format!("stream error for {url}"))
                .map_err(Attempt::Retry)?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&buffer[..read]);
        }
        debug!(url, bytes = bytes.len(), "downloaded");
        Ok(bytes)
    }
}

enum Attempt {
    Retry(anyhow::Error),
    Fatal(anyhow::Error),
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>> {
        let parsed = Url::parse(url).with_context(|| format!("invalid download url {url}"))?;
        match parsed.scheme() {
            "file" => {
                cancel.check()?;
                let path = parsed
                    .to_file_path()
                    .map_err(|()| anyhow!("{url} does not name a local file"))?;
                fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
            }
            "http" | "https" => self.fetch_http(url, cancel),
            other => bail!("unsupported download scheme '{other}' in {url}"),
        }
    }
}
