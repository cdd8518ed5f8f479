//! Read-only providers with ordered RPC fallback

use std::future::Future;

use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use eyre::{eyre, Result, WrapErr};
use tracing::warn;

pub type HttpProvider = RootProvider<Http<Client>>;

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Create alloy HTTP providers for each RPC URL.
pub fn create_providers(urls: &[String]) -> Result<Vec<HttpProvider>> {
    if urls.is_empty() {
        return Err(eyre!("At least one RPC URL is required"));
    }
    urls.iter()
        .map(|url| {
            let parsed = url
                .parse()
                .wrap_err_with(|| format!("Invalid RPC URL: {}", url))?;
            Ok(ProviderBuilder::new().on_http(parsed))
        })
        .collect()
}

/// Providers for one chain, tried in configuration order
#[derive(Clone)]
pub struct FallbackProviders {
    chain: &'static str,
    urls: Vec<String>,
    providers: Vec<HttpProvider>,
}

impl FallbackProviders {
    pub fn new(chain: &'static str, urls: &[String]) -> Result<Self> {
        Ok(Self {
            chain,
            urls: urls.to_vec(),
            providers: create_providers(urls)?,
        })
    }

    /// Run `op` against each provider in turn until one succeeds.
    ///
    /// Returns the last error when every provider failed.
    pub async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(HttpProvider) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for (provider, url) in self.providers.iter().zip(&self.urls) {
            match op(provider.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        chain = self.chain,
                        url = %url,
                        error = %e,
                        "RPC call {} failed, trying next endpoint",
                        what
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| eyre!("no RPC endpoint configured"))
            .wrap_err(format!("{} failed on every {} RPC endpoint", what, self.chain)))
    }
}

impl std::fmt::Debug for FallbackProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackProviders")
            .field("chain", &self.chain)
            .field("urls", &self.urls)
            .finish()
    }
}
