use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use serde_json::Value;

use crate::config::HttpConfig;
use crate::error::FetchError;

/// Outbound HTTP seam. Every network call the engine makes goes through here.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Lightweight reachability request. Any HTTP response counts as reachable;
    /// only transport errors and timeouts are failures.
    async fn probe(&self, url: &str, timeout: Duration) -> Result<(), FetchError>;

    /// GET returning a JSON document. Non-2xx statuses are errors.
    async fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            timeout: config.request_timeout(),
        })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<(), FetchError> {
        let busted = cache_busting_url(url, unix_millis());
        let response = self
            .client
            .get(&busted)
            .header(CACHE_CONTROL, "no-store")
            .header(PRAGMA, "no-cache")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e, timeout))?;

        // Drain the body so the sample covers the full transfer, as an image load would.
        response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e, timeout))?;
        Ok(())
    }

    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-store")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Appends `t=<stamp>` so intermediaries cannot answer from cache.
pub fn cache_busting_url(url: &str, stamp: u64) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}t={}", url, separator, stamp)
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_buster_respects_existing_query() {
        assert_eq!(
            cache_busting_url("https://www.google.com/favicon.ico", 42),
            "https://www.google.com/favicon.ico?t=42"
        );
        assert_eq!(
            cache_busting_url("https://api.ipify.org?format=json", 7),
            "https://api.ipify.org?format=json&t=7"
        );
    }
}
