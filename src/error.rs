use std::time::Duration;

use thiserror::Error;

/// Failure of a single outbound HTTP call.
///
/// These never leave the engine: every caller degrades the field it was
/// filling to an explicit unknown/unavailable state instead.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("response from {url} was not valid JSON: {reason}")]
    Decode { url: String, reason: String },
    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("response from {url} is missing field `{field}`")]
    MissingField { url: String, field: &'static str },
    #[error("no resolver configured")]
    NoResolver,
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout {
                url: url.to_string(),
                after: timeout,
            };
        }
        if let Some(status) = err.status() {
            return FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            };
        }
        if err.is_decode() {
            return FetchError::Decode {
                url: url.to_string(),
                reason: err.to_string(),
            };
        }
        FetchError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("environment variable {name} has invalid value `{value}`")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Error)]
pub enum StunError {
    #[error("STUN server `{0}` did not resolve to an address of the requested family")]
    Unresolvable(String),
    #[error("STUN socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed STUN message: {0}")]
    Malformed(&'static str),
    #[error("STUN response transaction id does not match the request")]
    TransactionMismatch,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("jitter bound {0:?} is too large")]
    JitterTooLarge(Duration),
    #[error("probe interval must be non-zero")]
    ZeroInterval,
}

/// A risk lookup answered with something other than a JSON object.
#[derive(Debug, Error)]
#[error("risk payload is a JSON {found}, expected an object")]
pub struct MalformedRiskData {
    pub found: &'static str,
}
