use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::DualStackConfig;
use crate::error::FetchError;
use crate::fetcher::HttpFetcher;
use crate::fields::{first_text, format_asn};
use crate::observability::{self, ErrorClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StackFamily {
    V4,
    V6,
}

impl StackFamily {
    pub fn label(self) -> &'static str {
        match self {
            StackFamily::V4 => "IPv4",
            StackFamily::V6 => "IPv6",
        }
    }

    pub fn matches(self, addr: &IpAddr) -> bool {
        matches!(
            (self, addr),
            (StackFamily::V4, IpAddr::V4(_)) | (StackFamily::V6, IpAddr::V6(_))
        )
    }
}

/// Outcome of the single resolver fetch for one address family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReachabilityResult {
    pub family: StackFamily,
    pub address: Option<String>,
    pub available: bool,
    pub isp: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub asn: Option<String>,
}

impl ReachabilityResult {
    pub fn unavailable(family: StackFamily) -> Self {
        Self {
            family,
            address: None,
            available: false,
            isp: None,
            country: None,
            city: None,
            asn: None,
        }
    }

    /// Reads a geo-resolver document. The address must parse and belong to `family`.
    pub fn from_resolver_json(family: StackFamily, body: &Value) -> Option<Self> {
        let raw = first_text(body, &["ip", "address", "query"])?;
        let addr: IpAddr = raw.parse().ok()?;
        if !family.matches(&addr) {
            return None;
        }
        Some(Self {
            family,
            address: Some(addr.to_string()),
            available: true,
            isp: first_text(body, &["isp", "organization", "asn_organization", "org"]),
            country: first_text(body, &["country", "country_name", "country_code"]),
            city: first_text(body, &["city"]),
            asn: body.get("asn").and_then(format_asn),
        })
    }
}

/// Set exactly once per family; never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StackStatus {
    Pending,
    Resolved(ReachabilityResult),
}

impl StackStatus {
    /// Applies the first result only.
    pub fn settle(&mut self, result: ReachabilityResult) -> bool {
        match self {
            StackStatus::Pending => {
                *self = StackStatus::Resolved(result);
                true
            }
            StackStatus::Resolved(_) => false,
        }
    }

    pub fn result(&self) -> Option<&ReachabilityResult> {
        match self {
            StackStatus::Pending => None,
            StackStatus::Resolved(result) => Some(result),
        }
    }
}

pub struct DualStackDetector {
    fetcher: Arc<dyn HttpFetcher>,
    config: DualStackConfig,
}

impl DualStackDetector {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: DualStackConfig) -> Self {
        Self { fetcher, config }
    }

    fn endpoint(&self, family: StackFamily) -> &str {
        match family {
            StackFamily::V4 => &self.config.ipv4_url,
            StackFamily::V6 => &self.config.ipv6_url,
        }
    }

    /// One fetch, no retry. Any failure means the family is unsupported here.
    pub async fn probe_family(&self, family: StackFamily) -> ReachabilityResult {
        let url = self.endpoint(family);
        match self.resolve(family, url).await {
            Ok(result) => {
                info!(family = family.label(), address = ?result.address, "stack reachable");
                result
            }
            Err(err) => {
                debug!(family = family.label(), error = %err, "stack unreachable");
                observability::record_error(ErrorClass::UNSUPPORTED_STACK);
                ReachabilityResult::unavailable(family)
            }
        }
    }

    async fn resolve(&self, family: StackFamily, url: &str) -> Result<ReachabilityResult, FetchError> {
        let body = self.fetcher.get_json(url).await?;
        ReachabilityResult::from_resolver_json(family, &body).ok_or(FetchError::MissingField {
            url: url.to_string(),
            field: "ip",
        })
    }

    /// Both families concurrently; neither waits on the other's failure.
    pub async fn probe_both(&self) -> (ReachabilityResult, ReachabilityResult) {
        tokio::join!(
            self.probe_family(StackFamily::V4),
            self.probe_family(StackFamily::V6)
        )
    }
}
