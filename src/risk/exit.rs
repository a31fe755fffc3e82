use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{RiskOutcome, RiskPayload, RiskReport};
use crate::config::{ExitConfig, ExitResolver, RiskConfig};
use crate::edge::EdgeContext;
use crate::error::FetchError;
use crate::fetcher::HttpFetcher;
use crate::fields::text_at_pointer;
use crate::observability::{self, ErrorClass};

/// Vantage point an exit address is observed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExitKind {
    Domestic,
    Foreign,
    Edge,
}

impl ExitKind {
    pub const ALL: [ExitKind; 3] = [ExitKind::Domestic, ExitKind::Foreign, ExitKind::Edge];

    pub fn title(self) -> &'static str {
        match self {
            ExitKind::Domestic => "Domestic exit",
            ExitKind::Foreign => "Foreign exit",
            ExitKind::Edge => "Edge view",
        }
    }

    /// Position in the staggered start sequence.
    pub fn stagger_slot(self) -> u32 {
        match self {
            ExitKind::Domestic => 0,
            ExitKind::Foreign => 1,
            ExitKind::Edge => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExitAddress {
    Loading,
    Resolved(String),
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitCard {
    pub kind: ExitKind,
    pub address: ExitAddress,
    pub risk: RiskOutcome,
}

impl ExitCard {
    pub fn loading(kind: ExitKind) -> Self {
        Self {
            kind,
            address: ExitAddress::Loading,
            risk: RiskOutcome::Idle,
        }
    }
}

/// Finds the address each exit card reports.
pub struct ExitLocator {
    fetcher: Arc<dyn HttpFetcher>,
    config: ExitConfig,
}

impl ExitLocator {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: ExitConfig) -> Self {
        Self { fetcher, config }
    }

    pub async fn locate(&self, kind: ExitKind, edge: &EdgeContext) -> Result<String, FetchError> {
        match kind {
            ExitKind::Domestic => self.first_answer(&self.config.domestic).await,
            ExitKind::Foreign => self.first_answer(&self.config.foreign).await,
            ExitKind::Edge => Ok(edge.ip.clone()),
        }
    }

    /// Tries each resolver in order; the first address wins.
    async fn first_answer(&self, chain: &[ExitResolver]) -> Result<String, FetchError> {
        let mut last_err = FetchError::NoResolver;
        for resolver in chain {
            match self.ask(resolver).await {
                Ok(ip) => return Ok(ip),
                Err(err) => {
                    debug!(error = %err, "exit resolver failed, trying next");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn ask(&self, resolver: &ExitResolver) -> Result<String, FetchError> {
        let body = self.fetcher.get_json(&resolver.url).await?;
        text_at_pointer(&body, &resolver.ip_pointer).ok_or_else(|| FetchError::MissingField {
            url: resolver.url.clone(),
            field: "ip",
        })
    }
}

/// One reputation lookup per resolved address.
pub struct RiskNormalizer {
    fetcher: Arc<dyn HttpFetcher>,
    config: RiskConfig,
}

impl RiskNormalizer {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, config: RiskConfig) -> Self {
        Self { fetcher, config }
    }

    /// Never fails: fetch or decode problems become `RiskOutcome::NoData`.
    pub async fn assess(&self, ip: &str) -> RiskOutcome {
        observability::record_risk_lookup();
        let url = self.config.lookup_url(ip);
        let body = match self.fetcher.get_json(&url).await {
            Ok(body) => body,
            Err(err) => {
                debug!(error = %err, "risk lookup failed");
                return RiskOutcome::NoData;
            }
        };
        match RiskPayload::from_value(body) {
            Ok(payload) => {
                let report = RiskReport::from_payload(&payload);
                info!(ip, composite = report.composite.value, trust = report.trust.value, "risk scored");
                RiskOutcome::Ready(Box::new(report))
            }
            Err(err) => {
                observability::record_error(ErrorClass::MALFORMED_RISK_DATA);
                warn!(error = %err, "discarding risk payload");
                RiskOutcome::NoData
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::fake::{FakeFetcher, Scripted};
    use serde_json::json;

    fn exit_config() -> ExitConfig {
        ExitConfig {
            domestic: vec![
                ExitResolver::new("https://cn-a.test/json", "/data/ip"),
                ExitResolver::new("https://cn-b.test/json", "/ip"),
            ],
            foreign: vec![ExitResolver::new("https://intl.test/json", "/ip")],
            stagger_ms: 200,
        }
    }

    #[tokio::test]
    async fn domestic_chain_falls_through_to_next_resolver() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .route("https://cn-a.test/json", vec![Scripted::Json(json!({"data": {}}))])
                .route("https://cn-b.test/json", vec![Scripted::Json(json!({"ip": "198.51.100.20"}))]),
        );
        let locator = ExitLocator::new(fetcher.clone(), exit_config());
        let ip = locator.locate(ExitKind::Domestic, &EdgeContext::default()).await.unwrap();
        assert_eq!(ip, "198.51.100.20");
        assert_eq!(fetcher.calls_to("https://cn-a.test/json"), 1);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_last_error_and_edge_needs_no_fetch() {
        let fetcher = Arc::new(FakeFetcher::new());
        let locator = ExitLocator::new(fetcher.clone(), exit_config());
        assert!(locator.locate(ExitKind::Foreign, &EdgeContext::default()).await.is_err());

        let ip = locator.locate(ExitKind::Edge, &EdgeContext::default()).await.unwrap();
        assert_eq!(ip, "127.0.0.1");
        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);

        let empty = ExitLocator::new(
            fetcher,
            ExitConfig {
                foreign: Vec::new(),
                ..exit_config()
            },
        );
        assert!(matches!(
            empty.locate(ExitKind::Foreign, &EdgeContext::default()).await,
            Err(FetchError::NoResolver)
        ));
    }

    #[tokio::test]
    async fn risk_failures_are_no_data_not_zero() {
        let config = RiskConfig {
            api_url: "https://risk.test".to_string(),
        };
        let fetcher = Arc::new(
            FakeFetcher::new()
                .route("https://risk.test?q=192.0.2.1", vec![Scripted::Status(500)])
                .route("https://risk.test?q=192.0.2.2", vec![Scripted::Json(json!([1, 2, 3]))])
                .route(
                    "https://risk.test?q=192.0.2.3",
                    vec![Scripted::Json(json!({"is_datacenter": true, "asn": {"abuser_score": "0.3 (High)"}}))],
                ),
        );
        let normalizer = RiskNormalizer::new(fetcher, config);

        assert_eq!(normalizer.assess("192.0.2.1").await, RiskOutcome::NoData);
        assert_eq!(normalizer.assess("192.0.2.2").await, RiskOutcome::NoData);

        let outcome = normalizer.assess("192.0.2.3").await;
        let report = outcome.report().unwrap();
        assert_eq!(report.asn_score, 30);
        assert_eq!(report.composite.value, 50);
        assert_eq!(report.trust.value, 85);
    }
}
