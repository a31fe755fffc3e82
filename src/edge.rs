use serde::Serialize;

/// Connection metadata as handed over by the edge request handler.
/// Every field may be absent.
#[derive(Debug, Clone, Default)]
pub struct EdgeMetadata {
    pub connecting_ip: Option<String>,
    pub forwarded_for: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub as_organization: Option<String>,
    pub asn: Option<u32>,
    pub colo: Option<String>,
    pub http_protocol: Option<String>,
    pub tls_version: Option<String>,
    pub user_agent: Option<String>,
}

impl EdgeMetadata {
    /// Reads `SENTINEL_EDGE_*` variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            connecting_ip: lookup("SENTINEL_EDGE_IP"),
            forwarded_for: lookup("SENTINEL_EDGE_FORWARDED_FOR"),
            city: lookup("SENTINEL_EDGE_CITY"),
            country: lookup("SENTINEL_EDGE_COUNTRY"),
            region: lookup("SENTINEL_EDGE_REGION"),
            as_organization: lookup("SENTINEL_EDGE_ISP"),
            asn: lookup("SENTINEL_EDGE_ASN").and_then(|v| v.trim().trim_start_matches("AS").parse().ok()),
            colo: lookup("SENTINEL_EDGE_COLO"),
            http_protocol: lookup("SENTINEL_EDGE_HTTP"),
            tls_version: lookup("SENTINEL_EDGE_TLS"),
            user_agent: lookup("SENTINEL_EDGE_USER_AGENT"),
        }
    }
}

/// Immutable per-visit context, already defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeContext {
    pub ip: String,
    pub city: String,
    pub country: String,
    pub region: String,
    pub isp: String,
    pub asn: String,
    pub colo: String,
    pub http_protocol: String,
    pub tls_version: String,
    pub user_agent: String,
}

const UNKNOWN: &str = "Unknown";
const NOT_AVAILABLE: &str = "N/A";
const LOOPBACK: &str = "127.0.0.1";

impl EdgeContext {
    pub fn from_edge_metadata(meta: EdgeMetadata) -> Self {
        let ip = non_empty(meta.connecting_ip)
            .or_else(|| {
                meta.forwarded_for
                    .as_deref()
                    .and_then(|v| v.split(',').next())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| LOOPBACK.to_string());

        Self {
            ip,
            city: non_empty(meta.city).unwrap_or_else(|| UNKNOWN.to_string()),
            country: non_empty(meta.country).unwrap_or_else(|| UNKNOWN.to_string()),
            region: non_empty(meta.region).unwrap_or_else(|| UNKNOWN.to_string()),
            isp: non_empty(meta.as_organization).unwrap_or_else(|| "Cloudflare".to_string()),
            asn: meta
                .asn
                .map(|n| format!("AS{}", n))
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            colo: non_empty(meta.colo).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            http_protocol: non_empty(meta.http_protocol).unwrap_or_else(|| "HTTP".to_string()),
            tls_version: non_empty(meta.tls_version).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            user_agent: non_empty(meta.user_agent).unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

impl Default for EdgeContext {
    fn default() -> Self {
        Self::from_edge_metadata(EdgeMetadata::default())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_metadata_gets_edge_defaults() {
        let ctx = EdgeContext::default();
        assert_eq!(ctx.ip, "127.0.0.1");
        assert_eq!(ctx.city, "Unknown");
        assert_eq!(ctx.isp, "Cloudflare");
        assert_eq!(ctx.asn, "N/A");
        assert_eq!(ctx.colo, "N/A");
        assert_eq!(ctx.http_protocol, "HTTP");
    }

    #[test]
    fn connecting_ip_wins_over_forwarded_for() {
        let ctx = EdgeContext::from_edge_metadata(EdgeMetadata {
            connecting_ip: Some("203.0.113.9".to_string()),
            forwarded_for: Some("198.51.100.1, 10.0.0.1".to_string()),
            asn: Some(13335),
            ..EdgeMetadata::default()
        });
        assert_eq!(ctx.ip, "203.0.113.9");
        assert_eq!(ctx.asn, "AS13335");

        let ctx = EdgeContext::from_edge_metadata(EdgeMetadata {
            connecting_ip: Some("  ".to_string()),
            forwarded_for: Some("198.51.100.1, 10.0.0.1".to_string()),
            ..EdgeMetadata::default()
        });
        assert_eq!(ctx.ip, "198.51.100.1");
    }

    #[test]
    fn env_lookup_parses_asn_with_prefix() {
        let meta = EdgeMetadata::from_lookup(|name| match name {
            "SENTINEL_EDGE_ASN" => Some("AS4134".to_string()),
            "SENTINEL_EDGE_COLO" => Some("HKG".to_string()),
            _ => None,
        });
        let ctx = EdgeContext::from_edge_metadata(meta);
        assert_eq!(ctx.asn, "AS4134");
        assert_eq!(ctx.colo, "HKG");
    }
}
