use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_HISTORY_CAPACITY: usize = 12;

/// A named remote endpoint whose round-trip time is sampled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub probe_url: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

impl Target {
    pub fn new(name: impl Into<String>, probe_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probe_url: probe_url.into(),
            icon_url: None,
        }
    }

    pub fn with_icon(mut self, icon_url: impl Into<String>) -> Self {
        self.icon_url = Some(icon_url.into());
        self
    }
}

/// Read-only configuration shared by every component for one engine lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub targets: Vec<Target>,
    pub sampler: SamplerConfig,
    pub dual_stack: DualStackConfig,
    pub leak_probe: LeakProbeConfig,
    pub risk: RiskConfig,
    pub exit: ExitConfig,
    pub http: HttpConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self::platinum_defaults()
    }
}

/// Latency sampler cadence
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub max_jitter_ms: u64,
    pub interval_ms: u64,
    pub history_capacity: usize,
    /// Per-probe request timeout. A probe that exceeds it is recorded as a failure.
    pub probe_timeout_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_jitter_ms: 1_500,
            interval_ms: 3_000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            probe_timeout_ms: 2_500,
        }
    }
}

impl SamplerConfig {
    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Single-family address resolvers used for dual-stack detection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DualStackConfig {
    pub ipv4_url: String,
    pub ipv6_url: String,
}

impl Default for DualStackConfig {
    fn default() -> Self {
        Self {
            ipv4_url: "https://api-ipv4.ip.sb/geoip".to_string(),
            ipv6_url: "https://api-ipv6.ip.sb/geoip".to_string(),
        }
    }
}

/// How candidate addresses are classified as private
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivateRangePolicy {
    /// String prefix match on "10.", "172.", "192.168.".
    Prefix,
    /// RFC 1918 containment on the parsed address.
    Cidr,
}

impl Default for PrivateRangePolicy {
    #[cfg(feature = "prefix_private_ranges")]
    fn default() -> Self {
        PrivateRangePolicy::Prefix
    }

    #[cfg(not(feature = "prefix_private_ranges"))]
    fn default() -> Self {
        PrivateRangePolicy::Cidr
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeakProbeConfig {
    /// `host:port` of the public STUN server
    pub stun_server: String,
    pub deadline_ms: u64,
    pub private_ranges: PrivateRangePolicy,
}

impl Default for LeakProbeConfig {
    fn default() -> Self {
        Self {
            stun_server: "stun.l.google.com:19302".to_string(),
            deadline_ms: 3_000,
            private_ranges: PrivateRangePolicy::default(),
        }
    }
}

impl LeakProbeConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Lookup endpoint; the address is appended as `?q=<ip>`.
    pub api_url: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.ipapi.is".to_string(),
        }
    }
}

impl RiskConfig {
    pub fn lookup_url(&self, ip: &str) -> String {
        format!("{}?q={}", self.api_url, ip)
    }
}

/// An endpoint that reports the caller's address, plus a JSON pointer to it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExitResolver {
    pub url: String,
    pub ip_pointer: String,
}

impl ExitResolver {
    pub fn new(url: impl Into<String>, ip_pointer: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ip_pointer: ip_pointer.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    /// Tried in order until one answers.
    pub domestic: Vec<ExitResolver>,
    pub foreign: Vec<ExitResolver>,
    /// Start delay added per exit card (0, 1x, 2x).
    pub stagger_ms: u64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            domestic: vec![
                ExitResolver::new("https://myip.ipip.net/json", "/data/ip"),
                ExitResolver::new("https://ip.useragentinfo.com/json", "/ip"),
                ExitResolver::new("https://ipapi.co/json/", "/ip"),
            ],
            foreign: vec![ExitResolver::new("https://ipapi.co/json/", "/ip")],
            stagger_ms: 200,
        }
    }
}

impl ExitConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 8_000,
            user_agent: concat!("ip-sentinel/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SentinelConfig {
    /// The stock deployment: ten probe targets and the public resolvers.
    pub fn platinum_defaults() -> Self {
        Self {
            targets: default_targets(),
            sampler: SamplerConfig::default(),
            dual_stack: DualStackConfig::default(),
            leak_probe: LeakProbeConfig::default(),
            risk: RiskConfig::default(),
            exit: ExitConfig::default(),
            http: HttpConfig::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config = toml::from_str::<SentinelConfig>(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults, then the file named by `SENTINEL_CONFIG`, then `SENTINEL_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("SENTINEL_CONFIG") {
            Ok(path) => Self::from_toml_file(path)?,
            Err(_) => Self::platinum_defaults(),
        };
        config.apply_env_with(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SENTINEL_RISK_API") {
            self.risk.api_url = url;
        }
        if let Some(server) = lookup("SENTINEL_STUN_SERVER") {
            self.leak_probe.stun_server = server;
        }
        if let Some(url) = lookup("SENTINEL_IPV4_RESOLVER") {
            self.dual_stack.ipv4_url = url;
        }
        if let Some(url) = lookup("SENTINEL_IPV6_RESOLVER") {
            self.dual_stack.ipv6_url = url;
        }
        if let Some(value) = lookup("SENTINEL_PROBE_INTERVAL_MS") {
            self.sampler.interval_ms = parse_env("SENTINEL_PROBE_INTERVAL_MS", value)?;
        }
        if let Some(value) = lookup("SENTINEL_JITTER_MS") {
            self.sampler.max_jitter_ms = parse_env("SENTINEL_JITTER_MS", value)?;
        }
        if let Some(value) = lookup("SENTINEL_LEAK_DEADLINE_MS") {
            self.leak_probe.deadline_ms = parse_env("SENTINEL_LEAK_DEADLINE_MS", value)?;
        }
        if let Some(value) = lookup("SENTINEL_PRIVATE_RANGES") {
            self.leak_probe.private_ranges = match value.to_ascii_lowercase().as_str() {
                "prefix" => PrivateRangePolicy::Prefix,
                "cidr" => PrivateRangePolicy::Cidr,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: "SENTINEL_PRIVATE_RANGES",
                        value,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampler.interval_ms == 0 {
            return Err(ConfigError::Invalid("sampler.interval_ms must be > 0"));
        }
        if self.sampler.history_capacity == 0 {
            return Err(ConfigError::Invalid("sampler.history_capacity must be > 0"));
        }
        if u64::try_from(self.sampler.max_jitter().as_nanos()).is_err() {
            return Err(ConfigError::Invalid("sampler.max_jitter_ms too large"));
        }
        if self.targets.iter().any(|t| t.name.trim().is_empty()) {
            return Err(ConfigError::Invalid("target names must not be empty"));
        }
        Ok(())
    }
}

fn parse_env(name: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

fn default_targets() -> Vec<Target> {
    vec![
        Target::new("Bilibili", "https://i0.hdslb.com/bfs/face/member/noface.jpg")
            .with_icon("https://www.bilibili.com/favicon.ico"),
        Target::new("WeChat", "https://res.wx.qq.com/a/wx_fed/assets/res/NTI4MWU5.ico")
            .with_icon("https://res.wx.qq.com/a/wx_fed/assets/res/NTI4MWU5.ico"),
        Target::new("Google", "https://www.google.com/favicon.ico")
            .with_icon("https://www.google.com/favicon.ico"),
        Target::new("GitHub", "https://github.github.io/janky/images/bg_hr.png")
            .with_icon("https://github.com/favicon.ico"),
        Target::new("YouTube", "https://i.ytimg.com/vi/M7lc1UVf-VE/mqdefault.jpg")
            .with_icon("https://www.youtube.com/favicon.ico"),
        Target::new("OpenAI", "https://openai.com/favicon.ico")
            .with_icon("https://openai.com/favicon.ico"),
        Target::new("Telegram", "https://telegram.org/img/t_logo.png")
            .with_icon("https://telegram.org/favicon.ico"),
        Target::new(
            "Netflix",
            "https://assets.nflxext.com/us/ffe/siteui/common/icons/nficon2016.ico",
        )
        .with_icon("https://assets.nflxext.com/us/ffe/siteui/common/icons/nficon2016.ico"),
        Target::new("Cloudflare", "https://www.cloudflare.com/favicon.ico")
            .with_icon("https://www.cloudflare.com/favicon.ico"),
        Target::new("Apple", "https://www.apple.com/favicon.ico")
            .with_icon("https://www.apple.com/favicon.ico"),
    ]
}
