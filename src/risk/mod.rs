//! Normalization of third-party IP reputation data into bounded scores.

pub mod exit;

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::MalformedRiskData;
use crate::fields::{self, text_at_pointer};

pub use exit::{ExitAddress, ExitCard, ExitKind, ExitLocator, RiskNormalizer};

/// Score cells above this percentage render as bad.
pub const SCORE_ALERT_ABOVE: u8 = 20;

lazy_static! {
    static ref SCORE_LITERAL: Regex = Regex::new(r"[0-9.]+").expect("score literal pattern");
}

/// Raw risk-lookup document. Only JSON objects are accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskPayload {
    value: Value,
}

impl RiskPayload {
    pub fn from_value(value: Value) -> Result<Self, MalformedRiskData> {
        let found = match &value {
            Value::Object(_) => return Ok(Self { value }),
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        };
        Err(MalformedRiskData { found })
    }

    pub fn flag(&self, key: &str) -> bool {
        fields::flag(&self.value, key)
    }

    pub fn company_score(&self) -> u8 {
        extract_score(self.value.pointer("/company/abuser_score"))
    }

    pub fn asn_score(&self) -> u8 {
        extract_score(self.value.pointer("/asn/abuser_score"))
    }

    pub fn tags(&self) -> BTreeSet<RiskTag> {
        let mut tags: BTreeSet<RiskTag> = RiskTag::FLAGGED
            .iter()
            .filter(|(_, key)| self.flag(key))
            .map(|(tag, _)| *tag)
            .collect();
        if !self.flag("is_datacenter") && !self.flag("is_mobile") && !self.flag("is_proxy") {
            tags.insert(RiskTag::Residential);
        }
        tags
    }

    fn text(&self, pointer: &str) -> String {
        text_at_pointer(&self.value, pointer).unwrap_or_else(|| "N/A".to_string())
    }
}

/// Percentage in [0, 100] from a fraction that may be a number, a string
/// such as `"0.0026 (Low)"`, or absent.
pub fn extract_score(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::String(s)) => extract_score_str(s),
        // f64 Display never uses exponent notation, so small fractions keep their digits.
        Some(Value::Number(n)) => n.as_f64().map(|f| extract_score_str(&f.to_string())).unwrap_or(0),
        Some(other) => extract_score_str(&other.to_string()),
    }
}

pub fn extract_score_str(raw: &str) -> u8 {
    let Some(m) = SCORE_LITERAL.find(raw) else {
        return 0;
    };
    let mut literal = m.as_str();
    // "1.2.3" reads as 1.2
    if let Some(first) = literal.find('.') {
        if let Some(second) = literal[first + 1..].find('.') {
            literal = &literal[..first + 1 + second];
        }
    }
    match literal.parse::<f64>() {
        Ok(fraction) if !fraction.is_nan() => (fraction * 100.0).round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

/// Rising-risk convention: 0 is clean, 100 is worst.
pub fn composite_risk(payload: &RiskPayload) -> u8 {
    let mut risk = payload.company_score().max(payload.asn_score());
    if payload.flag("is_abuser") {
        risk = 100;
    }
    if payload.flag("is_proxy") || payload.flag("is_vpn") {
        risk = risk.max(75);
    }
    if payload.flag("is_datacenter") {
        risk = risk.max(50);
    }
    risk.min(100)
}

/// Falling-trust convention: starts at 100, each flag deducts a fixed penalty.
pub fn trust_score(payload: &RiskPayload) -> u8 {
    const PENALTIES: [(&str, i32); 6] = [
        ("is_vpn", 20),
        ("is_proxy", 20),
        ("is_tor", 40),
        ("is_datacenter", 15),
        ("is_abuser", 30),
        ("is_bot", 20),
    ];
    let trust = PENALTIES
        .iter()
        .filter(|(key, _)| payload.flag(key))
        .fold(100i32, |acc, (_, penalty)| acc - penalty);
    trust.clamp(0, 100) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RiskTag {
    Proxy,
    Vpn,
    Tor,
    Datacenter,
    Abuser,
    Mobile,
    Crawler,
    Residential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TagSentiment {
    Good,
    Bad,
}

impl RiskTag {
    const FLAGGED: [(RiskTag, &'static str); 7] = [
        (RiskTag::Proxy, "is_proxy"),
        (RiskTag::Vpn, "is_vpn"),
        (RiskTag::Tor, "is_tor"),
        (RiskTag::Datacenter, "is_datacenter"),
        (RiskTag::Abuser, "is_abuser"),
        (RiskTag::Mobile, "is_mobile"),
        (RiskTag::Crawler, "is_crawler"),
    ];

    pub fn label(self) -> &'static str {
        match self {
            RiskTag::Proxy => "Proxy",
            RiskTag::Vpn => "VPN",
            RiskTag::Tor => "Tor",
            RiskTag::Datacenter => "Datacenter",
            RiskTag::Abuser => "Abuser",
            RiskTag::Mobile => "Mobile",
            RiskTag::Crawler => "Crawler",
            RiskTag::Residential => "Residential",
        }
    }

    pub fn sentiment(self) -> TagSentiment {
        match self {
            RiskTag::Mobile | RiskTag::Crawler | RiskTag::Residential => TagSentiment::Good,
            _ => TagSentiment::Bad,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskTier {
    Good,
    Moderate,
    Risky,
}

impl RiskTier {
    pub fn from_composite(value: u8) -> Self {
        match value {
            v if v < 25 => RiskTier::Good,
            v if v < 75 => RiskTier::Moderate,
            _ => RiskTier::Risky,
        }
    }

    pub fn from_trust(value: u8) -> Self {
        match value {
            v if v >= 80 => RiskTier::Good,
            v if v >= 50 => RiskTier::Moderate,
            _ => RiskTier::Risky,
        }
    }
}

/// Bounded score with its tier and tags. Replaced as a whole, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskScore {
    pub value: u8,
    pub tier: RiskTier,
    pub tags: BTreeSet<RiskTag>,
}

impl RiskScore {
    pub fn composite(payload: &RiskPayload) -> Self {
        let value = composite_risk(payload);
        Self {
            value,
            tier: RiskTier::from_composite(value),
            tags: payload.tags(),
        }
    }

    pub fn trust(payload: &RiskPayload) -> Self {
        let value = trust_score(payload);
        Self {
            value,
            tier: RiskTier::from_trust(value),
            tags: payload.tags(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskMetadata {
    pub asn_org: String,
    pub network_type: String,
    pub city: String,
    pub country: String,
    pub latitude: String,
    pub longitude: String,
}

/// Everything derived from one risk lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskReport {
    pub company_score: u8,
    pub asn_score: u8,
    pub composite: RiskScore,
    pub trust: RiskScore,
    pub meta: RiskMetadata,
}

impl RiskReport {
    pub fn from_payload(payload: &RiskPayload) -> Self {
        Self {
            company_score: payload.company_score(),
            asn_score: payload.asn_score(),
            composite: RiskScore::composite(payload),
            trust: RiskScore::trust(payload),
            meta: RiskMetadata {
                asn_org: payload.text("/asn/org"),
                network_type: payload.text("/asn/type"),
                city: payload.text("/location/city"),
                country: payload.text("/location/country"),
                latitude: payload.text("/location/latitude"),
                longitude: payload.text("/location/longitude"),
            },
        }
    }
}

/// Risk card state for one resolved address. `NoData` is not a zero score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RiskOutcome {
    Idle,
    Loading,
    NoData,
    Ready(Box<RiskReport>),
}

impl RiskOutcome {
    pub fn report(&self) -> Option<&RiskReport> {
        match self {
            RiskOutcome::Ready(report) => Some(report),
            _ => None,
        }
    }
}
