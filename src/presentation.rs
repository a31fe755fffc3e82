//! Pure projection of diagnostics state into display values.

use std::fmt::Write as _;

use serde::Serialize;

use crate::dual_stack::{StackFamily, StackStatus};
use crate::edge::EdgeContext;
use crate::latency::{LatencyTier, TargetReading};
use crate::leak::{LeakProbeResult, LeakStatus};
use crate::risk::{ExitAddress, ExitCard, RiskOutcome, RiskScore, TagSentiment, SCORE_ALERT_ABOVE};
use crate::state::DiagnosticsState;

pub const NOT_SUPPORTED: &str = "Not supported in this network environment";
const EMPTY_BAR_PCT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Muted,
    Good,
    Warn,
    Bad,
}

impl Tone {
    fn marker(self) -> char {
        match self {
            Tone::Muted => '·',
            Tone::Good => '+',
            Tone::Warn => '~',
            Tone::Bad => '!',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplaySnapshot {
    pub header: HeaderView,
    pub pings: Vec<PingCard>,
    pub stacks: Vec<StackCard>,
    pub leak: LeakView,
    pub exits: Vec<ExitView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderView {
    /// `colo • country`
    pub subtitle: String,
    pub ip: String,
    pub isp: String,
    pub asn: String,
    pub location: String,
    pub protocol: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub height_pct: f64,
    pub opacity: f64,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingCard {
    pub name: String,
    pub icon_url: Option<String>,
    pub latency_text: String,
    pub tone: Tone,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackCard {
    pub label: &'static str,
    pub value: String,
    pub detail: Option<String>,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeakView {
    pub text: String,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreCell {
    pub text: String,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Badge {
    pub label: &'static str,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskPanel {
    pub company: ScoreCell,
    pub asn: ScoreCell,
    pub composite: ScoreCell,
    pub trust: ScoreCell,
    pub badges: Vec<Badge>,
    pub asn_org: String,
    pub network_type: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RiskView {
    Hidden,
    Loading,
    Report(Box<RiskPanel>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitView {
    pub title: &'static str,
    pub address_text: String,
    pub tone: Tone,
    pub risk: RiskView,
}

impl DisplaySnapshot {
    pub fn project(state: &DiagnosticsState) -> Self {
        Self {
            header: header(&state.edge),
            pings: state.latency.iter().map(ping_card).collect(),
            stacks: vec![
                stack_card(StackFamily::V4, &state.ipv4),
                stack_card(StackFamily::V6, &state.ipv6),
            ],
            leak: leak_view(&state.leak),
            exits: state.exits.iter().map(exit_view).collect(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let h = &self.header;
        let _ = writeln!(out, "IP Sentinel  [{}]", h.subtitle);
        let _ = writeln!(out, "  {}  {}  {}", h.ip, h.asn, h.isp);
        let _ = writeln!(out, "  {}  ({})", h.location, h.protocol);

        let _ = writeln!(out, "Latency");
        for ping in &self.pings {
            let trend: String = ping.bars.iter().map(|b| spark(b.height_pct)).collect();
            let _ = writeln!(
                out,
                "  {} {:<12} {:>7}  {}",
                ping.tone.marker(),
                ping.name,
                ping.latency_text,
                trend
            );
        }

        let _ = writeln!(out, "Stacks");
        for stack in &self.stacks {
            let _ = write!(out, "  {} {:<5} {}", stack.tone.marker(), stack.label, stack.value);
            if let Some(detail) = &stack.detail {
                let _ = write!(out, "  ({})", detail);
            }
            out.push('\n');
        }
        let _ = writeln!(out, "  {} ICE   {}", self.leak.tone.marker(), self.leak.text);

        for exit in &self.exits {
            let _ = writeln!(out, "{}: {} {}", exit.title, exit.tone.marker(), exit.address_text);
            match &exit.risk {
                RiskView::Hidden => {}
                RiskView::Loading => {
                    let _ = writeln!(out, "  risk: loading");
                }
                RiskView::Report(panel) => {
                    let _ = writeln!(
                        out,
                        "  risk {}  trust {}  isp {}  asn {}",
                        panel.composite.text, panel.trust.text, panel.company.text, panel.asn.text
                    );
                    let badges: Vec<&str> = panel.badges.iter().map(|b| b.label).collect();
                    let _ = writeln!(out, "  [{}]  {} / {}", badges.join(", "), panel.asn_org, panel.network_type);
                    let _ = writeln!(out, "  {}", panel.location);
                }
            }
        }
        out
    }
}

fn spark(height_pct: f64) -> char {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let idx = ((height_pct / 100.0) * (LEVELS.len() - 1) as f64).round() as usize;
    LEVELS[idx.min(LEVELS.len() - 1)]
}

fn header(edge: &EdgeContext) -> HeaderView {
    HeaderView {
        subtitle: format!("{} • {}", edge.colo, edge.country),
        ip: edge.ip.clone(),
        isp: edge.isp.clone(),
        asn: edge.asn.clone(),
        location: format!("{}, {}, {}", edge.city, edge.region, edge.country),
        protocol: format!("{} / {}", edge.http_protocol, edge.tls_version),
        user_agent: edge.user_agent.clone(),
    }
}

pub fn bar_height_pct(slot: Option<u64>) -> f64 {
    match slot {
        None | Some(0) => EMPTY_BAR_PCT,
        Some(ms) => (ms as f64 / 3.0).min(100.0),
    }
}

pub fn bar_opacity(index: usize) -> f64 {
    0.5 + index as f64 / 24.0
}

fn tier_tone(tier: LatencyTier) -> Tone {
    match tier {
        LatencyTier::Good => Tone::Good,
        LatencyTier::Fair => Tone::Warn,
        LatencyTier::Poor => Tone::Bad,
        LatencyTier::Unknown => Tone::Muted,
    }
}

fn ping_card(reading: &TargetReading) -> PingCard {
    let latest = reading.latest.and_then(|s| s.round_trip_ms).filter(|ms| *ms > 0);
    let (latency_text, tone) = match latest {
        None => ("-".to_string(), Tone::Muted),
        Some(ms) if ms < crate::latency::GOOD_BELOW_MS => (format!("{}ms", ms), Tone::Good),
        Some(ms) => (format!("{}ms", ms), Tone::Warn),
    };
    let bars = reading
        .history
        .iter()
        .enumerate()
        .map(|(i, slot)| Bar {
            height_pct: bar_height_pct(slot),
            opacity: bar_opacity(i),
            tone: tier_tone(LatencyTier::classify(slot.filter(|ms| *ms > 0))),
        })
        .collect();
    PingCard {
        name: reading.target.name.clone(),
        icon_url: reading.target.icon_url.clone(),
        latency_text,
        tone,
        bars,
    }
}

fn stack_card(family: StackFamily, status: &StackStatus) -> StackCard {
    let label = family.label();
    match status.result() {
        None => StackCard {
            label,
            value: "Loading...".to_string(),
            detail: None,
            tone: Tone::Muted,
        },
        Some(result) if !result.available => StackCard {
            label,
            value: NOT_SUPPORTED.to_string(),
            detail: None,
            tone: Tone::Bad,
        },
        Some(result) => {
            let parts: Vec<&str> = [&result.isp, &result.city, &result.country, &result.asn]
                .into_iter()
                .filter_map(|p| p.as_deref())
                .collect();
            StackCard {
                label,
                value: result.address.clone().unwrap_or_default(),
                detail: (!parts.is_empty()).then(|| parts.join(" · ")),
                tone: Tone::Good,
            }
        }
    }
}

fn leak_view(leak: &LeakProbeResult) -> LeakView {
    match leak.status() {
        LeakStatus::Pending => LeakView {
            text: "Checking...".to_string(),
            tone: Tone::Muted,
        },
        LeakStatus::Clean => LeakView {
            text: "No public address exposed".to_string(),
            tone: Tone::Good,
        },
        LeakStatus::Leaked => LeakView {
            text: format!("Exposed {}", leak.exposed_address().unwrap_or("unknown")),
            tone: Tone::Bad,
        },
    }
}

fn score_cell(value: u8) -> ScoreCell {
    ScoreCell {
        text: format!("{}%", value),
        tone: if value > SCORE_ALERT_ABOVE { Tone::Bad } else { Tone::Good },
    }
}

fn gauge(score: &RiskScore) -> ScoreCell {
    ScoreCell {
        text: format!("{} ({:?})", score.value, score.tier),
        tone: match score.tier {
            crate::risk::RiskTier::Good => Tone::Good,
            crate::risk::RiskTier::Moderate => Tone::Warn,
            crate::risk::RiskTier::Risky => Tone::Bad,
        },
    }
}

fn risk_view(outcome: &RiskOutcome) -> RiskView {
    match outcome {
        RiskOutcome::Idle | RiskOutcome::NoData => RiskView::Hidden,
        RiskOutcome::Loading => RiskView::Loading,
        RiskOutcome::Ready(report) => {
            let m = &report.meta;
            RiskView::Report(Box::new(RiskPanel {
                company: score_cell(report.company_score),
                asn: score_cell(report.asn_score),
                composite: gauge(&report.composite),
                trust: gauge(&report.trust),
                badges: report
                    .composite
                    .tags
                    .iter()
                    .map(|tag| Badge {
                        label: tag.label(),
                        tone: match tag.sentiment() {
                            TagSentiment::Good => Tone::Good,
                            TagSentiment::Bad => Tone::Bad,
                        },
                    })
                    .collect(),
                asn_org: m.asn_org.clone(),
                network_type: m.network_type.clone(),
                location: format!("{}, {} ({}, {})", m.city, m.country, m.latitude, m.longitude),
            }))
        }
    }
}

fn exit_view(card: &ExitCard) -> ExitView {
    let (address_text, tone, risk) = match &card.address {
        ExitAddress::Loading => ("...".to_string(), Tone::Warn, RiskView::Hidden),
        ExitAddress::Failed => ("Lookup failed".to_string(), Tone::Bad, RiskView::Hidden),
        ExitAddress::Resolved(ip) => (ip.clone(), Tone::Good, risk_view(&card.risk)),
    };
    ExitView {
        title: card.kind.title(),
        address_text,
        tone,
        risk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SentinelConfig, Target};
    use crate::dual_stack::ReachabilityResult;
    use crate::latency::Sample;
    use crate::risk::{ExitKind, RiskPayload, RiskReport};
    use serde_json::json;

    fn state() -> DiagnosticsState {
        let config = SentinelConfig {
            targets: vec![Target::new("Google", "https://www.google.com/favicon.ico")],
            ..SentinelConfig::platinum_defaults()
        };
        DiagnosticsState::new(&config, EdgeContext::default())
    }

    #[test]
    fn bars_follow_height_and_opacity_rules() {
        assert_eq!(bar_height_pct(None), 10.0);
        assert_eq!(bar_height_pct(Some(0)), 10.0);
        assert_eq!(bar_height_pct(Some(90)), 30.0);
        assert_eq!(bar_height_pct(Some(900)), 100.0);
        assert_eq!(bar_opacity(0), 0.5);
        assert_eq!(bar_opacity(12), 1.0);
    }

    #[test]
    fn ping_card_before_and_after_first_sample() {
        let mut s = state();
        let card = &DisplaySnapshot::project(&s).pings[0];
        assert_eq!(card.latency_text, "-");
        assert_eq!(card.bars.len(), 12);
        assert!(card.bars.iter().all(|b| b.tone == Tone::Muted && b.height_pct == 10.0));

        s.latency[0].record(Sample { timestamp_ms: 1, round_trip_ms: Some(80) });
        s.latency[0].record(Sample { timestamp_ms: 2, round_trip_ms: Some(450) });
        let card = &DisplaySnapshot::project(&s).pings[0];
        assert_eq!(card.latency_text, "450ms");
        assert_eq!(card.tone, Tone::Warn);
        assert_eq!(card.bars[10].tone, Tone::Good);
        assert_eq!(card.bars[11].tone, Tone::Bad);
    }

    #[test]
    fn unavailable_stack_reads_not_supported() {
        let mut s = state();
        s.ipv6.settle(ReachabilityResult::unavailable(StackFamily::V6));
        let view = DisplaySnapshot::project(&s);
        assert_eq!(view.stacks[0].value, "Loading...");
        assert_eq!(view.stacks[1].value, NOT_SUPPORTED);
        assert_eq!(view.header.subtitle, "N/A • Unknown");
    }

    #[test]
    fn risk_panel_marks_scores_above_twenty_percent() {
        let mut s = state();
        let payload = RiskPayload::from_value(json!({
            "is_datacenter": true,
            "company": {"abuser_score": "0.21 (Elevated)"},
            "asn": {"abuser_score": 0.2}
        }))
        .unwrap();
        let card = s.exit_mut(ExitKind::Foreign).unwrap();
        card.address = ExitAddress::Resolved("192.0.2.9".to_string());
        card.risk = RiskOutcome::Ready(Box::new(RiskReport::from_payload(&payload)));

        let view = DisplaySnapshot::project(&s);
        let RiskView::Report(panel) = &view.exits[1].risk else {
            panic!("expected a risk panel");
        };
        assert_eq!(panel.company, ScoreCell { text: "21%".to_string(), tone: Tone::Bad });
        assert_eq!(panel.asn.tone, Tone::Good);
        assert_eq!(panel.composite.tone, Tone::Warn);
        assert_eq!(panel.badges, vec![Badge { label: "Datacenter", tone: Tone::Bad }]);
        assert_eq!(panel.location, "N/A, N/A (N/A, N/A)");

        let text = view.render_text();
        assert!(text.contains("192.0.2.9"));
        assert!(text.contains("Datacenter"));
        assert_eq!(view.exits[0].address_text, "...");
    }

    #[test]
    fn no_data_hides_the_panel_without_faking_a_zero() {
        let mut s = state();
        let card = s.exit_mut(ExitKind::Edge).unwrap();
        card.address = ExitAddress::Resolved("127.0.0.1".to_string());
        card.risk = RiskOutcome::NoData;
        assert_eq!(DisplaySnapshot::project(&s).exits[2].risk, RiskView::Hidden);
    }
}
