//! Whole-engine runs against scripted network fakes on a paused clock.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time;

use crate::config::{
    DualStackConfig, ExitConfig, ExitResolver, LeakProbeConfig, RiskConfig, SamplerConfig, SentinelConfig, Target,
};
use crate::edge::{EdgeContext, EdgeMetadata};
use crate::engine::DiagnosticsEngine;
use crate::fetcher::fake::{FakeFetcher, Scripted};
use crate::leak::{CandidateSource, LeakStatus};
use crate::presentation::NOT_SUPPORTED;
use crate::risk::{ExitAddress, RiskOutcome, RiskTag};
use crate::scheduler::CancelToken;

const PROBE: &str = "https://probe.test/favicon.ico";
const V4: &str = "https://v4.test/geoip";
const V6: &str = "https://v6.test/geoip";
const DOMESTIC: &str = "https://cn.test/json";
const FOREIGN: &str = "https://intl.test/json";

struct Candidates(Vec<&'static str>);

#[async_trait]
impl CandidateSource for Candidates {
    async fn gather(&self, sink: mpsc::Sender<String>, cancel: CancelToken) {
        for line in &self.0 {
            if sink.send(line.to_string()).await.is_err() {
                return;
            }
        }
        cancel.cancelled().await;
    }
}

fn config() -> SentinelConfig {
    SentinelConfig {
        targets: vec![Target::new("Probe", PROBE)],
        sampler: SamplerConfig {
            max_jitter_ms: 0,
            ..SamplerConfig::default()
        },
        dual_stack: DualStackConfig {
            ipv4_url: V4.to_string(),
            ipv6_url: V6.to_string(),
        },
        leak_probe: LeakProbeConfig::default(),
        risk: RiskConfig {
            api_url: "https://risk.test".to_string(),
        },
        exit: ExitConfig {
            domestic: vec![ExitResolver::new(DOMESTIC, "/data/ip")],
            foreign: vec![ExitResolver::new(FOREIGN, "/ip")],
            stagger_ms: 200,
        },
        ..SentinelConfig::platinum_defaults()
    }
}

fn network() -> FakeFetcher {
    FakeFetcher::new()
        .route(PROBE, vec![Scripted::ProbeAfter(Duration::from_millis(30))])
        .route(V4, vec![Scripted::Json(json!({"ip": "203.0.113.10", "isp": "Example Broadband", "asn": 64500}))])
        .route(V6, vec![Scripted::NetworkError])
        .route(DOMESTIC, vec![Scripted::Json(json!({"data": {"ip": "203.0.113.10"}}))])
        .route(FOREIGN, vec![Scripted::Json(json!({"ip": "198.51.100.77"}))])
        .route(
            "https://risk.test?q=203.0.113.10",
            vec![Scripted::Json(json!({
                "is_abuser": true,
                "company": {"abuser_score": "0.01"},
                "asn": {"abuser_score": 0.02}
            }))],
        )
        .route(
            "https://risk.test?q=198.51.100.77",
            vec![Scripted::Json(json!({"is_vpn": true, "company": {"abuser_score": 0.1}}))],
        )
        .route("https://risk.test?q=127.0.0.1", vec![Scripted::Json(json!({}))])
}

const PRIVATE_HOST: &str = "candidate:1261 1 udp 2130706431 192.168.1.5 50000 typ host";
const PUBLIC_SRFLX: &str = "candidate:1001 1 udp 1694498815 203.0.113.10 41000 typ srflx raddr 192.168.1.5 rport 50000";

#[tokio::test(start_paused = true)]
async fn full_run_settles_every_panel() {
    let fetcher = Arc::new(network());
    let mut engine = DiagnosticsEngine::start(
        config(),
        EdgeContext::default(),
        fetcher.clone(),
        Arc::new(Candidates(vec![PRIVATE_HOST])),
    )
    .unwrap();

    time::sleep(Duration::from_millis(3_500)).await;
    let state = engine.snapshot();

    assert_eq!(state.latency[0].history.tail(2), vec![Some(30), Some(30)]);

    let v4 = state.ipv4.result().unwrap();
    assert!(v4.available);
    assert_eq!(v4.asn.as_deref(), Some("AS64500"));
    assert!(!state.ipv6.result().unwrap().available);
    assert_eq!(fetcher.calls_to(V6), 1);

    assert_eq!(state.leak.status(), LeakStatus::Clean);

    assert_eq!(state.exits[0].address, ExitAddress::Resolved("203.0.113.10".to_string()));
    let domestic = state.exits[0].risk.report().unwrap();
    assert_eq!(domestic.composite.value, 100);
    assert!(domestic.composite.tags.contains(&RiskTag::Abuser));

    let foreign = state.exits[1].risk.report().unwrap();
    assert_eq!(foreign.company_score, 10);
    assert_eq!(foreign.composite.value, 75);

    let edge = state.exits[2].risk.report().unwrap();
    assert_eq!(edge.composite.value, 0);
    assert_eq!(edge.composite.tags, BTreeSet::from([RiskTag::Residential]));

    let view = engine.display();
    assert_eq!(view.stacks[1].value, NOT_SUPPORTED);
    assert!(view.render_text().contains(NOT_SUPPORTED));

    engine.teardown();
}

#[tokio::test(start_paused = true)]
async fn both_families_down_leaves_no_reachable_stack() {
    let fetcher = Arc::new(network().route(V4, vec![Scripted::Status(503)]));
    let engine = DiagnosticsEngine::start(
        config(),
        EdgeContext::default(),
        fetcher,
        Arc::new(Candidates(Vec::new())),
    )
    .unwrap();

    time::sleep(Duration::from_millis(100)).await;
    let state = engine.snapshot();
    assert!(state.no_stack_reachable());
}

#[tokio::test(start_paused = true)]
async fn public_candidate_flips_leak_before_deadline() {
    let engine = DiagnosticsEngine::start(
        config(),
        EdgeContext::default(),
        Arc::new(network()),
        Arc::new(Candidates(vec![PRIVATE_HOST, PUBLIC_SRFLX])),
    )
    .unwrap();

    time::sleep(Duration::from_millis(50)).await;
    let leak = engine.snapshot().leak;
    assert_eq!(leak.status(), LeakStatus::Leaked);
    assert_eq!(leak.exposed_address(), Some("203.0.113.10"));
}

#[tokio::test(start_paused = true)]
async fn exit_cards_start_staggered() {
    let fetcher = Arc::new(network());
    let edge = EdgeContext::from_edge_metadata(EdgeMetadata {
        connecting_ip: Some("192.0.2.44".to_string()),
        ..EdgeMetadata::default()
    });
    let _engine = DiagnosticsEngine::start(
        config(),
        edge,
        fetcher.clone(),
        Arc::new(Candidates(Vec::new())),
    )
    .unwrap();

    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.calls_to(DOMESTIC), 1);
    assert_eq!(fetcher.calls_to(FOREIGN), 0);

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fetcher.calls_to(FOREIGN), 1);
    assert_eq!(fetcher.calls_to("https://risk.test?q=192.0.2.44"), 0);

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fetcher.calls_to("https://risk.test?q=192.0.2.44"), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_risk_data_stays_distinct_from_a_zero_score() {
    let fetcher = Arc::new(network().route("https://risk.test?q=198.51.100.77", vec![Scripted::Status(429)]));
    let engine = DiagnosticsEngine::start(
        config(),
        EdgeContext::default(),
        fetcher,
        Arc::new(Candidates(Vec::new())),
    )
    .unwrap();

    time::sleep(Duration::from_millis(1_000)).await;
    let state = engine.snapshot();
    assert_eq!(state.exits[1].risk, RiskOutcome::NoData);
    assert!(state.exits[2].risk.report().is_some());
}

#[tokio::test(start_paused = true)]
async fn teardown_freezes_state_and_releases_everything() {
    let fetcher = Arc::new(network());
    let mut engine = DiagnosticsEngine::start(
        config(),
        EdgeContext::default(),
        fetcher.clone(),
        Arc::new(Candidates(vec![PRIVATE_HOST])),
    )
    .unwrap();

    time::sleep(Duration::from_millis(100)).await;
    engine.teardown();
    assert!(engine.is_torn_down());
    assert!(engine.snapshot().is_torn_down());
    let version = *engine.subscribe().borrow();
    let probes = fetcher.probe_count.load(Ordering::SeqCst);

    time::sleep(Duration::from_millis(20_000)).await;

    assert_eq!(*engine.subscribe().borrow(), version);
    assert_eq!(fetcher.probe_count.load(Ordering::SeqCst), probes);
    assert_eq!(fetcher.calls_to(FOREIGN), 0);
    let state = engine.snapshot();
    assert_eq!(state.leak.status(), LeakStatus::Pending);
    assert_eq!(state.exits[1].address, ExitAddress::Loading);

    engine.teardown();
}
