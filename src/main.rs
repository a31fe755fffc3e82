use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use ip_sentinel::fetcher::ReqwestFetcher;
use ip_sentinel::leak::StunCandidateSource;
use ip_sentinel::logging::{self, LogLevel, DEFAULT_LOG_LEVEL};
use ip_sentinel::{DiagnosticsEngine, EdgeContext, EdgeMetadata, SentinelConfig};
use tokio::time;
use tracing::{info, warn};

const DEFAULT_RUN_SECS: u64 = 15;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let level = std::env::var("SENTINEL_LOG")
        .ok()
        .and_then(|v| LogLevel::from_env_value(&v))
        .unwrap_or(DEFAULT_LOG_LEVEL);
    logging::init(level);

    let config = SentinelConfig::load()?;
    let edge = EdgeContext::from_edge_metadata(EdgeMetadata::from_lookup(|name| std::env::var(name).ok()));
    let run_for = Duration::from_secs(
        std::env::var("SENTINEL_RUN_SECS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_RUN_SECS),
    );
    let json = std::env::var("SENTINEL_OUTPUT").map(|v| v == "json").unwrap_or(false);

    let fetcher = Arc::new(ReqwestFetcher::new(&config.http)?);
    let candidates = Arc::new(StunCandidateSource::new(config.leak_probe.stun_server.clone()));
    let mut engine = DiagnosticsEngine::start(config, edge, fetcher, candidates)?;
    let mut updates = engine.subscribe();

    let deadline = time::sleep(run_for);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = engine.display();
                if json {
                    println!("{}", serde_json::to_string(&view)?);
                } else {
                    println!("{}", view.render_text());
                }
            }
            _ = &mut deadline => {
                info!(secs = run_for.as_secs(), "run finished");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
        }
    }

    engine.teardown();
    let stats = ip_sentinel::observability::snapshot();
    info!(
        probes = stats.probes_issued,
        failed = stats.probes_failed,
        late_dropped = stats.late_completions_dropped,
        risk_lookups = stats.risk_lookups,
        leaks_found = stats.leaks_found,
        health = ?stats.health,
        "final counters"
    );
    Ok(())
}
