use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use price_provider::aggregate::LatestFilter;
use price_provider::config::Settings;
use price_provider::stats::Stats;
use price_provider::{build_providers, http, ProviderSet};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let s = Settings::from_env()?;
    if s.symbols.is_empty() {
        anyhow::bail!("no symbols configured; set SYMBOLS=a,b,c or `symbols` in CONFIG_FILE");
    }

    let client = http::client(s.request_timeout(), &s.user_agent)?;
    let providers = build_providers(&s, &client);
    if providers.is_empty() {
        anyhow::bail!("no usable providers; enable one and set its credentials");
    }

    let stats = Stats::new(now_ms());
    let set = ProviderSet::new(providers).with_stats(stats.clone());
    let filter = LatestFilter::default();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received, stopping");
            }
            shutdown.cancel();
        });
    }

    tracing::info!(symbols = s.symbols.len(), providers = ?set.names(), "starting poll loop");

    while !shutdown.is_cancelled() {
        match set
            .latest(&s.symbols, s.request_timeout(), &shutdown, s.include_sides, &filter)
            .await
        {
            Ok(rows) => {
                tracing::info!(rows = rows.len(), "latest prices fetched");
                for row in &rows {
                    println!("{}", serde_json::to_string(row)?);
                }
            }
            Err(e) if shutdown.is_cancelled() => {
                tracing::debug!(error = %e, "pass interrupted by shutdown");
            }
            Err(e) => tracing::warn!(error = %e, "aggregation pass failed"),
        }

        // stats summary
        let t = now_ms();
        if stats.should_log(t, s.stats_log_sec) {
            let ss = stats.snapshot(t);
            stats.mark_logged(t);
            tracing::info!(
                up_sec = ss.up_sec,
                passes = ss.passes,
                failed_passes = ss.failed_passes,
                quotes_fetched = ss.quotes_fetched,
                provider_failures = ss.provider_failures,
                latest_rows = ss.latest_rows,
                last_pass_ms = ss.last_pass_ms,
                "stats"
            );
        }

        if s.poll_ms == 0 {
            break;
        }
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(s.poll_ms)) => {}
        }
    }

    tracing::info!("stopped");
    Ok(())
}
