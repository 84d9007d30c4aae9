//! Video generation engine binary.
//!
//! Runs one demo generation end to end against the configured transport and
//! logs its progress.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_engine::{GenerationRequest, InMemoryCatalog, Orchestrator, OrchestratorConfig, ProviderMode};
use vgen_models::{ProviderId, SettingsOverrides, StoryboardStatus};
use vgen_provider::{HttpTransport, ProviderRegistry, ProviderTransport, SimulatedTransport};

const DEMO_PROMPT: &str = "A lighthouse on a rocky coast at dusk, waves rolling in, slow aerial orbit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vgen=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;

    info!("Starting vgen-engine");

    let config = OrchestratorConfig::from_env();
    info!("Engine config: {:?}", config);

    let transport: Arc<dyn ProviderTransport> = match config.provider_mode {
        ProviderMode::Simulated => Arc::new(SimulatedTransport::new()),
        ProviderMode::Http => {
            Arc::new(HttpTransport::from_env().context("Failed to create HTTP transport")?)
        }
    };
    let registry = ProviderRegistry::new(transport, config.breaker.clone());

    let provider: ProviderId = std::env::var("VGEN_DEMO_PROVIDER")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(ProviderId::Runway);
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.add_storyboard("demo-storyboard", StoryboardStatus::Completed);
    catalog.seed_prompt("demo-prompt", DEMO_PROMPT, ProviderId::ALL);

    let shutdown_timeout = config.shutdown_timeout;
    let orchestrator = Orchestrator::new(config, registry, catalog.clone(), catalog);

    let request = GenerationRequest::new("demo-user", "demo-prompt", "demo-storyboard", provider)
        .with_settings(SettingsOverrides {
            duration_secs: Some(4),
            ..Default::default()
        });
    let job = orchestrator.submit(request).await?;
    info!(job_id = %job.id, provider = %provider, "Demo job submitted");

    let mut updates = orchestrator.watch(&job.id)?;
    let final_job = tokio::select! {
        last = async {
            let mut last = None;
            while let Some(update) = updates.recv().await {
                info!(
                    status = %update.status,
                    stage = %update.progress.stage,
                    percentage = update.progress.percentage,
                    eta_secs = update.progress.estimated_time_remaining_secs,
                    "{}", update.progress.current_operation
                );
                last = Some(update);
            }
            last
        } => last,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            None
        }
    };

    match final_job {
        Some(job) => match &job.result {
            Some(result) => info!(video_url = %result.video_url, cost = result.cost, "Demo job completed"),
            None => warn!(status = %job.status, error = ?job.error, "Demo job did not complete"),
        },
        None => warn!("Demo job interrupted"),
    }

    orchestrator.shutdown(shutdown_timeout).await;
    info!(status = ?orchestrator.queue_status(), "Queue at shutdown");
    info!("Metrics snapshot:\n{}", metrics.render());

    info!("Engine shutdown complete");
    Ok(())
}
