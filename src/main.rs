use anyhow::{Context, Result};
use covid_lake::{checks, pipeline, ExecutionContext, PipelineConfig};
use std::{env, fs};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) load config (optional YAML path as the only argument) ────
    let config = match env::args().nth(1) {
        Some(path) => PipelineConfig::from_yaml_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => PipelineConfig::default(),
    };
    fs::create_dir_all(&config.output_root)
        .with_context(|| format!("creating output root {}", config.output_root.display()))?;

    // ─── 3) execution context ────────────────────────────────────────
    let ctx = ExecutionContext::new(config).context("creating execution context")?;

    // ─── 4) transform + write ────────────────────────────────────────
    let summary = pipeline::run(&ctx).context("pipeline run failed")?;
    for d in &summary.datasets {
        info!(
            dataset = %d.dataset,
            rows = d.rows,
            partitions = d.partitions,
            path = %d.path.display(),
            "written"
        );
    }

    // ─── 5) quality checks ───────────────────────────────────────────
    if let Err(e) = checks::run_quality_checks(&ctx) {
        warn!("quality checks failed: {:#}", e);
    } else {
        info!("quality checks done");
    }

    ctx.close();
    info!("all done");
    Ok(())
}
