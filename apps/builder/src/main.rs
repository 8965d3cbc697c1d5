mod config;
mod documents;
mod errors;
mod pipeline;
mod render;
mod themes;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::documents::ResumeDocument;
use crate::pipeline::{Pipeline, RunReport};
use crate::render::{ChromiumLauncher, CliRenderer, PdfPageConfig, PdfRenderer};
use crate::themes::ThemeRegistry;

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration first; logging needs its RUST_LOG fallback
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Progress → stdout, warnings and errors → stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(
                    std::io::stderr
                        .with_max_level(tracing::Level::WARN)
                        .or_else(std::io::stdout),
                ),
        )
        .init();

    match run(&config).await {
        Ok(report) if report.should_fail(config.fail_on_partial) => {
            error!(
                "{} resume(s) failed and FAIL_ON_PARTIAL is set",
                report.failures.len()
            );
            ExitCode::from(2)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> Result<RunReport> {
    let themes = ThemeRegistry::from_manifest(&config.manifest_path, &config.theme_prefix)?;
    if themes.is_empty() {
        info!(
            "No '{}*' devDependencies found in {}",
            themes.prefix(),
            config.manifest_path.display()
        );
    }

    let renderer = CliRenderer::new(
        config.render_program.clone(),
        config.render_args.clone(),
        config.project_root.clone(),
        config.theme_prefix.clone(),
    )
    .with_timeout(config.render_timeout);

    let launcher = ChromiumLauncher {
        executable: config.chrome_executable.clone(),
        no_sandbox: config.chrome_no_sandbox,
    };
    let pdf = PdfRenderer::new(Arc::new(launcher), PdfPageConfig::a4())
        .with_timeout(config.pdf_timeout);

    let pipeline = Pipeline::new(Arc::new(renderer), pdf, themes, config.output_dir.clone())
        .with_settle_delay(config.settle_delay);

    // The renderer runs in the project root, so document paths must be absolute
    let report = match &config.single_document {
        Some(path) => {
            ensure!(path.is_file(), "Resume file not found: {}", path.display());
            let path = std::fs::canonicalize(path)
                .with_context(|| format!("Cannot resolve {}", path.display()))?;
            pipeline.run_single(&ResumeDocument::from_path(path)).await?
        }
        None => {
            let input_dir = std::fs::canonicalize(&config.input_dir)
                .unwrap_or_else(|_| config.input_dir.clone());
            pipeline.run_batch(&input_dir).await?
        }
    };

    let elapsed = report
        .elapsed()
        .map(|d| format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0))
        .unwrap_or_else(|| "?".to_string());
    info!(
        "Run finished in {elapsed}: {} HTML, {} PDF, {} failed",
        report.html_files.len(),
        report.pdf_files.len(),
        report.failures.len()
    );
    match report.to_json() {
        Ok(json) => debug!(report = %json, "Run report"),
        Err(e) => warn!("Failed to serialise run report: {e}"),
    }
    Ok(report)
}
