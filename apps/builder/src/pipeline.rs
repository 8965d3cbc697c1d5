//! Resume build pipeline — drives documents × themes through HTML and PDF rendering.
//!
//! Batch flow (`run_batch`):
//!   discover documents → phase 1: render + persist every HTML file →
//!   settle delay → phase 2: one shared browser session exports every HTML file to PDF.
//!
//! Single-document flow (`run_single`): flat output root, each theme's PDF exported right
//! after its HTML with a session launched for that export alone.
//!
//! Everything is awaited strictly in sequence. A failing (document, theme) pair is
//! logged, recorded in the `RunReport`, and skipped. So is a document whose output
//! directory cannot be created. Only discovery and output-root errors abort the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::documents::{discover_documents, ResumeDocument};
use crate::errors::BuildError;
use crate::render::{BrowserSession, PdfRenderer, ResumeRenderer};
use crate::themes::{Theme, ThemeRegistry};

// ────────────────────────────────────────────────────────────────────────────
// Run report
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Html,
    Pdf,
}

/// One skipped (document, theme) pair.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub document: String,
    pub theme: String,
    pub stage: Stage,
    pub message: String,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub html_files: Vec<PathBuf>,
    pub pdf_files: Vec<PathBuf>,
    pub failures: Vec<Failure>,
}

impl RunReport {
    fn start(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            html_files: Vec::new(),
            pdf_files: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn record_failure(&mut self, document: &str, theme: &Theme, stage: Stage, err: &BuildError) {
        self.failures.push(Failure {
            document: document.to_string(),
            theme: theme.to_string(),
            stage,
            message: err.to_string(),
        });
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// Wall time of the run, once it has finished.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// The report as one JSON line, for the debug log.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Whether the process should exit non-zero for this run.
    pub fn should_fail(&self, fail_on_partial: bool) -> bool {
        fail_on_partial && self.has_failures()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

/// An HTML file persisted in phase 1, waiting for its PDF.
#[derive(Debug, Clone)]
struct HtmlArtifact {
    document: String,
    theme: Theme,
    path: PathBuf,
}

pub struct Pipeline {
    renderer: Arc<dyn ResumeRenderer>,
    pdf: PdfRenderer,
    themes: ThemeRegistry,
    output_dir: PathBuf,
    settle_delay: Duration,
}

impl Pipeline {
    pub fn new(
        renderer: Arc<dyn ResumeRenderer>,
        pdf: PdfRenderer,
        themes: ThemeRegistry,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            renderer,
            pdf,
            themes,
            output_dir: output_dir.into(),
            settle_delay: Duration::ZERO,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Builds every `.json` document in `input_dir` into
    /// `<output>/<document>/<document>-<theme>.{html,pdf}`.
    pub async fn run_batch(&self, input_dir: &Path) -> Result<RunReport, BuildError> {
        let run_id = Uuid::new_v4();
        self.batch(input_dir, run_id)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn batch(&self, input_dir: &Path, run_id: Uuid) -> Result<RunReport, BuildError> {
        let mut report = RunReport::start(run_id);
        info!("Building resumes for themes: [{}]", self.theme_list());

        let documents = discover_documents(input_dir).await?;
        info!(
            "Processing JSON files: [{}]",
            documents
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        tokio::fs::create_dir_all(&self.output_dir).await?;

        // Phase 1: HTML only, no browser yet.
        let mut created = Vec::new();
        for document in &documents {
            info!("Processing JSON file: {}", document.name);
            let resume_dir = self.output_dir.join(&document.name);
            if let Err(e) = tokio::fs::create_dir_all(&resume_dir).await {
                let e = BuildError::from(e);
                error!(
                    document = %document.name,
                    "Failed to create {}, skipping {}: {e}",
                    resume_dir.display(),
                    document.name
                );
                for theme in self.themes.themes() {
                    report.record_failure(&document.name, theme, Stage::Html, &e);
                }
                continue;
            }

            for theme in self.themes.themes() {
                info!("Generating HTML with theme: {theme}");
                match self.build_html(document, theme, &resume_dir).await {
                    Ok(artifact) => {
                        info!("Created HTML resume: {}", artifact.path.display());
                        report.html_files.push(artifact.path.clone());
                        created.push(artifact);
                    }
                    Err(e) => {
                        error!(
                            document = %document.name,
                            theme = %theme,
                            "Failed to render theme {theme} for {}: {e}",
                            document.name
                        );
                        report.record_failure(&document.name, theme, Stage::Html, &e);
                    }
                }
            }
        }
        log_created("HTML", &report.html_files);

        tokio::time::sleep(self.settle_delay).await;

        // Phase 2: one browser session shared by every export.
        if !created.is_empty() {
            match self.pdf.launch_session().await {
                Ok(mut session) => {
                    for artifact in &created {
                        self.build_pdf(artifact, Some(&*session), &mut report).await;
                    }
                    if let Err(e) = session.close().await {
                        warn!("Failed to close browser session: {e}");
                    }
                }
                Err(e) => {
                    error!("Failed to start browser session, skipping all PDFs: {e}");
                    for artifact in &created {
                        report.record_failure(&artifact.document, &artifact.theme, Stage::Pdf, &e);
                    }
                }
            }
        }
        log_created("PDF", &report.pdf_files);

        info!("All resumes have been generated!");
        Ok(report.finish())
    }

    /// Builds one document into `<output>/<document>-<theme>.{html,pdf}`,
    /// launching a browser per PDF.
    pub async fn run_single(&self, document: &ResumeDocument) -> Result<RunReport, BuildError> {
        let run_id = Uuid::new_v4();
        self.single(document, run_id)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn single(&self, document: &ResumeDocument, run_id: Uuid) -> Result<RunReport, BuildError> {
        let mut report = RunReport::start(run_id);
        info!("Building resumes for themes: [{}]", self.theme_list());
        tokio::fs::create_dir_all(&self.output_dir).await?;

        for theme in self.themes.themes() {
            info!("Generating resume with theme: {theme}");
            let artifact = match self.build_html(document, theme, &self.output_dir).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    error!(
                        document = %document.name,
                        theme = %theme,
                        "Failed to render theme {theme}: {e}"
                    );
                    report.record_failure(&document.name, theme, Stage::Html, &e);
                    continue;
                }
            };
            info!("Created HTML resume: {}", artifact.path.display());
            report.html_files.push(artifact.path.clone());

            self.build_pdf(&artifact, None, &mut report).await;
        }

        log_created("HTML", &report.html_files);
        log_created("PDF", &report.pdf_files);
        info!("All resumes have been generated!");
        Ok(report.finish())
    }

    /// Renders one pair and persists it. The file is flushed and synced before returning,
    /// so the PDF phase can read it back straight away.
    async fn build_html(
        &self,
        document: &ResumeDocument,
        theme: &Theme,
        dir: &Path,
    ) -> Result<HtmlArtifact, BuildError> {
        let html = self.renderer.render(document, theme).await?;
        let path = dir.join(format!("{}-{}.html", document.name, theme));

        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(html.as_bytes()).await?;
        file.sync_all().await?;

        Ok(HtmlArtifact {
            document: document.name.clone(),
            theme: theme.clone(),
            path,
        })
    }

    async fn build_pdf(
        &self,
        artifact: &HtmlArtifact,
        session: Option<&dyn BrowserSession>,
        report: &mut RunReport,
    ) {
        let pdf_path = artifact.path.with_extension("pdf");
        let result = async {
            let html = tokio::fs::read_to_string(&artifact.path).await?;
            self.pdf.render(&html, &pdf_path, session).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("Created PDF resume: {}", pdf_path.display());
                report.pdf_files.push(pdf_path);
            }
            Err(e) => {
                error!(
                    document = %artifact.document,
                    theme = %artifact.theme,
                    "Failed to create PDF for {}: {e}",
                    artifact.path.display()
                );
                report.record_failure(&artifact.document, &artifact.theme, Stage::Pdf, &e);
            }
        }
    }

    fn theme_list(&self) -> String {
        self.themes
            .themes()
            .iter()
            .map(Theme::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn log_created(kind: &str, files: &[PathBuf]) {
    if files.is_empty() {
        info!("No {kind} resumes were created.");
        return;
    }
    info!("Created {kind} resumes:");
    for file in files {
        info!("  {}", file.display());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
