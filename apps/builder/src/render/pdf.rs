//! PDF Renderer — rasterizes HTML into paginated PDFs through a headless browser.
//!
//! A `BrowserSession` is expensive to start, so the batch pipeline launches one and
//! reuses it for every export. When no session is supplied, `PdfRenderer::render`
//! launches its own and always closes it before returning.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::BuildError;

const MM_PER_INCH: f64 = 25.4;

// ────────────────────────────────────────────────────────────────────────────
// Page configuration
// ────────────────────────────────────────────────────────────────────────────

/// Paper size and margins for every exported PDF, in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfPageConfig {
    pub paper_width_mm: f64,
    pub paper_height_mm: f64,
    pub margin_top_mm: f64,
    pub margin_right_mm: f64,
    pub margin_bottom_mm: f64,
    pub margin_left_mm: f64,
    pub print_background: bool,
}

impl PdfPageConfig {
    /// A4 (210 × 297 mm) with 20 mm margins on all sides.
    pub fn a4() -> Self {
        Self {
            paper_width_mm: 210.0,
            paper_height_mm: 297.0,
            margin_top_mm: 20.0,
            margin_right_mm: 20.0,
            margin_bottom_mm: 20.0,
            margin_left_mm: 20.0,
            print_background: true,
        }
    }

    /// DevTools `Page.printToPDF` takes inches.
    pub fn to_print_params(&self) -> PrintToPdfParams {
        PrintToPdfParams {
            paper_width: Some(self.paper_width_mm / MM_PER_INCH),
            paper_height: Some(self.paper_height_mm / MM_PER_INCH),
            margin_top: Some(self.margin_top_mm / MM_PER_INCH),
            margin_right: Some(self.margin_right_mm / MM_PER_INCH),
            margin_bottom: Some(self.margin_bottom_mm / MM_PER_INCH),
            margin_left: Some(self.margin_left_mm / MM_PER_INCH),
            print_background: Some(self.print_background),
            prefer_css_page_size: Some(false),
            ..Default::default()
        }
    }
}

impl Default for PdfPageConfig {
    fn default() -> Self {
        Self::a4()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session traits
// ────────────────────────────────────────────────────────────────────────────

/// A live browser-automation session.
///
/// Used by one page at a time; parallel exports would need to serialize access.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Opens a page, loads `html`, prints it to `destination`, closes the page.
    async fn export_pdf(
        &self,
        html: &str,
        destination: &Path,
        page: &PdfPageConfig,
    ) -> Result<(), BuildError>;

    async fn close(&mut self) -> Result<(), BuildError>;
}

#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BuildError>;
}

// ────────────────────────────────────────────────────────────────────────────
// PdfRenderer
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PdfRenderer {
    launcher: Arc<dyn SessionLauncher>,
    page: PdfPageConfig,
    timeout: Option<Duration>,
}

impl PdfRenderer {
    pub fn new(launcher: Arc<dyn SessionLauncher>, page: PdfPageConfig) -> Self {
        Self {
            launcher,
            page,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Starts a session the caller owns and must `close()`.
    pub async fn launch_session(&self) -> Result<Box<dyn BrowserSession>, BuildError> {
        self.launcher.launch().await
    }

    /// Exports `html` to `destination`.
    ///
    /// With `session = Some(..)` the caller keeps ownership and only a page is opened.
    /// With `None` a session is launched for this call and torn down afterwards,
    /// whether or not the export succeeded. No retry.
    pub async fn render(
        &self,
        html: &str,
        destination: &Path,
        session: Option<&dyn BrowserSession>,
    ) -> Result<(), BuildError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Some(session) = session {
            return self.export_with(session, html, destination).await;
        }

        let mut owned = self.launch_session().await?;
        let exported = self.export_with(&*owned, html, destination).await;
        let closed = owned.close().await;
        if let Err(e) = &closed {
            warn!("Failed to close browser session: {e}");
        }
        exported?;
        closed
    }

    async fn export_with(
        &self,
        session: &dyn BrowserSession,
        html: &str,
        destination: &Path,
    ) -> Result<(), BuildError> {
        let export = session.export_pdf(html, destination, &self.page);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, export).await.map_err(|_| {
                BuildError::PdfExportFailed(format!(
                    "export of {} timed out after {limit:?}",
                    destination.display()
                ))
            })?,
            None => export.await,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Chromium backend
// ────────────────────────────────────────────────────────────────────────────

/// Launches headless Chromium over the DevTools protocol.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher {
    /// Auto-detected when `None`.
    pub executable: Option<PathBuf>,
    pub no_sandbox: bool,
}

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BuildError> {
        let mut builder = BrowserConfig::builder();
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder.build().map_err(BuildError::BrowserLaunch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BuildError::BrowserLaunch(e.to_string()))?;

        // The CDP connection only makes progress while its handler is polled.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {e}");
                    break;
                }
            }
        });

        info!("Browser session started");
        Ok(Box::new(ChromiumSession {
            browser,
            handler_task: Some(handler_task),
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn export_pdf(
        &self,
        html: &str,
        destination: &Path,
        page: &PdfPageConfig,
    ) -> Result<(), BuildError> {
        let export_failed = |e: chromiumoxide::error::CdpError| {
            BuildError::PdfExportFailed(format!("{}: {e}", destination.display()))
        };

        let tab = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(export_failed)?;

        let printed = async {
            tab.set_content(html).await?;
            tab.pdf(page.to_print_params()).await
        }
        .await;

        // Close the page whether or not printing worked.
        if let Err(e) = tab.close().await {
            warn!("Failed to close page for {}: {e}", destination.display());
        }

        let bytes = printed.map_err(export_failed)?;
        tokio::fs::write(destination, bytes).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BuildError> {
        let closed = self
            .browser
            .close()
            .await
            .map_err(|e| BuildError::BrowserLaunch(format!("close failed: {e}")));
        if let Err(e) = self.browser.wait().await {
            warn!("Browser process did not exit cleanly: {e}");
        }
        if let Some(task) = self.handler_task.take() {
            let _ = task.await;
        }
        info!("Browser session closed");
        closed.map(|_| ())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}
