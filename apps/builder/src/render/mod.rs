// Rendering capabilities consumed by the pipeline.
// html: (document, theme) → HTML text via the external CLI.
// pdf:  HTML text → PDF file via a headless browser session.

pub mod html;
pub mod pdf;

pub use html::{CliRenderer, ResumeRenderer};
pub use pdf::{BrowserSession, ChromiumLauncher, PdfPageConfig, PdfRenderer};
