use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Build-level error type.
///
/// Only the fatal variants (`DirectoryNotFound`, `Manifest`, `Config`, and I/O on the
/// output root) are allowed to stop a run. Everything raised for a single
/// (document, theme) pair is caught by the pipeline, logged, and recorded as a failure.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Input directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Renderer exited with {} for theme '{theme}' on {document}", describe_code(.code))]
    RenderProcessFailed {
        document: String,
        theme: String,
        code: Option<i32>,
    },

    #[error("Renderer reported success but {} was not generated", .0.display())]
    RenderOutputMissing(PathBuf),

    #[error("Renderer timed out after {after:?} for theme '{theme}' on {document}")]
    RenderTimedOut {
        document: String,
        theme: String,
        after: Duration,
    },

    #[error("PDF export failed: {0}")]
    PdfExportFailed(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("Package manifest error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_process_failed_names_theme_and_document() {
        let err = BuildError::RenderProcessFailed {
            document: "bob".to_string(),
            theme: "flat".to_string(),
            code: Some(1),
        };
        let msg = err.to_string();
        assert!(msg.contains("flat"), "message must name the theme: {msg}");
        assert!(msg.contains("bob"), "message must name the document: {msg}");
        assert!(msg.contains("code 1"));
    }

    #[test]
    fn test_signal_termination_has_readable_message() {
        let err = BuildError::RenderProcessFailed {
            document: "alice".to_string(),
            theme: "elegant".to_string(),
            code: None,
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_sub_second_timeout_is_not_rounded_away() {
        let err = BuildError::RenderTimedOut {
            document: "alice".to_string(),
            theme: "elegant".to_string(),
            after: Duration::from_millis(200),
        };
        let msg = err.to_string();
        assert!(msg.contains("200ms"), "got: {msg}");
    }

    #[test]
    fn test_directory_not_found_shows_path() {
        let err = BuildError::DirectoryNotFound(PathBuf::from("/nope/src"));
        assert_eq!(err.to_string(), "Input directory not found: /nope/src");
    }
}
