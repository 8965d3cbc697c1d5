use std::path::PathBuf;
use std::time::Duration;

use crate::errors::BuildError;

pub const DEFAULT_THEME_PREFIX: &str = "jsonresume-theme-";
const DEFAULT_RENDER_PROGRAM: &str = "npx";
const DEFAULT_RENDER_ARGS: &str = "resumed";
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PDF_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SETTLE_DELAY_MS: u64 = 250;

/// Build configuration loaded from environment variables.
/// Every variable is optional; defaults reproduce the `npx resumed` project layout.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    pub manifest_path: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Set → single-document run with a flat output root.
    pub single_document: Option<PathBuf>,
    pub theme_prefix: String,
    pub render_program: String,
    pub render_args: Vec<String>,
    /// `None` disables the timeout.
    pub render_timeout: Option<Duration>,
    pub pdf_timeout: Option<Duration>,
    pub settle_delay: Duration,
    pub chrome_executable: Option<PathBuf>,
    pub chrome_no_sandbox: bool,
    pub fail_on_partial: bool,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self, BuildError> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BuildError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project_root = PathBuf::from(var("RESUME_PROJECT_ROOT").unwrap_or_else(|| ".".into()));
        let path_or = |key: &str, default: &str| {
            var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| project_root.join(default))
        };

        Ok(Config {
            manifest_path: path_or("PACKAGE_MANIFEST", "package.json"),
            input_dir: path_or("RESUME_SRC_DIR", "src"),
            output_dir: path_or("RESUME_OUTPUT_DIR", "output"),
            single_document: var("RESUME_FILE").map(PathBuf::from),
            theme_prefix: var("THEME_PREFIX").unwrap_or_else(|| DEFAULT_THEME_PREFIX.into()),
            render_program: var("RENDER_PROGRAM").unwrap_or_else(|| DEFAULT_RENDER_PROGRAM.into()),
            render_args: var("RENDER_ARGS")
                .unwrap_or_else(|| DEFAULT_RENDER_ARGS.into())
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            render_timeout: optional_timeout(
                "RENDER_TIMEOUT_SECS",
                var("RENDER_TIMEOUT_SECS"),
                DEFAULT_RENDER_TIMEOUT_SECS,
            )?,
            pdf_timeout: optional_timeout(
                "PDF_TIMEOUT_SECS",
                var("PDF_TIMEOUT_SECS"),
                DEFAULT_PDF_TIMEOUT_SECS,
            )?,
            settle_delay: Duration::from_millis(parse_or(
                "SETTLE_DELAY_MS",
                var("SETTLE_DELAY_MS"),
                DEFAULT_SETTLE_DELAY_MS,
            )?),
            chrome_executable: var("CHROME_EXECUTABLE").map(PathBuf::from),
            chrome_no_sandbox: parse_flag("CHROME_NO_SANDBOX", var("CHROME_NO_SANDBOX"))?,
            fail_on_partial: parse_flag("FAIL_ON_PARTIAL", var("FAIL_ON_PARTIAL"))?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            project_root,
        })
    }
}

fn parse_or(key: &str, value: Option<String>, default: u64) -> Result<u64, BuildError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| BuildError::Config(format!("{key} must be a non-negative integer, got '{raw}'"))),
    }
}

/// `0` means "no timeout".
fn optional_timeout(
    key: &str,
    value: Option<String>,
    default_secs: u64,
) -> Result<Option<Duration>, BuildError> {
    let secs = parse_or(key, value, default_secs)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn parse_flag(key: &str, value: Option<String>) -> Result<bool, BuildError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(BuildError::Config(format!("{key} must be a boolean, got '{v}'"))),
        },
    }
}
