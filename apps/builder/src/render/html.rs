//! HTML Renderer — turns one (document, theme) pair into HTML text.
//!
//! `CliRenderer` shells out to `resumed` (via `npx` by default). The tool writes
//! `<document>.html` into its working directory; the renderer reads it back and
//! removes it. The pipeline depends only on the `ResumeRenderer` trait so tests can
//! swap in an in-memory renderer.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::documents::ResumeDocument;
use crate::errors::BuildError;
use crate::themes::Theme;

/// One operation: (document, theme) → HTML text or error.
#[async_trait]
pub trait ResumeRenderer: Send + Sync {
    async fn render(&self, document: &ResumeDocument, theme: &Theme) -> Result<String, BuildError>;
}

/// Renders through the external CLI:
/// `<program> <base_args…> render <document> -t <prefix><theme>`.
#[derive(Debug, Clone)]
pub struct CliRenderer {
    program: String,
    base_args: Vec<String>,
    work_dir: PathBuf,
    theme_prefix: String,
    timeout: Option<Duration>,
}

impl CliRenderer {
    pub fn new(
        program: impl Into<String>,
        base_args: Vec<String>,
        work_dir: impl Into<PathBuf>,
        theme_prefix: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            base_args,
            work_dir: work_dir.into(),
            theme_prefix: theme_prefix.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Where the tool drops its output for `document`.
    /// Keyed by document name, so two documents never share a temp file.
    pub fn temp_output_path(&self, document: &ResumeDocument) -> PathBuf {
        self.work_dir.join(format!("{}.html", document.name))
    }

    fn command(&self, document: &ResumeDocument, theme: &Theme) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("render")
            .arg(&document.path)
            .arg("-t")
            .arg(theme.package_name(&self.theme_prefix))
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down `npx` and everything under it
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

#[async_trait]
impl ResumeRenderer for CliRenderer {
    /// Steps:
    /// 1. compute the temp path and delete any stale file there
    /// 2. spawn the tool, streaming its output into the log under the theme label
    /// 3. non-zero exit → `RenderProcessFailed`; missing file → `RenderOutputMissing`
    /// 4. read the file, delete it, return the text
    async fn render(&self, document: &ResumeDocument, theme: &Theme) -> Result<String, BuildError> {
        let temp = TempOutput::new(self.temp_output_path(document));
        temp.clear().await?;

        let mut child = self.command(document, theme).spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let theme_label = theme.as_str();
        let doc_label = document.name.as_str();

        let wait = async {
            let (status, _, _) = tokio::join!(
                child.wait(),
                forward_lines(stdout, |line| {
                    debug!(theme = theme_label, document = doc_label, "{line}")
                }),
                forward_lines(stderr, |line| {
                    warn!(theme = theme_label, document = doc_label, "Error with theme {theme_label}: {line}")
                }),
            );
            status
        };

        let finished = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| limit),
            None => Ok(wait.await),
        };

        let status = match finished {
            Ok(status) => status?,
            Err(limit) => {
                // Reap the whole tree before `temp` is dropped, so nothing writes after cleanup.
                kill_process_tree(&mut child).await;
                return Err(BuildError::RenderTimedOut {
                    document: document.name.clone(),
                    theme: theme.to_string(),
                    after: limit,
                });
            }
        };

        if !status.success() {
            return Err(BuildError::RenderProcessFailed {
                document: document.name.clone(),
                theme: theme.to_string(),
                code: status.code(),
            });
        }

        temp.take().await
    }
}

/// Kills the renderer's process group (unix) or the renderer alone, then waits for it.
async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain syscall; `pid` leads the group created in `CliRenderer::command`.
            let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                debug!("killpg({pid}) failed: {}", std::io::Error::last_os_error());
            }
        }
    }
    if let Err(e) = child.start_kill() {
        debug!("Renderer already gone: {e}");
    }
    if let Err(e) = child.wait().await {
        warn!("Failed to reap renderer: {e}");
    }
}

async fn forward_lines<R, F>(stream: Option<R>, mut log: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let Some(stream) = stream else {
        return;
    };
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => log(line.trim_end()),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading renderer output: {e}");
                break;
            }
        }
    }
}

/// The renderer's temp file. Removed on drop so no exit path leaves it behind.
struct TempOutput {
    path: PathBuf,
}

impl TempOutput {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn clear(&self) -> Result<(), BuildError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Removed stale {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn take(self) -> Result<String, BuildError> {
        if !exists(&self.path).await {
            return Err(BuildError::RenderOutputMissing(self.path.clone()));
        }
        let bytes = tokio::fs::read(&self.path).await?;
        tokio::fs::remove_file(&self.path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Drop for TempOutput {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(dir: &Path, name: &str) -> ResumeDocument {
        let path = dir.join(format!("{name}.json"));
        std::fs::write(&path, r#"{"basics": {"name": "Test"}}"#).unwrap();
        ResumeDocument::from_path(path)
    }

    /// `sh -c <script> render <doc> -t <theme>` → `$1` = doc, `$3` = theme package.
    #[cfg(unix)]
    fn sh_renderer(work_dir: &Path, script: &str) -> CliRenderer {
        CliRenderer::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            work_dir,
            "jsonresume-theme-",
        )
    }

    #[test]
    fn test_temp_output_path_is_keyed_by_document() {
        let renderer = CliRenderer::new("npx", vec!["resumed".into()], "/cv", "jsonresume-theme-");
        let alice = ResumeDocument::from_path("/cv/src/alice.json");
        let bob = ResumeDocument::from_path("/cv/src/bob.json");
        assert_eq!(renderer.temp_output_path(&alice), PathBuf::from("/cv/alice.html"));
        assert_ne!(renderer.temp_output_path(&alice), renderer.temp_output_path(&bob));
    }

    #[test]
    fn test_command_passes_render_arguments() {
        let renderer = CliRenderer::new("npx", vec!["resumed".into()], "/cv", "jsonresume-theme-");
        let doc = ResumeDocument::from_path("/cv/src/alice.json");
        let cmd = renderer.command(&doc, &Theme::new("elegant"));
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "npx");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["resumed", "render", "/cv/src/alice.json", "-t", "jsonresume-theme-elegant"]
        );
        assert_eq!(std_cmd.get_current_dir(), Some(Path::new("/cv")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_render_returns_html_and_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document(dir.path(), "alice");
        let renderer = sh_renderer(
            dir.path(),
            r#"echo "<html>$3</html>" > "$(basename "$1" .json).html""#,
        );

        let html = renderer.render(&doc, &Theme::new("elegant")).await.unwrap();

        assert_eq!(html.trim(), "<html>jsonresume-theme-elegant</html>");
        assert!(
            !renderer.temp_output_path(&doc).exists(),
            "temp file must be removed after a successful render"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_render_process_failed() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document(dir.path(), "bob");
        let renderer = sh_renderer(
            dir.path(),
            r#"echo partial > "$(basename "$1" .json).html"; echo "theme blew up" >&2; exit 1"#,
        );

        let err = renderer.render(&doc, &Theme::new("flat")).await.unwrap_err();

        assert!(
            matches!(
                err,
                BuildError::RenderProcessFailed { ref document, ref theme, code: Some(1) }
                    if document == "bob" && theme == "flat"
            ),
            "got {err:?}"
        );
        assert!(
            !renderer.temp_output_path(&doc).exists(),
            "temp file must be removed on the failure path too"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_without_output_is_render_output_missing() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document(dir.path(), "alice");
        let renderer = sh_renderer(dir.path(), "exit 0");

        let err = renderer.render(&doc, &Theme::new("elegant")).await.unwrap_err();
        assert!(matches!(err, BuildError::RenderOutputMissing(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_temp_file_is_not_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document(dir.path(), "alice");
        let renderer = sh_renderer(dir.path(), "exit 0");
        std::fs::write(renderer.temp_output_path(&doc), "<html>stale</html>").unwrap();

        let err = renderer.render(&doc, &Theme::new("elegant")).await.unwrap_err();
        assert!(
            matches!(err, BuildError::RenderOutputMissing(_)),
            "a leftover file from an earlier run must not count as output, got {err:?}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_renderer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document(dir.path(), "alice");
        let renderer = sh_renderer(dir.path(), "sleep 30")
            .with_timeout(Some(Duration::from_millis(200)));

        let err = renderer.render(&doc, &Theme::new("elegant")).await.unwrap_err();
        assert!(matches!(err, BuildError::RenderTimedOut { .. }), "got {err:?}");
    }

    /// `npx` forks the real renderer; a timeout must take the grandchild down too.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_background_writer() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document(dir.path(), "alice");
        let renderer = sh_renderer(
            dir.path(),
            r#"(sleep 1; echo late > "$(basename "$1" .json).html") & sleep 30"#,
        )
        .with_timeout(Some(Duration::from_millis(200)));

        let err = renderer.render(&doc, &Theme::new("elegant")).await.unwrap_err();
        assert!(matches!(err, BuildError::RenderTimedOut { .. }), "got {err:?}");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(
            !renderer.temp_output_path(&doc).exists(),
            "no process may write the temp file after a timed-out render returns"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_output_is_decoded_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document(dir.path(), "alice");
        let renderer = sh_renderer(
            dir.path(),
            r#"printf '<p>caf\351</p>' > "$(basename "$1" .json).html""#,
        );

        let html = renderer.render(&doc, &Theme::new("elegant")).await.unwrap();
        assert_eq!(html, "<p>caf\u{FFFD}</p>");
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document(dir.path(), "alice");
        let renderer = CliRenderer::new(
            "definitely-not-a-real-renderer-binary",
            vec![],
            dir.path(),
            "jsonresume-theme-",
        );

        let err = renderer.render(&doc, &Theme::new("elegant")).await.unwrap_err();
        assert!(matches!(err, BuildError::Io(_)), "got {err:?}");
    }
}
