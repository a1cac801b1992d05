use domain::{
    FetchContext, FetchedFeed, IngestError, Result, Source, SourceConfig, SourceType,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{error, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Runs a user-supplied script and treats its stdout as RSS/Atom. Always
/// invoked through argv `Command`, never a shell string, guarding the one
/// invariant this adapter cannot relax: the resolved script path can never
/// escape the configured scripts directory.
pub struct ScriptSource {
    scripts_dir: PathBuf,
}

impl ScriptSource {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self { scripts_dir: scripts_dir.into() }
    }
}

/// Resolves `relative_path` against `scripts_dir` and rejects the result
/// unless it stays within `scripts_dir` after normalization — blocks
/// `../../etc/passwd`-style traversal even though neither path need exist
/// on disk yet.
pub fn resolve_script_path(scripts_dir: &Path, relative_path: &str) -> Result<PathBuf> {
    if relative_path.is_empty() {
        return Err(IngestError::Validation("script path is empty".to_string()));
    }

    let joined = scripts_dir.join(relative_path);
    let normalized_root = normalize(scripts_dir);
    let normalized = normalize(&joined);

    if !normalized.starts_with(&normalized_root) {
        return Err(IngestError::Validation(format!(
            "script path escapes scripts directory: {relative_path}"
        )));
    }
    Ok(normalized)
}

/// Lexical normalization (no filesystem access): resolves `.`/`..`
/// components the way `path.Clean` does, without requiring the path to
/// exist.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            CurDir => {}
            ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn interpreter_for(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("py") => Some("python3"),
        Some("js") => Some("node"),
        Some("rb") => Some("ruby"),
        Some("sh") => Some("sh"),
        Some("ps1") => Some("powershell"),
        _ => None,
    }
}

#[async_trait::async_trait]
impl Source for ScriptSource {
    fn source_type(&self) -> SourceType {
        SourceType::Script
    }

    fn validate(&self, config: &SourceConfig) -> Result<()> {
        let SourceConfig::Script(script) = config else {
            return Err(IngestError::Validation("not a script config".to_string()));
        };
        resolve_script_path(&self.scripts_dir, &script.script_path)?;
        Ok(())
    }

    async fn fetch(&self, ctx: &FetchContext, config: &SourceConfig) -> Result<FetchedFeed> {
        let SourceConfig::Script(script) = config else {
            return Err(IngestError::Validation("not a script config".to_string()));
        };

        let resolved = resolve_script_path(&self.scripts_dir, &script.script_path)?;
        let timeout = if script.timeout.is_zero() { DEFAULT_TIMEOUT } else { script.timeout };

        let mut command = match interpreter_for(&resolved) {
            Some("powershell") => {
                let mut c = Command::new("powershell");
                c.arg("-File").arg(&resolved);
                c
            }
            Some(interpreter) => {
                let mut c = Command::new(interpreter);
                c.arg(&resolved);
                c
            }
            None => Command::new(&resolved),
        };
        command.args(&script.args).stdout(Stdio::piped()).stdin(Stdio::null()).stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| IngestError::InternalBug(format!("failed to spawn script: {e}")))?;

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");

        let run = async {
            let mut out_buf = Vec::new();
            let mut err_buf = Vec::new();
            let (out_res, err_res, status_res) = tokio::join!(
                stdout.read_to_end(&mut out_buf),
                stderr.read_to_end(&mut err_buf),
                child.wait(),
            );
            out_res.ok();
            err_res.ok();
            (out_buf, err_buf, status_res)
        };

        tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                kill_with_grace(&mut child).await;
                Err(IngestError::Cancelled)
            }
            result = tokio::time::timeout(timeout, run) => {
                match result {
                    Ok((out_buf, err_buf, status_res)) => {
                        let status = status_res
                            .map_err(|e| IngestError::InternalBug(format!("script wait failed: {e}")))?;
                        if !status.success() {
                            let stderr_text = String::from_utf8_lossy(&err_buf);
                            error!(path = %resolved.display(), %stderr_text, "script exited non-zero");
                            return Err(IngestError::RemoteRejected {
                                status: status.code().unwrap_or(-1) as u16,
                                body_snippet: stderr_text.chars().take(200).collect(),
                            });
                        }
                        let stdout_text = String::from_utf8_lossy(&out_buf).into_owned();
                        super::rss::parse_rss(&stdout_text)
                    }
                    Err(_) => {
                        warn!(path = %resolved.display(), "script timed out, killing");
                        kill_with_grace(&mut child).await;
                        Err(IngestError::NetworkTransient("script execution timed out".to_string()))
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

/// SIGTERM first, SIGKILL after `KILL_GRACE` if the process is still
/// alive.
async fn kill_with_grace(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        send_sigterm(pid);
    }
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_relative_path() {
        let root = Path::new("/scripts");
        let resolved = resolve_script_path(root, "feeds/fetch.py").unwrap();
        assert_eq!(resolved, PathBuf::from("/scripts/feeds/fetch.py"));
    }

    #[test]
    fn rejects_parent_directory_traversal() {
        let root = Path::new("/scripts");
        assert!(resolve_script_path(root, "../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_traversal_hidden_inside_a_longer_path() {
        let root = Path::new("/scripts");
        assert!(resolve_script_path(root, "feeds/../../secret").is_err());
    }

    #[test]
    fn rejects_empty_path() {
        let root = Path::new("/scripts");
        assert!(resolve_script_path(root, "").is_err());
    }

    #[test]
    fn picks_interpreter_by_extension() {
        assert_eq!(interpreter_for(Path::new("a.py")), Some("python3"));
        assert_eq!(interpreter_for(Path::new("a.js")), Some("node"));
        assert_eq!(interpreter_for(Path::new("a.ps1")), Some("powershell"));
        assert_eq!(interpreter_for(Path::new("a.bin")), None);
    }
}
