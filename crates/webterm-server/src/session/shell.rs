//! Shell candidates and selection.
//!
//! The first candidate whose executable exists wins. Candidates carry an
//! optional startup line that best-effort sources the user's rc file.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use webterm_core::{TermError, TermResult};

/// A shell the session may run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShellCandidate {
    pub path: PathBuf,
    /// Line sent to the shell right after it starts. Failures are ignored.
    #[serde(default)]
    pub startup: Option<String>,
}

impl ShellCandidate {
    pub fn new(path: impl Into<PathBuf>, startup: Option<&str>) -> Self {
        Self {
            path: path.into(),
            startup: startup.map(str::to_string),
        }
    }

    /// A shell started without a startup line runs without the user's
    /// configuration.
    pub fn is_minimal(&self) -> bool {
        self.startup.is_none()
    }
}

/// zsh, then bash, then the POSIX shell.
pub fn default_candidates() -> Vec<ShellCandidate> {
    vec![
        ShellCandidate::new("/bin/zsh", Some("source ~/.zshrc 2>/dev/null || true")),
        ShellCandidate::new("/bin/bash", Some("source ~/.bashrc 2>/dev/null || true")),
        ShellCandidate::new("/bin/sh", None),
    ]
}

/// Pick the first candidate whose path exists.
pub fn select_shell(candidates: &[ShellCandidate]) -> TermResult<&ShellCandidate> {
    candidates
        .iter()
        .find(|c| is_executable(&c.path))
        .ok_or_else(|| {
            let searched = candidates
                .iter()
                .map(|c| c.path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            TermError::NoShell(searched)
        })
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
