//! Locating `git-http-backend`.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::ConfigError;

/// File name of the backend inside git's exec path.
pub const BACKEND_NAME: &str = "git-http-backend";

/// `$(git --exec-path)/git-http-backend`.
pub fn find_backend_cgi() -> Result<PathBuf, ConfigError> {
    let output = Command::new("git")
        .arg("--exec-path")
        .output()
        .map_err(ConfigError::GitExecPath)?;

    if !output.status.success() {
        return Err(ConfigError::GitExecPathFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let exec_path = String::from_utf8_lossy(&output.stdout);
    let backend = backend_in(exec_path.trim_end_matches(['\r', '\n']));
    tracing::debug!(backend = %backend.display(), "Located backend CGI");
    Ok(backend)
}

/// Backend path inside an exec path directory.
pub fn backend_in(exec_path: impl AsRef<Path>) -> PathBuf {
    exec_path.as_ref().join(BACKEND_NAME)
}
