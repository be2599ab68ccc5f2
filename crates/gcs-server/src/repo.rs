//! Repository path resolution.
//!
//! Maps a request path to a repository directory under the project root,
//! accepting both `foo.git` and `foo` layouts.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Where a request path points on disk.
///
/// The existence check is a point-in-time answer: the directory may appear
/// or vanish before the backend runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    /// Request path, e.g. `/prefix/foo`.
    pub request_path: String,
    /// Directory for the request path, e.g. `/root/foo`.
    pub request_dir: PathBuf,
    /// Path a client would clone, e.g. `/prefix/foo.git`.
    pub git_path: String,
    /// Repository directory, e.g. `/root/foo.git`.
    pub git_dir: PathBuf,
    /// Whether either directory exists.
    pub exists: bool,
}

impl RepoInfo {
    /// Resolve `request_path` under `uri_prefix` against `project_root`.
    ///
    /// The `.git` directory wins when both exist. A prefix of `""` or `/`
    /// strips nothing.
    pub fn resolve(request_path: &str, uri_prefix: &str, project_root: &Path) -> Self {
        let relative = strip_prefix(request_path, uri_prefix);
        let request_dir = join_url_path(project_root, relative);

        let mut git_dir = OsString::from(request_dir.as_os_str());
        git_dir.push(".git");
        let git_dir = PathBuf::from(git_dir);

        let has_request_dir = request_dir.is_dir();
        let has_git_dir = git_dir.is_dir();

        if !has_git_dir && has_request_dir {
            return Self {
                request_path: request_path.to_string(),
                git_path: request_path.to_string(),
                git_dir: request_dir.clone(),
                request_dir,
                exists: true,
            };
        }

        Self {
            request_path: request_path.to_string(),
            git_path: format!("{request_path}.git"),
            request_dir,
            git_dir,
            exists: has_git_dir || has_request_dir,
        }
    }
}

/// Remove the URI prefix from a request path.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() || prefix == "/" {
        return path;
    }
    path.strip_prefix(prefix).unwrap_or(path)
}

/// Normalise a URL path: collapse `//`, drop `.`, resolve `..`.
///
/// Returns `/` for rooted paths that clean to nothing and `.` for empty
/// relative ones.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(last) if *last != ".." => {
                    segments.pop();
                }
                _ if rooted => {}
                _ => segments.push(".."),
            },
            s => segments.push(s),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Join a URL path onto a directory. `..` cannot climb above `root`.
fn join_url_path(root: &Path, relative: &str) -> PathBuf {
    let cleaned = clean_path(&format!("/{relative}"));
    let relative = cleaned.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}
