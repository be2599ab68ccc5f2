//! Credential files that reload themselves when they change on disk.

use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{AuthError, Result};

/// A credential file format.
pub(crate) trait CredentialFormat: Sized {
    /// Parse the full file contents. Malformed lines are skipped.
    fn parse(contents: &str) -> Self;
}

struct Loaded<T> {
    modified: Option<SystemTime>,
    entries: Arc<T>,
}

/// A parsed credential file, re-read whenever its modification time moves.
pub(crate) struct CredentialFile<T> {
    path: PathBuf,
    state: RwLock<Loaded<T>>,
}

impl<T: CredentialFormat> CredentialFile<T> {
    /// Load the file. An unreadable file is an error.
    pub(crate) fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (modified, entries) = load::<T>(&path)?;

        Ok(Self {
            path,
            state: RwLock::new(Loaded {
                modified,
                entries: Arc::new(entries),
            }),
        })
    }

    /// Path the file was loaded from.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Current entries, reloading first if the file changed.
    ///
    /// A failed reload keeps the previous entries.
    pub(crate) fn current(&self) -> Arc<T> {
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok();

        {
            let state = self.state.read();
            if modified.is_none() || state.modified == modified {
                return state.entries.clone();
            }
        }

        let mut state = self.state.write();
        if state.modified == modified {
            return state.entries.clone();
        }

        match load::<T>(&self.path) {
            Ok((modified, entries)) => {
                tracing::info!(path = %self.path.display(), "Reloaded credential file");
                state.modified = modified;
                state.entries = Arc::new(entries);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Keeping previous credentials");
                state.modified = modified;
            }
        }

        state.entries.clone()
    }
}

fn load<T: CredentialFormat>(path: &Path) -> Result<(Option<SystemTime>, T)> {
    let read_err = |source| AuthError::ReadFile {
        path: path.to_path_buf(),
        source,
    };

    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(read_err)?;
    let contents = fs::read_to_string(path).map_err(read_err)?;

    Ok((Some(modified), T::parse(&contents)))
}

/// Compare two byte strings without short-circuiting on the first mismatch.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct Lines(Vec<String>);

    impl CredentialFormat for Lines {
        fn parse(contents: &str) -> Self {
            Lines(contents.lines().map(String::from).collect())
        }
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = CredentialFile::<Lines>::open(dir.path().join("nope"));
        assert!(matches!(result, Err(AuthError::ReadFile { .. })));
    }

    #[test]
    fn test_reload_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds");
        fs::write(&path, "alice\n").unwrap();

        let file = CredentialFile::<Lines>::open(&path).unwrap();
        assert_eq!(file.current().0, vec!["alice"]);

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "bob").unwrap();
        drop(f);
        // Force a distinct mtime regardless of filesystem timestamp granularity.
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(file.current().0, vec!["alice", "bob"]);
    }

    #[test]
    fn test_keeps_entries_when_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds");
        fs::write(&path, "alice\n").unwrap();

        let file = CredentialFile::<Lines>::open(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(file.current().0, vec!["alice"]);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
