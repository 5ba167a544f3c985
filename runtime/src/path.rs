//! Locating the real build tool on the search path.
//!
//! The wrapper is normally installed under the same name as the tool it
//! wraps, so the lookup must never hand back the wrapper itself: neither
//! the directory the wrapper was invoked from nor any candidate that
//! canonicalizes to the running binary is eligible.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Where the currently running binary lives.
#[derive(Debug, Clone, Default)]
pub struct SelfLocation {
    /// Directory the binary was invoked from (argv[0] based, before symlink resolution)
    pub invoked_dir: Option<PathBuf>,
    /// Symlink-free absolute path of the running binary
    pub canonical: Option<PathBuf>,
}

impl SelfLocation {
    pub fn new(invoked_dir: impl Into<PathBuf>, canonical: impl Into<PathBuf>) -> Self {
        Self {
            invoked_dir: Some(invoked_dir.into()),
            canonical: Some(canonical.into()),
        }
    }

    /// Work out the running binary's location from argv[0].
    ///
    /// A bare name (no `/`) was found through the search path, so it is
    /// looked up there the same way the shell would have.
    pub fn detect(argv0: &str, search_path: Option<&str>) -> Self {
        let invoked = if argv0.contains('/') {
            let p = PathBuf::from(argv0);
            if p.is_absolute() {
                Some(p)
            } else {
                std::env::current_dir().ok().map(|cwd| cwd.join(p))
            }
        } else {
            split_search_path(search_path)
                .into_iter()
                .map(|dir| dir.join(argv0))
                .find(|candidate| is_executable(candidate))
        };

        let canonical = std::env::current_exe()
            .and_then(std::fs::canonicalize)
            .ok();

        tracing::debug!(
            invoked = ?invoked,
            canonical = ?canonical,
            "Detected own location"
        );

        Self {
            invoked_dir: invoked.and_then(|p| p.parent().map(Path::to_path_buf)),
            canonical,
        }
    }
}

/// Finds executables on a search path, skipping the running binary.
#[derive(Debug, Clone)]
pub struct PathResolver {
    dirs: Vec<PathBuf>,
    own: SelfLocation,
    skip_own_dir: bool,
}

impl PathResolver {
    pub fn new(search_path: Option<&str>, own: SelfLocation) -> Self {
        Self {
            dirs: split_search_path(search_path),
            own,
            skip_own_dir: true,
        }
    }

    /// Keep the invocation directory in the search.
    ///
    /// Used when the wrapper is run explicitly as a helper rather than
    /// discovered under the real tool's name.
    pub fn search_own_dir(mut self) -> Self {
        self.skip_own_dir = false;
        self
    }

    /// Return the first executable `name` that is not the running binary.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        let own_dir = self
            .own
            .invoked_dir
            .as_deref()
            .map(|d| std::fs::canonicalize(d).unwrap_or_else(|_| d.to_path_buf()));

        for dir in &self.dirs {
            if self.skip_own_dir {
                if let Some(own_dir) = &own_dir {
                    let dir_canonical =
                        std::fs::canonicalize(dir).unwrap_or_else(|_| dir.clone());
                    if &dir_canonical == own_dir {
                        tracing::debug!(dir = %dir.display(), "Skipping own directory");
                        continue;
                    }
                }
            }

            let candidate = dir.join(name);
            let resolved = match std::fs::canonicalize(&candidate) {
                Ok(p) => p,
                Err(_) => continue,
            };

            if self.own.canonical.as_deref() == Some(resolved.as_path()) {
                tracing::debug!(
                    candidate = %candidate.display(),
                    "Skipping candidate that resolves to this binary"
                );
                continue;
            }

            if is_executable(&resolved) {
                tracing::debug!(path = %candidate.display(), "Found executable");
                return Some(candidate);
            }
        }

        None
    }
}

fn split_search_path(search_path: Option<&str>) -> Vec<PathBuf> {
    search_path
        .map(|p| std::env::split_paths(p).collect())
        .unwrap_or_default()
}

/// Exists, is not a directory, and has any execute bit set.
fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => !meta.is_dir() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
