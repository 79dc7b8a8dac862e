use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Why a requested name was refused. Peers only ever see
/// [`duofetch_protocol::NOT_FOUND_REASON`]; the distinction is for local logs.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    #[error("access denied: path resolves outside the files root")]
    AccessDenied,
    #[error("not found: no regular file at the resolved path")]
    NotFound,
}

/// The files root itself is unusable. Fatal at startup.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("files directory not found: {path}")]
    Missing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("files root is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Maps client-supplied relative names to files confined under one root.
///
/// The requested name is joined to the root and lexically normalized before
/// the prefix check, then canonicalized and checked again so a symlink inside
/// the root cannot point outside it. Stripping leading `../` textually is not
/// enough and is not relied on.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, RootError> {
        let root = root.as_ref();
        let canonical = std::fs::canonicalize(root).map_err(|source| RootError::Missing {
            path: root.to_path_buf(),
            source,
        })?;
        if !canonical.is_dir() {
            return Err(RootError::NotADirectory(canonical));
        }
        Ok(Self { root: canonical })
    }

    /// Canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `requested` to an absolute path of a regular file under the root.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, ResolveError> {
        // An absolute `requested` replaces the root here and fails the prefix check.
        let candidate = normalize(&self.root.join(requested));
        if !candidate.starts_with(&self.root) {
            return Err(ResolveError::AccessDenied);
        }

        let real = std::fs::canonicalize(&candidate).map_err(|_| ResolveError::NotFound)?;
        if !real.starts_with(&self.root) {
            return Err(ResolveError::AccessDenied);
        }

        match std::fs::metadata(&real) {
            Ok(meta) if meta.is_file() => Ok(real),
            _ => Err(ResolveError::NotFound),
        }
    }
}

/// Collapse `.` and `..` without touching the filesystem. `..` at the
/// filesystem root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(segment) => out.push(segment),
        }
    }
    out
}
